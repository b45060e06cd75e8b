//! Taxon graph repair
//!
//! Nodes that enforce referential integrity over hierarchical records: each
//! record has an identifier and references its parent (and optionally its
//! accepted name) by identifier within the same dataset.
//!
//! - [`TaxonValidate`]: flags records with missing identifiers or dangling references
//! - [`TaxonClean`]: removes dangling records until the references close
//! - [`TaxonTrail`]: pulls referenced ancestors in from a reference dataset
//! - [`TaxonReidentify`]: replaces identifiers and rewrites references

mod clean;
mod reidentify;
mod trail;
mod validate;

pub use clean::TaxonClean;
pub use reidentify::{TaxonReidentify, MAPPED_ID, ORIGINAL_ID};
pub use trail::TaxonTrail;
pub use validate::TaxonValidate;

use dataflow_engine::{Key, Keys, Record, Result, Schema};
use serde::{Deserialize, Serialize};

/// The identifier and reference fields of a taxon dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonKeys {
    /// The record identifier
    pub identifier: String,
    /// Reference to the parent record
    pub parent: String,
    /// Reference to the accepted record, for synonyms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<String>,
}

impl TaxonKeys {
    pub fn new(identifier: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            parent: parent.into(),
            accepted: None,
        }
    }

    pub fn with_accepted(mut self, accepted: impl Into<String>) -> Self {
        self.accepted = Some(accepted.into());
        self
    }

    /// Darwin Core names: `taxonID`, `parentNameUsageID`, `acceptedNameUsageID`
    pub fn darwin_core() -> Self {
        Self::new("taxonID", "parentNameUsageID").with_accepted("acceptedNameUsageID")
    }

    /// The reference fields, parent first
    pub fn reference_fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.parent.as_str()).chain(self.accepted.as_deref())
    }

    /// Resolve the field names against a schema
    pub(crate) fn resolve(&self, schema: &Schema) -> Result<TaxonFields> {
        Ok(TaxonFields {
            identifier: Keys::single(schema, &self.identifier)?,
            references: self
                .reference_fields()
                .map(|field| Keys::single(schema, field))
                .collect::<Result<_>>()?,
        })
    }
}

/// [`TaxonKeys`] resolved against a schema
#[derive(Debug, Clone)]
pub(crate) struct TaxonFields {
    pub identifier: Keys,
    pub references: Vec<Keys>,
}

impl TaxonFields {
    pub fn id_of(&self, record: &Record) -> Key {
        self.identifier.key_of(record)
    }

    /// The parent reference of a record, null when unset
    pub fn parent_of(&self, record: &Record) -> Key {
        self.references[0].key_of(record)
    }

    /// The field name and key of each non-null reference of a record
    pub fn references_of(&self, record: &Record) -> Vec<(&str, Key)> {
        self.references
            .iter()
            .map(|keys| (keys.fields()[0].as_str(), keys.key_of(record)))
            .filter(|(_, key)| !key.is_null())
            .collect()
    }
}
