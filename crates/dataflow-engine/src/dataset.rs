//! Datasets: an ordered sequence of records sharing one schema

use std::sync::Arc;

use crate::record::Record;
use crate::schema::SchemaRef;

/// Shared handle to a published dataset
pub type DatasetRef = Arc<Dataset>;

/// An ordered collection of records conforming to one schema
///
/// Datasets are built by the node that owns them and become read-only once
/// bound into a [`Context`](crate::Context).
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: SchemaRef,
    records: Vec<Record>,
}

impl Dataset {
    /// Create an empty dataset
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    /// Create a dataset from records
    pub fn from_records(schema: SchemaRef, records: Vec<Record>) -> Self {
        Self { schema, records }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Consume the dataset, returning its records
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Number of records carrying error-severity issues
    pub fn error_count(&self) -> usize {
        self.records.iter().filter(|r| r.has_errors()).count()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
