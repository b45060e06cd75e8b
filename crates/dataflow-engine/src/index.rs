//! Keyed indexes over datasets
//!
//! An [`Index`] is built once over a dataset and answers key lookups in
//! O(1) on average. It borrows the dataset, so it lives only as long as the
//! operation that needs it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::keys::{Key, Keys};
use crate::record::Record;

/// How duplicate keys are treated while building an index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Each key must appear once; a duplicate fails the build
    #[default]
    Unique,
    /// The first record with a key wins; later duplicates are ignored
    First,
    /// Every record with a key is kept, in encounter order
    Multiple,
}

/// A key → record(s) index over a dataset
#[derive(Debug)]
pub struct Index<'a> {
    dataset: &'a Dataset,
    keys: Keys,
    policy: MatchPolicy,
    entries: HashMap<Key, Vec<usize>>,
    ignored: usize,
}

impl<'a> Index<'a> {
    /// Build an index. Records with a null key are not indexed.
    pub fn build(dataset: &'a Dataset, keys: Keys, policy: MatchPolicy) -> Result<Self> {
        let mut entries: HashMap<Key, Vec<usize>> = HashMap::with_capacity(dataset.len());
        let mut ignored = 0;
        for (position, record) in dataset.iter().enumerate() {
            let key = keys.key_of(record);
            if key.is_null() {
                ignored += 1;
                continue;
            }
            match entries.get_mut(&key) {
                None => {
                    entries.insert(key, vec![position]);
                }
                Some(existing) => match policy {
                    MatchPolicy::Multiple => existing.push(position),
                    MatchPolicy::First => ignored += 1,
                    MatchPolicy::Unique => {
                        return Err(EngineError::DuplicateKey {
                            key: key.to_string(),
                        })
                    }
                },
            }
        }
        log::debug!(
            "Built {:?} index on {:?}: {} keys, {} records skipped",
            policy,
            keys.fields(),
            entries.len(),
            ignored
        );
        Ok(Self {
            dataset,
            keys,
            policy,
            entries,
            ignored,
        })
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records left out of the index (null keys and ignored duplicates)
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    fn positions(&self, key: &Key) -> Option<&Vec<usize>> {
        if self.keys.is_case_insensitive() {
            self.entries.get(&key.folded())
        } else {
            self.entries.get(key)
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.positions(key).is_some()
    }

    /// The first record for a key
    pub fn find(&self, key: &Key) -> Option<&'a Record> {
        let dataset = self.dataset;
        self.positions(key)
            .and_then(|positions| positions.first())
            .map(|&p| &dataset.records()[p])
    }

    /// All records for a key, in encounter order
    pub fn find_all(&self, key: &Key) -> Vec<&'a Record> {
        let dataset = self.dataset;
        self.positions(key)
            .map(|positions| positions.iter().map(|&p| &dataset.records()[p]).collect())
            .unwrap_or_default()
    }

    /// Look up the record matching `record` under another set of keys,
    /// e.g. a parent reference resolved against an identifier index
    pub fn lookup(&self, record: &Record, keys: &Keys) -> Option<&'a Record> {
        let key = keys.key_of(record);
        if key.is_null() {
            return None;
        }
        self.find(&key)
    }

    /// All records matching `record` under another set of keys
    pub fn lookup_all(&self, record: &Record, keys: &Keys) -> Vec<&'a Record> {
        let key = keys.key_of(record);
        if key.is_null() {
            return Vec::new();
        }
        self.find_all(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema};
    use serde_json::json;

    fn dataset() -> Dataset {
        let schema = Schema::shared("s", vec![Field::string("id"), Field::string("name")]).unwrap();
        let records = vec![
            Record::from_pairs(1, [("id", json!("a")), ("name", json!("first"))]),
            Record::from_pairs(2, [("id", json!("b")), ("name", json!("other"))]),
            Record::from_pairs(3, [("id", json!("a")), ("name", json!("second"))]),
            Record::from_pairs(4, [("name", json!("no id"))]),
        ];
        Dataset::from_records(schema, records)
    }

    fn id_keys(dataset: &Dataset) -> Keys {
        Keys::single(dataset.schema(), "id").unwrap()
    }

    #[test]
    fn test_unique_rejects_duplicates() {
        let data = dataset();
        let err = Index::build(&data, id_keys(&data), MatchPolicy::Unique).unwrap_err();
        match err {
            EngineError::DuplicateKey { key } => assert_eq!(key, "\"a\""),
            other => panic!("Expected DuplicateKey, got {other:?}"),
        }
    }

    #[test]
    fn test_first_keeps_first() {
        let data = dataset();
        let index = Index::build(&data, id_keys(&data), MatchPolicy::First).unwrap();
        let found = index.find(&Key::single(&json!("a"))).unwrap();
        assert_eq!(found.get_str("name"), Some("first"));
        assert_eq!(index.find_all(&Key::single(&json!("a"))).len(), 1);
        assert_eq!(index.len(), 2);
        // one duplicate plus one null key
        assert_eq!(index.ignored(), 2);
    }

    #[test]
    fn test_multiple_accumulates_in_order() {
        let data = dataset();
        let index = Index::build(&data, id_keys(&data), MatchPolicy::Multiple).unwrap();
        let names: Vec<&str> = index
            .find_all(&Key::single(&json!("a")))
            .into_iter()
            .filter_map(|r| r.get_str("name"))
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(index.find_all(&Key::single(&json!("z"))).is_empty());
    }

    #[test]
    fn test_lookup_with_other_keys() {
        let data = dataset();
        let index = Index::build(&data, id_keys(&data), MatchPolicy::First).unwrap();
        let schema = Schema::new("ref", vec![Field::string("parent")]).unwrap();
        let parent = Keys::single(&schema, "parent").unwrap();
        let child = Record::from_pairs(9, [("parent", json!("b"))]);
        assert_eq!(index.lookup(&child, &parent).and_then(|r| r.get_str("name")), Some("other"));
        assert!(index.lookup(&Record::new(10), &parent).is_none());
    }

    #[test]
    fn test_case_insensitive_index() {
        let data = dataset();
        let keys = id_keys(&data).case_insensitive();
        let index = Index::build(&data, keys, MatchPolicy::First).unwrap();
        assert_eq!(index.find(&Key::single(&json!("B"))).and_then(|r| r.get_str("name")), Some("other"));
        assert!(index.contains(&Key::single(&json!("A"))));

        let schema = Schema::new("ref", vec![Field::string("parent")]).unwrap();
        let parent = Keys::single(&schema, "parent").unwrap();
        let child = Record::from_pairs(9, [("parent", json!("B"))]);
        assert!(index.lookup(&child, &parent).is_some());
        assert!(Index::build(&data, id_keys(&data), MatchPolicy::First)
            .unwrap()
            .lookup(&child, &parent)
            .is_none());
    }
}
