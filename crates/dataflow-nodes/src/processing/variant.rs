//! Variant Task
//!
//! Generates alternative spellings of a key field.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EventSink, Key, Keys, Node, NodeOptions, Port, Record, Result,
    RowErrors,
};
use serde_json::Value;

/// Derives one variant of a key value, or `None` when it has none
pub type VariantFn = Arc<dyn Fn(&str, &Record) -> Result<Option<String>> + Send + Sync>;

/// Adjusts a variant record, given the variant that produced it
pub type Annotation = Arc<dyn Fn(&str, Record) -> Record + Send + Sync>;

/// Variant
///
/// Each transform is applied to the trimmed text of the key field of every
/// record. A transform result becomes a copy of the record with the key
/// field replaced. A variant equal to an existing key value, or to an
/// earlier variant, is a duplicate: it is dropped (or copied to the reject
/// port) unless duplicates are allowed. Only variants are output; records
/// with a null or non-text key produce none.
///
/// # Inputs (from context)
/// - the varied port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Variant records
/// - `{id}.reject` - Duplicate variants (only with `with_rejects`)
/// - `{id}.error` - Records a transform failed on
#[derive(Clone)]
pub struct Variant {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    keys: Keys,
    transforms: Vec<VariantFn>,
    annotation: Option<Annotation>,
    allow_duplicates: bool,
    input: Port,
    output: Port,
    reject: Option<Port>,
    error: Port,
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .field("transforms", &self.transforms.len())
            .field("allow_duplicates", &self.allow_duplicates)
            .finish()
    }
}

impl Variant {
    /// Port name for variant records
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for duplicate variants
    pub const PORT_REJECT: &'static str = "reject";

    /// Vary the key `field` of `input`
    pub fn new(id: impl Into<String>, input: &Port, field: &str) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            keys: Keys::single(&input.schema, field)?,
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            error: Port::error_port(&id, &input.schema),
            reject: None,
            options: NodeOptions::default(),
            transforms: Vec::new(),
            annotation: None,
            allow_duplicates: false,
            input: input.clone(),
            id,
        })
    }

    /// Add a transform
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str, &Record) -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Adjust each variant record, e.g. to mark it as derived
    pub fn with_annotation<F>(mut self, annotation: F) -> Self
    where
        F: Fn(&str, Record) -> Record + Send + Sync + 'static,
    {
        self.annotation = Some(Arc::new(annotation));
        self
    }

    /// Keep variants that repeat an existing key
    pub fn allowing_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }

    /// Copy duplicate variants to a `reject` port
    pub fn with_rejects(mut self) -> Self {
        self.reject = Some(Port::of(&self.id, Self::PORT_REJECT, self.input.schema.clone()));
        self
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn output(&self) -> &Port {
        &self.output
    }

    pub fn reject(&self) -> Option<&Port> {
        self.reject.as_ref()
    }

    pub fn error(&self) -> &Port {
        &self.error
    }

    /// Every variant record of one record, before duplicate checks
    fn variants(&self, record: &Record) -> Result<Vec<(Key, Record)>> {
        let Some(value) = record.get_str(&self.keys.fields()[0]) else {
            return Ok(Vec::new());
        };
        let value = value.trim();
        let mut variants = Vec::new();
        for transform in &self.transforms {
            let Some(variant) = transform(value, record)? else {
                continue;
            };
            let key = Key::single(&Value::String(variant.clone()));
            let mut varied = self.keys.set(record.clone(), &key)?;
            if let Some(annotation) = &self.annotation {
                varied = annotation(&variant, varied);
            }
            variants.push((self.keys.key_of(&varied), varied));
        }
        Ok(variants)
    }
}

#[async_trait]
impl Node for Variant {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        vec![&self.input]
    }

    fn outputs(&self) -> Vec<&Port> {
        vec![&self.output]
    }

    fn extras(&self) -> Vec<&Port> {
        self.reject.iter().collect()
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut seen: HashSet<Key> = input
            .iter()
            .map(|r| self.keys.key_of(r))
            .filter(|key| !key.is_null())
            .collect();
        let mut result = Dataset::new(self.output.schema.clone());
        let mut duplicates = Vec::new();
        let mut errors = RowErrors::new(&self.id, &self.options);

        for record in input.iter() {
            let variants = match self.variants(record) {
                Ok(variants) => variants,
                Err(e) => {
                    errors.fail(record, e)?;
                    continue;
                }
            };
            for (key, varied) in variants {
                if seen.insert(key) || self.allow_duplicates {
                    result.push(varied);
                } else {
                    duplicates.push(varied);
                }
            }
        }

        log::debug!(
            "Variant {}: {} variants of {} records, {} duplicates",
            self.id,
            result.len(),
            input.len(),
            duplicates.len()
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::VARIANTS, result.len() as u64);
        context.count(&self.id, counter::REJECTED, duplicates.len() as u64);
        context.bind(&self.output, result)?;
        if let Some(port) = &self.reject {
            context.bind(port, Dataset::from_records(port.schema.clone(), duplicates))?;
        }
        errors.bind(context, &self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_engine::{EngineError, Field, NullEventSink, Schema};
    use serde_json::json;

    fn bound() -> (Context, Port) {
        let schema = Schema::shared("s", vec![Field::string("name"), Field::string("note")]).unwrap();
        let port = Port::of("source", "output", schema.clone());
        let records = vec![
            Record::from_pairs(1, [("name", json!(" Acacia dealbata "))]),
            Record::from_pairs(2, [("name", json!("acacia dealbata"))]),
            Record::from_pairs(3, [("name", json!("Eucalyptus"))]),
            Record::from_pairs(4, [("note", json!("no name"))]),
        ];
        let mut context = Context::new();
        context.bind(&port, Dataset::from_records(schema, records)).unwrap();
        (context, port)
    }

    fn names(context: &Context, port: &Port) -> Vec<String> {
        context
            .resolve(port)
            .unwrap()
            .iter()
            .filter_map(|r| r.get_str("name").map(str::to_string))
            .collect()
    }

    fn lower(value: &str, _: &Record) -> Result<Option<String>> {
        Ok(Some(value.to_lowercase()))
    }

    fn upper(value: &str, _: &Record) -> Result<Option<String>> {
        Ok(Some(value.to_uppercase()))
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let (mut context, port) = bound();
        let node = Variant::new("vary", &port, "name")
            .unwrap()
            .transform(lower)
            .transform(upper)
            .with_annotation(|_: &str, record: Record| record.with_value("note", json!("variant")))
            .with_rejects();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(names(&context, node.output()), vec!["ACACIA DEALBATA", "eucalyptus", "EUCALYPTUS"]);
        let output = context.resolve(node.output()).unwrap();
        assert!(output.iter().all(|r| r.get_str("note") == Some("variant")));
        // "acacia dealbata" already exists, and the second record repeats both variants
        assert_eq!(
            names(&context, node.reject().unwrap()),
            vec!["acacia dealbata", "acacia dealbata", "ACACIA DEALBATA"]
        );
        assert_eq!(context.count_of("vary", counter::VARIANTS), 3);
    }

    #[tokio::test]
    async fn test_allow_duplicates_and_failures() {
        let (mut context, port) = bound();
        let node = Variant::new("vary", &port, "name")
            .unwrap()
            .transform(|value: &str, _: &Record| {
                if value.starts_with('E') {
                    Err(EngineError::row("cannot vary"))
                } else {
                    Ok(value.split_whitespace().next().map(str::to_string))
                }
            })
            .allowing_duplicates()
            .with_options(NodeOptions::tolerant());
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(names(&context, node.output()), vec!["Acacia", "acacia"]);
        assert_eq!(context.resolve(node.error()).unwrap().len(), 1);
        assert!(node.extras().is_empty());
    }
}
