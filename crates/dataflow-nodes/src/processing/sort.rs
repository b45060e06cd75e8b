//! Sort Task
//!
//! Orders a dataset by field values or by a computed sort key.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{counter, Context, Dataset, EventSink, Keys, Node, NodeOptions, Port, Record, Result};
use serde_json::Value;

/// Computes the sort key of a record
pub type SortKey = Arc<dyn Fn(&Record) -> Vec<Value> + Send + Sync>;

/// Sort
///
/// A stable sort: records with equal keys keep their input order, also when
/// reversed. Values compare nulls first, then booleans, numbers, text, and
/// arrays or objects by their JSON text.
///
/// # Inputs (from context)
/// - the sorted port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - The same records, in order
#[derive(Clone)]
pub struct Sort {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    key: SortKey,
    reverse: bool,
    input: Port,
    output: Port,
}

impl fmt::Debug for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sort")
            .field("id", &self.id)
            .field("input", &self.input.id)
            .field("reverse", &self.reverse)
            .finish()
    }
}

impl Sort {
    /// Port name for the sorted records
    pub const PORT_OUTPUT: &'static str = "output";

    /// Sort by the values of `fields`, in order
    pub fn new<S: AsRef<str>>(id: impl Into<String>, input: &Port, fields: &[S]) -> Result<Self> {
        let keys = Keys::new(&input.schema, fields)?;
        Ok(Self::by(id, input, move |record: &Record| {
            keys.fields()
                .iter()
                .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
                .collect()
        }))
    }

    /// Sort by a computed key
    pub fn by<F>(id: impl Into<String>, input: &Port, key: F) -> Self
    where
        F: Fn(&Record) -> Vec<Value> + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            options: NodeOptions::default(),
            key: Arc::new(key),
            reverse: false,
            input: input.clone(),
            id,
        }
    }

    /// Largest key first
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn output(&self) -> &Port {
        &self.output
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

/// Total order over JSON values
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.as_f64().unwrap_or(f64::NAN).total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| compare(x, y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

#[async_trait]
impl Node for Sort {
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

    fn errors(&self) -> Vec<&Port> {
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut keyed: Vec<(Vec<Value>, &Record)> = input.iter().map(|r| ((self.key)(r), r)).collect();
        if self.reverse {
            keyed.sort_by(|(a, _), (b, _)| compare_keys(b, a));
        } else {
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b));
        }
        let records = keyed.into_iter().map(|(_, r)| r.clone()).collect();

        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.bind(&self.output, Dataset::from_records(self.output.schema.clone(), records))?;
        Ok(())
    }
}
