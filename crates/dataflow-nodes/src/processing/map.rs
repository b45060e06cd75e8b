//! Map Task
//!
//! Derives records on a target schema from per-field rules.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Field, FieldType, Node, NodeOptions, Port,
    Record, Result, RowErrors, Schema, SchemaRef,
};
use serde_json::{Map as JsonMap, Value};

/// A mapping function: `(record, context, extra data) -> value`
pub type MapFn = Arc<dyn Fn(&Record, &Context, Option<&Value>) -> Result<Value> + Send + Sync>;

/// How one target field is derived
#[derive(Clone)]
pub enum Rule {
    /// Copy a source field
    Field(String),
    /// A fixed value
    Constant(Value),
    /// Computed from the record, the context and the extra data
    Function(MapFn),
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Field(name) => f.debug_tuple("Field").field(name).finish(),
            Rule::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Rule::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl Rule {
    pub fn field(name: impl Into<String>) -> Self {
        Rule::Field(name.into())
    }

    pub fn constant(value: Value) -> Self {
        Rule::Constant(value)
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Record, &Context, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Rule::Function(Arc::new(f))
    }

    /// A source field's text in lower case, null when empty
    pub fn lowercase(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::function(move |record, _, _| Ok(text_of(record, &field, |s| s.to_lowercase())))
    }

    /// A source field's words, each with the first letter upper case and
    /// the rest lower case, joined by single spaces. Null when empty.
    pub fn capitalise(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::function(move |record, _, _| Ok(text_of(record, &field, capwords)))
    }

    /// A named default from the context, null if unset
    pub fn context_default(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::function(move |_, context, _| Ok(context.default_value(&key).cloned().unwrap_or(Value::Null)))
    }

    /// The first non-null result of several rules
    pub fn choose(rules: Vec<Rule>) -> Self {
        Self::function(move |record, context, extra| {
            for rule in &rules {
                let value = rule.evaluate(record, context, extra)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Ok(Value::Null)
        })
    }

    /// A fresh random UUID per record
    pub fn uuid() -> Self {
        Self::function(|_, _, _| Ok(Value::String(uuid::Uuid::new_v4().to_string())))
    }

    /// The rule's value, falling back to a named context default when null
    pub fn or_default(rule: Rule, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::function(move |record, context, extra| {
            let value = rule.evaluate(record, context, extra)?;
            if value.is_null() {
                Ok(context.default_value(&key).cloned().unwrap_or(Value::Null))
            } else {
                Ok(value)
            }
        })
    }

    /// A source field parsed with the first matching `chrono` format and
    /// written as an ISO 8601 date (or date-time when the format has a
    /// time). Null when no format matches.
    pub fn date(field: impl Into<String>, formats: &[&str]) -> Self {
        let field = field.into();
        let formats: Vec<String> = formats.iter().map(|f| f.to_string()).collect();
        Self::function(move |record, _, _| match text_of(record, &field, |s| s.trim().to_string()) {
            Value::String(text) => Ok(parse_date(&text, &formats).map(Value::String).unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        })
    }

    /// Evaluate the rule for one record. Absent source fields are null.
    pub fn evaluate(&self, record: &Record, context: &Context, extra: Option<&Value>) -> Result<Value> {
        match self {
            Rule::Field(name) => Ok(record.get(name).cloned().unwrap_or(Value::Null)),
            Rule::Constant(value) => Ok(value.clone()),
            Rule::Function(f) => f(record, context, extra),
        }
    }
}

/// A field's text after `f`, with non-text values stringified. Absent
/// fields and empty results are null.
fn text_of(record: &Record, field: &str, f: impl Fn(&str) -> String) -> Value {
    let text = match record.get(field) {
        None => return Value::Null,
        Some(Value::String(s)) => f(s),
        Some(other) => f(&other.to_string()),
    };
    if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    }
}

fn capwords(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn parse_date(text: &str, formats: &[String]) -> Option<String> {
    formats.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
            .or_else(|_| NaiveDate::parse_from_str(text, format).map(|d| d.format("%Y-%m-%d").to_string()))
            .ok()
    })
}

/// Builder for [`Map`] nodes
pub struct MapBuilder {
    id: String,
    input: Port,
    rules: Vec<(String, Rule)>,
    auto: bool,
    target: Option<SchemaRef>,
    extra: Option<Value>,
    options: NodeOptions,
}

impl MapBuilder {
    /// Derive `target` with `rule`
    pub fn rule(mut self, target: impl Into<String>, rule: Rule) -> Self {
        self.rules.push((target.into(), rule));
        self
    }

    /// Copy same-named fields that have no explicit rule
    pub fn auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    /// Map onto an explicit schema instead of a derived one
    pub fn target(mut self, schema: SchemaRef) -> Self {
        self.target = Some(schema);
        self
    }

    /// Extra data passed to every mapping function
    pub fn extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the rules and build the node
    pub fn build(self) -> Result<Map> {
        let input_schema = &self.input.schema;
        for (index, (target, rule)) in self.rules.iter().enumerate() {
            if self.rules[..index].iter().any(|(t, _)| t == target) {
                return Err(EngineError::config(format!(
                    "Map '{}' has two rules for '{}'",
                    self.id, target
                )));
            }
            if let Rule::Field(source) = rule {
                input_schema.require(source)?;
            }
        }

        let target = match self.target {
            Some(target) => {
                for (name, _) in &self.rules {
                    target.require(name)?;
                }
                target
            }
            None => Self::derive_schema(&self.id, input_schema, &self.rules, self.auto)?.into(),
        };

        Ok(Map {
            output: Port::of(&self.id, Map::PORT_OUTPUT, target),
            error: Port::error_port(&self.id, input_schema),
            input: self.input,
            rules: self.rules,
            auto: self.auto,
            extra: self.extra,
            options: self.options,
            id: self.id,
        })
    }

    /// Input fields (when automatic) then each mapped field, typed by the
    /// input declaration of the same name, else by the copied source field,
    /// else as `Any`
    fn derive_schema(id: &str, input: &Schema, rules: &[(String, Rule)], auto: bool) -> Result<Schema> {
        let mut fields: Vec<Field> = if auto { input.fields().to_vec() } else { Vec::new() };
        for (name, rule) in rules {
            if fields.iter().any(|f| &f.name == name) {
                continue;
            }
            let field = match (input.field(name), rule) {
                (Some(declared), _) => declared.clone(),
                (None, Rule::Field(source)) => Field {
                    name: name.clone(),
                    ..input.require(source)?.clone()
                },
                (None, _) => Field::new(name.clone(), FieldType::Any),
            };
            fields.push(field);
        }
        Schema::new(id, fields)
    }
}

/// Map
///
/// Each target field is derived from its rule. Fields without a rule are
/// copied from the same-named input field when `auto` is set, and are
/// otherwise left at the target default. Values are coerced to the target
/// field's type; a rule or coercion failure is a per-record failure.
///
/// # Inputs (from context)
/// - the mapped port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Mapped records
/// - `{id}.error` - Input records that could not be mapped
pub struct Map {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    input: Port,
    output: Port,
    error: Port,
    rules: Vec<(String, Rule)>,
    auto: bool,
    extra: Option<Value>,
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("id", &self.id)
            .field("input", &self.input.id)
            .field("rules", &self.rules)
            .field("auto", &self.auto)
            .finish()
    }
}

impl Map {
    /// Port name for the output
    pub const PORT_OUTPUT: &'static str = "output";

    /// Start building a map over `input`
    pub fn builder(id: impl Into<String>, input: &Port) -> MapBuilder {
        MapBuilder {
            id: id.into(),
            input: input.clone(),
            rules: Vec::new(),
            auto: false,
            target: None,
            extra: None,
            options: NodeOptions::default(),
        }
    }

    pub fn output(&self) -> &Port {
        &self.output
    }

    pub fn error(&self) -> &Port {
        &self.error
    }

    fn rule_for(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|(t, _)| t == name).map(|(_, r)| r)
    }

    fn map_record(&self, record: &Record, context: &Context) -> Result<Record> {
        let input_schema = &self.input.schema;
        let mut data = JsonMap::with_capacity(self.output.schema.len());
        for field in self.output.schema.fields() {
            let value = match self.rule_for(&field.name) {
                Some(rule) => rule.evaluate(record, context, self.extra.as_ref())?,
                None if self.auto && input_schema.contains(&field.name) => {
                    record.value(&field.name, input_schema)
                }
                None => Value::Null,
            };
            let value = if value.is_null() {
                field.default_value()
            } else {
                field.field_type.coerce(&field.name, &value)?
            };
            data.insert(field.name.clone(), value);
        }
        Ok(record.clone().with_data(data))
    }
}

#[async_trait]
impl Node for Map {
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
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut result = Dataset::new(self.output.schema.clone());
        let mut errors = RowErrors::new(&self.id, &self.options);
        for record in input.iter() {
            match self.map_record(record, context) {
                Ok(mapped) => result.push(mapped),
                Err(e) => errors.fail(record, e)?,
            }
        }

        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::MAPPED, result.len() as u64);
        context.bind(&self.output, result)?;
        errors.bind(context, &self.error)
    }
}
