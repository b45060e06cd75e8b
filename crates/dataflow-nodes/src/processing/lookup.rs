//! Lookup Task
//!
//! Joins each input record with the matching record(s) of a lookup dataset.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Field, Index, Issue, Keys, MatchPolicy,
    Node, NodeOptions, Port, Record, Result, RowErrors, Schema,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which fields one side of a lookup contributes, and under what names.
///
/// Precedence is `map` over `include` over `exclude` over pass-through.
/// The prefix renames included, non-excluded and passed-through fields but
/// never explicitly mapped ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldSelection {
    /// Source field to output name
    pub map: Option<BTreeMap<String, String>>,
    /// Fields taken under their own (prefixed) name
    pub include: Option<Vec<String>>,
    /// Fields left out
    pub exclude: Option<Vec<String>>,
    /// Prefix added to output names
    pub prefix: Option<String>,
}

impl FieldSelection {
    pub fn mapped<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            map: Some(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            ..Self::default()
        }
    }

    pub fn include<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            include: Some(names.iter().map(|n| n.as_ref().to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn exclude<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            exclude: Some(names.iter().map(|n| n.as_ref().to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Whether every field passes under its own name
    pub fn is_pass_through(&self) -> bool {
        self.map.is_none() && self.include.is_none() && self.exclude.is_none() && self.prefix.is_none()
    }

    /// The field renaming (`None` for pass-through) and the schema of the
    /// selected fields, in source schema order
    pub fn build(&self, schema: &Schema, name: &str) -> Result<(Option<BTreeMap<String, String>>, Schema)> {
        if self.is_pass_through() {
            return Ok((None, Schema::new(name, schema.fields().to_vec())?));
        }
        let rename = |n: &str| match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, n),
            None => n.to_string(),
        };

        let mut mapping = BTreeMap::new();
        if self.map.is_none() && self.include.is_none() && self.exclude.is_none() {
            for field in schema.fields() {
                mapping.insert(field.name.clone(), rename(&field.name));
            }
        }
        if let Some(exclude) = &self.exclude {
            for field in schema.fields().iter().filter(|f| !exclude.contains(&f.name)) {
                mapping.insert(field.name.clone(), rename(&field.name));
            }
        }
        if let Some(include) = &self.include {
            for n in include {
                schema.require(n)?;
                mapping.insert(n.clone(), rename(n));
            }
        }
        if let Some(map) = &self.map {
            for (from, to) in map {
                schema.require(from)?;
                mapping.insert(from.clone(), to.clone());
            }
        }

        let fields = schema
            .fields()
            .iter()
            .filter_map(|f| {
                mapping.get(&f.name).map(|to| Field {
                    name: to.clone(),
                    ..f.clone()
                })
            })
            .collect();
        Ok((Some(mapping), Schema::new(name, fields)?))
    }
}

/// What to emit when a key matches several lookup records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipleMatch {
    /// One output record per match, in match order
    #[default]
    FanOut,
    /// Only the first match
    FirstOnly,
}

/// Configuration for the lookup task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LookupConfig {
    /// Key fields on the input side
    pub input_keys: Vec<String>,
    /// Key fields on the lookup side, paired with `input_keys`
    pub lookup_keys: Vec<String>,
    /// Input-side field selection
    pub input: FieldSelection,
    /// Lookup-side field selection
    pub lookup: FieldSelection,
    /// Index policy over the lookup dataset
    pub policy: MatchPolicy,
    /// Downgrade a unique index to first-wins
    pub ignore_duplicates: bool,
    /// Behaviour under the multiple policy
    pub multiple: MultipleMatch,
    /// Combine input and lookup fields; otherwise only check existence
    pub merge: bool,
    /// Lookup values replace same-named input values
    pub overwrite: bool,
    /// Send unmatched records to the error port
    pub reject: bool,
    /// Copy unmatched input records to an `unmatched` port
    pub record_unmatched: bool,
    /// Compare text keys without regard to case
    pub case_insensitive: bool,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            input_keys: Vec::new(),
            lookup_keys: Vec::new(),
            input: FieldSelection::default(),
            lookup: FieldSelection::default(),
            policy: MatchPolicy::Unique,
            ignore_duplicates: false,
            multiple: MultipleMatch::FanOut,
            merge: true,
            overwrite: false,
            reject: false,
            record_unmatched: false,
            case_insensitive: false,
        }
    }
}

impl LookupConfig {
    /// Join on `input_key` = `lookup_key`
    pub fn on(input_key: impl Into<String>, lookup_key: impl Into<String>) -> Self {
        Self {
            input_keys: vec![input_key.into()],
            lookup_keys: vec![lookup_key.into()],
            ..Self::default()
        }
    }

    /// The index policy after `ignore_duplicates`
    pub fn effective_policy(&self) -> MatchPolicy {
        match self.policy {
            MatchPolicy::Unique if self.ignore_duplicates => MatchPolicy::First,
            policy => policy,
        }
    }
}

/// Lookup
///
/// Builds an index over the lookup dataset and derives a key from each
/// input record. Matched records are combined with their match(es); with
/// `merge` off only the selected input fields are kept, making the node an
/// existence check. Null values never overwrite.
///
/// # Inputs (from context)
/// - the input port (required)
/// - the lookup port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Joined records
/// - `{id}.unmatched` - Unmatched input records (only with `record_unmatched`)
/// - `{id}.error` - Rejected unmatched records (with `reject`)
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    config: LookupConfig,
    input: Port,
    lookup: Port,
    output: Port,
    unmatched: Option<Port>,
    error: Port,
    input_keys: Keys,
    lookup_keys: Keys,
    input_map: Option<BTreeMap<String, String>>,
    lookup_map: Option<BTreeMap<String, String>>,
}

impl Lookup {
    /// Port name for joined records
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for unmatched input records
    pub const PORT_UNMATCHED: &'static str = "unmatched";

    /// Create a lookup of `input` against `lookup`
    pub fn new(id: impl Into<String>, input: &Port, lookup: &Port, config: LookupConfig) -> Result<Self> {
        let id = id.into();
        let input_keys =
            Keys::new(&input.schema, &config.input_keys)?.with_case_insensitive(config.case_insensitive);
        let lookup_keys =
            Keys::new(&lookup.schema, &config.lookup_keys)?.with_case_insensitive(config.case_insensitive);
        if input_keys.len() != lookup_keys.len() {
            return Err(EngineError::config(format!(
                "Lookup '{}' pairs {} input keys with {} lookup keys",
                id,
                input_keys.len(),
                lookup_keys.len()
            )));
        }

        let (input_map, input_schema) = config.input.build(&input.schema, &id)?;
        let (lookup_map, output_schema) = if config.merge {
            let (lookup_map, lookup_schema) = config.lookup.build(&lookup.schema, &id)?;
            (lookup_map, input_schema.merged(&lookup_schema))
        } else {
            (None, input_schema)
        };

        let unmatched = config
            .record_unmatched
            .then(|| Port::of(&id, Self::PORT_UNMATCHED, input.schema.clone()));
        Ok(Self {
            output: Port::of(&id, Self::PORT_OUTPUT, output_schema.into()),
            error: Port::error_port(&id, &input.schema),
            options: NodeOptions::default(),
            input: input.clone(),
            lookup: lookup.clone(),
            unmatched,
            input_keys,
            lookup_keys,
            input_map,
            lookup_map,
            config,
            id,
        })
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn output(&self) -> &Port {
        &self.output
    }

    pub fn unmatched(&self) -> Option<&Port> {
        self.unmatched.as_ref()
    }

    pub fn error(&self) -> &Port {
        &self.error
    }

    pub(super) fn input(&self) -> &Port {
        &self.input
    }

    pub(super) fn table(&self) -> &Port {
        &self.lookup
    }

    /// Index the lookup dataset under the configured policy
    pub(super) fn index<'a>(&self, table: &'a Dataset) -> Result<Index<'a>> {
        Index::build(table, self.lookup_keys.clone(), self.config.effective_policy())
    }

    /// The matches for one record under the configured policy
    pub(super) fn matches<'a>(&self, index: &Index<'a>, record: &Record) -> Vec<&'a Record> {
        match index.policy() {
            MatchPolicy::Multiple => {
                let mut all = index.lookup_all(record, &self.input_keys);
                if self.config.multiple == MultipleMatch::FirstOnly {
                    all.truncate(1);
                }
                all
            }
            _ => index.lookup(record, &self.input_keys).into_iter().collect(),
        }
    }

    fn compose(&self, record: &Record, link: Option<&Record>) -> Record {
        let link = link.filter(|_| self.config.merge);
        if link.is_none() && self.input_map.is_none() {
            return record.clone();
        }
        let mut data = Map::new();
        match link {
            None => remap(record.data(), self.input_map.as_ref(), &mut data),
            Some(link) if self.config.overwrite => {
                remap(record.data(), self.input_map.as_ref(), &mut data);
                remap(link.data(), self.lookup_map.as_ref(), &mut data);
            }
            Some(link) => {
                remap(link.data(), self.lookup_map.as_ref(), &mut data);
                remap(record.data(), self.input_map.as_ref(), &mut data);
            }
        }
        record.clone().with_data(data).mapped(&self.output.schema)
    }
}

/// What joining one input dataset produced
pub(super) struct Joined {
    processed: usize,
    result: Dataset,
    missing: Vec<Record>,
    errors: RowErrors,
    unmatched: u64,
}

impl Lookup {
    /// Join every input record with the links `find` returns for it
    pub(super) fn join<'a, F>(&self, input: &Dataset, mut find: F) -> Joined
    where
        F: FnMut(&Record) -> Vec<&'a Record>,
    {
        let mut joined = Joined {
            processed: input.len(),
            result: Dataset::new(self.output.schema.clone()),
            missing: Vec::new(),
            errors: RowErrors::new(&self.id, &self.options),
            unmatched: 0,
        };
        for record in input.iter() {
            let links = find(record);
            if links.is_empty() {
                joined.unmatched += 1;
                if self.unmatched.is_some() {
                    joined.missing.push(record.clone());
                }
                if self.config.reject {
                    let issue = Issue::error(
                        "unmatched",
                        format!(
                            "No match for {} in '{}'",
                            self.input_keys.key_of(record),
                            self.lookup.id
                        ),
                    );
                    joined.errors.quarantine(record.clone(), vec![issue]);
                } else {
                    joined.result.push(self.compose(record, None));
                }
            } else {
                for link in links {
                    joined.result.push(self.compose(record, Some(link)));
                }
            }
        }
        joined
    }

    /// Count and bind a join's records
    pub(super) fn publish(&self, context: &mut Context, joined: Joined, keys: usize) -> Result<()> {
        log::debug!(
            "Lookup {}: {} records, {} joined, {} unmatched against {} keys",
            self.id,
            joined.processed,
            joined.result.len(),
            joined.unmatched,
            keys
        );
        context.count(&self.id, counter::PROCESSED, joined.processed as u64);
        context.count(&self.id, counter::ACCEPTED, joined.result.len() as u64);
        context.count(&self.id, counter::UNMATCHED, joined.unmatched);
        context.bind(&self.output, joined.result)?;
        if let Some(port) = &self.unmatched {
            context.bind(port, Dataset::from_records(port.schema.clone(), joined.missing))?;
        }
        joined.errors.bind(context, &self.error)
    }
}

/// Copy the non-null values of `from` into `into`, renamed through `mapping`
fn remap(from: &Map<String, Value>, mapping: Option<&BTreeMap<String, String>>, into: &mut Map<String, Value>) {
    for (name, value) in from.iter().filter(|(_, v)| !v.is_null()) {
        match mapping {
            None => {
                into.insert(name.clone(), value.clone());
            }
            Some(mapping) => {
                if let Some(to) = mapping.get(name) {
                    into.insert(to.clone(), value.clone());
                }
            }
        }
    }
}

#[async_trait]
impl Node for Lookup {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        vec![&self.input, &self.lookup]
    }

    fn outputs(&self) -> Vec<&Port> {
        vec![&self.output]
    }

    fn extras(&self) -> Vec<&Port> {
        self.unmatched.iter().collect()
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let table = context.resolve(&self.lookup)?;
        let index = self.index(&table)?;
        let joined = self.join(&input, |record| self.matches(&index, record));
        self.publish(context, joined, index.len())
    }
}
