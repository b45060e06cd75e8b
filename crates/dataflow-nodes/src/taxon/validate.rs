use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EventSink, Index, Issue, MatchPolicy, Node, NodeOptions, Port,
    Result, RowErrors,
};

use super::{TaxonFields, TaxonKeys};

/// Taxon Validate
///
/// Checks that every record has an identifier and that every non-null
/// reference resolves to an identifier in the same dataset. A record that
/// references itself is flagged. Failing records go to the error port with
/// one issue per problem; the rest pass unchanged. Duplicate identifiers
/// fail the node.
///
/// # Inputs (from context)
/// - the validated port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Valid records
/// - `{id}.error` - Invalid records with their issues
#[derive(Debug, Clone)]
pub struct TaxonValidate {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    keys: TaxonKeys,
    fields: TaxonFields,
    input: Port,
    output: Port,
    error: Port,
}

impl TaxonValidate {
    /// Port name for valid records
    pub const PORT_OUTPUT: &'static str = "output";

    pub fn new(id: impl Into<String>, input: &Port, keys: TaxonKeys) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            fields: keys.resolve(&input.schema)?,
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            error: Port::error_port(&id, &input.schema),
            options: NodeOptions::default(),
            input: input.clone(),
            keys,
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

    pub fn error(&self) -> &Port {
        &self.error
    }
}

#[async_trait]
impl Node for TaxonValidate {
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
        let index = Index::build(&input, self.fields.identifier.clone(), MatchPolicy::Unique)?;
        let mut result = Dataset::new(self.output.schema.clone());
        let mut errors = RowErrors::new(&self.id, &self.options);

        for record in input.iter() {
            let id = self.fields.id_of(record);
            let mut issues = Vec::new();
            if id.is_null() {
                issues.push(
                    Issue::error("missing-identifier", "Missing identifier")
                        .on_field(self.keys.identifier.clone()),
                );
            }
            for (field, reference) in self.fields.references_of(record) {
                if reference == id {
                    issues.push(
                        Issue::error("self-reference", format!("{} {} refers to itself", field, reference))
                            .on_field(field),
                    );
                } else if !index.contains(&reference) {
                    issues.push(
                        Issue::error(
                            "unresolved-reference",
                            format!("{} {} does not resolve", field, reference),
                        )
                        .on_field(field),
                    );
                }
            }
            if issues.is_empty() {
                result.push(record.clone());
            } else {
                errors.quarantine(record.clone(), issues);
            }
        }

        log::debug!(
            "TaxonValidate {}: {} of {} records invalid",
            self.id,
            errors.len(),
            input.len()
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.count(&self.id, counter::INVALID, errors.len() as u64);
        context.bind(&self.output, result)?;
        errors.bind(context, &self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxon::tests::{bind, ids, taxon};
    use dataflow_engine::{EngineError, NullEventSink, MESSAGES_FIELD};

    #[tokio::test]
    async fn test_flags_each_problem() {
        let mut context = Context::new();
        let port = bind(
            &mut context,
            "source",
            vec![
                taxon(1, "1", "", "", "Plantae"),
                taxon(2, "2", "1", "", "Acacia"),
                taxon(3, "3", "99", "2", "Racosperma"),
                taxon(4, "", "1", "", "Nameless"),
                taxon(5, "5", "5", "5", "Loop"),
            ],
        );
        let node = TaxonValidate::new("validate", &port, TaxonKeys::darwin_core()).unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(ids(&context, node.output()), vec!["1", "2"]);
        let errors = context.resolve(node.error()).unwrap();
        let codes: Vec<Vec<&str>> = errors
            .iter()
            .map(|r| r.issues().iter().map(|i| i.code.as_str()).collect())
            .collect();
        assert_eq!(
            codes,
            vec![
                vec!["unresolved-reference"],
                vec!["missing-identifier"],
                vec!["self-reference", "self-reference"],
            ]
        );
        assert_eq!(
            errors.records()[0].get_str(MESSAGES_FIELD),
            Some("parentNameUsageID \"99\" does not resolve")
        );
        assert_eq!(context.count_of("validate", counter::INVALID), 3);
    }

    #[tokio::test]
    async fn test_duplicate_identifier() {
        let mut context = Context::new();
        let port = bind(
            &mut context,
            "source",
            vec![taxon(1, "1", "", "", "Plantae"), taxon(2, "1", "", "", "Fungi")],
        );
        let node = TaxonValidate::new("validate", &port, TaxonKeys::darwin_core()).unwrap();
        let err = node.execute(&mut context, &NullEventSink).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { ref key } if key == "\"1\""));
    }
}
