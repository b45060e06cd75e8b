//! Ports: typed, named data channels between nodes

use std::fmt;

use crate::schema::{Schema, SchemaRef};

/// A directed data channel identified by id and typed by a schema
///
/// Node-owned ports are labelled `<node-id>.<port-name>`. Two ports are the
/// same channel when their ids match.
#[derive(Debug, Clone)]
pub struct Port {
    pub id: String,
    pub schema: SchemaRef,
}

impl Port {
    /// Create a port with an explicit id
    pub fn new(id: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            id: id.into(),
            schema,
        }
    }

    /// Create a port owned by a node
    pub fn of(node: &str, name: &str, schema: SchemaRef) -> Self {
        Self::new(format!("{}.{}", node, name), schema)
    }

    /// The error port of a node, typed by the error form of `schema`
    pub fn error_port(node: &str, schema: &Schema) -> Self {
        Self::of(node, "error", schema.error_schema().into())
    }

    /// The part of the id after the owning node, e.g. `output`
    pub fn name(&self) -> &str {
        self.id.rsplit_once('.').map(|(_, name)| name).unwrap_or(&self.id)
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Port {}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
