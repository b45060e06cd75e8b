//! Processing nodes
//!
//! Relational-style transforms over datasets: selection, projection,
//! concatenation, per-record mapping, splitting, keyed joins, ordering,
//! variant generation, clustering and de-duplication.

mod accept;
mod cluster;
mod deduplicate;
mod denormalise;
mod filter;
mod lookup;
mod map;
mod merge;
mod parent_lookup;
mod project;
mod sort;
mod variant;

pub use accept::{Accept, AcceptConfig};
pub use cluster::{Cluster, ClusterSelector, Signature, SIGNATURE_FIELD};
pub use deduplicate::Deduplicate;
pub use denormalise::{Denormalise, DenormaliseConfig, Expander, INDEX_FIELD};
pub use filter::{Filter, Predicate};
pub use lookup::{FieldSelection, Lookup, LookupConfig, MultipleMatch};
pub use map::{Map, MapBuilder, MapFn, Rule};
pub use merge::Merge;
pub use parent_lookup::ParentLookup;
pub use project::Project;
pub use sort::{Sort, SortKey};
pub use variant::{Annotation, Variant, VariantFn};
