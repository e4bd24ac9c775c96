//! Result records and the graph element model moved between workers.
//!
//! Architecture role:
//! - [`RawRecord`]: one fixed-arity result row of [`FieldObject`] slots
//! - [`FieldObject`]: closed variant type over every column shape
//! - [`graph`]: canonical vertex/edge representations, shared through `Arc`
//! - [`VertexCache`]: external store of canonical vertices used on decode

pub mod cache;
pub mod field;
pub mod graph;
pub mod record;
pub mod scalar;

pub use cache::{InMemoryVertexCache, VertexCache};
pub use field::{CompositeField, FieldObject, PathStep, TreeField};
pub use graph::{EdgeField, VertexField, VertexPropertyField, VertexSinglePropertyField};
pub use record::RawRecord;
pub use scalar::ScalarValue;
