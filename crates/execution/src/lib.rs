#![deny(missing_docs)]

//! Execution-layer primitives shared by local and exchange operators.
//!
//! Architecture role:
//! - pull-based record operator contract
//! - leaf record sources
//! - bounded local buffer for intra-process producer/consumer handoff
//!
//! Key modules:
//! - [`operator`]
//! - [`source`]
//! - [`buffer`]

pub mod buffer;
pub mod operator;
pub mod source;

// Re-export only what you want at the crate root (no globs).
pub use buffer::BoundedBuffer;
pub use operator::{drain, BoxedOperator, RecordOperator};
pub use source::{BufferSource, DrainMode, VecSource};
