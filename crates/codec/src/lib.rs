//! Structural record message codec.
//!
//! A record is flattened into a shape of reference handles plus three
//! deduplicated side-tables (vertices, forward edges, backward edges) and
//! rebuilt in two phases: [`decode_draft`] parses, [`RecordDraft::resolve`]
//! binds handles against the vertex cache.

pub mod layout;
pub mod reader;
pub mod writer;

pub use layout::*;
pub use reader::{decode_draft, decode_fields, decode_record, RecordDraft};
pub use writer::{build_message, encode_fields, encode_record};
