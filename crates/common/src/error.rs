use thiserror::Error;

/// Canonical graphex error taxonomy used across crates.
///
/// Classification guidance:
/// - [`GraphexError::InvalidConfig`]: node table, partition topology or config contract violations
/// - [`GraphexError::Routing`]: a partition key that no worker owns (fatal, never retried)
/// - [`GraphexError::Transport`]: delivery failed after the retry budget, or payload too large
/// - [`GraphexError::Codec`]: malformed/unknown wire payloads and dangling reference handles
/// - [`GraphexError::Execution`]: runtime record/state shape failures
/// - [`GraphexError::Io`]: raw filesystem/network IO failures from std APIs
#[derive(Debug, Error)]
pub enum GraphexError {
    /// Invalid or inconsistent configuration state.
    ///
    /// Examples:
    /// - node table indices not matching `0..N`
    /// - partition plans with gaps or overlaps
    /// - unparsable `GRAPHEX_*` environment values
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No partition plan claims an evaluated partition key.
    ///
    /// This points at a misconfigured partition topology and aborts the
    /// local operator chain.
    #[error("routing error: {0}")]
    Routing(String),

    /// Messenger failures.
    ///
    /// Examples:
    /// - retry budget exhausted against an unreachable peer
    /// - payload larger than `max_message_bytes`
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire payload failures.
    ///
    /// Both ends are assumed to run structurally compatible plans, so these
    /// are versioning/programming errors rather than data errors.
    ///
    /// Examples:
    /// - unknown wire version or aggregate kind
    /// - reference handle missing from the message side-tables
    #[error("codec error: {0}")]
    Codec(String),

    /// Runtime execution failures.
    ///
    /// Examples:
    /// - partition slot not holding an edge
    /// - merging aggregate states of different kinds
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard graphex result alias.
pub type Result<T> = std::result::Result<T, GraphexError>;
