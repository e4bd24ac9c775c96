//! Typed identifiers shared by the exchange operators and the transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable query identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(
    /// Raw id value.
    pub String,
);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one logical Send/Receive pair.
///
/// Every worker of a query runs the same plan and allocates channel ids in
/// the same order, so equal ids on two workers name the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(
    /// Raw id value.
    pub String,
);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Hands out `"{query}-{seq}"` channel ids in plan-construction order.
#[derive(Debug)]
pub struct ChannelIdGenerator {
    query_id: QueryId,
    next: AtomicU64,
}

impl ChannelIdGenerator {
    pub fn new(query_id: QueryId) -> Self {
        Self {
            query_id,
            next: AtomicU64::new(0),
        }
    }

    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    pub fn next_channel_id(&self) -> ChannelId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        ChannelId(format!("{}-{seq}", self.query_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generators_for_the_same_query_agree() {
        let a = ChannelIdGenerator::new(QueryId("q7".to_string()));
        let b = ChannelIdGenerator::new(QueryId("q7".to_string()));
        let ids_a: Vec<_> = (0..3).map(|_| a.next_channel_id()).collect();
        let ids_b: Vec<_> = (0..3).map(|_| b.next_channel_id()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(ids_a[2].as_str(), "q7-2");
    }
}
