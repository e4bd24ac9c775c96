//! Partition ownership and record routing.
//!
//! Every worker holds the same read-only [`NodeTable`]. A record is routed by
//! extracting a raw partition value, turning it into an integer key with a
//! [`PartitionFunction`] and picking the first node whose plan owns the key.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use graphex_common::{GraphexError, Result};
use graphex_record::{FieldObject, RawRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Slice of the integer partition-key space owned by one worker.
pub enum PartitionPlan {
    /// Half-open range `[start, end)`.
    Range { start: i64, end: i64 },
    /// Explicit key set.
    Values { values: BTreeSet<i64> },
}

impl PartitionPlan {
    pub fn owns(&self, key: i64) -> bool {
        match self {
            Self::Range { start, end } => *start <= key && key < *end,
            Self::Values { values } => values.contains(&key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Identity of one worker for the lifetime of a query.
pub struct NodePlan {
    /// Stable ordinal in `0..N`.
    pub task_index: usize,
    /// `host:port` of the worker's exchange listener.
    pub address: String,
    pub partition_plan: PartitionPlan,
}

/// Ordered, immutable list of all workers of a query.
#[derive(Debug, Clone)]
pub struct NodeTable {
    nodes: Arc<[NodePlan]>,
}

impl NodeTable {
    /// Validates that task indices are exactly `0..N` in order and that every
    /// partition plan owns at least one key.
    pub fn new(nodes: Vec<NodePlan>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(GraphexError::InvalidConfig(
                "node table must contain at least one node".to_string(),
            ));
        }
        for (position, node) in nodes.iter().enumerate() {
            if node.task_index != position {
                return Err(GraphexError::InvalidConfig(format!(
                    "node at position {position} has task index {}",
                    node.task_index
                )));
            }
            match &node.partition_plan {
                PartitionPlan::Range { start, end } if start >= end => {
                    return Err(GraphexError::InvalidConfig(format!(
                        "node {position} has empty partition range [{start}, {end})"
                    )));
                }
                PartitionPlan::Values { values } if values.is_empty() => {
                    return Err(GraphexError::InvalidConfig(format!(
                        "node {position} has an empty partition value set"
                    )));
                }
                _ => {}
            }
        }
        Ok(Self {
            nodes: nodes.into(),
        })
    }

    /// Parses a JSON array of node plans.
    pub fn from_json(json: &str) -> Result<Self> {
        let nodes: Vec<NodePlan> = serde_json::from_str(json)
            .map_err(|e| GraphexError::InvalidConfig(format!("node table decode failed: {e}")))?;
        Self::new(nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, task_index: usize) -> Option<&NodePlan> {
        self.nodes.get(task_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodePlan> {
        self.nodes.iter()
    }

    /// First node, in table order, whose plan owns `key`.
    pub fn owner_of(&self, key: i64) -> Option<usize> {
        self.nodes
            .iter()
            .find(|node| node.partition_plan.owns(key))
            .map(|node| node.task_index)
    }

    /// Checks that every key in `keys` is owned by exactly one node.
    pub fn check_coverage(&self, keys: impl IntoIterator<Item = i64>) -> Result<()> {
        let mut gaps = Vec::new();
        let mut overlaps = BTreeMap::new();
        for key in keys {
            let owners: Vec<usize> = self
                .nodes
                .iter()
                .filter(|node| node.partition_plan.owns(key))
                .map(|node| node.task_index)
                .collect();
            match owners.len() {
                0 => gaps.push(key),
                1 => {}
                _ => {
                    overlaps.insert(key, owners);
                }
            }
        }
        if gaps.is_empty() && overlaps.is_empty() {
            return Ok(());
        }
        Err(GraphexError::InvalidConfig(format!(
            "partition plans do not cover the key space exactly once: unowned keys {gaps:?}, multiply owned keys {overlaps:?}"
        )))
    }
}

/// Maps a raw partition value to an integer partition key.
pub trait PartitionFunction: Send + Sync + fmt::Debug {
    fn evaluate(&self, raw: &str) -> i64;
}

/// Integer values map to themselves; anything else hashes into `0..buckets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOrHashPartitionFunction {
    pub buckets: u64,
}

impl Default for ParseOrHashPartitionFunction {
    fn default() -> Self {
        Self { buckets: 10 }
    }
}

impl PartitionFunction for ParseOrHashPartitionFunction {
    fn evaluate(&self, raw: &str) -> i64 {
        if let Ok(key) = raw.trim().parse::<i64>() {
            return key;
        }
        let mut h = DefaultHasher::new();
        raw.hash(&mut h);
        (h.finish() % self.buckets.max(1)) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Which endpoint of an edge decides the partition.
pub enum TraversalDirection {
    /// Out-vertex.
    Source,
    /// In-vertex.
    Sink,
    /// The endpoint the edge was not read from.
    Other,
    /// Both endpoints are traversed; the out-vertex decides.
    Both,
}

/// Pulls the raw partition value out of a record.
pub trait PartitionKeyExtractor: Send + Sync + fmt::Debug {
    fn extract(&self, record: &RawRecord) -> Result<String>;
}

/// Reads an endpoint partition of the edge in `edge_slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEndpointExtractor {
    pub edge_slot: usize,
    pub direction: TraversalDirection,
}

impl PartitionKeyExtractor for EdgeEndpointExtractor {
    fn extract(&self, record: &RawRecord) -> Result<String> {
        let edge = record
            .get(self.edge_slot)
            .and_then(FieldObject::as_edge)
            .ok_or_else(|| {
                GraphexError::Execution(format!(
                    "partition slot {} does not hold an edge",
                    self.edge_slot
                ))
            })?;
        let partition = match self.direction {
            TraversalDirection::Source | TraversalDirection::Both => &edge.out_v_partition,
            TraversalDirection::Sink => &edge.in_v_partition,
            TraversalDirection::Other => edge.other_v_partition(),
        };
        Ok(partition.to_string())
    }
}

/// Reads a scalar slot's text, or a vertex slot's partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotValueExtractor {
    pub slot: usize,
}

impl PartitionKeyExtractor for SlotValueExtractor {
    fn extract(&self, record: &RawRecord) -> Result<String> {
        match record.get(self.slot) {
            Some(FieldObject::Scalar(value)) => Ok(value.key_string()),
            Some(FieldObject::Vertex(vertex)) => Ok(vertex.partition.clone()),
            Some(other) => Err(GraphexError::Execution(format!(
                "partition slot {} holds a {}, expected a scalar or vertex",
                self.slot,
                other.kind_name()
            ))),
            None => Err(GraphexError::Execution(format!(
                "partition slot {} is empty",
                self.slot
            ))),
        }
    }
}

/// Resolves the worker owning a record.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    nodes: NodeTable,
    extractor: Arc<dyn PartitionKeyExtractor>,
    function: Arc<dyn PartitionFunction>,
}

impl PartitionRouter {
    pub fn new(
        nodes: NodeTable,
        extractor: Arc<dyn PartitionKeyExtractor>,
        function: Arc<dyn PartitionFunction>,
    ) -> Self {
        Self {
            nodes,
            extractor,
            function,
        }
    }

    /// Router over an edge endpoint with the default partition function.
    pub fn edge_endpoint(nodes: NodeTable, edge_slot: usize, direction: TraversalDirection) -> Self {
        Self::new(
            nodes,
            Arc::new(EdgeEndpointExtractor {
                edge_slot,
                direction,
            }),
            Arc::new(ParseOrHashPartitionFunction::default()),
        )
    }

    pub fn route(&self, record: &RawRecord) -> Result<usize> {
        let raw = self.extractor.extract(record)?;
        let key = self.function.evaluate(&raw);
        self.nodes.owner_of(key).ok_or_else(|| {
            GraphexError::Routing(format!(
                "no partition plan owns key {key} (raw partition value {raw:?})"
            ))
        })
    }

    pub fn owner_of(&self, key: i64) -> Result<usize> {
        self.nodes
            .owner_of(key)
            .ok_or_else(|| GraphexError::Routing(format!("no partition plan owns key {key}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use graphex_record::{EdgeField, FieldObject, RawRecord, VertexField};

    use super::*;

    fn node(task_index: usize, partition_plan: PartitionPlan) -> NodePlan {
        NodePlan {
            task_index,
            address: format!("127.0.0.1:{}", 7000 + task_index),
            partition_plan,
        }
    }

    fn three_ranges() -> NodeTable {
        NodeTable::new(vec![
            node(0, PartitionPlan::Range { start: 0, end: 4 }),
            node(1, PartitionPlan::Range { start: 4, end: 7 }),
            node(2, PartitionPlan::Values { values: [7, 8, 9].into() }),
        ])
        .expect("valid table")
    }

    fn edge_record(out_partition: &str, in_partition: &str, reverse: bool) -> RawRecord {
        let mut edge = EdgeField::new("e", "knows", ("a", out_partition), ("b", in_partition));
        edge.is_reverse = reverse;
        RawRecord::from_fields([FieldObject::scalar("x"), FieldObject::Edge(Arc::new(edge))])
    }

    #[test]
    fn every_key_has_exactly_one_owner() {
        let table = three_ranges();
        table.check_coverage(0..10).expect("full coverage");
        for key in 0..10 {
            let owners = table
                .iter()
                .filter(|n| n.partition_plan.owns(key))
                .count();
            assert_eq!(owners, 1, "key {key}");
        }
    }

    #[test]
    fn coverage_reports_gaps_and_overlaps() {
        let gappy = NodeTable::new(vec![
            node(0, PartitionPlan::Range { start: 0, end: 3 }),
            node(1, PartitionPlan::Range { start: 5, end: 10 }),
        ])
        .expect("table");
        let err = gappy.check_coverage(0..10).expect_err("gap at 3,4");
        assert!(err.to_string().contains("[3, 4]"));

        let overlapping = NodeTable::new(vec![
            node(0, PartitionPlan::Range { start: 0, end: 6 }),
            node(1, PartitionPlan::Range { start: 5, end: 10 }),
        ])
        .expect("table");
        assert!(overlapping.check_coverage(0..10).is_err());
    }

    #[test]
    fn node_table_rejects_bad_indices_and_empty_plans() {
        assert!(NodeTable::new(Vec::new()).is_err());
        assert!(NodeTable::new(vec![node(1, PartitionPlan::Range { start: 0, end: 1 })]).is_err());
        assert!(NodeTable::new(vec![node(0, PartitionPlan::Range { start: 3, end: 3 })]).is_err());

        let err = NodeTable::new(vec![
            node(0, PartitionPlan::Range { start: 0, end: 1 }),
            node(1, PartitionPlan::Values { values: Default::default() }),
        ])
        .expect_err("empty value set");
        assert!(matches!(err, GraphexError::InvalidConfig(_)));

        let json = r#"[{"task_index": 0, "address": "w0:7000", "partition_plan": {"type": "values", "values": []}}]"#;
        assert!(NodeTable::from_json(json).is_err());
    }

    #[test]
    fn node_table_loads_from_json() {
        let json = r#"[
            {"task_index": 0, "address": "w0:7000", "partition_plan": {"type": "range", "start": 0, "end": 5}},
            {"task_index": 1, "address": "w1:7000", "partition_plan": {"type": "values", "values": [5, 6, 7, 8, 9]}}
        ]"#;
        let table = NodeTable::from_json(json).expect("json table");
        assert_eq!(table.len(), 2);
        assert_eq!(table.owner_of(6), Some(1));
    }

    #[test]
    fn partition_function_parses_integers_and_hashes_text() {
        let f = ParseOrHashPartitionFunction::default();
        assert_eq!(f.evaluate("7"), 7);
        assert_eq!(f.evaluate("-3"), -3);
        let hashed = f.evaluate("tenant-a");
        assert!((0..10).contains(&hashed));
        assert_eq!(hashed, f.evaluate("tenant-a"));
    }

    #[test]
    fn direction_tags_pick_the_endpoint() {
        let table = three_ranges();
        let record = edge_record("1", "5", false);
        let route = |direction| {
            PartitionRouter::edge_endpoint(table.clone(), 1, direction)
                .route(&record)
                .expect("route")
        };
        assert_eq!(route(TraversalDirection::Source), 0);
        assert_eq!(route(TraversalDirection::Sink), 1);
        assert_eq!(route(TraversalDirection::Other), 1);
        assert_eq!(route(TraversalDirection::Both), 0);

        let reversed = edge_record("1", "5", true);
        let router = PartitionRouter::edge_endpoint(table, 1, TraversalDirection::Other);
        assert_eq!(router.route(&reversed).expect("route"), 0);
    }

    #[test]
    fn unowned_key_is_a_routing_error() {
        let table = three_ranges();
        let router = PartitionRouter::edge_endpoint(table, 1, TraversalDirection::Sink);
        let err = router
            .route(&edge_record("0", "42", false))
            .expect_err("42 has no owner");
        assert!(matches!(err, GraphexError::Routing(_)));
        assert!(matches!(router.owner_of(-1), Err(GraphexError::Routing(_))));
    }

    #[test]
    fn slot_extractor_reads_scalars_and_vertices() {
        let v = Arc::new(VertexField::new("v", "person", "8"));
        let record = RawRecord::from_fields([FieldObject::scalar(3), FieldObject::Vertex(v)]);
        assert_eq!(SlotValueExtractor { slot: 0 }.extract(&record).expect("scalar"), "3");
        assert_eq!(SlotValueExtractor { slot: 1 }.extract(&record).expect("vertex"), "8");
        assert!(SlotValueExtractor { slot: 2 }.extract(&record).is_err());
        assert!(EdgeEndpointExtractor {
            edge_slot: 0,
            direction: TraversalDirection::Sink
        }
        .extract(&record)
        .is_err());
    }
}
