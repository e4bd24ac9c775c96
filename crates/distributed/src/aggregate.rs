//! Distributed aggregation: partial aggregate states and their merge target.
//!
//! Every worker accumulates partial [`AggregateState`]s locally. The
//! [`AggregationCoordinator`] ships them to one fixed target worker, which
//! merges all partials and is the only worker holding the global result.
//!
//! Merge contract:
//! - Count, Sum, Min, Max, Mean, Tree, Group and Subgraph merges are
//!   associative and commutative;
//! - Fold concatenates in arrival order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use graphex_codec::{decode_fields, encode_fields};
use graphex_common::metrics::global_metrics;
use graphex_common::{ChannelId, GraphexError, Result};
use graphex_record::{CompositeField, FieldObject, ScalarValue, TreeField};
use tracing::{debug, info};

use crate::inbound::InboundChannel;
use crate::worker::WorkerContext;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupEntry {
    pub key: FieldObject,
    /// Kept sorted by [`FieldObject::key_string`] so merge order does not show.
    pub values: Vec<FieldObject>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateState {
    Count(i64),
    /// Integer inputs sum exactly in `int`; float inputs sum in `float`.
    /// The result is narrowed to `Int` only when no float was seen and the
    /// total fits in an `i64`.
    Sum { int: i128, float: Option<f64> },
    Min(Option<ScalarValue>),
    Max(Option<ScalarValue>),
    Mean { sum: f64, count: i64 },
    Fold(Vec<FieldObject>),
    Tree(TreeField),
    /// Group key string to entry.
    Group(BTreeMap<String, GroupEntry>),
    /// Element key string to element.
    Subgraph(BTreeMap<String, FieldObject>),
}

impl AggregateState {
    pub fn count() -> Self {
        Self::Count(0)
    }

    pub fn sum() -> Self {
        Self::Sum { int: 0, float: None }
    }

    pub fn min() -> Self {
        Self::Min(None)
    }

    pub fn max() -> Self {
        Self::Max(None)
    }

    pub fn mean() -> Self {
        Self::Mean { sum: 0.0, count: 0 }
    }

    pub fn fold() -> Self {
        Self::Fold(Vec::new())
    }

    pub fn tree() -> Self {
        Self::Tree(TreeField::root())
    }

    pub fn group() -> Self {
        Self::Group(BTreeMap::new())
    }

    pub fn subgraph() -> Self {
        Self::Subgraph(BTreeMap::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Count(_) => "count",
            Self::Sum { .. } => "sum",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Mean { .. } => "mean",
            Self::Fold(_) => "fold",
            Self::Tree(_) => "tree",
            Self::Group(_) => "group",
            Self::Subgraph(_) => "subgraph",
        }
    }

    /// Folds one local input value into the state.
    ///
    /// Tree takes a path or collection (root-to-leaf nodes); group takes a
    /// map whose entries are (key, value) pairs.
    pub fn accumulate(&mut self, value: &FieldObject) -> Result<()> {
        let kind = self.kind();
        match self {
            Self::Count(n) => *n += 1,
            Self::Sum { int, float } => match scalar_input(value, kind)? {
                ScalarValue::Int(v) => *int = add_exact(*int, i128::from(*v))?,
                other => *float = Some(float.unwrap_or(0.0) + numeric(other)?),
            },
            Self::Min(current) => keep_extreme(current, scalar_input(value, kind)?, true)?,
            Self::Max(current) => keep_extreme(current, scalar_input(value, kind)?, false)?,
            Self::Mean { sum, count } => {
                *sum += numeric(scalar_input(value, kind)?)?;
                *count += 1;
            }
            Self::Fold(items) => items.push(value.clone()),
            Self::Tree(tree) => match value {
                FieldObject::Path(steps) => tree.add_path(steps.iter().map(|s| s.field.clone())),
                FieldObject::Collection(items) => tree.add_path(items.iter().cloned()),
                other => return Err(shape_error(kind, other)),
            },
            Self::Group(groups) => match value {
                FieldObject::Map(entries) => {
                    for (key, item) in entries {
                        add_to_group(groups, key.clone(), vec![item.clone()]);
                    }
                }
                other => return Err(shape_error(kind, other)),
            },
            Self::Subgraph(elements) => keep_canonical(elements, value.key_string(), value.clone()),
        }
        Ok(())
    }

    /// Merges another partial of the same kind into this one.
    pub fn merge(&mut self, other: AggregateState) -> Result<()> {
        match (self, other) {
            (Self::Count(a), Self::Count(b)) => *a += b,
            (Self::Sum { int, float }, Self::Sum { int: i, float: f }) => {
                *int = add_exact(*int, i)?;
                if let Some(f) = f {
                    *float = Some(float.unwrap_or(0.0) + f);
                }
            }
            (Self::Min(a), Self::Min(Some(b))) => keep_extreme(a, &b, true)?,
            (Self::Max(a), Self::Max(Some(b))) => keep_extreme(a, &b, false)?,
            (Self::Min(_), Self::Min(None)) | (Self::Max(_), Self::Max(None)) => {}
            (Self::Mean { sum, count }, Self::Mean { sum: s, count: c }) => {
                *sum += s;
                *count += c;
            }
            (Self::Fold(a), Self::Fold(b)) => a.extend(b),
            (Self::Tree(a), Self::Tree(b)) => merge_tree(a, b),
            (Self::Group(a), Self::Group(b)) => {
                for (_, entry) in b {
                    add_to_group(a, entry.key, entry.values);
                }
            }
            (Self::Subgraph(a), Self::Subgraph(b)) => {
                for (key, element) in b {
                    keep_canonical(a, key, element);
                }
            }
            (a, b) => {
                return Err(GraphexError::Execution(format!(
                    "cannot merge {} state into {} state",
                    b.kind(),
                    a.kind()
                )))
            }
        }
        Ok(())
    }

    /// Final aggregate value.
    pub fn result(&self) -> FieldObject {
        match self {
            Self::Count(n) => FieldObject::scalar(*n),
            Self::Sum { int, float } => match (i64::try_from(*int), float) {
                (Ok(total), None) => FieldObject::scalar(total),
                (_, float) => FieldObject::scalar(*int as f64 + float.unwrap_or(0.0)),
            },
            Self::Min(v) | Self::Max(v) => {
                FieldObject::Scalar(v.clone().unwrap_or(ScalarValue::Null))
            }
            Self::Mean { sum, count } => {
                if *count == 0 {
                    FieldObject::Scalar(ScalarValue::Null)
                } else {
                    FieldObject::scalar(*sum / *count as f64)
                }
            }
            Self::Fold(items) => FieldObject::Collection(items.clone()),
            Self::Tree(tree) => FieldObject::Tree(tree.clone()),
            Self::Group(groups) => FieldObject::Map(
                groups
                    .values()
                    .map(|entry| (entry.key.clone(), FieldObject::Collection(entry.values.clone())))
                    .collect(),
            ),
            Self::Subgraph(elements) => FieldObject::Collection(elements.values().cloned().collect()),
        }
    }

    /// Wire form: `Composite { kind, state }`.
    pub fn to_field(&self) -> FieldObject {
        let state = match self {
            Self::Mean { sum, count } => {
                FieldObject::Collection(vec![FieldObject::scalar(*sum), FieldObject::scalar(*count)])
            }
            Self::Min(v) | Self::Max(v) => {
                FieldObject::Scalar(v.clone().unwrap_or(ScalarValue::Null))
            }
            // The integer part travels as text: it may exceed i64.
            Self::Sum { int, float } => FieldObject::Collection(vec![
                FieldObject::scalar(int.to_string()),
                FieldObject::Scalar(float.map_or(ScalarValue::Null, ScalarValue::Float)),
            ]),
            other => other.result(),
        };
        FieldObject::Composite(CompositeField::new(vec![
            ("kind".to_string(), FieldObject::scalar(self.kind())),
            ("state".to_string(), state),
        ]))
    }

    /// Inverse of [`Self::to_field`].
    pub fn from_field(field: &FieldObject) -> Result<Self> {
        let malformed = |what: &str| GraphexError::Codec(format!("malformed aggregate state: {what}"));
        let FieldObject::Composite(composite) = field else {
            return Err(malformed(field.kind_name()));
        };
        let kind = match composite.get("kind").and_then(FieldObject::as_scalar) {
            Some(ScalarValue::String(kind)) => kind.as_str(),
            _ => return Err(malformed("missing kind")),
        };
        let state = composite.get("state").ok_or_else(|| malformed("missing state"))?;
        let scalar = || state.as_scalar().cloned().ok_or_else(|| malformed(kind));
        let optional = |v: ScalarValue| (!v.is_null()).then_some(v);

        Ok(match kind {
            "count" => match scalar()? {
                ScalarValue::Int(n) => Self::Count(n),
                _ => return Err(malformed(kind)),
            },
            "sum" => match state {
                FieldObject::Collection(parts) => match parts.as_slice() {
                    [FieldObject::Scalar(ScalarValue::String(int)), FieldObject::Scalar(float)] => {
                        Self::Sum {
                            int: int.parse().map_err(|_| malformed(kind))?,
                            float: match float {
                                ScalarValue::Null => None,
                                ScalarValue::Float(f) => Some(*f),
                                _ => return Err(malformed(kind)),
                            },
                        }
                    }
                    _ => return Err(malformed(kind)),
                },
                _ => return Err(malformed(kind)),
            },
            "min" => Self::Min(optional(scalar()?)),
            "max" => Self::Max(optional(scalar()?)),
            "mean" => match state {
                FieldObject::Collection(parts) => match parts.as_slice() {
                    [FieldObject::Scalar(ScalarValue::Float(sum)), FieldObject::Scalar(ScalarValue::Int(count))] => {
                        Self::Mean {
                            sum: *sum,
                            count: *count,
                        }
                    }
                    _ => return Err(malformed(kind)),
                },
                _ => return Err(malformed(kind)),
            },
            "fold" => match state {
                FieldObject::Collection(items) => Self::Fold(items.clone()),
                _ => return Err(malformed(kind)),
            },
            "tree" => match state {
                FieldObject::Tree(tree) => Self::Tree(tree.clone()),
                _ => return Err(malformed(kind)),
            },
            "group" => match state {
                FieldObject::Map(entries) => {
                    let mut groups = BTreeMap::new();
                    for (key, values) in entries {
                        let FieldObject::Collection(values) = values else {
                            return Err(malformed(kind));
                        };
                        add_to_group(&mut groups, key.clone(), values.clone());
                    }
                    Self::Group(groups)
                }
                _ => return Err(malformed(kind)),
            },
            "subgraph" => match state {
                FieldObject::Collection(elements) => Self::Subgraph(
                    elements
                        .iter()
                        .map(|element| (element.key_string(), element.clone()))
                        .collect(),
                ),
                _ => return Err(malformed(kind)),
            },
            unknown => {
                return Err(GraphexError::Codec(format!(
                    "unknown aggregate kind '{unknown}'"
                )))
            }
        })
    }
}

fn shape_error(kind: &str, value: &FieldObject) -> GraphexError {
    GraphexError::Execution(format!(
        "{kind} aggregate cannot take a {} input",
        value.kind_name()
    ))
}

fn scalar_input<'a>(value: &'a FieldObject, kind: &str) -> Result<&'a ScalarValue> {
    value.as_scalar().ok_or_else(|| shape_error(kind, value))
}

fn numeric(value: &ScalarValue) -> Result<f64> {
    match value {
        ScalarValue::Int(v) => Ok(*v as f64),
        ScalarValue::Float(v) => Ok(*v),
        other => Err(GraphexError::Execution(format!(
            "expected a number, got {}",
            other.type_name()
        ))),
    }
}

fn add_exact(a: i128, b: i128) -> Result<i128> {
    a.checked_add(b)
        .ok_or_else(|| GraphexError::Execution("integer sum overflowed i128".to_string()))
}

fn scalar_rank(value: &ScalarValue) -> u8 {
    match value {
        ScalarValue::Null => 0,
        ScalarValue::Bool(_) => 1,
        ScalarValue::Int(_) => 2,
        ScalarValue::Float(_) => 3,
        ScalarValue::String(_) => 4,
    }
}

/// Orders two elements that share a key string; `Debug` text is stable for
/// every field type.
fn canonical_cmp(a: &FieldObject, b: &FieldObject) -> Ordering {
    a.kind_name()
        .cmp(b.kind_name())
        .then_with(|| format!("{a:?}").cmp(&format!("{b:?}")))
}

fn keep_extreme(current: &mut Option<ScalarValue>, candidate: &ScalarValue, min: bool) -> Result<()> {
    if candidate.is_null() {
        return Ok(());
    }
    let replace = match current {
        None => true,
        Some(existing) => {
            // Numerically equal int and float: the int wins for min, the float for max.
            let ord = candidate
                .try_cmp(existing)?
                .then_with(|| scalar_rank(candidate).cmp(&scalar_rank(existing)));
            if min {
                ord.is_lt()
            } else {
                ord.is_gt()
            }
        }
    };
    if replace {
        *current = Some(candidate.clone());
    }
    Ok(())
}

fn add_to_group(groups: &mut BTreeMap<String, GroupEntry>, key: FieldObject, values: Vec<FieldObject>) {
    let entry = groups.entry(key.key_string()).or_insert_with(|| GroupEntry {
        key: key.clone(),
        values: Vec::new(),
    });
    if canonical_cmp(&key, &entry.key).is_lt() {
        entry.key = key;
    }
    entry.values.extend(values);
    entry
        .values
        .sort_by(|a, b| a.key_string().cmp(&b.key_string()).then_with(|| canonical_cmp(a, b)));
}

fn keep_canonical(elements: &mut BTreeMap<String, FieldObject>, key: String, element: FieldObject) {
    match elements.get_mut(&key) {
        Some(existing) if canonical_cmp(&element, existing).is_lt() => *existing = element,
        Some(_) => {}
        None => {
            elements.insert(key, element);
        }
    }
}

fn merge_tree(into: &mut TreeField, other: TreeField) {
    for (key, child) in other.children {
        match into.children.get_mut(&key) {
            Some(existing) => {
                if canonical_cmp(&child.node, &existing.node).is_lt() {
                    existing.node = child.node.clone();
                }
                merge_tree(existing, child)
            }
            None => {
                into.children.insert(key, child);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How the merge target is chosen.
pub enum AggregateTargetPolicy {
    /// Always the given worker index.
    Fixed(usize),
}

impl Default for AggregateTargetPolicy {
    fn default() -> Self {
        Self::Fixed(0)
    }
}

/// Ships partial states to the target worker and merges them there.
pub struct AggregationCoordinator {
    ctx: Arc<WorkerContext>,
    channel_id: ChannelId,
    channel: Arc<InboundChannel>,
    target: usize,
    round: u64,
}

impl AggregationCoordinator {
    pub fn new(ctx: Arc<WorkerContext>, policy: AggregateTargetPolicy) -> Result<Self> {
        let AggregateTargetPolicy::Fixed(target) = policy;
        if target >= ctx.node_count() {
            return Err(GraphexError::InvalidConfig(format!(
                "aggregate target {target} outside node table of {} nodes",
                ctx.node_count()
            )));
        }
        let channel_id = ctx.next_channel_id();
        let channel = ctx.inbound().open(&channel_id);
        Ok(Self {
            ctx,
            channel_id,
            channel,
            target,
            round: 0,
        })
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn is_target(&self) -> bool {
        self.ctx.task_index() == self.target
    }

    /// Returns `true` when `states` now hold the global aggregate.
    ///
    /// Non-target workers send their partials and return `false`; the target
    /// blocks until every other worker's partials arrived and merges them.
    pub fn aggregate(&mut self, states: &mut [AggregateState]) -> Result<bool> {
        if states.is_empty() {
            return Ok(true);
        }
        let me = self.ctx.task_index();
        let round = self.round;
        self.round += 1;

        if !self.is_target() {
            let fields: Vec<FieldObject> = states.iter().map(AggregateState::to_field).collect();
            let payload = encode_fields(&fields)?;
            self.ctx
                .messenger()
                .send_data_with_source(&self.channel_id, round, payload, self.target)?;
            debug!(task = me, peer = self.target, channel = %self.channel_id, "sent partial aggregates");
            return Ok(false);
        }

        let sources: BTreeSet<usize> = (0..self.ctx.node_count()).filter(|i| *i != me).collect();
        let messages = self.channel.wait_for_sources(round, &sources);
        for message in &messages {
            let fields = decode_fields(&message.payload, self.ctx.vertex_cache())?;
            if fields.len() != states.len() {
                return Err(GraphexError::Codec(format!(
                    "worker {:?} sent {} partial aggregates, expected {}",
                    message.source,
                    fields.len(),
                    states.len()
                )));
            }
            for (state, field) in states.iter_mut().zip(&fields) {
                state.merge(AggregateState::from_field(field)?)?;
                global_metrics().record_aggregate_merges(me, state.kind(), 1);
            }
        }
        info!(
            task = me,
            channel = %self.channel_id,
            partials = messages.len(),
            "merged partial aggregates"
        );
        Ok(true)
    }
}

impl Drop for AggregationCoordinator {
    fn drop(&mut self) {
        self.ctx.inbound().close(&self.channel_id);
    }
}
