//! Wire layout of one record message.
//!
//! Graph elements travel once per message in the side-tables; the record
//! shape refers to them through lightweight handles.

use std::collections::BTreeMap;

use graphex_record::{EdgeField, ScalarValue, VertexField};
use serde::{Deserialize, Serialize};

pub const RECORD_MESSAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub version: u32,
    pub vertices: BTreeMap<String, VertexField>,
    pub forward_edges: BTreeMap<String, EdgeField>,
    pub backward_edges: BTreeMap<String, EdgeField>,
    pub need_return: bool,
    pub fields: Vec<Option<FieldShape>>,
}

/// Edge lookup key. Direction picks the side-table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub id: String,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldShape {
    Scalar {
        value: ScalarValue,
    },
    Vertex {
        vertex: String,
    },
    Edge {
        edge: EdgeRef,
    },
    VertexProperty {
        vertex: String,
        name: String,
    },
    VertexSingleProperty {
        vertex: String,
        name: String,
        property_id: String,
    },
    EdgeProperty {
        edge: EdgeRef,
        name: String,
    },
    ValueProperty {
        vertex: String,
        name: String,
        property_id: String,
        meta: String,
    },
    Path {
        steps: Vec<PathStepShape>,
    },
    Collection {
        items: Vec<FieldShape>,
    },
    Map {
        entries: Vec<(FieldShape, FieldShape)>,
    },
    Composite {
        fields: Vec<(String, FieldShape)>,
        default_key: Option<String>,
    },
    /// Breadth-first node list; `nodes[0]` is the root.
    Tree {
        nodes: Vec<TreeNodeShape>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStepShape {
    pub field: FieldShape,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeShape {
    /// Index of the parent in the node list; always smaller than this node's.
    pub parent: Option<usize>,
    /// Key under which the parent stores this node.
    pub key: String,
    pub node: FieldShape,
}
