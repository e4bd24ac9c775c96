use std::collections::VecDeque;

use graphex_common::{GraphexError, Result};
use graphex_record::{EdgeField, FieldObject, RawRecord, TreeField, VertexField};

use crate::layout::{
    EdgeRef, FieldShape, PathStepShape, RecordMessage, TreeNodeShape, RECORD_MESSAGE_VERSION,
};

/// Serializes `record` into a record message payload.
pub fn encode_record(record: &RawRecord) -> Result<String> {
    let message = build_message(record);
    serde_json::to_string(&message)
        .map_err(|e| GraphexError::Codec(format!("record message encode failed: {e}")))
}

/// Serializes an ordered field list as a single record message.
pub fn encode_fields(fields: &[FieldObject]) -> Result<String> {
    encode_record(&RawRecord::from_fields(fields.iter().cloned()))
}

/// Flattens `record` into its shape plus deduplicated element side-tables.
///
/// Containers are walked depth-first; trees breadth-first with an explicit
/// queue.
pub fn build_message(record: &RawRecord) -> RecordMessage {
    let mut message = RecordMessage {
        version: RECORD_MESSAGE_VERSION,
        vertices: Default::default(),
        forward_edges: Default::default(),
        backward_edges: Default::default(),
        need_return: record.need_return,
        fields: Vec::with_capacity(record.fields.len()),
    };
    for slot in &record.fields {
        let shape = slot.as_ref().map(|field| shape_of(&mut message, field));
        message.fields.push(shape);
    }
    message
}

fn shape_of(message: &mut RecordMessage, field: &FieldObject) -> FieldShape {
    match field {
        FieldObject::Scalar(value) => FieldShape::Scalar {
            value: value.clone(),
        },
        FieldObject::Vertex(vertex) => FieldShape::Vertex {
            vertex: add_vertex(message, vertex),
        },
        FieldObject::Edge(edge) => FieldShape::Edge {
            edge: add_edge(message, edge),
        },
        FieldObject::VertexProperty { vertex, name } => FieldShape::VertexProperty {
            vertex: add_vertex(message, vertex),
            name: name.clone(),
        },
        FieldObject::VertexSingleProperty {
            vertex,
            name,
            property_id,
        } => FieldShape::VertexSingleProperty {
            vertex: add_vertex(message, vertex),
            name: name.clone(),
            property_id: property_id.clone(),
        },
        FieldObject::EdgeProperty { edge, name } => FieldShape::EdgeProperty {
            edge: add_edge(message, edge),
            name: name.clone(),
        },
        FieldObject::ValueProperty {
            vertex,
            name,
            property_id,
            meta,
        } => FieldShape::ValueProperty {
            vertex: add_vertex(message, vertex),
            name: name.clone(),
            property_id: property_id.clone(),
            meta: meta.clone(),
        },
        FieldObject::Path(steps) => FieldShape::Path {
            steps: steps
                .iter()
                .map(|step| PathStepShape {
                    field: shape_of(message, &step.field),
                    labels: step.labels.clone(),
                })
                .collect(),
        },
        FieldObject::Collection(items) => FieldShape::Collection {
            items: items.iter().map(|item| shape_of(message, item)).collect(),
        },
        FieldObject::Map(entries) => FieldShape::Map {
            entries: entries
                .iter()
                .map(|(key, value)| (shape_of(message, key), shape_of(message, value)))
                .collect(),
        },
        FieldObject::Composite(composite) => FieldShape::Composite {
            fields: composite
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), shape_of(message, value)))
                .collect(),
            default_key: composite.default_key.clone(),
        },
        FieldObject::Tree(tree) => FieldShape::Tree {
            nodes: flatten_tree(message, tree),
        },
    }
}

fn flatten_tree(message: &mut RecordMessage, root: &TreeField) -> Vec<TreeNodeShape> {
    let mut nodes = Vec::new();
    let mut queue: VecDeque<(&TreeField, Option<usize>, String)> = VecDeque::new();
    queue.push_back((root, None, root.node.key_string()));
    while let Some((tree, parent, key)) = queue.pop_front() {
        let index = nodes.len();
        let node = shape_of(message, &tree.node);
        nodes.push(TreeNodeShape { parent, key, node });
        for (child_key, child) in &tree.children {
            queue.push_back((child, Some(index), child_key.clone()));
        }
    }
    nodes
}

fn add_vertex(message: &mut RecordMessage, vertex: &VertexField) -> String {
    if !message.vertices.contains_key(&vertex.id) {
        message.vertices.insert(vertex.id.clone(), vertex.clone());
    }
    vertex.id.clone()
}

fn add_edge(message: &mut RecordMessage, edge: &EdgeField) -> EdgeRef {
    let table = if edge.is_reverse {
        &mut message.backward_edges
    } else {
        &mut message.forward_edges
    };
    if !table.contains_key(&edge.id) {
        table.insert(edge.id.clone(), edge.clone());
    }
    EdgeRef {
        id: edge.id.clone(),
        reverse: edge.is_reverse,
    }
}
