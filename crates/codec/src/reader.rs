use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use graphex_common::{GraphexError, Result};
use graphex_record::{
    CompositeField, EdgeField, FieldObject, PathStep, RawRecord, TreeField, VertexCache,
    VertexField,
};

use crate::layout::{EdgeRef, FieldShape, RecordMessage, TreeNodeShape, RECORD_MESSAGE_VERSION};

/// Parsed message whose handles are not yet bound to live elements.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    message: RecordMessage,
}

/// First decode phase: parse and version-check a payload.
pub fn decode_draft(payload: &str) -> Result<RecordDraft> {
    let message: RecordMessage = serde_json::from_str(payload)
        .map_err(|e| GraphexError::Codec(format!("record message decode failed: {e}")))?;
    if message.version != RECORD_MESSAGE_VERSION {
        return Err(GraphexError::Codec(format!(
            "unsupported record message version {} (expected {RECORD_MESSAGE_VERSION})",
            message.version
        )));
    }
    Ok(RecordDraft { message })
}

/// Both decode phases in one call.
pub fn decode_record(payload: &str, cache: &dyn VertexCache) -> Result<RawRecord> {
    decode_draft(payload)?.resolve(cache)
}

/// Inverse of [`crate::encode_fields`]; every slot must be present.
pub fn decode_fields(payload: &str, cache: &dyn VertexCache) -> Result<Vec<FieldObject>> {
    decode_record(payload, cache)?
        .fields
        .into_iter()
        .enumerate()
        .map(|(slot, field)| {
            field.ok_or_else(|| GraphexError::Codec(format!("field list slot {slot} is empty")))
        })
        .collect()
}

impl RecordDraft {
    pub fn message(&self) -> &RecordMessage {
        &self.message
    }

    /// Second decode phase: bind handles to shared elements.
    ///
    /// Vertices already in `cache` are reused; the others are materialized
    /// from the message and added to it.
    pub fn resolve(self, cache: &dyn VertexCache) -> Result<RawRecord> {
        let RecordMessage {
            vertices,
            forward_edges,
            backward_edges,
            need_return,
            fields,
            ..
        } = self.message;

        let tables = ResolvedTables {
            vertices: vertices
                .into_iter()
                .map(|(id, vertex)| {
                    let live = cache
                        .try_get(&id)
                        .unwrap_or_else(|| cache.add_or_update(&id, vertex));
                    (id, live)
                })
                .collect(),
            forward_edges: share_edges(forward_edges),
            backward_edges: share_edges(backward_edges),
        };

        let fields = fields
            .iter()
            .map(|slot| slot.as_ref().map(|shape| tables.resolve(shape)).transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(RawRecord {
            fields,
            need_return,
        })
    }
}

fn share_edges(edges: BTreeMap<String, EdgeField>) -> HashMap<String, Arc<EdgeField>> {
    edges
        .into_iter()
        .map(|(id, edge)| (id, Arc::new(edge)))
        .collect()
}

struct ResolvedTables {
    vertices: HashMap<String, Arc<VertexField>>,
    forward_edges: HashMap<String, Arc<EdgeField>>,
    backward_edges: HashMap<String, Arc<EdgeField>>,
}

impl ResolvedTables {
    fn vertex(&self, id: &str) -> Result<Arc<VertexField>> {
        self.vertices
            .get(id)
            .cloned()
            .ok_or_else(|| GraphexError::Codec(format!("vertex handle '{id}' has no table entry")))
    }

    fn edge(&self, edge: &EdgeRef) -> Result<Arc<EdgeField>> {
        let table = if edge.reverse {
            &self.backward_edges
        } else {
            &self.forward_edges
        };
        table.get(&edge.id).cloned().ok_or_else(|| {
            GraphexError::Codec(format!(
                "edge handle '{}' (reverse={}) has no table entry",
                edge.id, edge.reverse
            ))
        })
    }

    fn resolve(&self, shape: &FieldShape) -> Result<FieldObject> {
        Ok(match shape {
            FieldShape::Scalar { value } => FieldObject::Scalar(value.clone()),
            FieldShape::Vertex { vertex } => FieldObject::Vertex(self.vertex(vertex)?),
            FieldShape::Edge { edge } => FieldObject::Edge(self.edge(edge)?),
            FieldShape::VertexProperty { vertex, name } => FieldObject::VertexProperty {
                vertex: self.vertex(vertex)?,
                name: name.clone(),
            },
            FieldShape::VertexSingleProperty {
                vertex,
                name,
                property_id,
            } => FieldObject::VertexSingleProperty {
                vertex: self.vertex(vertex)?,
                name: name.clone(),
                property_id: property_id.clone(),
            },
            FieldShape::EdgeProperty { edge, name } => FieldObject::EdgeProperty {
                edge: self.edge(edge)?,
                name: name.clone(),
            },
            FieldShape::ValueProperty {
                vertex,
                name,
                property_id,
                meta,
            } => FieldObject::ValueProperty {
                vertex: self.vertex(vertex)?,
                name: name.clone(),
                property_id: property_id.clone(),
                meta: meta.clone(),
            },
            FieldShape::Path { steps } => FieldObject::Path(
                steps
                    .iter()
                    .map(|step| -> Result<PathStep> {
                        Ok(PathStep {
                            field: self.resolve(&step.field)?,
                            labels: step.labels.clone(),
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
            FieldShape::Collection { items } => FieldObject::Collection(
                items
                    .iter()
                    .map(|item| self.resolve(item))
                    .collect::<Result<_>>()?,
            ),
            FieldShape::Map { entries } => FieldObject::Map(
                entries
                    .iter()
                    .map(|(key, value)| -> Result<(FieldObject, FieldObject)> {
                        Ok((self.resolve(key)?, self.resolve(value)?))
                    })
                    .collect::<Result<_>>()?,
            ),
            FieldShape::Composite {
                fields,
                default_key,
            } => FieldObject::Composite(CompositeField {
                fields: fields
                    .iter()
                    .map(|(name, value)| -> Result<(String, FieldObject)> {
                        Ok((name.clone(), self.resolve(value)?))
                    })
                    .collect::<Result<_>>()?,
                default_key: default_key.clone(),
            }),
            FieldShape::Tree { nodes } => FieldObject::Tree(self.rebuild_tree(nodes)?),
        })
    }

    /// Rebuilds a breadth-first node list bottom-up, without recursion.
    fn rebuild_tree(&self, nodes: &[TreeNodeShape]) -> Result<TreeField> {
        if nodes.is_empty() {
            return Err(GraphexError::Codec("tree shape has no root".to_string()));
        }
        let mut built: Vec<Option<(String, TreeField)>> = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            match (index, node.parent) {
                (0, None) => {}
                (0, Some(_)) => {
                    return Err(GraphexError::Codec("tree root has a parent".to_string()))
                }
                (_, Some(parent)) if parent < index => {}
                _ => {
                    return Err(GraphexError::Codec(format!(
                        "tree node {index} has invalid parent {:?}",
                        node.parent
                    )))
                }
            }
            built.push(Some((node.key.clone(), TreeField::leaf(self.resolve(&node.node)?))));
        }

        for index in (1..nodes.len()).rev() {
            let (key, subtree) = built[index]
                .take()
                .ok_or_else(|| GraphexError::Codec(format!("tree node {index} consumed twice")))?;
            let parent = nodes[index].parent.unwrap_or_default();
            let (_, parent_tree) = built[parent].as_mut().ok_or_else(|| {
                GraphexError::Codec(format!("tree node {parent} consumed before its children"))
            })?;
            parent_tree.children.insert(key, subtree);
        }
        built[0]
            .take()
            .map(|(_, root)| root)
            .ok_or_else(|| GraphexError::Codec("tree root missing".to_string()))
    }
}
