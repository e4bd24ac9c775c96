use std::collections::BTreeMap;
use std::sync::Arc;

use crate::graph::{EdgeField, VertexField};
use crate::scalar::ScalarValue;

/// One value a result column can hold.
///
/// Graph elements and their properties hold `Arc`s to the canonical element;
/// everything else owns its children.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldObject {
    Scalar(ScalarValue),
    Vertex(Arc<VertexField>),
    Edge(Arc<EdgeField>),
    /// Every instance of the named property.
    VertexProperty {
        vertex: Arc<VertexField>,
        name: String,
    },
    /// One instance of a multi-valued property.
    VertexSingleProperty {
        vertex: Arc<VertexField>,
        name: String,
        property_id: String,
    },
    EdgeProperty {
        edge: Arc<EdgeField>,
        name: String,
    },
    /// Meta-property `meta` of one vertex property instance.
    ValueProperty {
        vertex: Arc<VertexField>,
        name: String,
        property_id: String,
        meta: String,
    },
    Path(Vec<PathStep>),
    Collection(Vec<FieldObject>),
    /// Ordered entries; keys are arbitrary field objects.
    Map(Vec<(FieldObject, FieldObject)>),
    Composite(CompositeField),
    Tree(TreeField),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    pub field: FieldObject,
    /// Step labels attached with `as(...)`.
    pub labels: Vec<String>,
}

/// Named columns of a multi-column projection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositeField {
    pub fields: Vec<(String, FieldObject)>,
    /// Column standing in for the whole composite when one value is needed.
    pub default_key: Option<String>,
}

impl CompositeField {
    pub fn new(fields: Vec<(String, FieldObject)>) -> Self {
        Self {
            fields,
            default_key: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldObject> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// Hierarchical aggregate: a node value and its children keyed by
/// [`FieldObject::key_string`] of their node values.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeField {
    pub node: Box<FieldObject>,
    pub children: BTreeMap<String, TreeField>,
}

impl TreeField {
    pub fn leaf(node: FieldObject) -> Self {
        Self {
            node: Box::new(node),
            children: BTreeMap::new(),
        }
    }

    /// Root of an aggregated tree; it carries no value of its own.
    pub fn root() -> Self {
        Self::leaf(FieldObject::Scalar(ScalarValue::Null))
    }

    /// Inserts `child` under its node key, replacing any child with that key.
    pub fn insert_child(&mut self, child: TreeField) {
        self.children.insert(child.node.key_string(), child);
    }

    pub fn with_child(mut self, child: TreeField) -> Self {
        self.insert_child(child);
        self
    }

    /// Adds the chain `path[0] -> path[1] -> ...` below this node, reusing
    /// existing children with equal keys.
    pub fn add_path(&mut self, path: impl IntoIterator<Item = FieldObject>) {
        let mut cursor = self;
        for node in path {
            let key = node.key_string();
            cursor = cursor
                .children
                .entry(key)
                .or_insert_with(|| TreeField::leaf(node));
        }
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(tree) = pending.pop() {
            count += 1;
            pending.extend(tree.children.values());
        }
        count
    }
}

impl FieldObject {
    pub fn scalar(value: impl Into<ScalarValue>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Vertex(_) => "vertex",
            Self::Edge(_) => "edge",
            Self::VertexProperty { .. } => "vertex property",
            Self::VertexSingleProperty { .. } => "vertex single property",
            Self::EdgeProperty { .. } => "edge property",
            Self::ValueProperty { .. } => "value property",
            Self::Path(_) => "path",
            Self::Collection(_) => "collection",
            Self::Map(_) => "map",
            Self::Composite(_) => "composite",
            Self::Tree(_) => "tree",
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vertex(&self) -> Option<&Arc<VertexField>> {
        match self {
            Self::Vertex(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Arc<EdgeField>> {
        match self {
            Self::Edge(e) => Some(e),
            _ => None,
        }
    }

    /// Textual identity of the value: element ids for graph elements,
    /// property values for properties, rendered contents for containers.
    pub fn key_string(&self) -> String {
        match self {
            Self::Scalar(v) => v.key_string(),
            Self::Vertex(v) => v.id.clone(),
            Self::Edge(e) => e.id.clone(),
            Self::VertexProperty { vertex, name } => match vertex.property(name) {
                Some(property) => property
                    .values
                    .values()
                    .map(|single| single.value.key_string())
                    .collect::<Vec<_>>()
                    .join(","),
                None => String::new(),
            },
            Self::VertexSingleProperty {
                vertex,
                name,
                property_id,
            } => vertex
                .single_property(name, property_id)
                .map(|single| single.value.key_string())
                .unwrap_or_default(),
            Self::EdgeProperty { edge, name } => edge
                .properties
                .get(name)
                .map(ScalarValue::key_string)
                .unwrap_or_default(),
            Self::ValueProperty {
                vertex,
                name,
                property_id,
                meta,
            } => vertex
                .single_property(name, property_id)
                .and_then(|single| single.meta_properties.get(meta))
                .map(ScalarValue::key_string)
                .unwrap_or_default(),
            Self::Path(steps) => bracketed(steps.iter().map(|s| s.field.key_string())),
            Self::Collection(items) => bracketed(items.iter().map(FieldObject::key_string)),
            Self::Map(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.key_string(), v.key_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::Composite(composite) => match composite
                .default_key
                .as_deref()
                .and_then(|key| composite.get(key))
            {
                Some(field) => field.key_string(),
                None => format!(
                    "{{{}}}",
                    composite
                        .fields
                        .iter()
                        .map(|(k, v)| format!("{k}: {}", v.key_string()))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
            Self::Tree(tree) => tree.node.key_string(),
        }
    }
}

fn bracketed(parts: impl Iterator<Item = String>) -> String {
    format!("[{}]", parts.collect::<Vec<_>>().join(", "))
}

impl From<ScalarValue> for FieldObject {
    fn from(value: ScalarValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<Arc<VertexField>> for FieldObject {
    fn from(value: Arc<VertexField>) -> Self {
        Self::Vertex(value)
    }
}

impl From<Arc<EdgeField>> for FieldObject {
    fn from(value: Arc<EdgeField>) -> Self {
        Self::Edge(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_strings_follow_element_identity() {
        let v = Arc::new(VertexField::new("v1", "person", "0").with_property("name", "p1", "ann"));
        assert_eq!(FieldObject::Vertex(v.clone()).key_string(), "v1");
        let prop = FieldObject::VertexSingleProperty {
            vertex: v.clone(),
            name: "name".to_string(),
            property_id: "p1".to_string(),
        };
        assert_eq!(prop.key_string(), "ann");
        let list = FieldObject::Collection(vec![FieldObject::scalar(1), FieldObject::Vertex(v)]);
        assert_eq!(list.key_string(), "[1, v1]");
    }

    #[test]
    fn composite_key_prefers_default_column() {
        let mut composite = CompositeField::new(vec![
            ("a".to_string(), FieldObject::scalar("x")),
            ("b".to_string(), FieldObject::scalar(2)),
        ]);
        assert_eq!(FieldObject::Composite(composite.clone()).key_string(), "{a: x, b: 2}");
        composite.default_key = Some("b".to_string());
        assert_eq!(FieldObject::Composite(composite).key_string(), "2");
    }

    #[test]
    fn add_path_reuses_existing_branches() {
        let mut tree = TreeField::root();
        tree.add_path([FieldObject::scalar("a"), FieldObject::scalar("b")]);
        tree.add_path([FieldObject::scalar("a"), FieldObject::scalar("c")]);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children["a"].children.len(), 2);
        assert_eq!(tree.node_count(), 4);
    }
}
