//! Canonical graph element representations.
//!
//! These are the full values the codec ships once per message in its
//! side-tables. Result fields hold them behind `Arc` so a vertex referenced
//! from many columns is one shared instance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scalar::ScalarValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexField {
    pub id: String,
    pub label: String,
    /// Raw partition value of the document holding this vertex.
    pub partition: String,
    /// Property name to all instances of that property.
    #[serde(default)]
    pub properties: BTreeMap<String, VertexPropertyField>,
}

impl VertexField {
    pub fn new(id: impl Into<String>, label: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            partition: partition.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds one property instance; multi-valued properties keep every instance.
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        property_id: impl Into<String>,
        value: impl Into<ScalarValue>,
    ) -> Self {
        let name = name.into();
        let property_id = property_id.into();
        let single = VertexSinglePropertyField {
            property_id: property_id.clone(),
            name: name.clone(),
            value: value.into(),
            meta_properties: BTreeMap::new(),
        };
        self.properties
            .entry(name.clone())
            .or_insert_with(|| VertexPropertyField {
                name,
                values: BTreeMap::new(),
            })
            .values
            .insert(property_id, single);
        self
    }

    pub fn property(&self, name: &str) -> Option<&VertexPropertyField> {
        self.properties.get(name)
    }

    pub fn single_property(&self, name: &str, property_id: &str) -> Option<&VertexSinglePropertyField> {
        self.properties.get(name)?.values.get(property_id)
    }
}

/// All instances of one vertex property name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexPropertyField {
    pub name: String,
    /// Property instance id to instance.
    pub values: BTreeMap<String, VertexSinglePropertyField>,
}

/// One instance of a (possibly multi-valued) vertex property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexSinglePropertyField {
    pub property_id: String,
    pub name: String,
    pub value: ScalarValue,
    /// Meta-properties attached to this instance.
    #[serde(default)]
    pub meta_properties: BTreeMap<String, ScalarValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeField {
    pub id: String,
    pub label: String,
    pub out_v: String,
    pub out_v_partition: String,
    pub in_v: String,
    pub in_v_partition: String,
    /// Set when the edge was read from the in-vertex's adjacency list.
    #[serde(default)]
    pub is_reverse: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, ScalarValue>,
}

impl EdgeField {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        out_v: (impl Into<String>, impl Into<String>),
        in_v: (impl Into<String>, impl Into<String>),
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            out_v: out_v.0.into(),
            out_v_partition: out_v.1.into(),
            in_v: in_v.0.into(),
            in_v_partition: in_v.1.into(),
            is_reverse: false,
            properties: BTreeMap::new(),
        }
    }

    pub fn reversed(mut self) -> Self {
        self.is_reverse = true;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Partition of the endpoint the edge was not read from.
    pub fn other_v_partition(&self) -> &str {
        if self.is_reverse {
            &self.out_v_partition
        } else {
            &self.in_v_partition
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_valued_properties_keep_every_instance() {
        let v = VertexField::new("v1", "person", "0")
            .with_property("alias", "p1", "ann")
            .with_property("alias", "p2", "annie");
        assert_eq!(v.property("alias").map(|p| p.values.len()), Some(2));
        assert_eq!(
            v.single_property("alias", "p2").map(|p| p.value.clone()),
            Some(ScalarValue::from("annie"))
        );
    }

    #[test]
    fn other_endpoint_depends_on_read_direction() {
        let e = EdgeField::new("e1", "knows", ("a", "1"), ("b", "2"));
        assert_eq!(e.other_v_partition(), "2");
        assert_eq!(e.reversed().other_v_partition(), "1");
    }
}
