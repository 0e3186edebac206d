//! Label and property metadata supplied at construction.
//!
//! Property values are opaque to the engine: a [`DataType`] only fixes the
//! number of bytes a property occupies inside an edge's fixed-size record.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{Result, SegGraphError};
use crate::types::{LabelId, VertexId};

/// Fixed-width property types.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// One byte, zero or one.
    Bool,
    /// Little-endian i32.
    I32,
    /// Little-endian u32.
    U32,
    /// Little-endian i64.
    I64,
    /// Little-endian u64.
    U64,
    /// IEEE-754 f32.
    F32,
    /// IEEE-754 f64.
    F64,
    /// Days since the Unix epoch as i32.
    Date,
    /// Milliseconds since the Unix epoch as i64.
    DateTime,
}

impl DataType {
    /// Encoded width in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::I32 | DataType::U32 | DataType::F32 | DataType::Date => 4,
            DataType::I64 | DataType::U64 | DataType::F64 | DataType::DateTime => 8,
        }
    }
}

/// A named property at a fixed offset inside an edge record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Value type.
    pub dtype: DataType,
    /// Byte offset inside the edge record.
    pub offset: usize,
}

impl PropertyDef {
    /// Byte range of this property inside a record.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.dtype.size()
    }
}

/// An edge label and the layout of its property record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EdgeLabelDef {
    /// Dense label id, equal to the index in [`GraphSchema::edge_labels`].
    pub id: LabelId,
    /// Label name.
    pub name: String,
    /// Bytes of property data per edge.
    pub prop_size: usize,
    /// Whether `add_edge` also records the reverse pair.
    pub undirected: bool,
    /// Property layout; may be empty for opaque records.
    pub props: Vec<PropertyDef>,
}

impl EdgeLabelDef {
    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.props.iter().find(|p| p.name == name)
    }
}

/// Partition descriptor handed in by the coordinator.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PartitionInfo {
    /// Number of partitions in the deployment.
    pub partition_count: u32,
    /// Partition served by this engine.
    pub local_partition: u32,
}

impl Default for PartitionInfo {
    fn default() -> Self {
        Self {
            partition_count: 1,
            local_partition: 0,
        }
    }
}

impl PartitionInfo {
    /// Whether `vertex` hashes to this partition.
    pub fn is_local(&self, vertex: VertexId) -> bool {
        vertex % u64::from(self.partition_count.max(1)) == u64::from(self.local_partition)
    }
}

/// Vertex and edge label catalog.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GraphSchema {
    /// Vertex label names.
    pub vertex_labels: Vec<String>,
    /// Edge labels in id order.
    pub edge_labels: Vec<EdgeLabelDef>,
}

impl GraphSchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex label.
    pub fn vertex_label(mut self, name: impl Into<String>) -> Self {
        self.vertex_labels.push(name.into());
        self
    }

    /// Adds an edge label whose properties are packed in declaration order.
    pub fn edge_label(
        mut self,
        name: impl Into<String>,
        undirected: bool,
        props: &[(&str, DataType)],
    ) -> Self {
        let mut offset = 0;
        let props = props
            .iter()
            .map(|(name, dtype)| {
                let def = PropertyDef {
                    name: (*name).to_string(),
                    dtype: *dtype,
                    offset,
                };
                offset += dtype.size();
                def
            })
            .collect();
        self.push_label(name.into(), offset, undirected, props);
        self
    }

    /// Adds a directed edge label with an opaque record of `prop_size` bytes.
    pub fn opaque_edge_label(mut self, name: impl Into<String>, prop_size: usize) -> Self {
        self.push_label(name.into(), prop_size, false, Vec::new());
        self
    }

    fn push_label(&mut self, name: String, prop_size: usize, undirected: bool, props: Vec<PropertyDef>) {
        let id = self.edge_labels.len() as LabelId;
        self.edge_labels.push(EdgeLabelDef {
            id,
            name,
            prop_size,
            undirected,
            props,
        });
    }

    /// Number of edge labels.
    pub fn label_count(&self) -> usize {
        self.edge_labels.len()
    }

    /// Label definition by id.
    pub fn label(&self, id: LabelId) -> Option<&EdgeLabelDef> {
        self.edge_labels.get(id as usize)
    }

    /// Label id by name.
    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.edge_labels.iter().find(|l| l.name == name).map(|l| l.id)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.edge_labels.len() > LabelId::MAX as usize {
            return Err(SegGraphError::InvalidArgument(format!(
                "{} edge labels exceed the label id space",
                self.edge_labels.len()
            )));
        }
        let mut seen = HashSet::new();
        for (idx, label) in self.edge_labels.iter().enumerate() {
            if label.id as usize != idx {
                return Err(SegGraphError::InvalidArgument(format!(
                    "edge label {:?} has id {} at position {idx}",
                    label.name, label.id
                )));
            }
            if !seen.insert(label.name.as_str()) {
                return Err(SegGraphError::InvalidArgument(format!(
                    "duplicate edge label {:?}",
                    label.name
                )));
            }
            let end = label.props.iter().map(|p| p.range().end).max().unwrap_or(0);
            if end > label.prop_size {
                return Err(SegGraphError::InvalidArgument(format!(
                    "properties of {:?} need {end} bytes but prop_size is {}",
                    label.name, label.prop_size
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn from_file(vertex_labels: Vec<String>, edges: Vec<EdgeLabelFile>) -> Result<Self> {
        let mut schema = GraphSchema {
            vertex_labels,
            edge_labels: Vec::with_capacity(edges.len()),
        };
        for edge in edges {
            if edge.props.is_empty() {
                let size = edge.prop_size.unwrap_or(0);
                schema.push_label(edge.name, size, edge.undirected, Vec::new());
                continue;
            }
            let props: Vec<(&str, DataType)> =
                edge.props.iter().map(|p| (p.name.as_str(), p.dtype)).collect();
            schema = schema.edge_label(edge.name.clone(), edge.undirected, &props);
            if let Some(size) = edge.prop_size {
                if let Some(last) = schema.edge_labels.last_mut() {
                    last.prop_size = last.prop_size.max(size);
                }
            }
        }
        schema.validate()?;
        Ok(schema)
    }
}

/// Edge label entry of the TOML config.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeLabelFile {
    /// Label name.
    pub name: String,
    /// Undirected flag.
    #[serde(default)]
    pub undirected: bool,
    /// Explicit record size; at least the packed property width.
    #[serde(default)]
    pub prop_size: Option<usize>,
    /// Property declarations.
    #[serde(default)]
    pub props: Vec<PropertyFile>,
}

/// Property entry of the TOML config.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyFile {
    /// Property name.
    pub name: String,
    /// Value type.
    pub dtype: DataType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_are_packed_in_order() {
        let schema = GraphSchema::new().edge_label(
            "rated",
            false,
            &[("stars", DataType::I32), ("at", DataType::DateTime), ("ok", DataType::Bool)],
        );
        let label = schema.label(0).unwrap();
        assert_eq!(label.prop_size, 13);
        assert_eq!(label.property("at").unwrap().range(), 4..12);
        assert_eq!(schema.label_id("rated"), Some(0));
        schema.validate().unwrap();
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let schema = GraphSchema::new()
            .opaque_edge_label("a", 0)
            .opaque_edge_label("a", 8);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn partition_ownership_is_modular() {
        let p = PartitionInfo {
            partition_count: 3,
            local_partition: 1,
        };
        assert!(p.is_local(4));
        assert!(!p.is_local(5));
    }
}
