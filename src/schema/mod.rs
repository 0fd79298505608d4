// Graph schema document
// Read-only model of the exported node and relationship types


pub mod rows;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{Result, SliceError};

pub use rows::{Row, RowKind, RowVocabulary, extract};

/// Relationship entry holding the sampled `[source, target]` labels
pub const ENDPOINTS_KEY: &str = "_endpoints";

/// Property name to advisory type descriptor, in document order
pub type PropertyMap = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Node,
    Relationship,
}

/// A node type or relationship type with its raw property entries
#[derive(Debug, Clone, PartialEq)]
pub struct ElementType {
    pub name: String,
    pub kind: ElementKind,
    /// Every entry of the exported map, `_endpoints` included
    pub entries: PropertyMap,
}

impl ElementType {
    #[inline]
    pub fn new(name: impl Into<String>, kind: ElementKind, entries: PropertyMap) -> Self {
        Self {
            name: name.into(),
            kind,
            entries,
        }
    }

    /// Property names in document order. Endpoint metadata on relationship types is skipped.
    #[inline]
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(move |key| self.kind == ElementKind::Node || *key != ENDPOINTS_KEY)
    }

    /// The recorded `(source, target)` labels, when present and shaped as a pair of strings
    #[inline]
    pub fn endpoints(&self) -> Option<(&str, &str)> {
        if self.kind != ElementKind::Relationship {
            return None;
        }
        match self.entries.get(ENDPOINTS_KEY)?.as_array()?.as_slice() {
            [Value::String(source), Value::String(target)] => {
                Some((source.as_str(), target.as_str()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchemaDocument", into = "RawSchemaDocument")]
pub struct SchemaDocument {
    node_types: Vec<ElementType>,
    relationship_types: Vec<ElementType>,
    node_lookup: HashMap<String, usize>,
    relationship_lookup: HashMap<String, usize>,
}

/// On-disk shape: `{"NodeTypes": {...}, "RelationshipTypes": {...}}`
#[derive(Debug, Serialize, Deserialize)]
struct RawSchemaDocument {
    #[serde(rename = "NodeTypes", default)]
    node_types: Map<String, Value>,
    #[serde(rename = "RelationshipTypes", default)]
    relationship_types: Map<String, Value>,
}

impl SchemaDocument {
    /// Build a document from element types. Names must be non-empty and unique per kind.
    #[inline]
    pub fn new(
        node_types: Vec<ElementType>,
        relationship_types: Vec<ElementType>,
    ) -> std::result::Result<Self, String> {
        let node_lookup = Self::build_lookup(&node_types, "node type")?;
        let relationship_lookup = Self::build_lookup(&relationship_types, "relationship type")?;

        Ok(Self {
            node_types,
            relationship_types,
            node_lookup,
            relationship_lookup,
        })
    }

    fn build_lookup(
        elements: &[ElementType],
        what: &str,
    ) -> std::result::Result<HashMap<String, usize>, String> {
        let mut lookup = HashMap::with_capacity(elements.len());
        for (position, element) in elements.iter().enumerate() {
            if element.name.is_empty() {
                return Err(format!("{} names cannot be empty", what));
            }
            if lookup.insert(element.name.clone(), position).is_some() {
                return Err(format!("duplicate {} name: {}", what, element.name));
            }
        }
        Ok(lookup)
    }

    /// Load and parse a schema document from disk
    #[inline]
    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading schema document from {}", path.display());

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SliceError::Schema(format!(
                "Failed to read schema document {}: {}",
                path.display(),
                e
            ))
        })?;

        let schema = Self::from_json_str(&content).map_err(|e| match e {
            SliceError::Schema(message) => {
                SliceError::Schema(format!("{} ({})", message, path.display()))
            }
            other => other,
        })?;

        debug!(
            "Loaded schema with {} node types and {} relationship types",
            schema.node_types.len(),
            schema.relationship_types.len()
        );
        Ok(schema)
    }

    #[inline]
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SliceError::Schema(format!("Failed to parse schema document: {}", e)))
    }

    #[inline]
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SliceError::Schema(format!("Failed to serialize schema document: {}", e)))
    }

    #[inline]
    pub fn node_types(&self) -> &[ElementType] {
        &self.node_types
    }

    #[inline]
    pub fn relationship_types(&self) -> &[ElementType] {
        &self.relationship_types
    }

    #[inline]
    pub fn node_type(&self, name: &str) -> Option<&ElementType> {
        self.node_lookup
            .get(name)
            .map(|&position| &self.node_types[position])
    }

    #[inline]
    pub fn relationship_type(&self, name: &str) -> Option<&ElementType> {
        self.relationship_lookup
            .get(name)
            .map(|&position| &self.relationship_types[position])
    }

    #[inline]
    pub fn is_node_type(&self, name: &str) -> bool {
        self.node_lookup.contains_key(name)
    }

    #[inline]
    pub fn is_relationship_type(&self, name: &str) -> bool {
        self.relationship_lookup.contains_key(name)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.node_types.is_empty() && self.relationship_types.is_empty()
    }

    /// Copy of this document keeping only the named types, in document order
    #[inline]
    pub fn restrict(&self, labels: &HashSet<String>, relationships: &HashSet<String>) -> Self {
        let node_types: Vec<ElementType> = self
            .node_types
            .iter()
            .filter(|element| labels.contains(&element.name))
            .cloned()
            .collect();
        let relationship_types: Vec<ElementType> = self
            .relationship_types
            .iter()
            .filter(|element| relationships.contains(&element.name))
            .cloned()
            .collect();

        let node_lookup = positions(&node_types);
        let relationship_lookup = positions(&relationship_types);

        Self {
            node_types,
            relationship_types,
            node_lookup,
            relationship_lookup,
        }
    }
}

fn positions(elements: &[ElementType]) -> HashMap<String, usize> {
    elements
        .iter()
        .enumerate()
        .map(|(position, element)| (element.name.clone(), position))
        .collect()
}

fn element_entries(
    name: &str,
    kind: ElementKind,
    value: Value,
) -> std::result::Result<ElementType, String> {
    let entries = match value {
        Value::Object(entries) => entries,
        Value::Null => Map::new(),
        other => {
            return Err(format!(
                "type '{}' must map to an object of properties, found {}",
                name, other
            ));
        }
    };
    Ok(ElementType::new(name, kind, entries))
}

impl TryFrom<RawSchemaDocument> for SchemaDocument {
    type Error = String;

    fn try_from(raw: RawSchemaDocument) -> std::result::Result<Self, Self::Error> {
        let node_types = raw
            .node_types
            .into_iter()
            .map(|(name, value)| element_entries(&name, ElementKind::Node, value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let relationship_types = raw
            .relationship_types
            .into_iter()
            .map(|(name, value)| element_entries(&name, ElementKind::Relationship, value))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Self::new(node_types, relationship_types)
    }
}

impl From<SchemaDocument> for RawSchemaDocument {
    fn from(schema: SchemaDocument) -> Self {
        let collect = |elements: Vec<ElementType>| {
            elements
                .into_iter()
                .map(|element| (element.name, Value::Object(element.entries)))
                .collect::<Map<String, Value>>()
        };

        Self {
            node_types: collect(schema.node_types),
            relationship_types: collect(schema.relationship_types),
        }
    }
}
