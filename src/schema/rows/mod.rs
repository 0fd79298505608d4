#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ElementKind, SchemaDocument};

/// One retrievable schema token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Row {
    /// A node-type name
    Label { name: String },
    /// A relationship-type name
    Relationship { name: String },
    /// `<parent>.<name>` where the parent is a node or relationship type
    Property {
        parent: String,
        parent_kind: ElementKind,
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Label,
    Relationship,
    Property,
}

impl Row {
    #[inline]
    pub fn kind(&self) -> RowKind {
        match self {
            Self::Label { .. } => RowKind::Label,
            Self::Relationship { .. } => RowKind::Relationship,
            Self::Property { .. } => RowKind::Property,
        }
    }

    /// The text that gets embedded and matched against question tokens
    #[inline]
    pub fn text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Row {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label { name } | Self::Relationship { name } => f.write_str(name),
            Self::Property { parent, name, .. } => write!(f, "{}.{}", parent, name),
        }
    }
}

/// Ordered, duplicate-free rows of a schema document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowVocabulary {
    rows: Vec<Row>,
}

impl RowVocabulary {
    #[inline]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[inline]
    pub fn get(&self, position: usize) -> Option<&Row> {
        self.rows.get(position)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn texts(&self) -> Vec<String> {
        self.rows.iter().map(Row::text).collect()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl FromIterator<Row> for RowVocabulary {
    /// Keeps the first row for each distinct text
    #[inline]
    fn from_iter<T: IntoIterator<Item = Row>>(iter: T) -> Self {
        let mut seen = HashSet::new();
        let rows = iter
            .into_iter()
            .filter(|row| seen.insert(row.text()))
            .collect();
        Self { rows }
    }
}

impl<'a> IntoIterator for &'a RowVocabulary {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Flatten a schema into its rows: labels, then relationship types, then
/// properties of node types followed by properties of relationship types.
#[inline]
pub fn extract(schema: &SchemaDocument) -> RowVocabulary {
    let labels = schema.node_types().iter().map(|node| Row::Label {
        name: node.name.clone(),
    });
    let relationships = schema.relationship_types().iter().map(|rel| Row::Relationship {
        name: rel.name.clone(),
    });
    let properties = schema
        .node_types()
        .iter()
        .chain(schema.relationship_types())
        .flat_map(|element| {
            element.property_names().map(move |property| Row::Property {
                parent: element.name.clone(),
                parent_kind: element.kind,
                name: property.to_string(),
            })
        });

    labels.chain(relationships).chain(properties).collect()
}
