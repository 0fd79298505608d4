
use std::collections::HashSet;

use tracing::debug;

use crate::schema::{ElementKind, ElementType, Row, SchemaDocument};

/// Node and relationship types chosen for a slice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceSelection {
    pub labels: HashSet<String>,
    pub relationships: HashSet<String>,
}

impl SliceSelection {
    /// Resolve candidate rows to type names, then pull in property parents and
    /// relationship endpoints. Names unknown to `schema` are dropped.
    #[inline]
    pub fn from_rows<'a>(schema: &SchemaDocument, rows: impl IntoIterator<Item = &'a Row>) -> Self {
        let mut selection = Self::default();

        for row in rows {
            match row {
                Row::Label { name } => selection.add_label(schema, name),
                Row::Relationship { name } => selection.add_relationship(schema, name),
                Row::Property {
                    parent,
                    parent_kind: ElementKind::Node,
                    ..
                } => selection.add_label(schema, parent),
                Row::Property {
                    parent,
                    parent_kind: ElementKind::Relationship,
                    ..
                } => selection.add_relationship(schema, parent),
            }
        }

        let endpoints: Vec<String> = schema
            .relationship_types()
            .iter()
            .filter(|rel| selection.relationships.contains(&rel.name))
            .flat_map(|rel| endpoint_labels(schema, rel))
            .map(str::to_string)
            .collect();
        selection.labels.extend(endpoints);

        selection
    }

    fn add_label(&mut self, schema: &SchemaDocument, name: &str) {
        if schema.is_node_type(name) {
            self.labels.insert(name.to_string());
        } else {
            debug!("Ignoring unknown node type {}", name);
        }
    }

    fn add_relationship(&mut self, schema: &SchemaDocument, name: &str) {
        if schema.is_relationship_type(name) {
            self.relationships.insert(name.to_string());
        } else {
            debug!("Ignoring unknown relationship type {}", name);
        }
    }
}

/// Known node types at either end of a relationship type.
///
/// Recorded `_endpoints` win when at least one of them is a known node type.
/// Otherwise the first and last `_` segments of the name are tried, which
/// follows the `Source_relation_Target` naming convention.
#[inline]
pub fn endpoint_labels<'a>(schema: &SchemaDocument, relationship: &'a ElementType) -> Vec<&'a str> {
    let known = |label: &&str| schema.is_node_type(label);

    if let Some((source, target)) = relationship.endpoints() {
        let labels: Vec<&str> = [source, target].into_iter().filter(known).collect();
        if !labels.is_empty() {
            return labels;
        }
    }

    let mut segments = relationship.name.split('_');
    let first = segments.next();
    let last = segments.next_back();
    first.into_iter().chain(last).filter(known).collect()
}

/// The schema restricted to the types selected by `rows`, in document order
#[inline]
pub fn assemble<'a>(schema: &SchemaDocument, rows: impl IntoIterator<Item = &'a Row>) -> SchemaDocument {
    let selection = SliceSelection::from_rows(schema, rows);
    schema.restrict(&selection.labels, &selection.relationships)
}
