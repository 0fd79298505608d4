use super::*;

fn sample_schema() -> SchemaDocument {
    SchemaDocument::from_json_str(
        r#"{
          "NodeTypes": {
            "Gene": {"symbol": "String", "name": "String"},
            "Disease": {"name": "String"},
            "Pathway": {}
          },
          "RelationshipTypes": {
            "Gene_causes_Disease": {"score": "Float", "_endpoints": ["Gene", "Disease"]}
          }
        }"#,
    )
    .expect("schema parses")
}

#[test]
fn extracts_rows_in_stable_order() {
    let vocabulary = extract(&sample_schema());

    assert_eq!(
        vocabulary.texts(),
        vec![
            "Gene",
            "Disease",
            "Pathway",
            "Gene_causes_Disease",
            "Gene.symbol",
            "Gene.name",
            "Disease.name",
            "Gene_causes_Disease.score",
        ]
    );
}

#[test]
fn extraction_is_deterministic() {
    let schema = sample_schema();
    let first = extract(&schema);
    let second = extract(&schema);

    assert_eq!(first, second);

    let unique: HashSet<String> = first.texts().into_iter().collect();
    assert_eq!(unique.len(), first.len());
}

#[test]
fn rows_carry_their_kind() {
    let vocabulary = extract(&sample_schema());

    assert_eq!(vocabulary.rows()[0].kind(), RowKind::Label);
    assert_eq!(vocabulary.rows()[3].kind(), RowKind::Relationship);
    assert_eq!(
        vocabulary.rows()[7],
        Row::Property {
            parent: "Gene_causes_Disease".to_string(),
            parent_kind: ElementKind::Relationship,
            name: "score".to_string(),
        }
    );
}

#[test]
fn duplicate_texts_keep_first_occurrence() {
    // A label literally named like a property row shadows the later property row
    let schema = SchemaDocument::from_json_str(
        r#"{"NodeTypes": {"Gene.symbol": {}, "Gene": {"symbol": "String"}}}"#,
    )
    .expect("schema parses");
    let vocabulary = extract(&schema);

    assert_eq!(vocabulary.texts(), vec!["Gene.symbol", "Gene"]);
    assert_eq!(vocabulary.rows()[0].kind(), RowKind::Label);
}

#[test]
fn empty_schema_has_no_rows() {
    assert!(extract(&SchemaDocument::default()).is_empty());
}

#[test]
fn rows_serialize_as_tagged_values() {
    let row = Row::Property {
        parent: "Gene".to_string(),
        parent_kind: ElementKind::Node,
        name: "symbol".to_string(),
    };
    let json = serde_json::to_value(&row).expect("row serializes");

    assert_eq!(json["kind"], "property");
    assert_eq!(json["parent_kind"], "node");
    assert_eq!(row.text(), "Gene.symbol");

    let back: Row = serde_json::from_value(json).expect("row deserializes");
    assert_eq!(back, row);
}
