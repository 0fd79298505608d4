use super::*;
use crate::schema::ElementKind;

#[test]
fn stems_plural_and_verb_forms() {
    assert_eq!(stem("genes"), "gene");
    assert_eq!(stem("diseases"), "disease");
    assert_eq!(stem("causes"), "cause");
    assert_eq!(stem("boxes"), "box");
    assert_eq!(stem("matches"), "match");
    assert_eq!(stem("classes"), "class");
    assert_eq!(stem("running"), "runn");
    assert_eq!(stem("treated"), "treat");
}

#[test]
fn stem_keeps_short_and_double_s_words() {
    assert_eq!(stem("class"), "class");
    assert_eq!(stem("ids"), "ids");
    assert_eq!(stem("bed"), "bed");
    assert_eq!(stem("sing"), "sing");
    assert_eq!(stem("gene"), "gene");
}

#[test]
fn tokenize_drops_stopwords_and_short_words() {
    let tokens = tokenize("Which genes cause a disease in the liver?");
    assert_eq!(tokens, vec!["which", "gene", "cause", "disease", "liver"]);
}

#[test]
fn tokenize_deduplicates_after_stemming() {
    let tokens = tokenize("gene genes GENES");
    assert_eq!(tokens, vec!["gene"]);
}

#[test]
fn tokenize_strips_surrounding_punctuation() {
    let tokens = tokenize("--drug_target__ rs-123");
    assert_eq!(tokens, vec!["drug_target", "rs-123"]);
}

#[test]
fn tokenize_handles_empty_and_noise() {
    assert!(tokenize("").is_empty());
    assert!(tokenize("?? !! ... of at").is_empty());
}

#[test]
fn row_terms_split_on_separators() {
    let relationship = Row::Relationship {
        name: "Gene_causes_Disease".to_string(),
    };
    let terms = row_terms(&relationship);
    assert!(terms.contains("gene"));
    assert!(terms.contains("cause"));
    assert!(terms.contains("disease"));

    let property = Row::Property {
        parent: "Gene".to_string(),
        parent_kind: ElementKind::Node,
        name: "symbols".to_string(),
    };
    let terms = row_terms(&property);
    assert_eq!(terms.len(), 2);
    assert!(terms.contains("symbol"));
}

#[test]
fn row_terms_match_by_position() {
    let rows: RowVocabulary = [
        Row::Label {
            name: "Gene".to_string(),
        },
        Row::Label {
            name: "Disease".to_string(),
        },
        Row::Relationship {
            name: "Gene_causes_Disease".to_string(),
        },
    ]
    .into_iter()
    .collect();

    let terms = RowTerms::new(&rows);
    assert_eq!(terms.len(), 3);
    assert_eq!(terms.matching("gene").collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(terms.matching("disease").collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(terms.matching("protein").count(), 0);
}
