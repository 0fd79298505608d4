use super::*;
use tempfile::TempDir;

fn report(missing: &[&str], orphaned: &[&str], stored_vectors: usize) -> IndexReport {
    let missing_in_index: Vec<String> = missing.iter().map(|s| (*s).to_string()).collect();
    let orphaned_in_index: Vec<String> = orphaned.iter().map(|s| (*s).to_string()).collect();
    let is_consistent =
        missing_in_index.is_empty() && orphaned_in_index.is_empty() && stored_vectors == 10;
    IndexReport {
        schema_rows: 10 + missing.len() - orphaned.len(),
        manifest_rows: 10,
        stored_vectors,
        missing_in_index,
        orphaned_in_index,
        generation: Some("abc".to_string()),
        model: Some("nomic-embed-text:latest".to_string()),
        built_at: None,
        rebuild_reason: None,
        is_consistent,
    }
}

#[test]
fn consistent_report() {
    let report = report(&[], &[], 10);

    assert_eq!(report.total_issues(), 0);
    assert!(report.is_consistent);
    assert!(report.summary().contains("Index is consistent"));
}

#[test]
fn inconsistent_report_counts_every_issue() {
    let report = report(&["Gene.symbol", "Protein"], &["Old"], 8);

    assert_eq!(report.total_issues(), 5);
    let summary = report.summary();
    assert!(summary.contains("2 missing in index"));
    assert!(summary.contains("1 orphaned in index"));
    assert!(summary.contains("8 of 10 vectors stored"));
}

#[tokio::test]
async fn unbuilt_index_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let schema_path = temp_dir.path().join("graph.json");
    std::fs::write(
        &schema_path,
        r#"{"NodeTypes": {"Gene": {"symbol": "string"}}, "RelationshipTypes": {}}"#,
    )
    .expect("should write schema");

    let paths = IndexPaths::for_schema(&schema_path);
    let report = ConsistencyValidator::new(&paths)
        .validate_consistency(Some(RebuildReason::MissingManifest))
        .await
        .expect("validation runs");

    assert!(!report.is_consistent);
    assert_eq!(report.schema_rows, 2);
    assert_eq!(report.manifest_rows, 0);
    assert_eq!(report.missing_in_index, vec!["Gene", "Gene.symbol"]);
    assert!(report.generation.is_none());
    assert!(report.summary().contains("has not been built"));
}
