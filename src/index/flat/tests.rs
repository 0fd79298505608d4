use super::*;

fn sample_index() -> FlatIndex {
    FlatIndex::from_vectors(&[
        vec![1.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.6, 0.8, 0.0],
        vec![0.0, 0.0, 1.0],
    ])
    .expect("index builds")
}

#[test]
fn search_returns_best_matches_first() {
    let index = sample_index();
    let neighbors = index.search(&[1.0, 0.0, 0.0], 2).expect("search succeeds");

    let positions: Vec<usize> = neighbors.iter().map(|n| n.position).collect();
    assert_eq!(positions, vec![0, 2]);
    assert!((neighbors[0].similarity - 1.0).abs() < 1e-6);
    assert!((neighbors[1].similarity - 0.6).abs() < 1e-6);
}

#[test]
fn search_caps_at_index_size() {
    let index = sample_index();
    let neighbors = index.search(&[0.0, 1.0, 0.0], 50).expect("search succeeds");

    assert_eq!(neighbors.len(), 4);
    assert_eq!(neighbors[0].position, 1);
    assert_eq!(neighbors[1].position, 2);
}

#[test]
fn ties_are_broken_by_position() {
    let index = sample_index();
    let neighbors = index.search(&[0.0, 0.0, 0.0], 3).expect("search succeeds");

    let positions: Vec<usize> = neighbors.iter().map(|n| n.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert!(neighbors.iter().all(|n| n.similarity == 0.0));
}

#[test]
fn dimension_mismatch_is_rejected() {
    let mut index = sample_index();
    assert!(index.search(&[1.0, 0.0], 1).is_err());
    assert!(index.push(&[1.0]).is_err());
}

#[test]
fn empty_index_returns_nothing() {
    let index = FlatIndex::default();
    assert!(index.is_empty());
    assert_eq!(index.len(), 0);
    assert!(
        index
            .search(&[1.0, 2.0], 5)
            .expect("empty search succeeds")
            .is_empty()
    );
}

#[test]
fn vectors_are_addressable_by_position() {
    let index = sample_index();
    assert_eq!(index.len(), 4);
    assert_eq!(index.dimension(), 3);
    assert_eq!(index.vector(3), Some(&[0.0, 0.0, 1.0][..]));
    assert_eq!(index.vector(4), None);
}
