//! End-to-end scenarios against fjall-backed storage.

use canvasdb::{
    Canvas, CanvasConfig, CanvasError, ChecksumAlgorithm, LayerOptions, LayerType, ListOptions,
    Listing, NewDocument,
};
use serde_json::json;
use tempfile::TempDir;

const NONE: &[&str] = &[];

fn open(dir: &TempDir) -> Canvas {
    Canvas::open(CanvasConfig::new(dir.path())).unwrap()
}

#[test]
fn test_work_layer_scenario() {
    let tmp = TempDir::new().unwrap();
    let canvas = open(&tmp);

    let work = canvas
        .create_layer("work", LayerOptions::new(LayerType::Context))
        .unwrap()
        .expect("fresh layer");
    assert!(canvas.tree().insert("/work").unwrap());

    let x = canvas
        .documents()
        .insert(
            NewDocument::new("note", json!({ "title": "t" })),
            &["work"],
            NONE,
        )
        .unwrap();

    assert_eq!(canvas.documents().list_ids(&["work"], NONE).unwrap(), vec![x]);
    assert!(canvas.documents().list_ids(&["other"], NONE).unwrap().is_empty());
    assert!(canvas
        .tags()
        .contexts
        .has(work.context_bitmap_key.as_deref().unwrap(), x)
        .unwrap());
}

#[test]
fn test_non_recursive_move_scenario() {
    let tmp = TempDir::new().unwrap();
    let canvas = open(&tmp);
    let tree = canvas.tree();

    tree.insert("/a/b").unwrap();
    tree.insert("/a/b/d").unwrap();
    tree.move_node("/a/b", "/c", false).unwrap();

    assert!(tree.get_node("/c").is_some());
    assert!(tree.get_node("/a/d").is_some());
    assert!(tree.get_node("/a/b/d").is_none());

    let mut paths = tree.list_paths();
    paths.sort();
    assert_eq!(paths, vec!["/a/d".to_string(), "/c/b".to_string()]);
}

#[test]
fn test_recursive_move_cycle_guard() {
    let tmp = TempDir::new().unwrap();
    let canvas = open(&tmp);
    canvas.tree().insert("/a/b/c").unwrap();

    let err = canvas.tree().move_node("/a", "/a/b", true).unwrap_err();
    assert!(matches!(err, CanvasError::Conflict(_)));
    assert_eq!(err.kind(), canvasdb::ErrorKind::Conflict);
    assert!(!err.is_retriable());
    assert_eq!(canvas.tree().list_paths(), vec!["/a/b/c".to_string()]);
}

#[test]
fn test_dedup_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let first = {
        let canvas = open(&tmp);
        let id = canvas
            .documents()
            .insert(NewDocument::tab("https://rust-lang.org", "Rust"), &["/web/lang"], NONE)
            .unwrap();
        canvas.persist().unwrap();
        id
    };

    let canvas = open(&tmp);
    let second = canvas
        .documents()
        .insert(
            NewDocument::tab("https://rust-lang.org", "Rust Programming Language"),
            &["/reading"],
            NONE,
        )
        .unwrap();
    assert_eq!(first, second);

    let doc = canvas.documents().get(first).unwrap().unwrap();
    assert_eq!(doc.version_number, 2);
    assert_eq!(canvas.documents().versions(first).unwrap().len(), 1);

    // Both contexts now reach the document
    assert_eq!(canvas.documents().list_ids(&["/web/lang"], NONE).unwrap(), vec![first]);
    assert_eq!(canvas.documents().list_ids(&["/reading"], NONE).unwrap(), vec![first]);

    let by_sum = canvas
        .documents()
        .get_by_checksum(ChecksumAlgorithm::Sha256, doc.checksum("sha256").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(by_sum.id, first);
}

#[test]
fn test_layer_rename_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let id = {
        let canvas = open(&tmp);
        let id = canvas
            .documents()
            .insert(NewDocument::note("plan", ""), &["/projects/draft"], NONE)
            .unwrap();
        canvas.tree().rename("/projects/draft", "final").unwrap();
        canvas.persist().unwrap();
        id
    };

    let canvas = open(&tmp);
    assert_eq!(canvas.tree().list_paths(), vec!["/projects/final".to_string()]);
    assert_eq!(
        canvas.documents().list_ids(&["/projects/final"], NONE).unwrap(),
        vec![id]
    );
    assert!(canvas.tree().get_node("/projects/draft").is_none());
}

#[test]
fn test_delete_and_listing_modes() {
    let tmp = TempDir::new().unwrap();
    let canvas = open(&tmp);
    let docs = canvas.documents();

    let a = docs
        .insert(NewDocument::note("a", "1"), &["/inbox"], &["todo"])
        .unwrap();
    let b = docs
        .insert(
            NewDocument::new("file", json!({ "path": "/tmp/report.pdf", "size": 1024 })),
            &["/inbox"],
            NONE,
        )
        .unwrap();

    match docs
        .list(&["/inbox"], NONE, &ListOptions::new().with_documents())
        .unwrap()
    {
        Listing::Documents(found) => {
            assert_eq!(found.iter().map(|d| d.id).collect::<Vec<_>>(), vec![a, b]);
            assert_eq!(found[1].schema, "file");
        }
        other => panic!("expected documents, got {:?}", other),
    }

    docs.delete(a).unwrap();
    assert_eq!(docs.list_ids(&["/inbox"], NONE).unwrap(), vec![b]);
    assert!(docs.list_ids(NONE, &["todo"]).unwrap().is_empty());
    assert_eq!(docs.count().unwrap(), 1);
    assert!(docs.uncommitted().unwrap().is_empty());
}
