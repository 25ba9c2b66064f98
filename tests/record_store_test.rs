//! Record store behavior against a real directory

use std::sync::Arc;

use ml_logger::record::{FsRecordStore, MemoryRecordStore};
use ml_logger::{Error, Payload, RecordStore};
use tempfile::TempDir;

fn fs_store() -> (TempDir, FsRecordStore) {
    let dir = TempDir::new().unwrap();
    let store = FsRecordStore::new(dir.path());
    (dir, store)
}

#[tokio::test]
async fn test_append_accumulates_in_order() {
    let (_dir, store) = fs_store();
    for i in 0..5 {
        store
            .append("exp", "metrics/loss.pkl", &Payload::Integer(i))
            .await
            .unwrap();
    }

    let entries = store.read_all("exp", "metrics/loss.pkl").await.unwrap();
    let expected: Vec<Payload> = (0..5).map(Payload::Integer).collect();
    assert_eq!(entries, expected);
}

#[tokio::test]
async fn test_overwrite_resets_log() {
    let (_dir, store) = fs_store();
    store.append("exp", "parameters.pkl", &Payload::from("a")).await.unwrap();
    store.append("exp", "parameters.pkl", &Payload::from("b")).await.unwrap();
    store.overwrite("exp", "parameters.pkl", &Payload::from("c")).await.unwrap();

    let entries = store.read_all("exp", "parameters.pkl").await.unwrap();
    assert_eq!(entries, vec![Payload::from("c")]);
}

#[tokio::test]
async fn test_round_trip_then_remove() {
    let (_dir, store) = fs_store();
    let entries = vec![
        Payload::Scalar(0.25),
        Payload::Text("epoch 1".to_string()),
        Payload::json(&serde_json::json!({"loss": 0.2, "step": 2})).unwrap(),
    ];
    for entry in &entries {
        store.append("exp/run-1", "metrics/loss.pkl", entry).await.unwrap();
    }
    assert_eq!(
        store.read_all("exp/run-1", "metrics/loss.pkl").await.unwrap(),
        entries
    );

    store.remove("exp/run-1", "metrics/loss.pkl").await.unwrap();
    let err = store
        .read_all("exp/run-1", "metrics/loss.pkl")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // Removing again is a no-op
    store.remove("exp/run-1", "metrics/loss.pkl").await.unwrap();
}

#[tokio::test]
async fn test_remove_empty_key_clears_prefix() {
    let (_dir, store) = fs_store();
    store.append("exp/a", "x.pkl", &Payload::Integer(1)).await.unwrap();
    store.append("exp/a", "sub/y.pkl", &Payload::Integer(2)).await.unwrap();
    store.append("exp/b", "x.pkl", &Payload::Integer(3)).await.unwrap();

    store.remove("exp/a", "").await.unwrap();

    assert!(store.glob("exp/a", "**", "").await.unwrap().is_empty());
    assert_eq!(
        store.read_all("exp/b", "x.pkl").await.unwrap(),
        vec![Payload::Integer(3)]
    );
}

#[tokio::test]
async fn test_read_all_or_default() {
    let (_dir, store) = fs_store();
    let entries = store
        .read_all_or("exp", "missing.pkl", vec![Payload::Integer(0)])
        .await
        .unwrap();
    assert_eq!(entries, vec![Payload::Integer(0)]);
}

#[tokio::test]
async fn test_glob_in_working_dir() {
    let (_dir, store) = fs_store();
    for key in ["a/x.pkl", "a/y.pkl", "b/z.pkl", "a/notes.log"] {
        store.append("exp", key, &Payload::Integer(1)).await.unwrap();
    }

    let keys = store.glob("exp", "*.pkl", "a").await.unwrap();
    assert_eq!(keys, vec!["a/x.pkl".to_string(), "a/y.pkl".to_string()]);

    let keys = store.glob("exp", "*/*.pkl", "").await.unwrap();
    assert_eq!(
        keys,
        vec!["a/x.pkl".to_string(), "a/y.pkl".to_string(), "b/z.pkl".to_string()]
    );
}

#[tokio::test]
async fn test_glob_recursive() {
    let (_dir, store) = fs_store();
    for key in ["top.pkl", "a/x.pkl", "a/deep/y.pkl", "a/deep/skip.txt"] {
        store.append("exp", key, &Payload::Integer(1)).await.unwrap();
    }

    let keys = store.glob("exp", "**/*.pkl", "").await.unwrap();
    assert!(keys.contains(&"a/x.pkl".to_string()));
    assert!(keys.contains(&"a/deep/y.pkl".to_string()));
    assert!(!keys.iter().any(|k| k.ends_with(".txt")));
}

#[tokio::test]
async fn test_glob_missing_dir_is_empty() {
    let (_dir, store) = fs_store();
    assert!(store.glob("exp", "*.pkl", "nowhere").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_escaping_keys_rejected() {
    let (_dir, store) = fs_store();
    let payload = Payload::Integer(1);

    for key in ["../outside.pkl", "a/../../outside.pkl", "", "a/.."] {
        let err = store.append("exp", key, &payload).await.unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)), "key {key:?}: {err}");
    }
    let err = store.glob("exp", "*.pkl", "../..").await.unwrap_err();
    assert!(matches!(err, Error::InvalidKey(_)));
}

#[tokio::test]
async fn test_concurrent_appends_are_not_interleaved() {
    let (_dir, store) = fs_store();
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for writer in 0..8_i64 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for i in 0..25_i64 {
                let text = format!("writer-{writer}-{i}-{}", "x".repeat(512));
                store
                    .append("exp", "shared.log", &Payload::Text(text))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let entries = store.read_all("exp", "shared.log").await.unwrap();
    assert_eq!(entries.len(), 200);

    // Each writer's entries keep their relative order
    for writer in 0..8 {
        let tag = format!("writer-{writer}-");
        let seen: Vec<i64> = entries
            .iter()
            .filter_map(|p| match p {
                Payload::Text(t) if t.starts_with(&tag) => {
                    t[tag.len()..].split('-').next()?.parse().ok()
                }
                _ => None,
            })
            .collect();
        assert_eq!(seen, (0..25).collect::<Vec<_>>());
    }
    assert_eq!(store.active_keys(), 0);
}

#[tokio::test]
async fn test_independent_keys_in_parallel() {
    let (_dir, store) = fs_store();
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for k in 0..4_i64 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let key = format!("k{k}.pkl");
            for i in 0..10 {
                store.append("exp", &key, &Payload::Integer(i)).await.unwrap();
            }
            store.overwrite("exp", &key, &Payload::Integer(k)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for k in 0..4_i64 {
        let entries = store.read_all("exp", &format!("k{k}.pkl")).await.unwrap();
        assert_eq!(entries, vec![Payload::Integer(k)]);
    }
}

#[tokio::test]
async fn test_memory_store_matches_fs_store() {
    let (_dir, fs) = fs_store();
    let memory = MemoryRecordStore::new();

    async fn exercise<S: RecordStore>(store: &S) -> (Vec<Payload>, Vec<String>) {
        store.append("exp", "a/x.pkl", &Payload::Integer(1)).await.unwrap();
        store.append("exp", "a/x.pkl", &Payload::Integer(2)).await.unwrap();
        store.append("exp", "a/y.pkl", &Payload::Integer(3)).await.unwrap();
        store.overwrite("exp", "a/y.pkl", &Payload::Integer(4)).await.unwrap();
        store.append("exp", "b/z.pkl", &Payload::Integer(5)).await.unwrap();
        store.remove("exp", "b").await.unwrap();
        let entries = store.read_all("exp", "a/x.pkl").await.unwrap();
        let keys = store.glob("exp", "*.pkl", "a").await.unwrap();
        (entries, keys)
    }

    assert_eq!(exercise(&fs).await, exercise(&memory).await);
}
