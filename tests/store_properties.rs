//! End-to-end properties of the state store: durability, defaulting,
//! recovery, eviction, and serialized updates.

use serde_json::{json, Value};
use statekeep::{
    atomic, document, document_from_value, BoundedAppendLog, Document, DocumentPatch, Error,
    JsonDocument, StateStore, StoreConfig, StoreRegistry, StoreState,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statekeep_store=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn doc(value: Value) -> Document {
    document_from_value(value).unwrap()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

fn fast_config() -> StoreConfig {
    StoreConfig {
        retry_backoff_seconds: 0.001,
        ..Default::default()
    }
}

// ============================================================
// Documents
// ============================================================

#[test]
fn round_trip_preserves_arbitrary_json() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let defaults = doc(json!({"a": 0, "nested": {"k": null}}));

    let value = doc(json!({
        "a": -12,
        "nested": {"k": [1, 2.5, "three", {"four": false}]},
        "unicode": "snø ☃",
        "big": 9007199254740993u64,
        "float": 1.0715660391465826e-75
    }));
    document::save(&path, &value).unwrap();
    assert_eq!(document::load(&path, &defaults).unwrap(), value);
}

#[test]
fn idempotent_defaulting_writes_once() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    fs::write(&path, r#"{"a": 1}"#).unwrap();
    let store = JsonDocument::new(&path, doc(json!({"a": 0, "b": []})));

    let first = store.load().unwrap();
    let bytes_after_first = fs::read(&path).unwrap();
    let second = store.load().unwrap();

    assert_eq!(first.document, second.document);
    assert!(first.report.persisted);
    assert!(!second.report.persisted);
    assert_eq!(fs::read(&path).unwrap(), bytes_after_first);
}

#[test]
fn interrupted_write_leaves_previous_content() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let before = doc(json!({"v": 1, "items": ["a"]}));
    document::save(&path, &before).unwrap();

    // Temp file fully written and synced, process "dies" before the rename.
    let staged = atomic::stage(&path, br#"{"v": 2, "items": ["#).unwrap();
    assert_eq!(read_json(&path), Value::Object(before.clone()));
    assert_eq!(document::load(&path, &doc(json!({}))).unwrap(), before);
    assert!(staged.temp_path().exists());
}

#[test]
fn corrupt_file_recovers_to_defaults_with_backup() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let garbage = b"\xff\xfe definitely { not json";
    fs::write(&path, garbage).unwrap();

    let defaults = doc(json!({"replica_count": 0, "history": []}));
    let loaded = JsonDocument::new(&path, defaults.clone()).load().unwrap();

    assert!(loaded.report.recovered);
    assert_eq!(loaded.document, defaults);
    assert_eq!(fs::read(tmp.path().join("state.json.bak")).unwrap(), garbage);
    assert_eq!(read_json(&path), Value::Object(defaults));
}

#[test]
fn backfill_merges_and_persists() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    fs::write(&path, r#"{"a": 1}"#).unwrap();

    let loaded = document::load(&path, &doc(json!({"a": 0, "b": []}))).unwrap();
    assert_eq!(Value::Object(loaded), json!({"a": 1, "b": []}));
    assert_eq!(read_json(&path), json!({"a": 1, "b": []}));
}

// ============================================================
// Logs
// ============================================================

#[test]
fn log_eviction_keeps_the_newest_max_entries() {
    let max = 5;
    let k = 3;
    let log = BoundedAppendLog::new(max);
    let appended: Vec<u64> = (0..max + k)
        .map(|i| log.append("event", json!({ "i": i })).sequence)
        .collect();

    let kept: Vec<u64> = log.recent(usize::MAX).iter().map(|e| e.sequence).collect();
    assert_eq!(kept.len(), max);
    assert_eq!(kept, appended[k..].to_vec());
}

// ============================================================
// Store
// ============================================================

#[test]
fn concurrent_updates_are_not_lost() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        StateStore::open(
            tmp.path().join("counter.json"),
            doc(json!({"count": 0})),
            &fast_config(),
        )
        .unwrap(),
    );

    let n = 16;
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                store
                    .update(|d| {
                        let count = d["count"].as_i64().unwrap_or(0);
                        d.insert("count".into(), json!(count + 1));
                        Ok(())
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.get_state()["count"], json!(n));
    assert_eq!(read_json(store.path())["count"], json!(n));
}

#[test]
fn five_sequential_increments() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = StateStore::open(
        tmp.path().join("replicas.json"),
        doc(json!({"replica_count": 0, "history": []})),
        &fast_config(),
    )
    .unwrap();

    for _ in 0..5 {
        store
            .update(|d| {
                let n = d["replica_count"].as_i64().unwrap_or(0);
                d.insert("replica_count".into(), json!(n + 1));
                d.get_mut("history")
                    .and_then(Value::as_array_mut)
                    .ok_or_else(|| anyhow::anyhow!("history is not an array"))?
                    .push(json!("inc"));
                Ok(())
            })
            .unwrap();
    }

    let state = store.get_state();
    assert_eq!(state["replica_count"], json!(5));
    assert_eq!(state["history"], json!(["inc", "inc", "inc", "inc", "inc"]));
    assert_eq!(store.state(), StoreState::Populated);
}

#[test]
fn typed_patches_match_closure_updates() {
    let tmp = TempDir::new().unwrap();
    let store = StateStore::open(
        tmp.path().join("replicas.json"),
        doc(json!({"replica_count": 0, "history": []})),
        &fast_config(),
    )
    .unwrap();

    let inc = DocumentPatch::new()
        .increment("replica_count", 1)
        .append("history", "inc");
    for _ in 0..5 {
        store.apply(&inc).unwrap();
    }
    assert_eq!(
        read_json(store.path()),
        json!({"replica_count": 5, "history": ["inc", "inc", "inc", "inc", "inc"]})
    );
    assert_eq!(store.audit().len(), 6);
}

#[test]
fn mutator_error_wraps_cause_and_keeps_disk() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = StateStore::open(
        tmp.path().join("state.json"),
        doc(json!({"count": 0})),
        &fast_config(),
    )
    .unwrap();
    let before = fs::read(store.path()).unwrap();

    let err = store
        .update(|d| {
            d.clear();
            let parsed: i64 = "seven".parse()?;
            d.insert("count".into(), json!(parsed));
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, Error::DocumentUpdate(_)));
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(fs::read(store.path()).unwrap(), before);
}

#[test]
fn failed_update_does_not_upgrade_the_file() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = StateStore::open(
        tmp.path().join("state.json"),
        doc(json!({"count": 0, "b": []})),
        &fast_config(),
    )
    .unwrap();
    fs::write(store.path(), r#"{"count": 7}"#).unwrap();

    let err = store.update(|_| anyhow::bail!("refuse")).unwrap_err();
    assert!(err.is_disk_unchanged());
    assert_eq!(fs::read(store.path()).unwrap(), br#"{"count": 7}"#);
}

#[test]
fn unreadable_target_keeps_last_known_good_state() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("data");
    let path = dir.join("state.json");
    let store = StateStore::open(&path, doc(json!({"count": 0})), &fast_config()).unwrap();
    store.apply(&DocumentPatch::new().increment("count", 1)).unwrap();

    // Replace the target with a directory the store can neither read nor replace.
    fs::remove_file(&path).unwrap();
    fs::create_dir_all(path.join("blocker")).unwrap();

    let err = store.apply(&DocumentPatch::new().increment("count", 1));
    // The directory is unreadable as a document, so this surfaces as a read failure.
    assert!(matches!(err, Err(Error::ReadFailure { .. })));
    assert_eq!(store.get_state()["count"], json!(1));

    let stale = store.update_or_stale(|d| {
        d.insert("count".into(), json!(100));
        Ok(())
    });
    assert_eq!(stale["count"], json!(1));
}

#[test]
fn registry_serializes_callers_sharing_a_path() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(StoreRegistry::new(fast_config()));
    let path = tmp.path().join("shared.json");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let path = path.clone();
            thread::spawn(move || {
                let store = registry.open(&path, doc(json!({"n": 0}))).unwrap();
                store.apply(&DocumentPatch::new().increment("n", 1)).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(registry.len(), 1);
    assert_eq!(read_json(&path)["n"], json!(8));
}

#[test]
fn last_updated_is_stamped_on_updates_only() {
    let tmp = TempDir::new().unwrap();
    let defaults = doc(json!({"count": 0, "last_updated": null}));
    let store =
        StateStore::open(tmp.path().join("state.json"), defaults.clone(), &fast_config()).unwrap();
    assert_eq!(store.get_state(), defaults);

    let next = store.apply(&DocumentPatch::new().increment("count", 1)).unwrap();
    assert!(next["last_updated"].is_string());
    assert_eq!(store.audit().recent(1)[0].payload["keys"], json!(["count"]));

    store.reset().unwrap();
    assert_eq!(store.get_state(), defaults);
    assert_eq!(store.state(), StoreState::Fresh);
}
