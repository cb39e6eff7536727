use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use trellis::core::blobs::BlobStore;
use trellis::core::config::{CONFIG_FILE_NAME, Config, LedgerConfig};
use trellis::core::error::{ErrorCategory, TrellisError};
use trellis::core::hash;
use trellis::core::ledger::Ledger;
use trellis::core::snapshot::{Snapshot, SnapshotStore};
use trellis::core::store::Store;

fn fast_config() -> LedgerConfig {
    LedgerConfig {
        lock_retries: 500,
        lock_backoff_ms: 1,
        lock_backoff_max_ms: 20,
        stale_lock_secs: 30,
        ..LedgerConfig::default()
    }
}

#[test]
fn concurrent_ledger_handles_never_collide() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("ledger");
    let writers = 6;
    let per_writer = 15;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let dir = dir.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                // Separate handles, as separate processes would have.
                let ledger = Ledger::open(&dir, fast_config()).unwrap();
                barrier.wait();
                (0..per_writer)
                    .map(|i| {
                        ledger
                            .append(|seq| {
                                Ok(format!("{{\"seq\":{},\"w\":{},\"i\":{}}}", seq, w, i)
                                    .into_bytes())
                            })
                            .unwrap()
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    let expected: Vec<u64> = (1..=(writers * per_writer) as u64).collect();
    assert_eq!(all, expected);

    let ledger = Ledger::open(&dir, fast_config()).unwrap();
    assert!(ledger.gaps().unwrap().is_empty());
    let mut seen = Vec::new();
    ledger
        .scan(|seq, raw| {
            let value: serde_json::Value = serde_json::from_slice(raw)?;
            assert_eq!(value["seq"], seq);
            seen.push(seq);
            Ok(())
        })
        .unwrap();
    assert_eq!(seen, expected);
}

#[test]
fn conditional_append_detects_moved_tail() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(tmp.path(), LedgerConfig::default()).unwrap();
    ledger.append(|_| Ok(b"{}".to_vec())).unwrap();

    let err = ledger
        .append_if_sequence(0, |_| Ok(b"{}".to_vec()))
        .unwrap_err();
    assert!(matches!(
        err,
        TrellisError::ConcurrencyConflict {
            expected: 0,
            actual: 1
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(err.category(), ErrorCategory::Conflict);
    assert_eq!(ledger.count().unwrap(), 1);

    assert_eq!(
        ledger.append_if_sequence(1, |_| Ok(b"{}".to_vec())).unwrap(),
        2
    );
}

#[test]
fn held_lock_times_out_and_stale_lock_is_broken() {
    let tmp = tempdir().unwrap();
    let config = LedgerConfig {
        lock_retries: 3,
        lock_backoff_ms: 1,
        lock_backoff_max_ms: 2,
        stale_lock_secs: 3600,
        ..LedgerConfig::default()
    };
    let ledger = Ledger::open(tmp.path(), config.clone()).unwrap();
    fs::write(tmp.path().join(".lock"), "pid=1\n").unwrap();

    let err = ledger.append(|_| Ok(b"{}".to_vec())).unwrap_err();
    assert!(matches!(err, TrellisError::LockTimeout { attempts: 3 }));

    let eager = Ledger::open(
        tmp.path(),
        LedgerConfig {
            stale_lock_secs: 0,
            ..config
        },
    )
    .unwrap();
    assert_eq!(eager.append(|_| Ok(b"{}".to_vec())).unwrap(), 1);
    assert!(!tmp.path().join(".lock").exists());
}

#[test]
fn failed_encoder_writes_nothing() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(tmp.path(), LedgerConfig::default()).unwrap();
    let err = ledger
        .append(|_| Err(TrellisError::InvalidInput("nope".into())))
        .unwrap_err();
    assert!(matches!(err, TrellisError::InvalidInput(_)));
    assert_eq!(ledger.count().unwrap(), 0);
    assert!(!tmp.path().join(".lock").exists());
}

#[test]
fn config_file_overrides_defaults() {
    let tmp = tempdir().unwrap();
    assert_eq!(Config::load(tmp.path()).unwrap(), Config::default());

    fs::write(
        tmp.path().join(CONFIG_FILE_NAME),
        "[lease]\ndefault_ttl_secs = 60\n\n[snapshot]\nenabled = false\n",
    )
    .unwrap();
    let config = Config::load(tmp.path()).unwrap();
    assert_eq!(config.lease.default_ttl(), Duration::from_secs(60));
    assert_eq!(config.lease.max_ttl_secs, 86_400);
    assert!(!config.snapshot.enabled);
    assert_eq!(config.ledger, LedgerConfig::default());

    fs::write(tmp.path().join(CONFIG_FILE_NAME), "[ledger]\nlock_retries = 0\n").unwrap();
    assert!(matches!(
        Config::load(tmp.path()),
        Err(TrellisError::ConfigError(_))
    ));

    fs::write(tmp.path().join(CONFIG_FILE_NAME), "[ledger\n").unwrap();
    assert!(matches!(
        Config::load(tmp.path()),
        Err(TrellisError::ConfigError(_))
    ));
}

#[test]
fn store_layout_and_blob_integrity() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path().join("proof"));
    assert!(!store.is_initialized());
    store.ensure_layout().unwrap();
    assert!(store.is_initialized());
    assert!(store.blobs_dir().is_dir());

    let blobs = BlobStore::new(&store.blobs_dir());
    let value = serde_json::json!({ "term": "prime", "content": "p > 1 with no proper divisor" });
    let address = blobs.put("definitions", &value).unwrap();
    assert_eq!(blobs.put("definitions", &value).unwrap(), address);
    let back: serde_json::Value = blobs.get("definitions", &address).unwrap();
    assert_eq!(back, value);

    let path = store
        .blobs_dir()
        .join("definitions")
        .join(format!("{}.json", address));
    fs::write(&path, b"{\"term\":\"forged\"}").unwrap();
    assert!(matches!(
        blobs.get::<serde_json::Value>("definitions", &address),
        Err(TrellisError::HashMismatch { .. })
    ));
    assert!(matches!(
        blobs.get::<serde_json::Value>("definitions", &hash::sha256_hex(b"absent")),
        Err(TrellisError::NotFound(_))
    ));
}

#[test]
fn snapshot_store_survives_reopen() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let path = store.snapshot_db_path();
    {
        let snapshots = SnapshotStore::open(&path).unwrap();
        snapshots
            .save(&Snapshot {
                seq: 12,
                event_digest: hash::sha256_hex(b"event 12"),
                state_json: "{}".into(),
            })
            .unwrap();
    }
    let reopened = SnapshotStore::open(&path).unwrap();
    let latest = reopened.load_latest(u64::MAX >> 1).unwrap().unwrap();
    assert_eq!(latest.seq, 12);
    assert_eq!(latest.event_digest, hash::sha256_hex(b"event 12"));
}

#[test]
fn content_hash_is_stable_and_order_insensitive() {
    let a = hash::content_hash(
        "claim",
        "x > 0",
        "modus_ponens",
        &["1.2".to_string(), "1.1".to_string()],
    );
    let b = hash::content_hash(
        "claim",
        "x > 0",
        "modus_ponens",
        &["1.1".to_string(), "1.2".to_string()],
    );
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert_ne!(
        a,
        hash::content_hash("claim", "x >= 0", "modus_ponens", &["1.1".to_string()])
    );
}
