use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use lumokv::{
    BatchOperation, BatchOptions, BatchResult, DbOptions, Database, EnvOptions, Environment, Error,
    WriteFlags,
};
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, Environment, Database) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new().max_dbs(2)).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();
    (temp_dir, env, db)
}

#[test]
fn test_conditional_chain() {
    let (_dir, env, db) = setup_test_env();

    // The guard sees the put made earlier in the same batch
    let ops = vec![
        BatchOperation::put(db, b"A", b"1"),
        BatchOperation::put(db, b"B", b"2").if_key(b"A").if_value(b"1"),
    ];
    let results = env.batch_write(&ops, BatchOptions::new()).unwrap();
    assert_eq!(results, vec![BatchResult::Success, BatchResult::Success]);

    let ops = vec![
        BatchOperation::put(db, b"A", b"1"),
        BatchOperation::put(db, b"B", b"3").if_key(b"A").if_value(b"9"),
    ];
    let results = env.batch_write(&ops, BatchOptions::new()).unwrap();
    assert_eq!(results, vec![BatchResult::Success, BatchResult::ConditionNotMet]);

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(db, b"B").unwrap(), Some(&b"2"[..]));
}

#[test]
fn test_prefix_and_exact_match() {
    let (_dir, env, db) = setup_test_env();
    let mut txn = env.begin_txn().unwrap();
    txn.put(db, b"status", b"ready-1", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let ops = vec![
        BatchOperation::put(db, b"status", b"x").if_value(b"ready").if_exact_match(),
        BatchOperation::put(db, b"status", b"running").if_value(b"ready"),
        BatchOperation::put(db, b"status", b"done").if_value(b"running").if_exact_match(),
    ];
    let results = env.batch_write(&ops, BatchOptions::new()).unwrap();
    assert_eq!(
        results,
        vec![
            BatchResult::ConditionNotMet,
            BatchResult::Success,
            BatchResult::Success
        ]
    );

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(db, b"status").unwrap(), Some(&b"done"[..]));
}

#[test]
fn test_missing_keys_report_not_found() {
    let (_dir, env, db) = setup_test_env();

    let ops = vec![
        BatchOperation::delete(db, b"absent"),
        BatchOperation::put(db, b"k", b"v").if_key(b"absent").if_value(b""),
        BatchOperation::put(db, b"k", b"v"),
        BatchOperation::delete(db, b"k"),
    ];
    let results = env.batch_write(&ops, BatchOptions::new()).unwrap();
    assert_eq!(
        results,
        vec![
            BatchResult::NotFound,
            BatchResult::NotFound,
            BatchResult::Success,
            BatchResult::Success
        ]
    );

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(db, b"k").unwrap(), None);
}

#[test]
fn test_guard_in_other_database() {
    let (_dir, env, db) = setup_test_env();
    let config = env.open_db(Some("config"), &DbOptions::new().create(true)).unwrap();
    let mut txn = env.begin_txn().unwrap();
    txn.put(config, b"mode", b"open", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let ops = vec![
        BatchOperation::put(db, b"entry", b"allowed").if_db(config).if_key(b"mode").if_value(b"open"),
        BatchOperation::put(db, b"other", b"denied").if_db(config).if_key(b"mode").if_value(b"closed"),
    ];
    let results = env.batch_write(&ops, BatchOptions::new()).unwrap();
    assert_eq!(results, vec![BatchResult::Success, BatchResult::ConditionNotMet]);
}

#[test]
fn test_duplicate_value_delete() {
    let (_dir, env, _db) = setup_test_env();
    let dups = env
        .open_db(Some("dups"), &DbOptions::new().create(true).dup_sort(true))
        .unwrap();

    let ops = vec![
        BatchOperation::put(dups, b"k", b"a"),
        BatchOperation::put(dups, b"k", b"b"),
        BatchOperation::delete_value(dups, b"k", b"a"),
        BatchOperation::delete_value(dups, b"k", b"zz"),
    ];
    let results = env.batch_write(&ops, BatchOptions::new()).unwrap();
    assert_eq!(results[2], BatchResult::Success);
    assert_eq!(results[3], BatchResult::NotFound);

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(dups, b"k").unwrap(), Some(&b"b"[..]));
}

#[test]
fn test_no_overwrite_flag() {
    let (_dir, env, db) = setup_test_env();
    let ops = vec![
        BatchOperation::put(db, b"k", b"first"),
        BatchOperation::put(db, b"k", b"second"),
    ];
    let options = BatchOptions::new().flags(WriteFlags::NOOVERWRITE);
    let results = env.batch_write(&ops, options).unwrap();
    assert_eq!(results, vec![BatchResult::Success, BatchResult::ConditionNotMet]);

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(db, b"k").unwrap(), Some(&b"first"[..]));
}

#[test]
fn test_error_aborts_batch() {
    let (_dir, env, db) = setup_test_env();
    let ops = vec![
        BatchOperation::put(db, b"k", b"v"),
        BatchOperation::put(db, &[b'x'; 600], b"too long"),
    ];
    assert!(matches!(
        env.batch_write(&ops, BatchOptions::new()),
        Err(Error::BadValSize)
    ));

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(db, b"k").unwrap(), None);
}

#[test]
fn test_progress_callback() {
    let (_dir, env, db) = setup_test_env();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = Arc::clone(&seen);

    let ops: Vec<BatchOperation> = (0..5u8).map(|i| BatchOperation::put(db, &[i], b"v")).collect();
    let options = BatchOptions::new().progress(move |results| {
        progress.lock().unwrap().push(results.len());
    });
    env.batch_write(&ops, options).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_async_batches() {
    let (_dir, env, db) = setup_test_env();
    let (tx, rx) = mpsc::channel();

    let mut handles = Vec::new();
    for i in 0..4u8 {
        let tx = tx.clone();
        let ops = vec![BatchOperation::put(db, &[b'k', i], &[i])];
        let handle = env
            .batch_write_async(ops, BatchOptions::new(), move |result| {
                tx.send(result.map(|r| r[0])).unwrap();
            })
            .unwrap();
        handles.push(handle);
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drop(tx);

    let results: Vec<BatchResult> = rx.iter().map(Result::unwrap).collect();
    assert_eq!(results, vec![BatchResult::Success; 4]);
    let txn = env.begin_ro_txn().unwrap();
    for i in 0..4u8 {
        assert_eq!(txn.get(db, &[b'k', i]).unwrap(), Some(&[i][..]));
    }
}

#[test]
fn test_no_overwrite_on_duplicate_database() {
    let (_dir, env, _db) = setup_test_env();
    let dups = env
        .open_db(Some("dups"), &DbOptions::new().create(true).dup_sort(true))
        .unwrap();
    let ops = vec![
        BatchOperation::put(dups, b"k", b"a"),
        BatchOperation::put(dups, b"k", b"b"),
    ];
    let options = BatchOptions::new().flags(WriteFlags::NOOVERWRITE);
    let results = env.batch_write(&ops, options).unwrap();
    assert_eq!(results, vec![BatchResult::Success, BatchResult::ConditionNotMet]);

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(dups).unwrap();
    assert_eq!(cursor.iter().count(), 1);
}
