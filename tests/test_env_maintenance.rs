use std::thread;

use lumokv::{DbOptions, Database, EnvFlags, EnvOptions, Environment, Error, WriteFlags, PAGE_SIZE};
use tempfile::TempDir;

fn fill(env: &Environment, db: Database, from: u32, to: u32) {
    let mut txn = env.begin_txn().unwrap();
    for i in from..to {
        txn.put(db, &i.to_be_bytes(), format!("value {}", i).as_bytes(), WriteFlags::empty())
            .unwrap();
    }
    txn.commit().unwrap();
}

fn check(env: &Environment, db: Database, from: u32, to: u32) {
    let txn = env.begin_ro_txn().unwrap();
    for i in from..to {
        let expected = format!("value {}", i);
        assert_eq!(txn.get_str(db, &i.to_be_bytes()).unwrap(), Some(expected.as_str()));
    }
}

#[test]
fn test_resize_then_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let small = 256 * 1024;
    let larger = 4 * 1024 * 1024;
    {
        let env = Environment::open(temp_dir.path(), &EnvOptions::new().map_size(small)).unwrap();
        let db = env.open_db(None, &DbOptions::new()).unwrap();
        fill(&env, db, 0, 500);

        // Refused while a transaction is live
        let txn = env.begin_ro_txn().unwrap();
        assert!(matches!(env.resize(larger), Err(Error::TxnsActive)));
        drop(txn);
        assert!(matches!(env.resize(PAGE_SIZE), Err(Error::EnvInvalidMapSize(_))));

        env.resize(larger).unwrap();
        assert_eq!(env.info().unwrap().map_size, larger);
        check(&env, db, 0, 500);
        fill(&env, db, 500, 5000);
        env.close();
    }

    let env = Environment::open(temp_dir.path(), &EnvOptions::new().map_size(small)).unwrap();
    assert_eq!(env.info().unwrap().map_size, larger);
    let db = env.open_db(None, &DbOptions::new()).unwrap();
    check(&env, db, 0, 5000);
}

#[test]
fn test_stat_and_info() {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new().max_readers(8)).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();

    let stat = env.stat().unwrap();
    assert_eq!(stat.psize as usize, PAGE_SIZE);
    assert_eq!(stat.entries, 0);
    assert_eq!(stat.depth, 0);

    fill(&env, db, 0, 10);
    let stat = env.stat().unwrap();
    assert_eq!(stat.entries, 10);
    assert_eq!(stat.depth, 1);
    assert_eq!(stat.leaf_pages, 1);

    let _reader = env.begin_ro_txn().unwrap();
    let info = env.info().unwrap();
    assert_eq!(info.last_txnid, 1);
    assert_eq!(info.max_readers, 8);
    assert_eq!(info.num_readers, 1);
    assert!(info.last_pgno >= 2);
    assert!(env.readers().contains('1'));
}

#[test]
fn test_readers_full() {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new().max_readers(2)).unwrap();
    let _a = env.begin_ro_txn().unwrap();
    let _b = env.begin_ro_txn().unwrap();
    assert!(matches!(env.begin_ro_txn(), Err(Error::ReadersFull)));
}

#[test]
fn test_reader_check_clears_dead_threads() {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
    assert_eq!(env.reader_check().unwrap(), 0);

    let shared = env.clone();
    thread::spawn(move || {
        let txn = shared.begin_ro_txn().unwrap();
        // Leak the transaction so its slot outlives the thread
        std::mem::forget(txn);
    })
    .join()
    .unwrap();
    assert_eq!(env.reader_list().len(), 1);
    assert_eq!(env.reader_check().unwrap(), 1);
    assert!(env.reader_list().is_empty());
}

#[test]
fn test_copy_and_compact() {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path().join("src"), &EnvOptions::new().max_dbs(2)).unwrap();
    let main = env.open_db(None, &DbOptions::new()).unwrap();
    let named = env
        .open_db(Some("dups"), &DbOptions::new().create(true).dup_sort(true))
        .unwrap();
    fill(&env, main, 0, 2000);
    let mut txn = env.begin_txn().unwrap();
    for i in 0..1500u32 {
        txn.del(main, &i.to_be_bytes(), None).unwrap();
    }
    txn.put(named, b"k", b"a", WriteFlags::empty()).unwrap();
    txn.put(named, b"k", b"b", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let plain_dir = temp_dir.path().join("plain");
    let compact_dir = temp_dir.path().join("compact");
    env.copy(&plain_dir, false).unwrap();
    env.copy(&compact_dir, true).unwrap();
    // The target must not exist yet
    assert!(env.copy(&plain_dir, false).is_err());

    let source_pages = env.info().unwrap().last_pgno;
    for (dir, compact) in [(&plain_dir, false), (&compact_dir, true)] {
        let copy = Environment::open(dir, &EnvOptions::new().max_dbs(2)).unwrap();
        let main = copy.open_db(None, &DbOptions::new()).unwrap();
        let named = copy.open_db(Some("dups"), &DbOptions::new()).unwrap();
        check(&copy, main, 1500, 2000);
        let txn = copy.begin_ro_txn().unwrap();
        assert_eq!(txn.get(main, &0u32.to_be_bytes()).unwrap(), None);
        let mut cursor = txn.cursor(named).unwrap();
        cursor.set(b"k").unwrap();
        assert_eq!(cursor.count().unwrap(), 2);
        if compact {
            assert!(copy.info().unwrap().last_pgno < source_pages);
        } else {
            assert_eq!(copy.info().unwrap().last_pgno, source_pages);
        }
    }
}

#[test]
fn test_open_twice_in_process() {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
    assert!(matches!(
        Environment::open(temp_dir.path(), &EnvOptions::new()),
        Err(Error::EnvAlreadyOpen)
    ));
    // Clones share the same environment
    let clone = env.clone();
    drop(env);
    assert!(matches!(
        Environment::open(temp_dir.path(), &EnvOptions::new()),
        Err(Error::EnvAlreadyOpen)
    ));
    drop(clone);
    Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
}

#[test]
fn test_read_only_environment() {
    let temp_dir = TempDir::new().unwrap();
    {
        let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
        let db = env.open_db(None, &DbOptions::new()).unwrap();
        fill(&env, db, 0, 10);
    }

    let env = Environment::open(temp_dir.path(), &EnvOptions::new().read_only(true)).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();
    check(&env, db, 0, 10);
    assert!(matches!(env.begin_txn(), Err(Error::EnvReadOnly)));
    assert!(matches!(env.sync(true), Err(Error::EnvReadOnly)));
}

#[test]
fn test_previous_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    {
        let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
        let db = env.open_db(None, &DbOptions::new()).unwrap();
        fill(&env, db, 0, 10);
        fill(&env, db, 10, 20);
    }

    let env = Environment::open(temp_dir.path(), &EnvOptions::new().previous_snapshot(true)).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();
    assert_eq!(env.info().unwrap().last_txnid, 1);
    check(&env, db, 0, 10);
    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(db, &15u32.to_be_bytes()).unwrap(), None);
}

#[test]
fn test_write_map_and_no_subdir() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("store.mdb");
    let options = EnvOptions::new().no_subdir(true).write_map(true).map_async(true);
    {
        let env = Environment::open(&file, &options).unwrap();
        assert_eq!(env.data_file(), file.as_path());
        let db = env.open_db(None, &DbOptions::new()).unwrap();
        fill(&env, db, 0, 1000);
        env.sync(true).unwrap();
    }
    assert!(file.is_file());

    let env = Environment::open(&file, &EnvOptions::new().no_subdir(true)).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();
    check(&env, db, 0, 1000);
}

#[test]
fn test_runtime_flags() {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();

    env.set_flags(EnvFlags::NOSYNC, true).unwrap();
    assert!(env.get_flags().contains(EnvFlags::NOSYNC));
    fill(&env, db, 0, 10);
    env.sync(true).unwrap();
    env.set_flags(EnvFlags::NOSYNC, false).unwrap();
    assert!(!env.get_flags().contains(EnvFlags::NOSYNC));

    assert!(matches!(
        env.set_flags(EnvFlags::RDONLY, true),
        Err(Error::Incompatible)
    ));
}

#[test]
fn test_free_pages_count() {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();
    assert_eq!(env.free_pages_count().unwrap(), 0);

    fill(&env, db, 0, 1000);
    let mut txn = env.begin_txn().unwrap();
    for i in 0..1000u32 {
        txn.del(db, &i.to_be_bytes(), None).unwrap();
    }
    txn.commit().unwrap();
    assert!(env.free_pages_count().unwrap() > 0);
}
