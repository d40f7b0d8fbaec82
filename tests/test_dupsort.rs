use lumokv::{DbFlags, DbOptions, Database, EnvOptions, Environment, Error, WriteFlags};
use tempfile::TempDir;

fn setup_dup_db(options: DbOptions) -> (TempDir, Environment, Database) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::open(temp_dir.path(), &EnvOptions::new().max_dbs(2)).unwrap();
    let db = env.open_db(Some("dups"), &options.create(true)).unwrap();
    (temp_dir, env, db)
}

#[test]
fn test_duplicates_sorted_and_counted() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));

    let mut txn = env.begin_txn().unwrap();
    txn.put(db, b"k", b"b", WriteFlags::empty()).unwrap();
    txn.put(db, b"k", b"a", WriteFlags::empty()).unwrap();
    assert!(matches!(
        txn.put(db, b"k", b"a", WriteFlags::NODUPDATA),
        Err(Error::KeyExist)
    ));
    // Without NODUPDATA an existing pair is left as is
    txn.put(db, b"k", b"a", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    cursor.set(b"k").unwrap();
    assert_eq!(cursor.count().unwrap(), 2);
    let values: Vec<&[u8]> = cursor.iter().map(|e| e.unwrap().1).collect();
    assert_eq!(values, vec![&b"a"[..], b"b"]);

    // get returns the first duplicate
    assert_eq!(txn.get(db, b"k").unwrap(), Some(&b"a"[..]));
    assert_eq!(txn.db_stat(db).unwrap().entries, 2);
}

#[test]
fn test_duplicate_navigation() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));
    let mut txn = env.begin_txn().unwrap();
    for (key, value) in [(b"a", b"1"), (b"a", b"2"), (b"a", b"3"), (b"b", b"1"), (b"c", b"9")] {
        txn.put(db, key, value, WriteFlags::empty()).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();

    cursor.first().unwrap();
    assert_eq!(cursor.next_dup().unwrap(), Some((&b"a"[..], &b"2"[..])));
    assert_eq!(cursor.last_dup().unwrap(), Some((&b"a"[..], &b"3"[..])));
    assert_eq!(cursor.next_dup().unwrap(), None);
    assert_eq!(cursor.prev_dup().unwrap(), Some((&b"a"[..], &b"2"[..])));
    assert_eq!(cursor.first_dup().unwrap(), Some((&b"a"[..], &b"1"[..])));

    assert_eq!(cursor.next_nodup().unwrap(), Some((&b"b"[..], &b"1"[..])));
    assert_eq!(cursor.prev_nodup().unwrap(), Some((&b"a"[..], &b"3"[..])));

    assert_eq!(cursor.get_both(b"a", b"2").unwrap(), Some((&b"a"[..], &b"2"[..])));
    assert_eq!(cursor.get_both(b"a", b"5").unwrap(), None);
    assert_eq!(cursor.get_both_range(b"a", b"25").unwrap(), Some((&b"a"[..], &b"3"[..])));
    assert_eq!(cursor.get_both_range(b"a", b"4").unwrap(), None);

    cursor.set(b"a").unwrap();
    assert!(cursor.exists(b"3").unwrap());
    assert!(!cursor.exists(b"7").unwrap());

    // Full iteration visits every pair
    let all: Vec<(&[u8], &[u8])> = cursor.iter().map(Result::unwrap).collect();
    assert_eq!(all.len(), 5);
    assert_eq!(all[3], (&b"b"[..], &b"1"[..]));
}

#[test]
fn test_delete_single_duplicate() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));
    let mut txn = env.begin_txn().unwrap();
    for value in [&b"x"[..], b"y", b"z"] {
        txn.put(db, b"k", value, WriteFlags::empty()).unwrap();
    }
    assert!(txn.del(db, b"k", Some(b"y")).unwrap());
    assert!(!txn.del(db, b"k", Some(b"y")).unwrap());
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    let values: Vec<&[u8]> = cursor.iter().map(|e| e.unwrap().1).collect();
    assert_eq!(values, vec![&b"x"[..], b"z"]);
    drop(cursor);
    drop(txn);

    // Deleting without a value removes the whole key
    let mut txn = env.begin_txn().unwrap();
    assert!(txn.del(db, b"k", None).unwrap());
    assert_eq!(txn.get(db, b"k").unwrap(), None);
    assert_eq!(txn.db_stat(db).unwrap().entries, 0);
    txn.commit().unwrap();
}

#[test]
fn test_many_duplicates_move_to_subtree() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));

    let mut txn = env.begin_txn().unwrap();
    for i in 0..3000u32 {
        txn.put(db, b"many", format!("value-{:05}", i).as_bytes(), WriteFlags::empty()).unwrap();
    }
    txn.put(db, b"other", b"single", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    cursor.set(b"many").unwrap();
    assert_eq!(cursor.count().unwrap(), 3000);
    assert_eq!(cursor.last_dup().unwrap().map(|e| e.1), Some(&b"value-02999"[..]));
    assert_eq!(
        cursor.get_both(b"many", b"value-01500").unwrap().map(|e| e.1),
        Some(&b"value-01500"[..])
    );
    assert_eq!(cursor.next_nodup().unwrap(), Some((&b"other"[..], &b"single"[..])));
    assert_eq!(txn.db_stat(db).unwrap().entries, 3001);
    drop(cursor);
    drop(txn);

    // Shrinking the set again
    let mut txn = env.begin_txn().unwrap();
    for i in 0..2990u32 {
        assert!(txn.del(db, b"many", Some(format!("value-{:05}", i).as_bytes())).unwrap());
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    cursor.set(b"many").unwrap();
    assert_eq!(cursor.count().unwrap(), 10);
    assert_eq!(cursor.get_current().unwrap().1, &b"value-02990"[..]);
}

#[test]
fn test_dup_value_size_limit() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));
    let mut txn = env.begin_txn().unwrap();
    assert!(matches!(
        txn.put(db, b"k", &[0u8; 512], WriteFlags::empty()),
        Err(Error::BadValSize)
    ));
    txn.put(db, b"k", &[0u8; 511], WriteFlags::empty()).unwrap();
}

#[test]
fn test_dup_fixed_and_integer_dup() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_fixed(true).integer_dup(true));
    let mut txn = env.begin_txn().unwrap();
    for n in [500u32, 3, 70_000, 42] {
        txn.put(db, b"nums", &n.to_ne_bytes(), WriteFlags::empty()).unwrap();
    }
    // Every duplicate must have the same size
    assert!(matches!(
        txn.put(db, b"nums", &7u64.to_ne_bytes(), WriteFlags::empty()),
        Err(Error::BadValSize)
    ));
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    let values: Vec<u32> = cursor
        .iter()
        .map(|e| u32::from_ne_bytes(e.unwrap().1.try_into().unwrap()))
        .collect();
    assert_eq!(values, vec![3, 42, 500, 70_000]);
}

#[test]
fn test_append_dup() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));
    let mut txn = env.begin_txn().unwrap();
    txn.put(db, b"k", b"1", WriteFlags::APPENDDUP).unwrap();
    txn.put(db, b"k", b"2", WriteFlags::APPENDDUP).unwrap();
    assert!(matches!(
        txn.put(db, b"k", b"0", WriteFlags::APPENDDUP),
        Err(Error::KeyExist)
    ));
    txn.commit().unwrap();
}

#[test]
fn test_rw_cursor_on_duplicates() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));
    let mut txn = env.begin_txn().unwrap();
    {
        let mut cursor = txn.rw_cursor(db).unwrap();
        cursor.put(b"k", b"a", WriteFlags::empty()).unwrap();
        cursor.put(b"k", b"c", WriteFlags::empty()).unwrap();
        assert_eq!(cursor.get_current().unwrap(), (&b"k"[..], &b"c"[..]));

        // Replace the current duplicate
        cursor.put(b"k", b"b", WriteFlags::CURRENT).unwrap();
        assert_eq!(cursor.get_current().unwrap(), (&b"k"[..], &b"b"[..]));
        assert_eq!(cursor.count().unwrap(), 2);

        // NODUPDATA on delete removes every value of the key
        cursor.put(b"z", b"1", WriteFlags::empty()).unwrap();
        cursor.set(b"k").unwrap();
        cursor.del(WriteFlags::NODUPDATA).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    let all: Vec<(&[u8], &[u8])> = cursor.iter().map(Result::unwrap).collect();
    assert_eq!(all, vec![(&b"z"[..], &b"1"[..])]);
}

#[test]
fn test_unnamed_dup_database_keeps_its_flags() {
    let temp_dir = TempDir::new().unwrap();
    {
        let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
        let db = env.open_db(None, &DbOptions::new().dup_sort(true)).unwrap();
        let mut txn = env.begin_txn().unwrap();
        txn.put(db, b"k", b"a", WriteFlags::empty()).unwrap();
        txn.put(db, b"k", b"b", WriteFlags::empty()).unwrap();
        txn.commit().unwrap();

        let txn = env.begin_ro_txn().unwrap();
        let mut cursor = txn.cursor(db).unwrap();
        cursor.set(b"k").unwrap();
        assert_eq!(cursor.count().unwrap(), 2);
    }

    // The flags were persisted with the main database record
    let env = Environment::open(temp_dir.path(), &EnvOptions::new()).unwrap();
    let db = env.open_db(None, &DbOptions::new()).unwrap();
    let txn = env.begin_ro_txn().unwrap();
    assert!(txn.db_flags(db).unwrap().contains(DbFlags::DUPSORT));
    let mut cursor = txn.cursor(db).unwrap();
    cursor.set(b"k").unwrap();
    assert_eq!(cursor.count().unwrap(), 2);
}

#[test]
fn test_no_overwrite_rejects_existing_key() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));
    let mut txn = env.begin_txn().unwrap();
    txn.put(db, b"k", b"a", WriteFlags::NOOVERWRITE).unwrap();
    assert!(matches!(
        txn.put(db, b"k", b"b", WriteFlags::NOOVERWRITE),
        Err(Error::KeyExist)
    ));
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let mut cursor = txn.cursor(db).unwrap();
    cursor.set(b"k").unwrap();
    assert_eq!(cursor.count().unwrap(), 1);
    assert_eq!(txn.get(db, b"k").unwrap(), Some(&b"a"[..]));
}

#[test]
fn test_rw_cursor_duplicate_navigation() {
    let (_dir, env, db) = setup_dup_db(DbOptions::new().dup_sort(true));
    let mut txn = env.begin_txn().unwrap();
    let mut cursor = txn.rw_cursor(db).unwrap();
    for value in [&b"1"[..], b"3", b"5"] {
        cursor.put(b"k", value, WriteFlags::empty()).unwrap();
    }

    assert_eq!(cursor.first_dup().unwrap(), Some((&b"k"[..], &b"1"[..])));
    assert_eq!(cursor.next_dup().unwrap(), Some((&b"k"[..], &b"3"[..])));
    assert_eq!(cursor.last_dup().unwrap(), Some((&b"k"[..], &b"5"[..])));
    assert_eq!(cursor.prev_dup().unwrap(), Some((&b"k"[..], &b"3"[..])));
    assert_eq!(cursor.get_both_range(b"k", b"4").unwrap(), Some((&b"k"[..], &b"5"[..])));
    assert_eq!(cursor.get_both_range(b"k", b"6").unwrap(), None);
}
