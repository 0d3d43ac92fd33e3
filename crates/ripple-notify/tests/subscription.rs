//! Partial-sync subscription registration scenarios.

use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::{tempdir, TempDir};

use ripple_notify::{
    get_query_status, register_query, NotifierError, Results, SubscriptionState,
};
use ripple_store::{
    ColumnType, Database, RowKey, Schema, StoreConfig, SyncConfig, TableDef, Value,
};

// -- helpers --

fn dog_schema() -> Schema {
    Schema::new(vec![TableDef::new("Dog")
        .with_column("name", ColumnType::String)
        .with_column("age", ColumnType::Int)])
}

fn partial_config(dir: &TempDir, file: &str) -> StoreConfig {
    StoreConfig {
        path: dir.path().join(file),
        schema: Some(dog_schema()),
        sync: Some(SyncConfig {
            server_url: "ripple://server/user".into(),
            access_token: "token".into(),
            partial: true,
        }),
    }
}

/// Creates `count` dogs, returning their stable keys.
fn create_dogs(db: &mut Database, count: usize) -> Vec<RowKey> {
    let mut txn = db.begin_write().unwrap();
    let mut keys = Vec::new();
    for i in 0..count {
        let row = txn.insert_row("Dog").unwrap();
        txn.set("Dog", row, "name", Value::String(format!("dog-{i}")))
            .unwrap();
        txn.set("Dog", row, "age", Value::Int(4 + i as i64)).unwrap();
        keys.push(txn.row_key("Dog", row).unwrap());
    }
    txn.commit().unwrap();
    keys
}

/// Plays the remote server: flips the subscription row named `name` to
/// `status`, recording `error` and linking `matches` into the matches list.
fn resolve_subscription(
    config: &StoreConfig,
    name: &str,
    status: i64,
    error: &str,
    matches: &[RowKey],
) {
    let mut db = Database::open(StoreConfig::with_path(&config.path)).unwrap();
    let mut txn = db.begin_write().unwrap();

    let (row, matches_property) = {
        let table = txn.group().table_by_name("__ResultSets").unwrap();
        let name_col = table.column_index("name").unwrap();
        let row = table.find_first_string(name_col, name).unwrap();
        let prop_col = table.column_index("matches_property").unwrap();
        let matches_property = table.get(row, prop_col).unwrap().as_str().unwrap().to_string();
        (row, matches_property)
    };

    txn.set("__ResultSets", row, "status", Value::Int(status))
        .unwrap();
    txn.set(
        "__ResultSets",
        row,
        "error_message",
        Value::String(error.to_string()),
    )
    .unwrap();
    for &key in matches {
        txn.add_link("__ResultSets", row, &matches_property, key)
            .unwrap();
    }
    txn.commit().unwrap();
}

type Outcome = Result<Results, NotifierError>;

fn recording_callback() -> (Arc<Mutex<Vec<Outcome>>>, impl Fn(Outcome) + Send + 'static) {
    let outcomes: Arc<Mutex<Vec<Outcome>>> = Arc::default();
    let sink = Arc::clone(&outcomes);
    (outcomes, move |outcome| sink.lock().push(outcome))
}

// -- Rejection tests --

#[test]
fn test_register_query_rejects_unsynced_database() {
    let dir = tempdir().unwrap();
    let mut config = partial_config(&dir, "local.db");
    config.sync = None;
    let mut db = Database::open(config).unwrap();

    let err = register_query(&mut db, "Dog", "age > 3", |_| {}).unwrap_err();
    assert!(matches!(err, NotifierError::InvalidConfiguration(_)));
}

#[test]
fn test_register_query_rejects_full_sync_database() {
    let dir = tempdir().unwrap();
    let mut config = partial_config(&dir, "full.db");
    if let Some(sync) = config.sync.as_mut() {
        sync.partial = false;
    }
    let mut db = Database::open(config).unwrap();

    let err = register_query(&mut db, "Dog", "age > 3", |_| {}).unwrap_err();
    assert!(matches!(err, NotifierError::InvalidConfiguration(_)));
}

#[test]
fn test_register_query_rejects_unknown_object_class() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(partial_config(&dir, "user.db")).unwrap();

    let err = register_query(&mut db, "Cat", "age > 3", |_| {}).unwrap_err();
    assert!(matches!(err, NotifierError::SchemaMismatch(_)));
}

// -- Row creation --

#[test]
fn test_register_query_creates_result_sets_row() {
    let dir = tempdir().unwrap();
    let config = partial_config(&dir, "user.db");
    let mut db = Database::open(config.clone()).unwrap();

    let _handle = register_query(&mut db, "Dog", "age > 3", |_| {}).unwrap();

    let mut reader = Database::open(StoreConfig::with_path(&config.path)).unwrap();
    let group = reader.read_group().unwrap();
    let table = group.table_by_name("__ResultSets").unwrap();
    assert_eq!(table.len(), 1);

    let get_str = |column: &str| {
        let col = table.column_index(column).unwrap();
        table.get(0, col).unwrap().as_str().unwrap().to_string()
    };
    let get_int = |column: &str| {
        let col = table.column_index(column).unwrap();
        table.get(0, col).unwrap().as_int().unwrap()
    };
    assert_eq!(get_str("name"), "age > 3");
    assert_eq!(get_str("query"), "age > 3");
    assert_eq!(get_str("matches_property"), "Dog_matches");
    assert_eq!(get_str("error_message"), "");
    assert_eq!(get_int("status"), 0);
    assert_eq!(get_int("query_parse_counter"), 0);
    assert!(table.column_index("Dog_matches").is_some());
}

#[test]
fn test_register_query_status_starts_uninitialized() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(partial_config(&dir, "user.db")).unwrap();
    let _handle = register_query(&mut db, "Dog", "age > 3", |_| {}).unwrap();

    let mut reader = Database::open(StoreConfig::with_path(&db.config().path)).unwrap();
    let (state, message) = get_query_status(&mut reader, "age > 3").unwrap();
    assert_eq!(state, SubscriptionState::Uninitialized);
    assert_eq!(message, "");
}

#[test]
fn test_get_query_status_missing_row_is_uninitialized() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(partial_config(&dir, "user.db")).unwrap();
    let (state, message) = get_query_status(&mut db, "no such query").unwrap();
    assert_eq!(state, SubscriptionState::Uninitialized);
    assert_eq!(message, "");
}

// -- S5: happy path --

#[test]
fn test_subscription_delivers_matches_exactly_once() {
    let dir = tempdir().unwrap();
    let config = partial_config(&dir, "user.db");
    let mut db = Database::open(config.clone()).unwrap();
    let dogs = create_dogs(&mut db, 2);

    let (outcomes, callback) = recording_callback();
    let _handle = register_query(&mut db, "Dog", "age > 3", callback).unwrap();
    assert!(outcomes.lock().is_empty());

    resolve_subscription(&config, "age > 3", 1, "", &dogs);

    {
        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        let results = outcomes[0].as_ref().unwrap();
        assert_eq!(results.object_type(), "Dog");
        assert_eq!(results.len(), 2);
        assert_eq!(results.row_keys(), &dogs[..]);
    }

    // Terminal delivery detached the observer: a further row change (more
    // links appended) is silent.
    resolve_subscription(&config, "age > 3", 1, "", &dogs);
    assert_eq!(outcomes.lock().len(), 1);
}

#[test]
fn test_subscription_ignores_non_status_changes() {
    let dir = tempdir().unwrap();
    let config = partial_config(&dir, "user.db");
    let mut db = Database::open(config.clone()).unwrap();
    let dogs = create_dogs(&mut db, 1);

    let (outcomes, callback) = recording_callback();
    let _handle = register_query(&mut db, "Dog", "age > 3", callback).unwrap();

    // The server touches the row without resolving it (still computing).
    {
        let mut writer = Database::open(StoreConfig::with_path(&config.path)).unwrap();
        let mut txn = writer.begin_write().unwrap();
        let row = {
            let table = txn.group().table_by_name("__ResultSets").unwrap();
            let name_col = table.column_index("name").unwrap();
            table.find_first_string(name_col, "age > 3").unwrap()
        };
        txn.set("__ResultSets", row, "query_parse_counter", Value::Int(1))
            .unwrap();
        txn.commit().unwrap();
    }
    assert!(outcomes.lock().is_empty());

    resolve_subscription(&config, "age > 3", 1, "", &dogs);
    assert_eq!(outcomes.lock().len(), 1);
}

// -- S6: failure path --

#[test]
fn test_subscription_delivers_error_exactly_once() {
    let dir = tempdir().unwrap();
    let config = partial_config(&dir, "user.db");
    let mut db = Database::open(config.clone()).unwrap();

    let (outcomes, callback) = recording_callback();
    let _handle = register_query(&mut db, "Dog", "bad ????", callback).unwrap();

    resolve_subscription(&config, "bad ????", -1, "bad query", &[]);

    {
        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        match outcomes[0].as_ref().unwrap_err() {
            NotifierError::SubscriptionFailed(message) => assert_eq!(message, "bad query"),
            other => panic!("unexpected error: {other}"),
        }
    }

    // Observer detached after the terminal error.
    resolve_subscription(&config, "bad ????", -1, "again", &[]);
    assert_eq!(outcomes.lock().len(), 1);
}

#[test]
fn test_query_status_reflects_terminal_states() {
    let dir = tempdir().unwrap();
    let config = partial_config(&dir, "user.db");
    let mut db = Database::open(config.clone()).unwrap();

    let _ok = register_query(&mut db, "Dog", "age > 3", |_| {}).unwrap();
    let _bad = register_query(&mut db, "Dog", "bad ????", |_| {}).unwrap();

    resolve_subscription(&config, "age > 3", 1, "", &[]);
    resolve_subscription(&config, "bad ????", -1, "bad query", &[]);

    let mut reader = Database::open(StoreConfig::with_path(&config.path)).unwrap();
    assert_eq!(
        get_query_status(&mut reader, "age > 3").unwrap(),
        (SubscriptionState::Initialized, String::new())
    );
    assert_eq!(
        get_query_status(&mut reader, "bad ????").unwrap(),
        (SubscriptionState::Error, "bad query".to_string())
    );
}

// -- Cancellation --

#[test]
fn test_cancelled_subscription_never_fires() {
    let dir = tempdir().unwrap();
    let config = partial_config(&dir, "user.db");
    let mut db = Database::open(config.clone()).unwrap();

    let (outcomes, callback) = recording_callback();
    let mut handle = register_query(&mut db, "Dog", "age > 3", callback).unwrap();
    handle.cancel();

    resolve_subscription(&config, "age > 3", 1, "", &[]);
    assert!(outcomes.lock().is_empty());
}

#[test]
fn test_dropped_handle_keeps_subscription_alive() {
    let dir = tempdir().unwrap();
    let config = partial_config(&dir, "user.db");
    let mut db = Database::open(config.clone()).unwrap();
    let dogs = create_dogs(&mut db, 1);

    let (outcomes, callback) = recording_callback();
    drop(register_query(&mut db, "Dog", "age > 3", callback).unwrap());

    resolve_subscription(&config, "age > 3", 1, "", &dogs);
    assert_eq!(outcomes.lock().len(), 1);
}
