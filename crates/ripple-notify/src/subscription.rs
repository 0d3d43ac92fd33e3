//! Partial-sync subscription registration.
//!
//! A subscription is a row in the reserved `__ResultSets` table of a
//! partially synced database. Registration writes the row; the server
//! resolves the query remotely and flips the row's `status`, at which point
//! the row observer delivers the terminal result exactly once and detaches.

use std::sync::{Arc, Weak};

use tracing::debug;

use ripple_store::{
    ColumnDef, ColumnType, Coordinator, Database, Group, ObserverControl, RowChange, RowKey,
    TableData, Value,
};

use crate::error::{NotifierError, Result};

/// The reserved table holding one row per registered query.
const RESULT_SETS_TYPE: &str = "__ResultSets";

/// Lifecycle states of a subscription row.
///
/// The status is written exclusively by the remote server; this side only
/// reads it. `Initialized` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum SubscriptionState {
    /// Unknown state (also the mapping for unrecognized status codes).
    Undefined = -3,
    /// The server does not support partial sync.
    NotSupported = -2,
    /// The server rejected the query; terminal.
    Error = -1,
    /// Row created, not yet handled by the server.
    Uninitialized = 0,
    /// The query resolved and its matches are syncing; terminal.
    Initialized = 1,
}

impl SubscriptionState {
    /// Maps a persisted status code to a state. Unknown codes map to
    /// [`SubscriptionState::Undefined`].
    #[must_use]
    pub fn from_status_code(code: i64) -> Self {
        match code {
            -2 => Self::NotSupported,
            -1 => Self::Error,
            0 => Self::Uninitialized,
            1 => Self::Initialized,
            _ => Self::Undefined,
        }
    }

    /// The persisted status code for this state.
    #[must_use]
    pub fn status_code(self) -> i64 {
        self as i64
    }
}

/// Default subscription name: the query string itself.
#[must_use]
pub fn get_default_name(query: &str) -> String {
    query.to_string()
}

/// The resolved matches of a successful subscription.
#[derive(Debug, Clone)]
pub struct Results {
    object_type: String,
    keys: Vec<RowKey>,
}

impl Results {
    /// Object type the matches belong to.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Stable keys of the matched rows, in link order.
    #[must_use]
    pub fn row_keys(&self) -> &[RowKey] {
        &self.keys
    }

    /// Number of matches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the query matched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Cleanup handle for a subscription observer.
///
/// The observer itself is owned by the coordinator and self-detaches after
/// delivering a terminal result, so dropping the handle is harmless; the
/// handle exists for early teardown via [`SubscriptionHandle::cancel`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    coordinator: Weak<Coordinator>,
    cancelled: bool,
}

impl SubscriptionHandle {
    /// Detaches the observer before a terminal status was seen. The
    /// callback will never be invoked after this returns.
    pub fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            if let Some(coordinator) = self.coordinator.upgrade() {
                coordinator.detach_observer(self.id);
            }
        }
    }
}

/// Builder wiring a row observer to a subscription row.
///
/// Captures everything the observer needs to outlive the registering scope
/// (coordinator, row key, matches property, callback); the observer releases
/// itself on terminal delivery.
pub struct SubscriptionWatchBuilder {
    coordinator: Arc<Coordinator>,
    key: RowKey,
    object_class: String,
    matches_property: String,
}

impl SubscriptionWatchBuilder {
    /// Starts a builder for the subscription row with the given stable key.
    #[must_use]
    pub fn new(coordinator: &Arc<Coordinator>, key: RowKey) -> Self {
        Self {
            coordinator: Arc::clone(coordinator),
            key,
            object_class: String::new(),
            matches_property: String::new(),
        }
    }

    /// Sets the object class the query targets.
    #[must_use]
    pub fn object_class(mut self, object_class: &str) -> Self {
        self.object_class = object_class.to_string();
        self
    }

    /// Sets the link-list property holding the matches.
    #[must_use]
    pub fn matches_property(mut self, matches_property: &str) -> Self {
        self.matches_property = matches_property.to_string();
        self
    }

    /// Attaches the observer, returning its cleanup handle.
    pub fn attach(
        self,
        callback: impl Fn(std::result::Result<Results, NotifierError>) + Send + 'static,
    ) -> SubscriptionHandle {
        let Self {
            coordinator,
            key,
            object_class,
            matches_property,
        } = self;

        let observer = move |group: &Group, change: &RowChange| -> ObserverControl {
            let Some(row) = change.index else {
                // Row deleted out from under the subscription: nothing left
                // to observe.
                return ObserverControl::Detach;
            };
            let Some(table) = group.table_by_name(RESULT_SETS_TYPE) else {
                return ObserverControl::Detach;
            };
            let status = int_at(table, row, "status").unwrap_or(0);
            match status {
                0 => ObserverControl::Keep,
                1 => {
                    let keys = table
                        .column_index(&matches_property)
                        .and_then(|col| table.get(row, col))
                        .and_then(Value::as_link_list)
                        .map(<[RowKey]>::to_vec)
                        .unwrap_or_default();
                    callback(Ok(Results {
                        object_type: object_class.clone(),
                        keys,
                    }));
                    ObserverControl::Detach
                }
                _ => {
                    let message = string_at(table, row, "error_message").unwrap_or_default();
                    callback(Err(NotifierError::SubscriptionFailed(message)));
                    ObserverControl::Detach
                }
            }
        };

        let token = coordinator.observe_row(RESULT_SETS_TYPE, key, observer);
        let id = token.release();
        SubscriptionHandle {
            id,
            coordinator: Arc::downgrade(&coordinator),
            cancelled: false,
        }
    }
}

fn int_at(table: &TableData, row: usize, column: &str) -> Option<i64> {
    table
        .column_index(column)
        .and_then(|col| table.get(row, col))
        .and_then(Value::as_int)
}

fn string_at(table: &TableData, row: usize, column: &str) -> Option<String> {
    table
        .column_index(column)
        .and_then(|col| table.get(row, col))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Registers `query` against `object_class` and observes the subscription
/// row until the server marks it resolved.
///
/// In one write transaction this ensures the reserved `__ResultSets` schema
/// (including the `<object_class>_matches` link-list column) additively and
/// creates the row `{name: query, matches_property, query, status: 0,
/// error_message: "", query_parse_counter: 0}`. The callback fires exactly
/// once, with the resolved matches on success or the server's error message
/// on failure, after which the observer detaches.
///
/// # Errors
///
/// [`NotifierError::InvalidConfiguration`] if the database is not partially
/// synced, [`NotifierError::SchemaMismatch`] if `object_class` is not in the
/// active schema, or a propagated storage failure (the transaction rolls
/// back on scoped exit).
pub fn register_query(
    database: &mut Database,
    object_class: &str,
    query: &str,
    callback: impl Fn(std::result::Result<Results, NotifierError>) + Send + 'static,
) -> Result<SubscriptionHandle> {
    let partial = database
        .config()
        .sync
        .as_ref()
        .is_some_and(|sync| sync.partial);
    if !partial {
        return Err(NotifierError::InvalidConfiguration(
            "a partial-sync query can only be registered on a partially synced database".into(),
        ));
    }
    if !database.schema().has_table(object_class) {
        return Err(NotifierError::SchemaMismatch(format!(
            "object class '{object_class}' is not in the active schema"
        )));
    }

    let matches_property = format!("{object_class}_matches");
    let key = {
        let mut txn = database.begin_write()?;
        txn.ensure_table(
            RESULT_SETS_TYPE,
            &[
                ColumnDef::new("name", ColumnType::String),
                ColumnDef::new("matches_property", ColumnType::String),
                ColumnDef::new("query", ColumnType::String),
                ColumnDef::new("status", ColumnType::Int),
                ColumnDef::new("error_message", ColumnType::String),
                ColumnDef::new("query_parse_counter", ColumnType::Int),
            ],
        )?;
        txn.add_column(
            RESULT_SETS_TYPE,
            ColumnDef::new(
                &matches_property,
                ColumnType::LinkList {
                    target: object_class.to_string(),
                },
            ),
        )?;

        let row = txn.insert_row(RESULT_SETS_TYPE)?;
        txn.set(RESULT_SETS_TYPE, row, "name", Value::String(query.into()))?;
        txn.set(
            RESULT_SETS_TYPE,
            row,
            "matches_property",
            Value::String(matches_property.clone()),
        )?;
        txn.set(RESULT_SETS_TYPE, row, "query", Value::String(query.into()))?;
        txn.set(RESULT_SETS_TYPE, row, "status", Value::Int(0))?;
        txn.set(
            RESULT_SETS_TYPE,
            row,
            "error_message",
            Value::String(String::new()),
        )?;
        txn.set(RESULT_SETS_TYPE, row, "query_parse_counter", Value::Int(0))?;
        let key = txn.row_key(RESULT_SETS_TYPE, row)?;
        txn.commit()?;
        key
    };
    debug!(object_class, query, "subscription row created");

    Ok(SubscriptionWatchBuilder::new(database.coordinator(), key)
        .object_class(object_class)
        .matches_property(&matches_property)
        .attach(callback))
}

/// Reads the persisted status of the subscription row named `name`.
///
/// A missing table or row reads as `(Uninitialized, "")`. Reads through the
/// handle's current read transaction (pinning at the latest version if the
/// handle is unpinned).
///
/// # Errors
///
/// Propagates storage failures from beginning the read.
pub fn get_query_status(
    database: &mut Database,
    name: &str,
) -> Result<(SubscriptionState, String)> {
    let group = database.read_group()?;
    let uninitialized = (SubscriptionState::Uninitialized, String::new());

    let Some(table) = group.table_by_name(RESULT_SETS_TYPE) else {
        return Ok(uninitialized);
    };
    let Some(name_col) = table.column_index("name") else {
        return Ok(uninitialized);
    };
    let Some(row) = table.find_first_string(name_col, name) else {
        return Ok(uninitialized);
    };

    let state = SubscriptionState::from_status_code(int_at(table, row, "status").unwrap_or(0));
    let message = string_at(table, row, "error_message").unwrap_or_default();
    Ok((state, message))
}
