// Database module
//
// One shared connection per database path. Every statement goes through the
// per-connection lock; multi-statement transactions hold it for their whole
// scope. Row-level hooks are queued while a transaction runs and dispatched
// to listeners only after the commit, never on rollback.

pub mod migrations;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::hooks::Action;
use rusqlite::Connection;

use crate::constants::DB_BUSY_BACKOFF_MS;
use crate::error::{MediaLibError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookReason {
    Insert,
    Update,
    Delete,
}

pub type HookFn = Box<dyn Fn(HookReason, i64) + Send + Sync>;

#[derive(Default)]
struct HookState {
    /// Listeners, keyed by table name.
    listeners: Mutex<HashMap<String, Vec<HookFn>>>,
    /// Row events of the transaction in flight.
    pending: Mutex<Vec<(String, HookReason, i64)>>,
    /// Row events whose transaction has committed, awaiting dispatch.
    committed: Mutex<Vec<(String, HookReason, i64)>>,
}

pub struct Db {
    conn: Mutex<Connection>,
    state: Arc<HookState>,
}

impl Db {
    /// Open or create a database at the given path. ":memory:" is accepted.
    pub fn open(db_path: &str) -> Result<Db> {
        let conn = Connection::open(db_path)?;

        // Enable foreign keys and recursive triggers (must be done per
        // connection). The is_present cascade relies on trigger-fires-trigger.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA recursive_triggers = ON;")?;

        // WAL mode for better concurrency with host-thread readers
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(Duration::from_millis(250))?;

        let state = Arc::new(HookState::default());

        let st = Arc::clone(&state);
        conn.update_hook(Some(
            move |action: Action, _db: &str, table: &str, rowid: i64| {
                let reason = match action {
                    Action::SQLITE_INSERT => HookReason::Insert,
                    Action::SQLITE_UPDATE => HookReason::Update,
                    Action::SQLITE_DELETE => HookReason::Delete,
                    _ => return,
                };
                st.pending
                    .lock()
                    .unwrap()
                    .push((table.to_string(), reason, rowid));
            },
        ));

        let st = Arc::clone(&state);
        conn.commit_hook(Some(move || {
            let mut pending = st.pending.lock().unwrap();
            st.committed.lock().unwrap().append(&mut pending);
            // Returning true would abort the commit
            false
        }));

        let st = Arc::clone(&state);
        conn.rollback_hook(Some(move || {
            st.pending.lock().unwrap().clear();
        }));

        Ok(Db {
            conn: Mutex::new(conn),
            state,
        })
    }

    /// Register a listener for row events on a table. Handlers run after the
    /// enclosing transaction commits, outside the connection lock; they must
    /// not issue database statements.
    pub fn register_hook(&self, table: &str, hook: HookFn) {
        self.state
            .listeners
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(hook);
    }

    /// Run a closure against the connection. Single statements executed here
    /// auto-commit, so their hooks are dispatched on return.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let res = {
            let conn = self.conn.lock().unwrap();
            f(&conn)
        };
        self.dispatch_committed();
        res
    }

    /// Run a closure inside a transaction. Commit on Ok, rollback on Err; the
    /// connection lock is held for the whole scope, so nesting is forbidden.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let res = {
            let conn = self.conn.lock().unwrap();
            debug_assert!(conn.is_autocommit(), "nested transaction");
            conn.execute_batch("BEGIN IMMEDIATE")?;
            match f(&conn) {
                Ok(v) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(v)
                }
                Err(e) => {
                    if let Err(rb) = conn.execute_batch("ROLLBACK") {
                        log::error!("Rollback failed: {}", rb);
                    }
                    Err(e)
                }
            }
        };
        self.dispatch_committed();
        res
    }

    fn dispatch_committed(&self) {
        let events = {
            let mut committed = self.state.committed.lock().unwrap();
            if committed.is_empty() {
                return;
            }
            std::mem::take(&mut *committed)
        };
        let listeners = self.state.listeners.lock().unwrap();
        for (table, reason, rowid) in events {
            if let Some(hooks) = listeners.get(&table) {
                for hook in hooks {
                    hook(reason, rowid);
                }
            }
        }
    }
}

/// Retry `op` on transient busy errors with a bounded linear backoff.
/// Persistent busy surfaces as DbGeneric; all other errors pass through.
pub fn with_retries<T>(retries: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Err(e) if e.is_busy() => {
                attempt += 1;
                if attempt >= retries {
                    return Err(MediaLibError::DbGeneric(format!(
                        "still busy after {} attempts: {}",
                        attempt, e
                    )));
                }
                std::thread::sleep(Duration::from_millis(DB_BUSY_BACKOFF_MS * attempt as u64));
            }
            other => return other,
        }
    }
}

/// Scoped toggle disabling foreign keys and recursive triggers, used by bulk
/// schema rewrites. Must wrap the transaction, not run inside it: SQLite
/// ignores a foreign_keys pragma issued mid-transaction.
pub struct WeakDbContext<'c> {
    conn: &'c Connection,
}

impl<'c> WeakDbContext<'c> {
    pub fn new(conn: &'c Connection) -> Result<WeakDbContext<'c>> {
        conn.execute_batch("PRAGMA foreign_keys = OFF; PRAGMA recursive_triggers = OFF;")?;
        Ok(WeakDbContext { conn })
    }
}

impl Drop for WeakDbContext<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA recursive_triggers = ON;")
        {
            log::error!("Failed to restore connection pragmas: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_db() -> Db {
        let db = Db::open(":memory:").unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_hooks_fire_after_commit() {
        let db = test_db();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        db.register_hook(
            "t",
            Box::new(move |reason, _rowid| {
                assert_eq!(reason, HookReason::Insert);
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        db.transaction(|conn| {
            conn.execute("INSERT INTO t (v) VALUES ('a')", [])?;
            conn.execute("INSERT INTO t (v) VALUES ('b')", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hooks_discarded_on_rollback() {
        let db = test_db();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        db.register_hook(
            "t",
            Box::new(move |_, _| {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let res: Result<()> = db.transaction(|conn| {
            conn.execute("INSERT INTO t (v) VALUES ('a')", [])?;
            Err(MediaLibError::NotSupported("abort".into()))
        });
        assert!(res.is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // The row must not exist either
        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let _ = db.transaction(|conn| {
            conn.execute("INSERT INTO t (v) VALUES ('a')", [])?;
            // Constraint failure: duplicate rowid
            conn.execute("INSERT INTO t (id, v) VALUES (1, 'dup')", [])?;
            Ok(())
        });
        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_with_retries_gives_up_on_persistent_busy() {
        let attempts = AtomicUsize::new(0);
        let res: Result<()> = with_retries(3, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(MediaLibError::DbBusy("locked".into()))
        });
        assert!(matches!(res, Err(MediaLibError::DbGeneric(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_with_retries_passes_through_other_errors() {
        let attempts = AtomicUsize::new(0);
        let res: Result<()> = with_retries(3, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(MediaLibError::DbConstraint("unique".into()))
        });
        assert!(res.unwrap_err().is_constraint());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
