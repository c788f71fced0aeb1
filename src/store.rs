//! Lazily-initialized handle to the embedded SQLite store.
//!
//! Nothing touches the database file until the first [`Store::open`] call.
//! Concurrent first callers are arbitrated through an explicit state machine:
//! exactly one becomes the initializer, the rest wait on a completion signal
//! and share the outcome. A failed attempt parks the handle in `Failed`; the
//! next `open` starts a fresh attempt, so a transient problem (disk full,
//! locked file) does not wedge the instance for good.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{RegistryError, StorageFault};
use crate::schema;

/// Observable lifecycle of a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

enum State {
    Uninitialized,
    /// `attempt` ties waiters to the attempt they watched, so a stale waiter
    /// can never reset a newer attempt.
    Initializing {
        attempt: u64,
        done: watch::Receiver<()>,
    },
    Ready(Arc<SqlitePool>),
    Failed(String),
}

enum Role {
    Leader { done: watch::Sender<()> },
    Waiter { attempt: u64, rx: watch::Receiver<()> },
}

/// Handle to the embedded store. Cheap to share behind an [`Arc`]; one per
/// application instance.
pub struct Store {
    config: DatabaseConfig,
    state: Mutex<State>,
    init_runs: AtomicU64,
}

impl Store {
    pub fn new(config: DatabaseConfig) -> Self {
        Store {
            config,
            state: Mutex::new(State::Uninitialized),
            init_runs: AtomicU64::new(0),
        }
    }

    /// Store backed by a throwaway in-memory database. SQLite gives every
    /// connection its own private `:memory:` database, so the pool is capped
    /// at a single connection.
    pub fn in_memory() -> Self {
        Store::new(DatabaseConfig {
            path: ":memory:".into(),
            max_connections: 1,
            busy_timeout_ms: 5_000,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn status(&self) -> StoreStatus {
        match &*self.lock_state() {
            State::Uninitialized => StoreStatus::Uninitialized,
            State::Initializing { .. } => StoreStatus::Initializing,
            State::Ready(_) => StoreStatus::Ready,
            State::Failed(_) => StoreStatus::Failed,
        }
    }

    /// Number of initialization attempts started so far. One, on the happy
    /// path, no matter how many tasks raced the first `open`.
    pub fn init_runs(&self) -> u64 {
        self.init_runs.load(Ordering::Relaxed)
    }

    /// Non-blocking accessor for callers that must not wait.
    pub fn try_pool(&self) -> Result<Arc<SqlitePool>, RegistryError> {
        match &*self.lock_state() {
            State::Ready(pool) => Ok(pool.clone()),
            _ => Err(RegistryError::NotReady),
        }
    }

    /// Pool handle, initializing the store on first use.
    ///
    /// Exactly one caller runs the connect-and-provision sequence; everyone
    /// else awaits that attempt and shares its pool or its error.
    pub async fn open(&self) -> Result<Arc<SqlitePool>, StorageFault> {
        loop {
            let role = {
                let mut state = self.lock_state();
                match &*state {
                    State::Ready(pool) => return Ok(pool.clone()),
                    State::Initializing { attempt, done } => Role::Waiter {
                        attempt: *attempt,
                        rx: done.clone(),
                    },
                    State::Uninitialized | State::Failed(_) => {
                        let attempt = self.init_runs.fetch_add(1, Ordering::Relaxed) + 1;
                        let (tx, rx) = watch::channel(());
                        *state = State::Initializing { attempt, done: rx };
                        Role::Leader { done: tx }
                    }
                }
            };

            match role {
                Role::Leader { done } => {
                    let outcome = self.initialize().await;
                    let mut state = self.lock_state();
                    return match outcome {
                        Ok(pool) => {
                            let pool = Arc::new(pool);
                            *state = State::Ready(pool.clone());
                            drop(state);
                            drop(done); // wakes the waiters; they observe Ready
                            Ok(pool)
                        }
                        Err(err) => {
                            warn!(error = %err, "store initialization failed");
                            *state = State::Failed(err.to_string());
                            drop(state);
                            drop(done); // wakes the waiters; they observe Failed
                            Err(err)
                        }
                    };
                }
                Role::Waiter { attempt, mut rx } => {
                    // The sender side is dropped once the attempt settles,
                    // which wakes us with a closed-channel error.
                    let _ = rx.changed().await;
                    let mut state = self.lock_state();
                    match &*state {
                        State::Ready(pool) => return Ok(pool.clone()),
                        State::Failed(message) => return Err(StorageFault::new(message.clone())),
                        State::Initializing { attempt: current, .. } if *current == attempt => {
                            // The initializing task was dropped before it
                            // settled. Clear the stale attempt and loop; the
                            // next iteration elects a new leader.
                            *state = State::Uninitialized;
                            continue;
                        }
                        // A newer attempt is already underway; wait on it.
                        State::Initializing { .. } | State::Uninitialized => continue,
                    }
                }
            }
        }
    }

    async fn initialize(&self) -> Result<SqlitePool, StorageFault> {
        debug!(path = %self.config.path, "initializing patient store");
        let pool = connect(&self.config).await?;
        schema::ensure_schema(&pool).await?;
        info!(path = %self.config.path, "patient store ready");
        Ok(pool)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another task panicked mid-transition;
        // the state value itself is always coherent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, StorageFault> {
    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .foreign_keys(true);

    let mut pool = SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
    if config.path == ":memory:" {
        // The single connection IS the database; never let the pool reap it.
        pool = pool
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    pool.connect_with(options).await.map_err(StorageFault::from)
}
