use rusqlite::{Connection, OpenFlags};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    task::{spawn_blocking, JoinHandle},
    time,
};
use tracing::{info, warn};

use super::error::PersistError;
use super::packet::FullPacket;

pub mod schema;
pub mod telemetry;

use telemetry::TelemetryRow;

const SCHEMA_VERSION: i64 = 1;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do when a write fails. `retries == 0` hands the first failure
/// straight back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistPolicy {
    pub retries: u32,
    pub backoff: Duration, // doubled after each retry
}

impl PersistPolicy {
    pub fn fail_fast() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self::fail_fast()
    }
}

/// Handle to the telemetry store. Cloning shares the connection.
#[derive(Clone)]
pub struct DatabaseSvc {
    conn: Arc<Mutex<Connection>>,
    write_timeout: Duration,
    policy: PersistPolicy,
}

impl DatabaseSvc {
    pub fn open(path: &Path, write_timeout: Duration, policy: PersistPolicy) -> Result<Self, PersistError> {
        info!("database_svc: opening {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(write_timeout)?;
        Self::init(conn, write_timeout, policy)
    }

    /// Opens an existing store for reads only. The schema is never created or
    /// rebuilt, and a store written by another schema version is refused.
    pub fn open_read_only(path: &Path) -> Result<Self, PersistError> {
        info!("database_svc: opening {} read-only", path.display());
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(DEFAULT_WRITE_TIMEOUT)?;

        let version = conn.query_row("SELECT version FROM db_info WHERE id = 0", [], |row| {
            row.get::<usize, i64>(0)
        })?;
        if version != SCHEMA_VERSION {
            return Err(PersistError::ConnectionFailure(format!(
                "schema version {} != {}",
                version, SCHEMA_VERSION
            )));
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            policy: PersistPolicy::fail_fast(),
        })
    }

    pub fn open_in_memory(write_timeout: Duration, policy: PersistPolicy) -> Result<Self, PersistError> {
        Self::init(Connection::open_in_memory()?, write_timeout, policy)
    }

    fn init(conn: Connection, write_timeout: Duration, policy: PersistPolicy) -> Result<Self, PersistError> {
        match conn.query_row("SELECT version FROM db_info WHERE id = 0", [], |row| {
            row.get::<usize, i64>(0)
        }) {
            // database exists, check version and remake if necessary
            Ok(version) => {
                if version != SCHEMA_VERSION {
                    warn!(
                        "database_svc: schema version {} != {}, recreating tables",
                        version, SCHEMA_VERSION
                    );
                    schema::cleanup(&conn)?;
                    schema::create(&conn)?;
                }
            }
            // database does not exist, create tables
            Err(_) => schema::create(&conn)?,
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            write_timeout,
            policy,
        })
    }

    /// Appends one row for the packet, retrying according to the policy.
    ///
    /// A timed out insert is not cancelled. The retry keeps waiting on that
    /// same insert, and a new one is only queued after the previous attempt
    /// has finished with an error, so the row is never written twice.
    pub async fn persist(&self, pkt: &FullPacket) -> Result<(), PersistError> {
        let row = TelemetryRow::from_packet(pkt)?;
        let mut backoff = self.policy.backoff;
        let mut attempt = 0;
        let mut pending = self.spawn_insert(row.clone());

        loop {
            let (e, finished) = match time::timeout(self.write_timeout, &mut pending).await {
                Ok(Ok(Ok(_))) => return Ok(()),
                Ok(Ok(Err(e))) => (PersistError::from(e), true),
                Ok(Err(e)) => (PersistError::ConnectionFailure(s!(e)), true),
                Err(_) => (PersistError::Timeout(self.write_timeout), false),
            };
            if !e.is_retryable() || attempt >= self.policy.retries {
                return Err(e);
            }

            attempt += 1;
            warn!(
                "database_svc: write failed ({}), retry {}/{} in {:?}",
                e, attempt, self.policy.retries, backoff
            );
            time::sleep(backoff).await;
            backoff *= 2;

            if finished {
                pending = self.spawn_insert(row.clone());
            }
        }
    }

    fn spawn_insert(&self, row: TelemetryRow) -> JoinHandle<rusqlite::Result<usize>> {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.blocking_lock();
            telemetry::insert(&conn, &row)
        })
    }

    /// Runs a read against the store off the async runtime.
    pub async fn query<T, F>(&self, f: F) -> Result<T, PersistError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| PersistError::ConnectionFailure(s!(e)))?
        .map_err(PersistError::from)
    }
}
