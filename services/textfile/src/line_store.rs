use crate::config::DatabaseConfig;
use crate::content_codec::{TextFileKey, TextFileLine};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// PostgreSQL accepts at most 65535 bind parameters per statement, four per row.
const MAX_ROWS_PER_INSERT: usize = 16_000;

/// Errors from a single storage attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connection lost, broken or temporarily unavailable; worth retrying
    #[error("Database connection error: {0}")]
    Transient(String),

    /// The attempt did not finish in time
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Anything a retry will not fix, e.g. constraint violations
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db_err) => db_err
                .code()
                .map(|code| is_transient_sqlstate(&code))
                .unwrap_or(false),
            _ => false,
        };

        if transient {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Database(err.to_string())
        }
    }
}

/// SQLSTATE codes that indicate the server or connection, not the statement, failed.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("53")
        || matches!(code, "40001" | "40P01" | "57P01" | "57P02" | "57P03")
}

/// Line-keyed storage for text files.
///
/// Each call is one self-contained attempt on its own connection. Retrying
/// is the caller's business.
#[async_trait]
pub trait LineStore: Send + Sync {
    /// Content of every line for `key`, ordered by line number.
    async fn fetch_lines(&self, key: &TextFileKey) -> Result<Vec<String>, StoreError>;

    /// Atomically delete all lines for `key` and insert `lines` in their place.
    async fn replace_lines(&self, key: &TextFileKey, lines: &[TextFileLine])
        -> Result<(), StoreError>;

    /// Trivial round trip used by health checks.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Line store backed by the `dm.dm_textfile` table in PostgreSQL
pub struct PgLineStore {
    pool: PgPool,
}

impl PgLineStore {
    /// Create a new line store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .test_before_acquire(true)
            .connect_with(connect_options(config)?)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!(host = %config.host, database = %config.name, "Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Close every pooled connection; later calls fail with a non-transient error
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

#[async_trait]
impl LineStore for PgLineStore {
    #[instrument(skip(self, key), fields(compid = key.component_id, filetype = %key.file_type))]
    async fn fetch_lines(&self, key: &TextFileKey) -> Result<Vec<String>, StoreError> {
        let lines = sqlx::query_scalar::<_, String>(
            r#"
            SELECT base64str
            FROM dm.dm_textfile
            WHERE compid = $1 AND filetype = $2
            ORDER BY lineno
            "#,
        )
        .bind(key.component_id)
        .bind(&key.file_type)
        .fetch_all(&self.pool)
        .await?;

        debug!(line_count = lines.len(), "Fetched text file lines");

        Ok(lines)
    }

    #[instrument(skip(self, key, lines), fields(compid = key.component_id, filetype = %key.file_type, line_count = lines.len()))]
    async fn replace_lines(
        &self,
        key: &TextFileKey,
        lines: &[TextFileLine],
    ) -> Result<(), StoreError> {
        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM dm.dm_textfile WHERE compid = $1 AND filetype = $2")
            .bind(key.component_id)
            .bind(&key.file_type)
            .execute(&mut *tx)
            .await?;

        for mut batch in insert_batches(key, lines) {
            batch.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!("Replaced text file lines");

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Connection settings from an explicit URL, or from the individual fields
/// passed through as-is so credentials need no escaping.
fn connect_options(config: &DatabaseConfig) -> anyhow::Result<PgConnectOptions> {
    match &config.url {
        Some(url) => url
            .parse::<PgConnectOptions>()
            .context("Invalid database.url"),
        None => Ok(PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)),
    }
}

/// One multi-row `INSERT` per chunk of at most `MAX_ROWS_PER_INSERT` lines
fn insert_batches<'a>(
    key: &'a TextFileKey,
    lines: &'a [TextFileLine],
) -> impl Iterator<Item = QueryBuilder<'a, Postgres>> + 'a {
    lines.chunks(MAX_ROWS_PER_INSERT).map(move |chunk| {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO dm.dm_textfile (compid, filetype, lineno, base64str) ");
        builder.push_values(chunk, |mut row, line| {
            row.push_bind(key.component_id)
                .push_bind(key.file_type.as_str())
                .push_bind(line.line_number)
                .push_bind(line.content.as_str());
        });
        builder
    })
}

/// In-memory store with fault injection for exercising the layers above storage.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Where an injected failure strikes during `replace_lines`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FailPoint {
        /// Before anything runs
        Start,
        /// After the delete ran inside the uncommitted transaction
        AfterDelete,
    }

    #[derive(Default)]
    pub struct MemoryLineStore {
        rows: Mutex<HashMap<TextFileKey, Vec<TextFileLine>>>,
        failures: Mutex<VecDeque<(FailPoint, StoreError)>>,
        calls: AtomicUsize,
    }

    impl MemoryLineStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a failure for one of the next calls
        pub fn fail_next(&self, point: FailPoint, err: StoreError) {
            self.failures.lock().unwrap().push_back((point, err));
        }

        /// Number of fetch/replace calls made, failed or not
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Raw rows as persisted, in insertion order
        pub fn rows(&self, key: &TextFileKey) -> Vec<TextFileLine> {
            self.rows
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .unwrap_or_default()
        }

        fn take_failure(&self, point: FailPoint) -> Option<StoreError> {
            let mut failures = self.failures.lock().unwrap();
            match failures.front() {
                Some((p, _)) if *p == point => failures.pop_front().map(|(_, e)| e),
                _ => None,
            }
        }
    }

    #[async_trait]
    impl LineStore for MemoryLineStore {
        async fn fetch_lines(&self, key: &TextFileKey) -> Result<Vec<String>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.take_failure(FailPoint::Start) {
                return Err(err);
            }

            let mut rows = self.rows(key);
            rows.sort_by_key(|row| row.line_number);
            Ok(rows.into_iter().map(|row| row.content).collect())
        }

        async fn replace_lines(
            &self,
            key: &TextFileKey,
            lines: &[TextFileLine],
        ) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.take_failure(FailPoint::Start) {
                return Err(err);
            }

            // Stage the transaction on a copy so a failure leaves nothing behind
            let mut staged = self.rows.lock().unwrap().clone();
            staged.remove(key);

            if let Some(err) = self.take_failure(FailPoint::AfterDelete) {
                return Err(err);
            }

            if !lines.is_empty() {
                staged.insert(key.clone(), lines.to_vec());
            }

            *self.rows.lock().unwrap() = staged;
            Ok(())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            match self.take_failure(FailPoint::Start) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    /// A database that accepts every call and never answers
    pub struct HangingLineStore;

    #[async_trait]
    impl LineStore for HangingLineStore {
        async fn fetch_lines(&self, _key: &TextFileKey) -> Result<Vec<String>, StoreError> {
            std::future::pending().await
        }

        async fn replace_lines(
            &self,
            _key: &TextFileKey,
            _lines: &[TextFileLine],
        ) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }
}
