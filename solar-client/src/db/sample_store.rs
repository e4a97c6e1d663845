use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Connection,
};
use tokio::sync::Mutex;

use super::{connect_options, StoreError};
use crate::domain::{EnergyChannel, Sample};

const CREATE_SAMPLES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS samples (
        timestamp               INTEGER PRIMARY KEY,
        production_watts        INTEGER NOT NULL,
        net_watts               INTEGER NOT NULL,
        total_watts             INTEGER NOT NULL,
        production_wh_delivered INTEGER NOT NULL DEFAULT 0,
        net_wh_delivered        INTEGER NOT NULL DEFAULT 0,
        total_wh_delivered      INTEGER NOT NULL DEFAULT 0,
        production_wh_received  INTEGER NOT NULL DEFAULT 0,
        net_wh_received         INTEGER NOT NULL DEFAULT 0,
        total_wh_received       INTEGER NOT NULL DEFAULT 0
    )
"#;

#[derive(Debug, sqlx::FromRow)]
struct SampleRow {
    timestamp: i64,
    production_watts: i64,
    net_watts: i64,
    total_watts: i64,
    production_wh_delivered: i64,
    net_wh_delivered: i64,
    total_wh_delivered: i64,
    production_wh_received: i64,
    net_wh_received: i64,
    total_wh_received: i64,
}

impl From<SampleRow> for Sample {
    fn from(r: SampleRow) -> Self {
        Sample {
            timestamp: r.timestamp,
            production: EnergyChannel::new(
                r.production_watts,
                r.production_wh_delivered,
                r.production_wh_received,
            ),
            net_consumption: EnergyChannel::new(r.net_watts, r.net_wh_delivered, r.net_wh_received),
            total_consumption: EnergyChannel::new(
                r.total_watts,
                r.total_wh_delivered,
                r.total_wh_received,
            ),
        }
    }
}

/// Durable SQLite table of samples keyed by timestamp.
///
/// All operations run under a single mutex, so at most one statement is in
/// flight per store regardless of how many tasks share it. Writes are
/// best-effort: a failed `put` reconnects and drops that sample.
pub struct SampleStore {
    options: SqliteConnectOptions,
    conn: Mutex<Option<SqliteConnection>>,
}

impl SampleStore {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://solar_monitor.sqlite`.
    ///
    /// `sqlite::memory:` is for tests only: every reconnect after a failed
    /// `put` starts a new, empty in-memory database.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let options = connect_options(url)?;
        let conn = options.connect().await?;

        Ok(Self {
            options,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Create the samples table if it does not exist yet.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        sqlx::query(CREATE_SAMPLES_TABLE).execute(&mut *conn).await?;
        Ok(())
    }

    /// Upsert a sample by timestamp; the last write for a timestamp wins.
    ///
    /// On a driver error the connection is re-established before returning
    /// `StorageUnavailable`. The sample itself is not retried.
    pub async fn put(&self, sample: &Sample) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let res = sqlx::query(
            r#"
            INSERT OR REPLACE INTO samples (
                timestamp,
                production_watts, net_watts, total_watts,
                production_wh_delivered, net_wh_delivered, total_wh_delivered,
                production_wh_received, net_wh_received, total_wh_received
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(sample.timestamp)
        .bind(sample.production.watts)
        .bind(sample.net_consumption.watts)
        .bind(sample.total_consumption.watts)
        .bind(sample.production.wh_delivered)
        .bind(sample.net_consumption.wh_delivered)
        .bind(sample.total_consumption.wh_delivered)
        .bind(sample.production.wh_received)
        .bind(sample.net_consumption.wh_received)
        .bind(sample.total_consumption.wh_received)
        .execute(&mut *conn)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    timestamp = sample.timestamp,
                    "sample write failed, reconnecting"
                );
                match self.options.connect().await {
                    Ok(fresh) => *guard = Some(fresh),
                    Err(reconnect) => {
                        tracing::error!(error = %reconnect, "sample store reconnect failed");
                    }
                }
                Err(StoreError::StorageUnavailable(e))
            }
        }
    }

    /// Samples with `timestamp >= since`, newest first, at most `limit` rows.
    pub async fn query(&self, since: i64, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let rows = sqlx::query_as::<_, SampleRow>(
            r#"
            SELECT
                timestamp,
                production_watts,
                net_watts,
                total_watts,
                production_wh_delivered,
                net_wh_delivered,
                total_wh_delivered,
                production_wh_received,
                net_wh_received,
                total_wh_received
            FROM samples
            WHERE timestamp >= ?1
            ORDER BY timestamp DESC
            LIMIT ?2
            "#,
        )
        .bind(since)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(Sample::from).collect())
    }

    /// Delete everything except the `max_records` newest rows. Returns the
    /// number of rows removed.
    pub async fn prune(&self, max_records: usize) -> Result<u64, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let result = sqlx::query(
            r#"
            DELETE FROM samples
            WHERE timestamp NOT IN (
                SELECT timestamp FROM samples ORDER BY timestamp DESC LIMIT ?1
            )
            "#,
        )
        .bind(i64::try_from(max_records).unwrap_or(i64::MAX))
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM samples")
            .fetch_one(&mut *conn)
            .await?;
        Ok(n.max(0) as u64)
    }

    /// Release the connection. Later calls fail with `StoreError::Closed`
    /// until [`SampleStore::reopen`].
    pub async fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().await?;
        }
        Ok(())
    }

    pub async fn reopen(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.options.connect().await?);
        }
        Ok(())
    }
}
