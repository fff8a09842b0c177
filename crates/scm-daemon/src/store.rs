//! PostgreSQL storage.

use chrono::{DateTime, Utc};
use scm_core::segments::Receiver;
use scm_core::storage::{EsnoRecord, ModcodRecord, Storage, StorageError, WindowedAverage};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Key of the heartbeat row in `sys`.
pub const HEARTBEAT_KEY: &str = "watchdog_ts";

/// Connect to PostgreSQL and return a connection pool.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url)
        .await?;

    tracing::info!("connected to PostgreSQL");
    Ok(pool)
}

/// Run embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations complete");
    Ok(())
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Storage for PgStorage {
    async fn append_esno(&self, record: &EsnoRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO sdd (receiver, segment, ts, esno, valid, accepted, rejected, total) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.receiver.label())
        .bind(&record.segment)
        .bind(record.ts)
        .bind(record.esno)
        .bind(record.valid)
        .bind(i64::from(record.accepted))
        .bind(i64::from(record.rejected))
        .bind(i64::from(record.total))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn append_modcod(&self, record: &ModcodRecord) -> Result<(), StorageError> {
        let per_mille: Vec<i16> = record.per_mille.iter().map(|&p| p as i16).collect();
        sqlx::query("INSERT INTO mc (ts, bit_rate, total, per_mille) VALUES ($1, $2, $3, $4)")
            .bind(record.ts)
            .bind(record.bitrate_mbps)
            .bind(i64::try_from(record.total).unwrap_or(i64::MAX))
            .bind(per_mille)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn windowed_average(
        &self,
        receiver: Receiver,
        segment: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<WindowedAverage>, StorageError> {
        let (avg, count) = sqlx::query_as::<_, (Option<f64>, i64)>(
            "SELECT AVG(esno)::DOUBLE PRECISION, COUNT(*) FROM sdd \
             WHERE receiver = $1 AND segment = $2 AND ts > $3",
        )
        .bind(receiver.label())
        .bind(segment)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        if count == 0 {
            return Ok(None);
        }
        match (avg, u64::try_from(count)) {
            (Some(esno), Ok(count)) => Ok(Some(WindowedAverage { esno, count })),
            (avg, _) => Err(StorageError::Malformed(format!(
                "average {avg:?} over {count} records"
            ))),
        }
    }

    async fn upsert_heartbeat(&self, ts: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO sys (key, ts) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET ts = EXCLUDED.ts",
        )
        .bind(HEARTBEAT_KEY)
        .bind(ts)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
