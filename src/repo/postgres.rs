use super::{AggregatesByMonitor, Collection, Record, Store};
use crate::domain::{DailyAggregate, MonitorStatus};
use crate::errors::ApiResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::PgPool;

/// Postgres-backed durable store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_many(&self, collection: Collection, records: Vec<Record>) -> ApiResult<()> {
        let sql = format!(
            "INSERT INTO {}(id, payload, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (id) DO UPDATE
             SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at",
            collection.table()
        );

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(&sql)
                .bind(record.id)
                .bind(record.payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_all(&self, collection: Collection, records: Vec<Record>) -> ApiResult<()> {
        let insert = format!(
            "INSERT INTO {}(id, payload, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload",
            collection.table()
        );

        // Dropping `tx` on an early return rolls back, so the old rows survive
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {}", collection.table()))
            .execute(&mut *tx)
            .await?;
        for record in records {
            sqlx::query(&insert)
                .bind(record.id)
                .bind(record.payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_all(&self, collection: Collection) -> ApiResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, (String, Value)>(&format!(
            "SELECT id, payload FROM {} ORDER BY id",
            collection.table()
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, payload)| Record { id, payload })
            .collect())
    }

    async fn merge_daily_aggregate(
        &self,
        monitor_id: &str,
        day: NaiveDate,
        sample: MonitorStatus,
        failed: bool,
    ) -> ApiResult<()> {
        let hit = i64::from(failed);
        // Single statement, so concurrent merges on one key serialize on the row lock
        sqlx::query(
            "INSERT INTO daily_aggregates
                 (monitor_id, day, status, downtime_minutes, checks_total, checks_failed)
             VALUES ($1, $2, $3, $4, 1, $4)
             ON CONFLICT (monitor_id, day) DO UPDATE SET
                 checks_total = daily_aggregates.checks_total + 1,
                 checks_failed = daily_aggregates.checks_failed + EXCLUDED.checks_failed,
                 downtime_minutes = daily_aggregates.downtime_minutes + EXCLUDED.downtime_minutes,
                 status = CASE
                     WHEN daily_aggregates.status = 'down' OR EXCLUDED.status = 'down' THEN 'down'
                     ELSE EXCLUDED.status
                 END,
                 updated_at = now()",
        )
        .bind(monitor_id)
        .bind(day)
        .bind(sample.as_str())
        .bind(hit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn init_daily_aggregate(
        &self,
        monitor_id: &str,
        day: NaiveDate,
        sample: MonitorStatus,
    ) -> ApiResult<bool> {
        let result = sqlx::query(
            "INSERT INTO daily_aggregates
                 (monitor_id, day, status, downtime_minutes, checks_total, checks_failed)
             VALUES ($1, $2, $3, 0, 0, 0)
             ON CONFLICT (monitor_id, day) DO NOTHING",
        )
        .bind(monitor_id)
        .bind(day)
        .bind(sample.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_daily_aggregates(&self, since: NaiveDate) -> ApiResult<AggregatesByMonitor> {
        let rows = sqlx::query_as::<_, (String, NaiveDate, String, i64, i64, i64)>(
            "SELECT monitor_id, day, status, downtime_minutes, checks_total, checks_failed
             FROM daily_aggregates
             WHERE day >= $1
             ORDER BY monitor_id, day",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped = AggregatesByMonitor::new();
        for (monitor_id, day, status, downtime_minutes, checks_total, checks_failed) in rows {
            grouped
                .entry(monitor_id.clone())
                .or_default()
                .push(DailyAggregate {
                    monitor_id,
                    day,
                    status: MonitorStatus::parse(&status),
                    downtime_minutes,
                    checks_total,
                    checks_failed,
                });
        }
        Ok(grouped)
    }

    async fn get_metadata(&self, key: &str) -> ApiResult<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT value FROM metadata WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_metadata(&self, key: &str, value: &str) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO metadata(key, value, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Initialize database tables
pub async fn init_db(pool: &PgPool) -> ApiResult<()> {
    for collection in [
        Collection::Monitors,
        Collection::Incidents,
        Collection::StatusChanges,
    ] {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {}(
                id TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            collection.table()
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS daily_aggregates(
            monitor_id TEXT NOT NULL,
            day DATE NOT NULL,
            status TEXT NOT NULL,
            downtime_minutes BIGINT NOT NULL DEFAULT 0,
            checks_total BIGINT NOT NULL DEFAULT 0,
            checks_failed BIGINT NOT NULL DEFAULT 0,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (monitor_id, day),
            CHECK (checks_failed <= checks_total)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_daily_aggregates_day
         ON daily_aggregates(day)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS metadata(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
