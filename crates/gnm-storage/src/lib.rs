//! Append-only measurement store over a pooled SeaORM connection.
//!
//! The collector only ever inserts; the read API only ever selects. No
//! code path in this crate updates or deletes a measurement row.

pub mod error;
pub mod measurement;
pub mod retry;

#[cfg(test)]
mod tests;

use std::time::Duration;

use chrono::{DateTime, Utc};
use gnm_common::types::Measurement;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement, Value,
};

pub use error::{Result, StorageError};
pub use retry::BackoffPolicy;

/// Connection pool sizing, mapped onto the underlying sqlx pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            connect_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

pub struct MeasurementStore {
    db: DatabaseConnection,
    policy: BackoffPolicy,
}

impl MeasurementStore {
    pub async fn connect(url: &str, pool: &PoolOptions) -> Result<Self> {
        let mut options = ConnectOptions::new(url);
        options
            .min_connections(pool.min_connections)
            .max_connections(pool.max_connections)
            .connect_timeout(pool.connect_timeout)
            .acquire_timeout(pool.acquire_timeout)
            .sqlx_logging(false);
        let db = Database::connect(options).await?;
        Ok(Self {
            db,
            policy: BackoffPolicy::default(),
        })
    }

    pub fn with_backoff_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Round-trip to the datastore; used by startup and health checks.
    pub async fn ping(&self) -> Result<()> {
        self.db.ping().await?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        self.db.close().await?;
        Ok(())
    }

    /// Append one measurement as a single auto-committed insert, retrying
    /// transient connectivity errors with backoff. Schema or query errors
    /// propagate on the first attempt.
    pub async fn insert(&self, m: &Measurement) -> Result<()> {
        let meta_json = m
            .meta
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let db = &self.db;
        retry::with_backoff(&self.policy, StorageError::is_retryable, || {
            let row = measurement::ActiveModel {
                ts: Set(m.ts),
                region: Set(m.region.clone()),
                project_id: Set(m.project_id),
                target_id: Set(m.target_id.clone()),
                host_id: Set(m.host_id.clone()),
                kind: Set(m.kind.to_string()),
                status: Set(m.status.code()),
                latency_ms: Set(m.latency_ms as i64),
                meta_json: Set(meta_json.clone()),
                ..Default::default()
            };
            async move {
                measurement::Entity::insert(row)
                    .exec(db)
                    .await
                    .map(|_| ())
                    .map_err(StorageError::from)
            }
        })
        .await
    }

    /// Most recent measurements, newest first.
    pub async fn last(
        &self,
        region: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<measurement::Model>> {
        let mut query = measurement::Entity::find();
        if let Some(region) = region {
            query = query.filter(measurement::Column::Region.eq(region));
        }
        let rows = query
            .order_by_desc(measurement::Column::Ts)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Latest measurement per target, optionally scoped to a region.
    pub async fn last_by_target(&self, region: Option<&str>) -> Result<Vec<measurement::Model>> {
        let backend = self.db.get_database_backend();
        let (sql, values): (&str, Vec<Value>) = match region {
            Some(region) => (
                "SELECT m.* FROM measurements m \
                 JOIN (SELECT target_id, MAX(ts) AS max_ts FROM measurements \
                       WHERE region = ? GROUP BY target_id) latest \
                 ON m.target_id = latest.target_id AND m.ts = latest.max_ts \
                 WHERE m.region = ?",
                vec![region.into(), region.into()],
            ),
            None => (
                "SELECT m.* FROM measurements m \
                 JOIN (SELECT target_id, MAX(ts) AS max_ts FROM measurements \
                       GROUP BY target_id) latest \
                 ON m.target_id = latest.target_id AND m.ts = latest.max_ts",
                vec![],
            ),
        };
        let rows = measurement::Entity::find()
            .from_raw_sql(Statement::from_sql_and_values(backend, sql, values))
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Measurements for one target inside a time window, oldest first.
    pub async fn timeseries(
        &self,
        target_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        region: Option<&str>,
    ) -> Result<Vec<measurement::Model>> {
        let mut query = measurement::Entity::find()
            .filter(measurement::Column::TargetId.eq(target_id))
            .filter(measurement::Column::Ts.between(from, to));
        if let Some(region) = region {
            query = query.filter(measurement::Column::Region.eq(region));
        }
        let rows = query
            .order_by_asc(measurement::Column::Ts)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Row count, used by tests and the health endpoint.
    pub async fn count(&self) -> Result<u64> {
        let backend = self.db.get_database_backend();
        let row = self
            .db
            .query_one(Statement::from_string(
                backend,
                "SELECT COUNT(*) AS n FROM measurements",
            ))
            .await?;
        let n: i64 = match row {
            Some(row) => row.try_get("", "n")?,
            None => 0,
        };
        Ok(n as u64)
    }
}
