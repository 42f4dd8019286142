use chrono::{Duration, Utc};
use gnm_common::types::{CheckKind, CheckStatus, Measurement, Meta};
use migration::MigratorTrait;

use crate::{MeasurementStore, PoolOptions, StorageError};

// In-memory SQLite must stay on a single pooled connection; every pool
// member would otherwise see its own empty database.
async fn memory_store() -> MeasurementStore {
    let pool = PoolOptions {
        min_connections: 1,
        max_connections: 1,
        ..Default::default()
    };
    let store = MeasurementStore::connect("sqlite::memory:", &pool)
        .await
        .unwrap();
    migration::Migrator::up(store.connection(), None).await.unwrap();
    store
}

fn sample(target_id: &str, region: &str, status: CheckStatus, secs_ago: i64) -> Measurement {
    let mut meta = Meta::new();
    meta.insert("probe_region".into(), region.into());
    Measurement {
        ts: Utc::now() - Duration::seconds(secs_ago),
        region: region.to_string(),
        project_id: Some(7),
        target_id: target_id.to_string(),
        host_id: Some("web01".into()),
        kind: CheckKind::Http,
        status,
        latency_ms: 42,
        meta: Some(meta),
    }
}

#[tokio::test]
async fn insert_and_read_back() {
    let store = memory_store().await;
    store
        .insert(&sample("web01_http", "EU", CheckStatus::Ok, 0))
        .await
        .unwrap();

    let rows = store.last(None, 100, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.target_id, "web01_http");
    assert_eq!(row.kind, "http");
    assert_eq!(row.status, 0);
    assert_eq!(row.latency_ms, 42);
    assert_eq!(row.project_id, Some(7));

    // meta_json must be a valid JSON document
    let meta: serde_json::Value =
        serde_json::from_str(row.meta_json.as_deref().unwrap()).unwrap();
    assert_eq!(meta["probe_region"], "EU");
}

#[tokio::test]
async fn last_filters_by_region_and_paginates() {
    let store = memory_store().await;
    for i in 0..5 {
        store
            .insert(&sample("eu_svc", "EU", CheckStatus::Ok, i))
            .await
            .unwrap();
    }
    store
        .insert(&sample("na_svc", "NA", CheckStatus::Warn, 0))
        .await
        .unwrap();

    let eu = store.last(Some("EU"), 100, 0).await.unwrap();
    assert_eq!(eu.len(), 5);
    assert!(eu.iter().all(|r| r.region == "EU"));

    let page = store.last(Some("EU"), 2, 2).await.unwrap();
    assert_eq!(page.len(), 2);

    let all = store.last(None, 100, 0).await.unwrap();
    assert_eq!(all.len(), 6);
    // newest first
    assert!(all.windows(2).all(|w| w[0].ts >= w[1].ts));
}

#[tokio::test]
async fn last_by_target_returns_one_row_per_target() {
    let store = memory_store().await;
    store
        .insert(&sample("svc_a", "EU", CheckStatus::Warn, 60))
        .await
        .unwrap();
    store
        .insert(&sample("svc_a", "EU", CheckStatus::Ok, 0))
        .await
        .unwrap();
    store
        .insert(&sample("svc_b", "EU", CheckStatus::Crit, 30))
        .await
        .unwrap();

    let mut rows = store.last_by_target(Some("EU")).await.unwrap();
    rows.sort_by(|a, b| a.target_id.cmp(&b.target_id));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].target_id, "svc_a");
    assert_eq!(rows[0].status, 0, "must pick the newest row for svc_a");
    assert_eq!(rows[1].target_id, "svc_b");
    assert_eq!(rows[1].status, 2);
}

#[tokio::test]
async fn timeseries_is_windowed_and_ascending() {
    let store = memory_store().await;
    for i in [300, 120, 60, 5] {
        store
            .insert(&sample("svc_a", "EU", CheckStatus::Ok, i))
            .await
            .unwrap();
    }
    store
        .insert(&sample("svc_b", "EU", CheckStatus::Ok, 10))
        .await
        .unwrap();

    let now = Utc::now();
    let rows = store
        .timeseries("svc_a", now - Duration::minutes(3), now, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3, "the 300s-old row falls outside the window");
    assert!(rows.windows(2).all(|w| w[0].ts <= w[1].ts));
    assert!(rows.iter().all(|r| r.target_id == "svc_a"));
}

#[tokio::test]
async fn count_reflects_appends() {
    let store = memory_store().await;
    assert_eq!(store.count().await.unwrap(), 0);
    store
        .insert(&sample("svc_a", "EU", CheckStatus::Ok, 0))
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
}

#[test]
fn retryable_classification() {
    let conn = StorageError::Db(sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal(
        "connection refused".into(),
    )));
    assert!(conn.is_retryable());

    let query = StorageError::Db(sea_orm::DbErr::Custom("schema mismatch".into()));
    assert!(!query.is_retryable());

    let json = StorageError::Json(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
    assert!(!json.is_retryable());
}
