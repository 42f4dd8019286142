use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AppState;

const MAX_LIMIT: u64 = 500;
const DEFAULT_LIMIT: u64 = 100;
const MAX_OFFSET: u64 = 1_000_000;
const MAX_TIMESERIES_MINUTES: i64 = 1440;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/last", get(last))
        .route("/api/last-by-target", get(last_by_target))
        .route("/api/timeseries", get(timeseries))
        .route("/api/meta/targets", get(targets_meta))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "Query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "query failed".to_string())
}

/// Measurement row as served to clients; `meta_json` is expanded back
/// into a JSON document.
#[derive(Debug, Serialize)]
pub struct MeasurementOut {
    pub target_id: String,
    pub host_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: i16,
    pub latency_ms: i64,
    pub ts: DateTime<Utc>,
    pub region: String,
    pub meta: Option<Value>,
}

impl From<gnm_storage::measurement::Model> for MeasurementOut {
    fn from(row: gnm_storage::measurement::Model) -> Self {
        let meta = row
            .meta_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            target_id: row.target_id,
            host_id: row.host_id,
            kind: row.kind,
            status: row.status,
            latency_ms: row.latency_ms,
            ts: row.ts,
            region: row.region,
            meta,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthOut> {
    match state.store.ping().await {
        Ok(()) => Json(HealthOut {
            status: "ok",
            reason: None,
        }),
        Err(e) => Json(HealthOut {
            status: "error",
            reason: Some(e.to_string()),
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LastParams {
    pub region: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub async fn last(
    State(state): State<AppState>,
    Query(params): Query<LastParams>,
) -> Result<Json<Vec<MeasurementOut>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).min(MAX_OFFSET);
    let rows = state
        .store
        .last(params.region.as_deref(), limit, offset)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Default, Deserialize)]
pub struct RegionParams {
    pub region: Option<String>,
}

pub async fn last_by_target(
    State(state): State<AppState>,
    Query(params): Query<RegionParams>,
) -> Result<Json<Vec<MeasurementOut>>, ApiError> {
    let rows = state
        .store
        .last_by_target(params.region.as_deref())
        .await
        .map_err(internal_error)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Serialize)]
pub struct TimeSeriesPoint {
    pub ts: DateTime<Utc>,
    pub status: i16,
    pub latency_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct TimeseriesParams {
    pub target_id: String,
    pub minutes: Option<i64>,
    pub region: Option<String>,
}

pub async fn timeseries(
    State(state): State<AppState>,
    Query(params): Query<TimeseriesParams>,
) -> Result<Json<Vec<TimeSeriesPoint>>, ApiError> {
    let minutes = params
        .minutes
        .unwrap_or(60)
        .clamp(1, MAX_TIMESERIES_MINUTES);
    let to = Utc::now();
    let from = to - Duration::minutes(minutes);
    let rows = state
        .store
        .timeseries(&params.target_id, from, to, params.region.as_deref())
        .await
        .map_err(internal_error)?;
    Ok(Json(
        rows.into_iter()
            .map(|row| TimeSeriesPoint {
                ts: row.ts,
                status: row.status,
                latency_ms: row.latency_ms,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct TargetMeta {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub host_id: Option<String>,
    pub host_address: Option<String>,
    pub enabled: bool,
}

pub async fn targets_meta(State(state): State<AppState>) -> Json<Vec<TargetMeta>> {
    let out = state
        .services
        .iter()
        .map(|service| {
            let host_address = service
                .host_id
                .as_ref()
                .and_then(|id| state.hosts.get(id))
                .map(|host| host.address.clone());
            TargetMeta {
                id: service.service_id.clone(),
                kind: service.kind.to_string(),
                host_id: service.host_id.clone(),
                host_address,
                enabled: service.enabled,
            }
        })
        .collect();
    Json(out)
}
