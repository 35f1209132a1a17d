use std::time::Instant;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use super::{AppState, WindowParams};
use crate::analytics::{FleetReport, PerformanceReport};
use crate::error::TelemetryError;
use crate::store::TelemetryBackend;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    pub query_time_ms: u64,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PerformanceResponse {
    #[serde(flatten)]
    pub report: PerformanceReport,
    pub meta: QueryMeta,
}

pub async fn device_performance<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    Path(device_id): Path<String>,
    params: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Json<PerformanceResponse>, TelemetryError> {
    let Query(params) = params?;
    let window = params.window()?;

    let started = Instant::now();
    let report = state.analytics.device_performance(&device_id, window).await?;
    let query_time_ms = started.elapsed().as_millis() as u64;

    info!(
        device_id = %device_id,
        verdict = report.verdict.as_str(),
        elapsed_ms = query_time_ms,
        "device performance computed"
    );

    Ok(Json(PerformanceResponse {
        report,
        meta: QueryMeta {
            query_time_ms,
            message: "Aggregated from day-partitioned history",
        },
    }))
}

pub async fn fleet_summary<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    params: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Json<FleetReport>, TelemetryError> {
    let Query(params) = params?;
    let window = params.window()?;

    let summary = state.analytics.fleet_summary(window).await?;
    info!(
        active_vehicles = summary.fleet.active_vehicles,
        active_meters = summary.fleet.active_meters,
        "fleet summary computed"
    );

    Ok(Json(summary))
}
