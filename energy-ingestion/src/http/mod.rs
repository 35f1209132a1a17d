pub mod analytics;
pub mod error;
pub mod status;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::analytics::{AnalysisWindow, AnalyticsReader};
use crate::config::StorageKind;
use crate::engine::IngestionEngine;
use crate::error::TelemetryError;
use crate::store::TelemetryBackend;

/// Longest window any read endpoint accepts.
const MAX_WINDOW_HOURS: i64 = 24 * 365;

pub struct AppState<S> {
    pub engine: Arc<IngestionEngine<S>>,
    pub analytics: Arc<AnalyticsReader<S>>,
    pub storage: StorageKind,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            analytics: Arc::clone(&self.analytics),
            storage: self.storage,
        }
    }
}

impl<S: TelemetryBackend> AppState<S> {
    pub fn new(store: S, storage: StorageKind) -> Self {
        Self {
            engine: Arc::new(IngestionEngine::new(store.clone())),
            analytics: Arc::new(AnalyticsReader::new(store)),
            storage,
        }
    }
}

/// `?hours=` on read endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct WindowParams {
    pub hours: Option<i64>,
}

impl WindowParams {
    pub fn window(&self) -> Result<AnalysisWindow, TelemetryError> {
        let hours = self.hours.unwrap_or(AnalysisWindow::DEFAULT_HOURS);
        if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
            return Err(TelemetryError::Validation(format!(
                "hours must be between 1 and {MAX_WINDOW_HOURS}"
            )));
        }
        Ok(AnalysisWindow::last_hours(hours))
    }
}

pub fn router<S: TelemetryBackend>(state: AppState<S>) -> Router {
    Router::new()
        .route("/", get(status::index::<S>))
        .route("/health", get(status::health::<S>))
        .route("/v1/telemetry/meter", post(telemetry::ingest_meter::<S>))
        .route("/v1/telemetry/meter/bulk", post(telemetry::ingest_meter_bulk::<S>))
        .route(
            "/v1/telemetry/meter/:meter_id/current",
            get(telemetry::meter_current::<S>),
        )
        .route(
            "/v1/telemetry/meter/:meter_id/history",
            get(telemetry::meter_history::<S>),
        )
        .route("/v1/telemetry/vehicle", post(telemetry::ingest_vehicle::<S>))
        .route(
            "/v1/telemetry/vehicle/bulk",
            post(telemetry::ingest_vehicle_bulk::<S>),
        )
        .route(
            "/v1/telemetry/vehicle/:vehicle_id/current",
            get(telemetry::vehicle_current::<S>),
        )
        .route(
            "/v1/telemetry/vehicle/:vehicle_id/history",
            get(telemetry::vehicle_history::<S>),
        )
        .route(
            "/v1/analytics/performance/:device_id",
            get(analytics::device_performance::<S>),
        )
        .route("/v1/analytics/fleet/summary", get(analytics::fleet_summary::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_defaults_to_a_day() {
        let window = WindowParams::default().window().unwrap();
        assert_eq!(window.end - window.start, time::Duration::hours(24));
    }

    #[test]
    fn window_rejects_out_of_range_hours() {
        assert!(WindowParams { hours: Some(0) }.window().is_err());
        assert!(WindowParams { hours: Some(MAX_WINDOW_HOURS + 1) }.window().is_err());
        assert!(WindowParams { hours: Some(1) }.window().is_ok());
    }
}
