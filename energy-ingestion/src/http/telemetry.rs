use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{AppState, WindowParams};
use crate::error::TelemetryError;
use crate::store::TelemetryBackend;
use crate::transform::{
    validate_bulk, validate_meter_reading, validate_vehicle_reading, BulkReadings,
    IncomingMeterReading, IncomingVehicleReading,
};

type Accepted = (StatusCode, Json<Value>);

pub async fn ingest_meter<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    payload: Result<Json<IncomingMeterReading>, JsonRejection>,
) -> Result<Accepted, TelemetryError> {
    let Json(incoming) = payload?;
    debug!(meter_id = %incoming.meter_id, "received meter reading");

    let timestamp = incoming.timestamp.clone();
    let reading = validate_meter_reading(incoming)?;
    let meter_id = reading.meter_id.clone();

    state.engine.ingest(reading).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "message": "Meter telemetry ingested successfully",
            "meterId": meter_id,
            "timestamp": timestamp,
        })),
    ))
}

pub async fn ingest_vehicle<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    payload: Result<Json<IncomingVehicleReading>, JsonRejection>,
) -> Result<Accepted, TelemetryError> {
    let Json(incoming) = payload?;
    debug!(vehicle_id = %incoming.vehicle_id, "received vehicle reading");

    let timestamp = incoming.timestamp.clone();
    let reading = validate_vehicle_reading(incoming)?;
    let vehicle_id = reading.vehicle_id.clone();
    let soc = reading.soc.to_f64();

    state.engine.ingest(reading).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "message": "Vehicle telemetry ingested successfully",
            "vehicleId": vehicle_id,
            "soc": soc,
            "timestamp": timestamp,
        })),
    ))
}

pub async fn ingest_meter_bulk<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    payload: Result<Json<BulkReadings<IncomingMeterReading>>, JsonRejection>,
) -> Result<Accepted, Response> {
    let Json(body) = payload.map_err(|e| TelemetryError::from(e).into_response())?;
    info!(records = body.readings.len(), "received bulk meter readings");

    let readings =
        validate_bulk(body.readings, validate_meter_reading).map_err(IntoResponse::into_response)?;
    let report = state
        .engine
        .ingest_batch(readings)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "message": "Bulk meter telemetry ingested successfully",
            "count": report.records,
        })),
    ))
}

pub async fn ingest_vehicle_bulk<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    payload: Result<Json<BulkReadings<IncomingVehicleReading>>, JsonRejection>,
) -> Result<Accepted, Response> {
    let Json(body) = payload.map_err(|e| TelemetryError::from(e).into_response())?;
    info!(records = body.readings.len(), "received bulk vehicle readings");

    let readings = validate_bulk(body.readings, validate_vehicle_reading)
        .map_err(IntoResponse::into_response)?;
    let report = state
        .engine
        .ingest_batch(readings)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "message": "Bulk vehicle telemetry ingested successfully",
            "count": report.records,
        })),
    ))
}

pub async fn meter_current<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    Path(meter_id): Path<String>,
) -> Result<Json<Value>, TelemetryError> {
    let body = match state.analytics.meter_current(&meter_id).await? {
        Some(current) => json!(current),
        None => json!({
            "meterId": meter_id,
            "status": "not_found",
            "message": "No data available for this meter",
        }),
    };
    Ok(Json(body))
}

pub async fn vehicle_current<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, TelemetryError> {
    let body = match state.analytics.vehicle_current(&vehicle_id).await? {
        Some(current) => json!(current),
        None => json!({
            "vehicleId": vehicle_id,
            "status": "not_found",
            "message": "No data available for this vehicle",
        }),
    };
    Ok(Json(body))
}

pub async fn meter_history<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    Path(meter_id): Path<String>,
    params: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Json<Value>, TelemetryError> {
    let Query(params) = params?;
    let window = params.window()?;
    let readings = state.analytics.meter_history(&meter_id, window).await?;

    Ok(Json(json!({
        "meterId": meter_id,
        "timeRange": window,
        "count": readings.len(),
        "readings": readings,
    })))
}

pub async fn vehicle_history<S: TelemetryBackend>(
    State(state): State<AppState<S>>,
    Path(vehicle_id): Path<String>,
    params: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Json<Value>, TelemetryError> {
    let Query(params) = params?;
    let window = params.window()?;
    let readings = state.analytics.vehicle_history(&vehicle_id, window).await?;

    Ok(Json(json!({
        "vehicleId": vehicle_id,
        "timeRange": window,
        "count": readings.len(),
        "readings": readings,
    })))
}
