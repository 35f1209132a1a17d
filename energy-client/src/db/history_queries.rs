use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{MeterTelemetry, VehicleTelemetry};

/// Fetch a time-ordered history for a single meter over `[start, end)`.
///
/// The `(meter_id, recorded_at)` index plus the range predicate lets the
/// planner prune to the day partitions covering the window.
pub async fn meter_history(
    pool: &PgPool,
    meter_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<MeterTelemetry>> {
    let rows = sqlx::query_as::<_, MeterTelemetry>(
        r#"
        SELECT
            id,
            meter_id,
            kwh_consumed_ac,
            voltage,
            recorded_at,
            ingested_at
        FROM meter_telemetry
        WHERE meter_id = $1
          AND recorded_at >= $2
          AND recorded_at <  $3
        ORDER BY recorded_at, id
        "#,
    )
    .bind(meter_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Fetch a time-ordered history for a single vehicle over `[start, end)`.
pub async fn vehicle_history(
    pool: &PgPool,
    vehicle_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<VehicleTelemetry>> {
    let rows = sqlx::query_as::<_, VehicleTelemetry>(
        r#"
        SELECT
            id,
            vehicle_id,
            soc,
            kwh_delivered_dc,
            battery_temp,
            recorded_at,
            ingested_at
        FROM vehicle_telemetry
        WHERE vehicle_id = $1
          AND recorded_at >= $2
          AND recorded_at <  $3
        ORDER BY recorded_at, id
        "#,
    )
    .bind(vehicle_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
