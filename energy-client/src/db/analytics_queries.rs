use anyhow::Result;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;

/// Vehicle-side totals for one vehicle over a window.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct VehicleWindowAggregate {
    pub total_dc_delivered: Option<Decimal>,
    pub avg_battery_temp: Option<Decimal>,
    pub min_battery_temp: Option<Decimal>,
    pub max_battery_temp: Option<Decimal>,
    pub data_points: i64,
}

/// Meter-side totals for one meter over a window.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct MeterWindowAggregate {
    pub total_ac_consumed: Option<Decimal>,
    pub data_points: i64,
}

#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct FleetVehicleAggregate {
    pub active_vehicles: i64,
    pub total_dc_delivered: Option<Decimal>,
    pub avg_battery_temp: Option<Decimal>,
    pub total_readings: i64,
}

#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct FleetMeterAggregate {
    pub active_meters: i64,
    pub total_ac_consumed: Option<Decimal>,
    pub avg_voltage: Option<Decimal>,
}

// Averages are rounded in SQL so NUMERIC results with long scales still fit a
// 28-digit Decimal.

/// Aggregate one vehicle's history over `[start, end)`.
pub async fn vehicle_window_aggregate(
    pool: &PgPool,
    vehicle_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<VehicleWindowAggregate> {
    let row = sqlx::query_as::<_, VehicleWindowAggregate>(
        r#"
        SELECT
            SUM(kwh_delivered_dc)          AS total_dc_delivered,
            ROUND(AVG(battery_temp), 6)    AS avg_battery_temp,
            MIN(battery_temp)              AS min_battery_temp,
            MAX(battery_temp)              AS max_battery_temp,
            COUNT(*)                       AS data_points
        FROM vehicle_telemetry
        WHERE vehicle_id = $1
          AND recorded_at >= $2
          AND recorded_at <  $3
        "#,
    )
    .bind(vehicle_id)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Aggregate one meter's history over `[start, end)`.
pub async fn meter_window_aggregate(
    pool: &PgPool,
    meter_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<MeterWindowAggregate> {
    let row = sqlx::query_as::<_, MeterWindowAggregate>(
        r#"
        SELECT
            SUM(kwh_consumed_ac) AS total_ac_consumed,
            COUNT(*)             AS data_points
        FROM meter_telemetry
        WHERE meter_id = $1
          AND recorded_at >= $2
          AND recorded_at <  $3
        "#,
    )
    .bind(meter_id)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fleet-wide vehicle totals over `[start, end)`.
pub async fn fleet_vehicle_aggregate(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<FleetVehicleAggregate> {
    let row = sqlx::query_as::<_, FleetVehicleAggregate>(
        r#"
        SELECT
            COUNT(DISTINCT vehicle_id)     AS active_vehicles,
            SUM(kwh_delivered_dc)          AS total_dc_delivered,
            ROUND(AVG(battery_temp), 6)    AS avg_battery_temp,
            COUNT(*)                       AS total_readings
        FROM vehicle_telemetry
        WHERE recorded_at >= $1
          AND recorded_at <  $2
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fleet-wide meter totals over `[start, end)`.
pub async fn fleet_meter_aggregate(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<FleetMeterAggregate> {
    let row = sqlx::query_as::<_, FleetMeterAggregate>(
        r#"
        SELECT
            COUNT(DISTINCT meter_id)  AS active_meters,
            SUM(kwh_consumed_ac)      AS total_ac_consumed,
            ROUND(AVG(voltage), 6)    AS avg_voltage
        FROM meter_telemetry
        WHERE recorded_at >= $1
          AND recorded_at <  $2
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    Ok(row)
}
