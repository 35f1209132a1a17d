use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use super::{StreamKind, TelemetryReading};

/// A validated charger-side vehicle sample.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleReading {
    pub vehicle_id: String,
    /// State of charge in percent.
    pub soc: Decimal,
    /// Cumulative DC energy delivered into the battery, 4 fractional digits.
    pub kwh_delivered_dc: Decimal,
    pub battery_temp: Option<Decimal>,
    pub recorded_at: OffsetDateTime,
}

impl TelemetryReading for VehicleReading {
    const STREAM: StreamKind = StreamKind::Vehicle;

    fn device_id(&self) -> &str {
        &self.vehicle_id
    }

    fn recorded_at(&self) -> OffsetDateTime {
        self.recorded_at
    }
}

/// Row of `vehicle_current_state`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleCurrentState {
    pub vehicle_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub soc: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub kwh_delivered_dc: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub battery_temp: Option<Decimal>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_reading_at: OffsetDateTime,
    #[serde(skip)]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    pub updated_at: OffsetDateTime,
}

/// Row of the day-partitioned `vehicle_telemetry` history.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleTelemetry {
    pub id: i64,
    pub vehicle_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub soc: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub kwh_delivered_dc: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub battery_temp: Option<Decimal>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ingested_at: OffsetDateTime,
}
