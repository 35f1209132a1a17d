use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use super::{StreamKind, TelemetryReading};

/// A validated grid-meter sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterReading {
    pub meter_id: String,
    /// Cumulative AC energy drawn from the grid, 4 fractional digits.
    pub kwh_consumed_ac: Decimal,
    pub voltage: Decimal,
    pub recorded_at: OffsetDateTime,
}

impl TelemetryReading for MeterReading {
    const STREAM: StreamKind = StreamKind::Meter;

    fn device_id(&self) -> &str {
        &self.meter_id
    }

    fn recorded_at(&self) -> OffsetDateTime {
        self.recorded_at
    }
}

/// Row of `meter_current_state`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterCurrentState {
    pub meter_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub kwh_consumed_ac: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub voltage: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub last_reading_at: OffsetDateTime,
    #[serde(skip)]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    pub updated_at: OffsetDateTime,
}

/// Row of the day-partitioned `meter_telemetry` history.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterTelemetry {
    pub id: i64,
    pub meter_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub kwh_consumed_ac: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub voltage: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ingested_at: OffsetDateTime,
}
