use energy_client::{MeterReading, StreamKind, VehicleReading};
use rust_decimal::{dec, Decimal};
use serde::Deserialize;
use time::{
    format_description::well_known::{Iso8601, Rfc3339},
    macros::datetime,
    Date, OffsetDateTime, PrimitiveDateTime,
};

use crate::error::TelemetryError;

/// Largest magnitude a NUMERIC(12,4) energy column holds.
const MAX_ENERGY_KWH: Decimal = dec!(99999999.9999);

/// Width of the VARCHAR(50) identity columns.
const MAX_IDENTITY_LEN: usize = 50;

const ENERGY_SCALE: u32 = 4;
const MEASUREMENT_SCALE: u32 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMeterReading {
    pub meter_id: String,
    pub kwh_consumed_ac: Decimal,
    pub voltage: Decimal,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingVehicleReading {
    pub vehicle_id: String,
    pub soc: Decimal,
    pub kwh_delivered_dc: Decimal,
    #[serde(default)]
    pub battery_temp: Option<Decimal>,
    pub timestamp: String,
}

/// Body of the bulk endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkReadings<T> {
    pub readings: Vec<T>,
}

/// Pure validation of an inbound meter reading.
///
/// Rules:
/// - meterId must be non-empty.
/// - kwhConsumedAc >= 0 with at most 4 fractional digits.
/// - voltage in [0, 1000] with at most 2 fractional digits.
/// - timestamp is ISO-8601 with an offset, within [2000-01-01, 2100-01-01).
pub fn validate_meter_reading(input: IncomingMeterReading) -> Result<MeterReading, TelemetryError> {
    let recorded_at = check_meter(&input).map_err(|msg| rejected(StreamKind::Meter, msg))?;

    Ok(MeterReading {
        meter_id: input.meter_id.trim().to_string(),
        kwh_consumed_ac: input.kwh_consumed_ac,
        voltage: input.voltage,
        recorded_at,
    })
}

fn check_meter(input: &IncomingMeterReading) -> Result<OffsetDateTime, String> {
    require_identity("meterId", &input.meter_id)?;
    require_energy("kwhConsumedAc", input.kwh_consumed_ac)?;
    require_measurement("voltage", input.voltage, Decimal::ZERO, Decimal::ONE_THOUSAND)?;
    parse_timestamp(&input.timestamp)
}

/// Pure validation of an inbound vehicle reading.
///
/// Rules:
/// - vehicleId must be non-empty.
/// - soc in [0, 100] with at most 2 fractional digits.
/// - kwhDeliveredDc >= 0 with at most 4 fractional digits.
/// - batteryTemp, when present, in [-40, 80] with at most 2 fractional digits.
/// - timestamp as for meter readings.
pub fn validate_vehicle_reading(
    input: IncomingVehicleReading,
) -> Result<VehicleReading, TelemetryError> {
    let recorded_at = check_vehicle(&input).map_err(|msg| rejected(StreamKind::Vehicle, msg))?;

    Ok(VehicleReading {
        vehicle_id: input.vehicle_id.trim().to_string(),
        soc: input.soc,
        kwh_delivered_dc: input.kwh_delivered_dc,
        battery_temp: input.battery_temp,
        recorded_at,
    })
}

fn check_vehicle(input: &IncomingVehicleReading) -> Result<OffsetDateTime, String> {
    require_identity("vehicleId", &input.vehicle_id)?;
    require_measurement("soc", input.soc, Decimal::ZERO, Decimal::ONE_HUNDRED)?;
    require_energy("kwhDeliveredDc", input.kwh_delivered_dc)?;
    if let Some(temp) = input.battery_temp {
        require_measurement("batteryTemp", temp, Decimal::from(-40), Decimal::from(80))?;
    }
    parse_timestamp(&input.timestamp)
}

/// Validates every record of a bulk request. One bad record rejects the
/// whole request; the message names its index.
pub fn validate_bulk<I, O>(
    readings: Vec<I>,
    validate: impl Fn(I) -> Result<O, TelemetryError>,
) -> Result<Vec<O>, TelemetryError> {
    if readings.is_empty() {
        return Err(TelemetryError::Validation(
            "readings must contain at least 1 element".to_string(),
        ));
    }

    readings
        .into_iter()
        .enumerate()
        .map(|(index, input)| {
            validate(input).map_err(|e| match e {
                TelemetryError::Validation(msg) => {
                    TelemetryError::Validation(format!("readings[{index}]: {msg}"))
                }
                other => other,
            })
        })
        .collect()
}

fn rejected(stream: StreamKind, msg: String) -> TelemetryError {
    metrics::counter!("telemetry_validation_rejected_total", "stream" => stream.as_str())
        .increment(1);
    TelemetryError::Validation(msg)
}

fn require_identity(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} should not be empty"));
    }
    if value.chars().count() > MAX_IDENTITY_LEN {
        return Err(format!(
            "{field} must be shorter than or equal to {MAX_IDENTITY_LEN} characters"
        ));
    }
    Ok(())
}

fn require_scale(field: &str, value: Decimal, scale: u32) -> Result<(), String> {
    if value.normalize().scale() > scale {
        return Err(format!("{field} must have at most {scale} decimal places"));
    }
    Ok(())
}

fn require_energy(field: &str, value: Decimal) -> Result<(), String> {
    if value < Decimal::ZERO {
        return Err(format!("{field} must not be less than 0"));
    }
    if value > MAX_ENERGY_KWH {
        return Err(format!("{field} must not be greater than {MAX_ENERGY_KWH}"));
    }
    require_scale(field, value, ENERGY_SCALE)
}

fn require_measurement(field: &str, value: Decimal, min: Decimal, max: Decimal) -> Result<(), String> {
    if value < min {
        return Err(format!("{field} must not be less than {min}"));
    }
    if value > max {
        return Err(format!("{field} must not be greater than {max}"));
    }
    require_scale(field, value, MEASUREMENT_SCALE)
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, String> {
    // Date-times without an offset, and bare dates, are taken as UTC.
    let parsed = OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(raw, &Iso8601::DEFAULT))
        .or_else(|_| PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT).map(PrimitiveDateTime::assume_utc))
        .or_else(|_| Date::parse(raw, &Iso8601::DEFAULT).map(|d| d.midnight().assume_utc()))
        .map_err(|_| "timestamp must be a valid ISO 8601 date string".to_string())?;

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if parsed < min_ts || parsed >= max_ts {
        return Err("timestamp out of allowed range".to_string());
    }

    Ok(parsed)
}
