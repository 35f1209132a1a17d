mod efficiency;

pub use efficiency::{round_to, EnergyMetrics, Verdict, ENERGY_SCALE, PERCENT_SCALE};

use energy_client::{CorrelatedPair, MeterCurrentState, MeterTelemetry, VehicleCurrentState, VehicleTelemetry};
use rust_decimal::Decimal;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::error::TelemetryError;
use crate::store::TelemetryReader;

/// Half-open time range `[start, end)` analytics aggregate over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl AnalysisWindow {
    pub const DEFAULT_HOURS: i64 = 24;

    pub fn ending_at(end: OffsetDateTime, size: Duration) -> Self {
        Self {
            start: end - size,
            end,
        }
    }

    /// The `hours` leading up to now.
    pub fn last_hours(hours: i64) -> Self {
        Self::ending_at(OffsetDateTime::now_utc(), Duration::hours(hours))
    }
}

impl Default for AnalysisWindow {
    fn default() -> Self {
        Self::last_hours(Self::DEFAULT_HOURS)
    }
}

/// Battery temperature over the window. Temperatures are 0 when no reading
/// carried one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryMetrics {
    #[serde(with = "rust_decimal::serde::float")]
    pub average_temp: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub min_temp: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub max_temp: Decimal,
    pub readings_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub vehicle_id: String,
    pub meter_id: String,
    pub time_range: AnalysisWindow,
    pub energy_metrics: EnergyMetrics,
    pub battery_metrics: BatteryMetrics,
    pub data_points: i64,
    pub verdict: Verdict,
    pub verdict_detail: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetCounts {
    pub active_vehicles: i64,
    pub active_meters: i64,
    pub total_readings: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetEnergy {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_ac_consumed: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_dc_delivered: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub fleet_efficiency: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAverages {
    #[serde(with = "rust_decimal::serde::float")]
    pub battery_temp: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub voltage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetReport {
    pub time_range: AnalysisWindow,
    pub fleet: FleetCounts,
    pub energy: FleetEnergy,
    pub averages: FleetAverages,
}

/// Read-only analytics over the history of both streams.
pub struct AnalyticsReader<R> {
    reader: R,
}

impl<R: TelemetryReader> AnalyticsReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Efficiency of one charging pair over `window`. `identity` may name
    /// either side; the partner is derived from its correlation key.
    pub async fn device_performance(
        &self,
        identity: &str,
        window: AnalysisWindow,
    ) -> Result<PerformanceReport, TelemetryError> {
        let pair = CorrelatedPair::resolve(identity);

        let vehicle = self
            .reader
            .vehicle_window(&pair.vehicle_id, window.start, window.end)
            .await?;

        if vehicle.data_points == 0 {
            debug!(vehicle_id = %pair.vehicle_id, "no vehicle telemetry in analysis window");
            return Err(TelemetryError::NotFound(format!(
                "no telemetry data found for vehicle {} between {} and {}",
                pair.vehicle_id, window.start, window.end
            )));
        }

        let meter = self
            .reader
            .meter_window(&pair.meter_id, window.start, window.end)
            .await?;

        let energy_metrics = EnergyMetrics::from_totals(
            meter.total_ac_consumed.unwrap_or_default(),
            vehicle.total_dc_delivered.unwrap_or_default(),
        );
        let verdict = energy_metrics.verdict;

        debug!(
            vehicle_id = %pair.vehicle_id,
            meter_id = %pair.meter_id,
            vehicle_points = vehicle.data_points,
            meter_points = meter.data_points,
            verdict = verdict.as_str(),
            "computed device performance"
        );

        Ok(PerformanceReport {
            vehicle_id: pair.vehicle_id,
            meter_id: pair.meter_id,
            time_range: window,
            energy_metrics,
            battery_metrics: BatteryMetrics {
                average_temp: round_to(vehicle.avg_battery_temp.unwrap_or_default(), PERCENT_SCALE),
                min_temp: round_to(vehicle.min_battery_temp.unwrap_or_default(), PERCENT_SCALE),
                max_temp: round_to(vehicle.max_battery_temp.unwrap_or_default(), PERCENT_SCALE),
                readings_count: vehicle.data_points,
            },
            data_points: vehicle.data_points,
            verdict,
            verdict_detail: verdict.detail(),
        })
    }

    /// Fleet-wide totals over `window`. Empty windows report zeros.
    pub async fn fleet_summary(&self, window: AnalysisWindow) -> Result<FleetReport, TelemetryError> {
        let (vehicles, meters) = tokio::try_join!(
            self.reader.fleet_vehicle_window(window.start, window.end),
            self.reader.fleet_meter_window(window.start, window.end),
        )?;

        let total_ac = meters.total_ac_consumed.unwrap_or_default();
        let total_dc = vehicles.total_dc_delivered.unwrap_or_default();
        let efficiency = EnergyMetrics::from_totals(total_ac, total_dc);

        Ok(FleetReport {
            time_range: window,
            fleet: FleetCounts {
                active_vehicles: vehicles.active_vehicles,
                active_meters: meters.active_meters,
                total_readings: vehicles.total_readings,
            },
            energy: FleetEnergy {
                total_ac_consumed: efficiency.total_ac_consumed,
                total_dc_delivered: efficiency.total_dc_delivered,
                fleet_efficiency: efficiency.efficiency_percentage,
            },
            averages: FleetAverages {
                battery_temp: round_to(vehicles.avg_battery_temp.unwrap_or_default(), PERCENT_SCALE),
                voltage: round_to(meters.avg_voltage.unwrap_or_default(), PERCENT_SCALE),
            },
        })
    }

    pub async fn meter_current(&self, meter_id: &str) -> Result<Option<MeterCurrentState>, TelemetryError> {
        Ok(self.reader.meter_current(meter_id).await?)
    }

    pub async fn vehicle_current(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<VehicleCurrentState>, TelemetryError> {
        Ok(self.reader.vehicle_current(vehicle_id).await?)
    }

    pub async fn meter_history(
        &self,
        meter_id: &str,
        window: AnalysisWindow,
    ) -> Result<Vec<MeterTelemetry>, TelemetryError> {
        Ok(self.reader.meter_history(meter_id, window.start, window.end).await?)
    }

    pub async fn vehicle_history(
        &self,
        vehicle_id: &str,
        window: AnalysisWindow,
    ) -> Result<Vec<VehicleTelemetry>, TelemetryError> {
        Ok(self.reader.vehicle_history(vehicle_id, window.start, window.end).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn window_is_measured_back_from_end() {
        let w = AnalysisWindow::ending_at(datetime!(2024-01-02 00:00:00 UTC), Duration::hours(24));
        assert_eq!(w.start, datetime!(2024-01-01 00:00:00 UTC));
    }
}
