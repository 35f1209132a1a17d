//! Simulates correlated meter/vehicle pairs and posts their readings to the
//! bulk ingestion endpoints.
//!
//! Environment: `API_URL` (default `http://localhost:3000`), `NUM_DEVICES`
//! (default 100), `SEND_INTERVAL_MS` (default 1000).

use std::{env, time::Duration};

use anyhow::Result;
use energy_ingestion::observability;
use rand::Rng;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{error, info};

const BATTERY_CAPACITY_KWH: f64 = 60.0;
const STANDBY_KWH: f64 = 0.001;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeterPayload {
    meter_id: String,
    kwh_consumed_ac: f64,
    voltage: f64,
    timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VehiclePayload {
    vehicle_id: String,
    soc: f64,
    kwh_delivered_dc: f64,
    battery_temp: f64,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct Bulk<T> {
    readings: Vec<T>,
}

#[derive(Debug, Clone)]
struct SimulatedDevice {
    meter_id: String,
    vehicle_id: String,
    total_kwh_ac: f64,
    total_kwh_dc: f64,
    battery_temp: f64,
    soc: f64,
    voltage: f64,
    /// Share of AC energy that reaches the battery.
    efficiency: f64,
    charging: bool,
}

impl SimulatedDevice {
    fn new(index: usize, rng: &mut impl Rng) -> Self {
        Self {
            meter_id: format!("meter_{index:03}"),
            vehicle_id: format!("vehicle_{index:03}"),
            total_kwh_ac: 0.0,
            total_kwh_dc: 0.0,
            battery_temp: rng.random_range(25.0..35.0),
            soc: rng.random_range(20.0..80.0),
            voltage: rng.random_range(220.0..240.0),
            efficiency: rng.random_range(0.85..0.95),
            charging: rng.random_bool(0.7),
        }
    }

    /// Advances one interval and returns the readings both sides report.
    fn step(&mut self, rng: &mut impl Rng, timestamp: &str) -> (MeterPayload, VehiclePayload) {
        let ac_increment = if self.charging {
            rng.random_range(0.1..0.15)
        } else {
            STANDBY_KWH
        };
        let dc_increment = if self.charging {
            ac_increment * self.efficiency
        } else {
            0.0
        };

        self.total_kwh_ac += ac_increment;
        self.total_kwh_dc += dc_increment;
        self.voltage = rng.random_range(220.0..240.0);
        self.soc = (self.soc + dc_increment / BATTERY_CAPACITY_KWH * 100.0).min(100.0);

        self.battery_temp = if self.charging {
            (self.battery_temp + rng.random_range(0.0..0.5)).min(45.0)
        } else {
            (self.battery_temp - rng.random_range(0.0..0.2)).max(20.0)
        };

        if self.soc >= 95.0 {
            self.charging = false;
        } else if self.soc <= 30.0 && rng.random_bool(0.3) {
            self.charging = true;
        }

        (
            MeterPayload {
                meter_id: self.meter_id.clone(),
                kwh_consumed_ac: round_to(self.total_kwh_ac, 4),
                voltage: round_to(self.voltage, 2),
                timestamp: timestamp.to_string(),
            },
            VehiclePayload {
                vehicle_id: self.vehicle_id.clone(),
                soc: round_to(self.soc, 2),
                kwh_delivered_dc: round_to(self.total_kwh_dc, 4),
                battery_temp: round_to(self.battery_temp, 2),
                timestamp: timestamp.to_string(),
            },
        )
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn simulate_tick(devices: &mut [SimulatedDevice]) -> Result<(Bulk<MeterPayload>, Bulk<VehiclePayload>)> {
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut rng = rand::rng();

    let (meters, vehicles) = devices
        .iter_mut()
        .map(|device| device.step(&mut rng, &timestamp))
        .unzip();

    Ok((Bulk { readings: meters }, Bulk { readings: vehicles }))
}

async fn post_bulk<T: Serialize>(
    http: &reqwest::Client,
    url: &str,
    body: &Bulk<T>,
) -> Result<reqwest::StatusCode> {
    let resp = http
        .post(url)
        .timeout(REQUEST_TIMEOUT)
        .json(body)
        .send()
        .await?;
    let status = resp.status();

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{url} returned {status}: {body}");
    }
    Ok(status)
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing()?;

    let api_url = env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let num_devices: usize = env_or("NUM_DEVICES", 100);
    let interval = Duration::from_millis(env_or("SEND_INTERVAL_MS", 1000));

    let mut devices: Vec<SimulatedDevice> = {
        let mut rng = rand::rng();
        (1..=num_devices)
            .map(|i| SimulatedDevice::new(i, &mut rng))
            .collect()
    };

    info!(
        devices = num_devices,
        interval_ms = interval.as_millis() as u64,
        target = %api_url,
        "starting telemetry simulator"
    );

    let http = reqwest::Client::new();
    let meter_url = format!("{api_url}/v1/telemetry/meter/bulk");
    let vehicle_url = format!("{api_url}/v1/telemetry/vehicle/bulk");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (meters, vehicles) = simulate_tick(&mut devices)?;

        match post_bulk(&http, &meter_url, &meters).await {
            Ok(meter_status) => match post_bulk(&http, &vehicle_url, &vehicles).await {
                Ok(vehicle_status) => info!(
                    meters = meters.readings.len(),
                    vehicles = vehicles.readings.len(),
                    meter_status = meter_status.as_u16(),
                    vehicle_status = vehicle_status.as_u16(),
                    "sent bulk readings"
                ),
                Err(e) => error!(error = %e, "failed to send vehicle readings"),
            },
            Err(e) => error!(error = %e, "failed to send meter readings"),
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("simulator stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_ingestion::transform::{
        validate_meter_reading, validate_vehicle_reading, IncomingMeterReading,
        IncomingVehicleReading,
    };

    #[test]
    fn counters_are_monotonic_and_dc_trails_ac() {
        let mut rng = rand::rng();
        let mut device = SimulatedDevice::new(7, &mut rng);
        let mut last_ac = 0.0;
        let mut last_dc = 0.0;

        for _ in 0..500 {
            let (meter, vehicle) = device.step(&mut rng, "2024-01-15T10:30:00Z");
            assert!(meter.kwh_consumed_ac >= last_ac);
            assert!(vehicle.kwh_delivered_dc >= last_dc);
            assert!(vehicle.kwh_delivered_dc <= meter.kwh_consumed_ac);
            assert!((0.0..=100.0).contains(&vehicle.soc));
            last_ac = meter.kwh_consumed_ac;
            last_dc = vehicle.kwh_delivered_dc;
        }
    }

    #[test]
    fn generated_payloads_pass_validation() {
        let mut rng = rand::rng();
        let mut device = SimulatedDevice::new(42, &mut rng);

        for _ in 0..50 {
            let (meter, vehicle) = device.step(&mut rng, "2024-01-15T10:30:00Z");

            let meter: IncomingMeterReading =
                serde_json::from_value(serde_json::to_value(&meter).unwrap()).unwrap();
            let vehicle: IncomingVehicleReading =
                serde_json::from_value(serde_json::to_value(&vehicle).unwrap()).unwrap();

            assert_eq!(validate_meter_reading(meter).unwrap().meter_id, "meter_042");
            assert_eq!(validate_vehicle_reading(vehicle).unwrap().vehicle_id, "vehicle_042");
        }
    }
}
