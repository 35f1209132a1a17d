pub mod db;
pub mod domain;

pub use domain::{
    extract_correlation_key, CorrelatedPair, CorrelationKey, MeterCurrentState, MeterReading,
    MeterTelemetry, StreamKind, TelemetryReading, VehicleCurrentState, VehicleReading,
    VehicleTelemetry,
};
