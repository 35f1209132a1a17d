mod identity;
mod meter_reading;
mod stream;
mod vehicle_reading;

use time::OffsetDateTime;

pub use identity::{extract_correlation_key, CorrelatedPair, CorrelationKey};
pub use meter_reading::{MeterCurrentState, MeterReading, MeterTelemetry};
pub use stream::StreamKind;
pub use vehicle_reading::{VehicleCurrentState, VehicleReading, VehicleTelemetry};

/// A validated reading belonging to exactly one telemetry stream.
pub trait TelemetryReading: Clone + Send + Sync + 'static {
    const STREAM: StreamKind;

    /// Identity of the reporting device (`meter_id` or `vehicle_id`).
    fn device_id(&self) -> &str;

    /// Event time declared by the device. Decides the history partition.
    fn recorded_at(&self) -> OffsetDateTime;
}
