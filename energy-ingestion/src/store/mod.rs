pub mod memory;
pub mod postgres;

use energy_client::{
    db::{FleetMeterAggregate, FleetVehicleAggregate, MeterWindowAggregate, VehicleWindowAggregate},
    MeterCurrentState, MeterReading, MeterTelemetry, VehicleCurrentState, VehicleReading,
    VehicleTelemetry,
};
use time::OffsetDateTime;

use crate::partition::PartitionCatalog;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A reading plus the moment the service accepted it.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: OffsetDateTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: OffsetDateTime::now_utc(),
        }
    }
}

/// SQLSTATEs a partitioned insert (or a trigger guarding it) raises when no
/// partition covers the row.
const MISSING_PARTITION_CODES: &[&str] = &["P0001"];
const CHECK_VIOLATION: &str = "23514";

/// SQLSTATEs raised when a concurrent caller created the same partition first:
/// duplicate_table, invalid_table_definition (overlapping bounds),
/// duplicate_object and the pg_type unique violation of racing CREATE TABLEs.
const DUPLICATE_OBJECT_CODES: &[&str] = &["42P07", "42P16", "42710", "23505"];

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("query failed: {0:#}")]
    Query(anyhow::Error),
    #[error("no partition of relation {table} found for row recorded at {recorded_at}")]
    MissingPartition {
        table: &'static str,
        recorded_at: OffsetDateTime,
    },
    #[error("relation {0} already exists")]
    AlreadyExists(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// True when the write was rejected because no partition covers a row.
    pub fn is_missing_partition(&self) -> bool {
        match self {
            Self::MissingPartition { .. } => true,
            Self::Database(sqlx::Error::Database(db)) => {
                let code = db.code();
                let code = code.as_deref();
                let message = db.message();

                code.is_some_and(|c| MISSING_PARTITION_CODES.contains(&c))
                    || (code == Some(CHECK_VIOLATION) && message.contains("no partition of relation"))
                    || message.contains("no partition")
            }
            _ => false,
        }
    }

    /// True when a create failed only because the object is already there.
    pub fn is_duplicate_object(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Database(sqlx::Error::Database(db)) => {
                db.code()
                    .as_deref()
                    .is_some_and(|c| DUPLICATE_OBJECT_CODES.contains(&c))
                    || db.message().contains("already exists")
            }
            _ => false,
        }
    }
}

/// Hot path: one current-state row per device, overwritten on conflict.
#[async_trait::async_trait]
pub trait StateStore<T>: Send {
    /// Upserts `rows`, which hold at most one entry per device.
    async fn upsert_current(&mut self, rows: &[Envelope<T>]) -> Result<(), StorageError>;
}

/// Cold path: append-only, day-partitioned history.
#[async_trait::async_trait]
pub trait HistoryStore<T>: Send {
    async fn append_history(&mut self, rows: &[Envelope<T>]) -> Result<(), StorageError>;
}

/// One atomic unit of work spanning both paths. Dropping it without
/// committing discards every staged write.
#[async_trait::async_trait]
pub trait UnitOfWork<T>: StateStore<T> + HistoryStore<T> {
    async fn commit(self) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
pub trait TelemetryStore<T>: Send + Sync {
    type Tx: UnitOfWork<T> + Send;

    async fn begin(&self) -> Result<Self::Tx, StorageError>;
}

/// Read-only access to snapshots and history. Never mutates.
#[async_trait::async_trait]
pub trait TelemetryReader: Send + Sync {
    async fn meter_current(&self, meter_id: &str) -> Result<Option<MeterCurrentState>, StorageError>;

    async fn vehicle_current(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<VehicleCurrentState>, StorageError>;

    async fn meter_history(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MeterTelemetry>, StorageError>;

    async fn vehicle_history(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<VehicleTelemetry>, StorageError>;

    async fn vehicle_window(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<VehicleWindowAggregate, StorageError>;

    async fn meter_window(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<MeterWindowAggregate, StorageError>;

    async fn fleet_vehicle_window(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<FleetVehicleAggregate, StorageError>;

    async fn fleet_meter_window(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<FleetMeterAggregate, StorageError>;
}

/// Everything the service needs from a storage engine.
pub trait TelemetryBackend:
    PartitionCatalog
    + TelemetryStore<MeterReading>
    + TelemetryStore<VehicleReading>
    + TelemetryReader
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<S> TelemetryBackend for S where
    S: PartitionCatalog
        + TelemetryStore<MeterReading>
        + TelemetryStore<VehicleReading>
        + TelemetryReader
        + Clone
        + Send
        + Sync
        + 'static
{
}
