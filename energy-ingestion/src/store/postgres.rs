use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use energy_client::{
    db::{
        analytics_queries, current_state_queries, history_queries, FleetMeterAggregate,
        FleetVehicleAggregate, MeterWindowAggregate, VehicleWindowAggregate,
    },
    MeterCurrentState, MeterReading, MeterTelemetry, TelemetryReading, VehicleCurrentState,
    VehicleReading, VehicleTelemetry,
};
use sqlx::{
    postgres::{PgConnectOptions, PgPool, PgPoolOptions},
    Postgres, QueryBuilder, Transaction,
};
use time::OffsetDateTime;

use super::{
    Envelope, HistoryStore, StateStore, StorageError, TelemetryReader, TelemetryStore, UnitOfWork,
};
use crate::config::DatabaseConfig;
use crate::partition::{PartitionCatalog, PartitionKey};

/// Postgres storage engine over a connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        let options = PgConnectOptions::from_str(&cfg.uri)?
            .options([("statement_timeout", cfg.statement_timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .min_connections(cfg.min_connections)
            .acquire_timeout(Duration::from_millis(cfg.acquire_timeout_ms))
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }
}

/// A database transaction. Rolled back on drop unless committed.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StateStore<MeterReading> for PgUnitOfWork {
    async fn upsert_current(&mut self, rows: &[Envelope<MeterReading>]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO meter_current_state (meter_id, kwh_consumed_ac, voltage, last_reading_at, updated_at) ",
        );
        builder.push_values(rows, |mut b, env| {
            let m = &env.payload;
            b.push_bind(&m.meter_id)
                .push_bind(m.kwh_consumed_ac)
                .push_bind(m.voltage)
                .push_bind(m.recorded_at)
                .push_bind(env.received_at);
        });
        builder.push(
            " ON CONFLICT (meter_id) DO UPDATE SET \
               kwh_consumed_ac = EXCLUDED.kwh_consumed_ac, \
               voltage = EXCLUDED.voltage, \
               last_reading_at = EXCLUDED.last_reading_at, \
               updated_at = EXCLUDED.updated_at",
        );

        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore<MeterReading> for PgUnitOfWork {
    async fn append_history(&mut self, rows: &[Envelope<MeterReading>]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO meter_telemetry (meter_id, kwh_consumed_ac, voltage, recorded_at, ingested_at) ",
        );
        builder.push_values(rows, |mut b, env| {
            let m = &env.payload;
            b.push_bind(&m.meter_id)
                .push_bind(m.kwh_consumed_ac)
                .push_bind(m.voltage)
                .push_bind(m.recorded_at)
                .push_bind(env.received_at);
        });

        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore<VehicleReading> for PgUnitOfWork {
    async fn upsert_current(
        &mut self,
        rows: &[Envelope<VehicleReading>],
    ) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO vehicle_current_state (vehicle_id, soc, kwh_delivered_dc, battery_temp, last_reading_at, updated_at) ",
        );
        builder.push_values(rows, |mut b, env| {
            let v = &env.payload;
            b.push_bind(&v.vehicle_id)
                .push_bind(v.soc)
                .push_bind(v.kwh_delivered_dc)
                .push_bind(v.battery_temp)
                .push_bind(v.recorded_at)
                .push_bind(env.received_at);
        });
        builder.push(
            " ON CONFLICT (vehicle_id) DO UPDATE SET \
               soc = EXCLUDED.soc, \
               kwh_delivered_dc = EXCLUDED.kwh_delivered_dc, \
               battery_temp = EXCLUDED.battery_temp, \
               last_reading_at = EXCLUDED.last_reading_at, \
               updated_at = EXCLUDED.updated_at",
        );

        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore<VehicleReading> for PgUnitOfWork {
    async fn append_history(
        &mut self,
        rows: &[Envelope<VehicleReading>],
    ) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO vehicle_telemetry (vehicle_id, soc, kwh_delivered_dc, battery_temp, recorded_at, ingested_at) ",
        );
        builder.push_values(rows, |mut b, env| {
            let v = &env.payload;
            b.push_bind(&v.vehicle_id)
                .push_bind(v.soc)
                .push_bind(v.kwh_delivered_dc)
                .push_bind(v.battery_temp)
                .push_bind(v.recorded_at)
                .push_bind(env.received_at);
        });

        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl<T> UnitOfWork<T> for PgUnitOfWork
where
    T: TelemetryReading,
    PgUnitOfWork: StateStore<T> + HistoryStore<T>,
{
    async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl<T> TelemetryStore<T> for PgStore
where
    T: TelemetryReading,
    PgUnitOfWork: UnitOfWork<T>,
{
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(PgUnitOfWork { tx })
    }
}

#[async_trait]
impl PartitionCatalog for PgStore {
    async fn partition_exists(&self, partition: &PartitionKey) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM pg_class c
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE c.relname = $1
                  AND n.nspname = current_schema()
            )
            "#,
        )
        .bind(partition.name())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create_partition(&self, partition: &PartitionKey) -> Result<(), StorageError> {
        // A lost race surfaces as 42P07, which the directory maps to AlreadyPresent.
        sqlx::raw_sql(&partition_ddl(partition))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// DDL cannot take bind parameters. Every interpolated piece derives from a
/// `Date` and a fixed table name.
fn partition_ddl(partition: &PartitionKey) -> String {
    format!(
        "CREATE TABLE {name} PARTITION OF {parent} \
         FOR VALUES FROM ('{from} 00:00:00+00') TO ('{to} 00:00:00+00')",
        name = partition.name(),
        parent = partition.parent_table(),
        from = partition.lower_bound().date(),
        to = partition.upper_bound().date(),
    )
}

fn query_error(e: anyhow::Error) -> StorageError {
    match e.downcast::<sqlx::Error>() {
        Ok(sqlx_err) => StorageError::Database(sqlx_err),
        Err(other) => StorageError::Query(other),
    }
}

#[async_trait]
impl TelemetryReader for PgStore {
    async fn meter_current(&self, meter_id: &str) -> Result<Option<MeterCurrentState>, StorageError> {
        current_state_queries::meter_current_state(&self.pool, meter_id)
            .await
            .map_err(query_error)
    }

    async fn vehicle_current(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<VehicleCurrentState>, StorageError> {
        current_state_queries::vehicle_current_state(&self.pool, vehicle_id)
            .await
            .map_err(query_error)
    }

    async fn meter_history(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MeterTelemetry>, StorageError> {
        history_queries::meter_history(&self.pool, meter_id, start, end)
            .await
            .map_err(query_error)
    }

    async fn vehicle_history(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<VehicleTelemetry>, StorageError> {
        history_queries::vehicle_history(&self.pool, vehicle_id, start, end)
            .await
            .map_err(query_error)
    }

    async fn vehicle_window(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<VehicleWindowAggregate, StorageError> {
        analytics_queries::vehicle_window_aggregate(&self.pool, vehicle_id, start, end)
            .await
            .map_err(query_error)
    }

    async fn meter_window(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<MeterWindowAggregate, StorageError> {
        analytics_queries::meter_window_aggregate(&self.pool, meter_id, start, end)
            .await
            .map_err(query_error)
    }

    async fn fleet_vehicle_window(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<FleetVehicleAggregate, StorageError> {
        analytics_queries::fleet_vehicle_aggregate(&self.pool, start, end)
            .await
            .map_err(query_error)
    }

    async fn fleet_meter_window(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<FleetMeterAggregate, StorageError> {
        analytics_queries::fleet_meter_aggregate(&self.pool, start, end)
            .await
            .map_err(query_error)
    }
}
