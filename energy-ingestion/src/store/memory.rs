use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use energy_client::{
    db::{FleetMeterAggregate, FleetVehicleAggregate, MeterWindowAggregate, VehicleWindowAggregate},
    MeterCurrentState, MeterReading, MeterTelemetry, TelemetryReading, VehicleCurrentState,
    VehicleReading, VehicleTelemetry,
};
use rust_decimal::{Decimal, RoundingStrategy};
use time::OffsetDateTime;

use super::{
    Envelope, HistoryStore, StateStore, StorageError, TelemetryReader, TelemetryStore, UnitOfWork,
};
use crate::partition::{PartitionCatalog, PartitionKey};

/// In-memory storage engine with the same partition and transaction
/// semantics as Postgres: history rows need an existing day partition and a
/// unit of work lands entirely or not at all.
///
/// Used by the test suite and selectable at runtime with
/// `storage.kind = "memory"`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[doc(hidden)]
#[derive(Default)]
pub struct MemoryState {
    partitions: BTreeSet<PartitionKey>,
    meter_current: HashMap<String, MeterCurrentState>,
    vehicle_current: HashMap<String, VehicleCurrentState>,
    meter_history: Vec<MeterTelemetry>,
    vehicle_history: Vec<VehicleTelemetry>,
    next_id: i64,
    commit_attempts: usize,
    commits: usize,
    failing_commits: BTreeSet<usize>,
    partition_check_delay: Duration,
    reject_partition_creates: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store poisoned: {e}")))
    }

    fn inspect(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the `attempt`-th commit (1-based, counted across the store's
    /// lifetime) fail with a backend error.
    pub fn fail_commit(&self, attempt: usize) {
        self.inspect().failing_commits.insert(attempt);
    }

    /// Makes every partition creation fail, as if DDL were not permitted.
    pub fn reject_partition_creates(&self, reject: bool) {
        self.inspect().reject_partition_creates = reject;
    }

    /// Delays every partition existence check, as a slow catalog query would.
    pub fn slow_partition_checks(&self, delay: Duration) {
        self.inspect().partition_check_delay = delay;
    }

    /// Removes a partition behind the back of any cache, as a retention job
    /// would.
    pub fn drop_partition(&self, key: &PartitionKey) {
        self.inspect().partitions.remove(key);
    }

    pub fn partitions(&self) -> Vec<PartitionKey> {
        self.inspect().partitions.iter().copied().collect()
    }

    /// Number of successfully committed units of work.
    pub fn commits(&self) -> usize {
        self.inspect().commits
    }

    pub fn meter_history_rows(&self) -> Vec<MeterTelemetry> {
        self.inspect().meter_history.clone()
    }

    pub fn vehicle_history_rows(&self) -> Vec<VehicleTelemetry> {
        self.inspect().vehicle_history.clone()
    }

    fn commit<T: MemoryRecord>(
        &self,
        current: Vec<Envelope<T>>,
        history: Vec<Envelope<T>>,
    ) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.commit_attempts += 1;

        if state.failing_commits.contains(&state.commit_attempts) {
            return Err(StorageError::Backend(format!(
                "injected failure on commit {}",
                state.commit_attempts
            )));
        }

        // Validate everything before applying anything.
        for env in &history {
            let recorded_at = env.payload.recorded_at();
            let key = PartitionKey::for_event(T::STREAM, recorded_at);
            if !state.partitions.contains(&key) {
                return Err(StorageError::MissingPartition {
                    table: T::STREAM.history_table(),
                    recorded_at,
                });
            }
        }

        for env in current {
            T::apply_current(&mut state, env);
        }
        for env in history {
            state.next_id += 1;
            let id = state.next_id;
            T::append_history(&mut state, env, id);
        }

        state.commits += 1;
        Ok(())
    }
}

/// Readings the in-memory engine knows how to store.
pub trait MemoryRecord: TelemetryReading {
    #[doc(hidden)]
    fn apply_current(state: &mut MemoryState, env: Envelope<Self>);
    #[doc(hidden)]
    fn append_history(state: &mut MemoryState, env: Envelope<Self>, id: i64);
}

impl MemoryRecord for MeterReading {
    fn apply_current(state: &mut MemoryState, env: Envelope<Self>) {
        let Envelope {
            payload,
            received_at,
        } = env;
        let created_at = state
            .meter_current
            .get(&payload.meter_id)
            .map_or(received_at, |row| row.created_at);

        state.meter_current.insert(
            payload.meter_id.clone(),
            MeterCurrentState {
                meter_id: payload.meter_id,
                kwh_consumed_ac: payload.kwh_consumed_ac,
                voltage: payload.voltage,
                last_reading_at: payload.recorded_at,
                created_at,
                updated_at: received_at,
            },
        );
    }

    fn append_history(state: &mut MemoryState, env: Envelope<Self>, id: i64) {
        let m = env.payload;
        state.meter_history.push(MeterTelemetry {
            id,
            meter_id: m.meter_id,
            kwh_consumed_ac: m.kwh_consumed_ac,
            voltage: m.voltage,
            recorded_at: m.recorded_at,
            ingested_at: env.received_at,
        });
    }
}

impl MemoryRecord for VehicleReading {
    fn apply_current(state: &mut MemoryState, env: Envelope<Self>) {
        let Envelope {
            payload,
            received_at,
        } = env;
        let created_at = state
            .vehicle_current
            .get(&payload.vehicle_id)
            .map_or(received_at, |row| row.created_at);

        state.vehicle_current.insert(
            payload.vehicle_id.clone(),
            VehicleCurrentState {
                vehicle_id: payload.vehicle_id,
                soc: payload.soc,
                kwh_delivered_dc: payload.kwh_delivered_dc,
                battery_temp: payload.battery_temp,
                last_reading_at: payload.recorded_at,
                created_at,
                updated_at: received_at,
            },
        );
    }

    fn append_history(state: &mut MemoryState, env: Envelope<Self>, id: i64) {
        let v = env.payload;
        state.vehicle_history.push(VehicleTelemetry {
            id,
            vehicle_id: v.vehicle_id,
            soc: v.soc,
            kwh_delivered_dc: v.kwh_delivered_dc,
            battery_temp: v.battery_temp,
            recorded_at: v.recorded_at,
            ingested_at: env.received_at,
        });
    }
}

/// Writes staged until commit; dropping it discards them.
pub struct MemoryUnitOfWork<T> {
    store: MemoryStore,
    current: Vec<Envelope<T>>,
    history: Vec<Envelope<T>>,
}

#[async_trait]
impl<T: MemoryRecord> StateStore<T> for MemoryUnitOfWork<T> {
    async fn upsert_current(&mut self, rows: &[Envelope<T>]) -> Result<(), StorageError> {
        self.current.extend_from_slice(rows);
        Ok(())
    }
}

#[async_trait]
impl<T: MemoryRecord> HistoryStore<T> for MemoryUnitOfWork<T> {
    async fn append_history(&mut self, rows: &[Envelope<T>]) -> Result<(), StorageError> {
        self.history.extend_from_slice(rows);
        Ok(())
    }
}

#[async_trait]
impl<T: MemoryRecord> UnitOfWork<T> for MemoryUnitOfWork<T> {
    async fn commit(self) -> Result<(), StorageError> {
        self.store.commit(self.current, self.history)
    }
}

#[async_trait]
impl<T: MemoryRecord> TelemetryStore<T> for MemoryStore {
    type Tx = MemoryUnitOfWork<T>;

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        Ok(MemoryUnitOfWork {
            store: self.clone(),
            current: Vec::new(),
            history: Vec::new(),
        })
    }
}

#[async_trait]
impl PartitionCatalog for MemoryStore {
    async fn partition_exists(&self, partition: &PartitionKey) -> Result<bool, StorageError> {
        let delay = self.lock()?.partition_check_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lock()?.partitions.contains(partition))
    }

    async fn create_partition(&self, partition: &PartitionKey) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        if state.reject_partition_creates {
            return Err(StorageError::Backend(format!(
                "permission denied to create {}",
                partition.name()
            )));
        }
        if !state.partitions.insert(*partition) {
            return Err(StorageError::AlreadyExists(partition.name()));
        }
        Ok(())
    }
}

fn in_window(at: OffsetDateTime, start: OffsetDateTime, end: OffsetDateTime) -> bool {
    at >= start && at < end
}

// Matches the ROUND(AVG(x), 6) of the SQL aggregates.
fn average(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().copied().sum();
    Some((sum / Decimal::from(values.len())).round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero))
}

fn sum_or_none(values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    values.fold(None, |acc, v| Some(acc.unwrap_or_default() + v))
}

#[async_trait]
impl TelemetryReader for MemoryStore {
    async fn meter_current(&self, meter_id: &str) -> Result<Option<MeterCurrentState>, StorageError> {
        Ok(self.lock()?.meter_current.get(meter_id).cloned())
    }

    async fn vehicle_current(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<VehicleCurrentState>, StorageError> {
        Ok(self.lock()?.vehicle_current.get(vehicle_id).cloned())
    }

    async fn meter_history(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MeterTelemetry>, StorageError> {
        let state = self.lock()?;
        let mut rows: Vec<_> = state
            .meter_history
            .iter()
            .filter(|r| r.meter_id == meter_id && in_window(r.recorded_at, start, end))
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.recorded_at, r.id));
        Ok(rows)
    }

    async fn vehicle_history(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<VehicleTelemetry>, StorageError> {
        let state = self.lock()?;
        let mut rows: Vec<_> = state
            .vehicle_history
            .iter()
            .filter(|r| r.vehicle_id == vehicle_id && in_window(r.recorded_at, start, end))
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.recorded_at, r.id));
        Ok(rows)
    }

    async fn vehicle_window(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<VehicleWindowAggregate, StorageError> {
        let state = self.lock()?;
        let rows: Vec<_> = state
            .vehicle_history
            .iter()
            .filter(|r| r.vehicle_id == vehicle_id && in_window(r.recorded_at, start, end))
            .collect();
        let temps: Vec<Decimal> = rows.iter().filter_map(|r| r.battery_temp).collect();

        Ok(VehicleWindowAggregate {
            total_dc_delivered: sum_or_none(rows.iter().map(|r| r.kwh_delivered_dc)),
            avg_battery_temp: average(&temps),
            min_battery_temp: temps.iter().min().copied(),
            max_battery_temp: temps.iter().max().copied(),
            data_points: rows.len() as i64,
        })
    }

    async fn meter_window(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<MeterWindowAggregate, StorageError> {
        let state = self.lock()?;
        let rows: Vec<_> = state
            .meter_history
            .iter()
            .filter(|r| r.meter_id == meter_id && in_window(r.recorded_at, start, end))
            .collect();

        Ok(MeterWindowAggregate {
            total_ac_consumed: sum_or_none(rows.iter().map(|r| r.kwh_consumed_ac)),
            data_points: rows.len() as i64,
        })
    }

    async fn fleet_vehicle_window(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<FleetVehicleAggregate, StorageError> {
        let state = self.lock()?;
        let rows: Vec<_> = state
            .vehicle_history
            .iter()
            .filter(|r| in_window(r.recorded_at, start, end))
            .collect();
        let vehicles: BTreeSet<&str> = rows.iter().map(|r| r.vehicle_id.as_str()).collect();
        let temps: Vec<Decimal> = rows.iter().filter_map(|r| r.battery_temp).collect();

        Ok(FleetVehicleAggregate {
            active_vehicles: vehicles.len() as i64,
            total_dc_delivered: sum_or_none(rows.iter().map(|r| r.kwh_delivered_dc)),
            avg_battery_temp: average(&temps),
            total_readings: rows.len() as i64,
        })
    }

    async fn fleet_meter_window(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<FleetMeterAggregate, StorageError> {
        let state = self.lock()?;
        let rows: Vec<_> = state
            .meter_history
            .iter()
            .filter(|r| in_window(r.recorded_at, start, end))
            .collect();
        let meters: BTreeSet<&str> = rows.iter().map(|r| r.meter_id.as_str()).collect();
        let voltages: Vec<Decimal> = rows.iter().map(|r| r.voltage).collect();

        Ok(FleetMeterAggregate {
            active_meters: meters.len() as i64,
            total_ac_consumed: sum_or_none(rows.iter().map(|r| r.kwh_consumed_ac)),
            avg_voltage: average(&voltages),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::StreamKind;
    use rust_decimal::dec;
    use time::macros::datetime;

    fn meter(id: &str, kwh: Decimal, at: OffsetDateTime) -> Envelope<MeterReading> {
        Envelope::new(MeterReading {
            meter_id: id.to_string(),
            kwh_consumed_ac: kwh,
            voltage: dec!(230),
            recorded_at: at,
        })
    }

    #[tokio::test]
    async fn history_without_partition_is_rejected_atomically() {
        let store = MemoryStore::new();
        let at = datetime!(2024-01-01 12:00:00 UTC);

        let mut tx = TelemetryStore::<MeterReading>::begin(&store).await.unwrap();
        let rows = [meter("meter_1", dec!(1.5), at)];
        tx.upsert_current(&rows).await.unwrap();
        tx.append_history(&rows).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(err.is_missing_partition());
        assert!(store.meter_current("meter_1").await.unwrap().is_none());
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn upsert_keeps_created_at() {
        let store = MemoryStore::new();
        let key = PartitionKey::for_event(StreamKind::Meter, datetime!(2024-01-01 00:00:00 UTC));
        store.create_partition(&key).await.unwrap();

        for (kwh, at) in [
            (dec!(1), datetime!(2024-01-01 01:00:00 UTC)),
            (dec!(2), datetime!(2024-01-01 02:00:00 UTC)),
        ] {
            let mut tx = TelemetryStore::<MeterReading>::begin(&store).await.unwrap();
            let rows = [meter("meter_1", kwh, at)];
            tx.upsert_current(&rows).await.unwrap();
            tx.append_history(&rows).await.unwrap();
            tx.commit().await.unwrap();
        }

        let current = store.meter_current("meter_1").await.unwrap().unwrap();
        assert_eq!(current.kwh_consumed_ac, dec!(2));
        assert_eq!(current.last_reading_at, datetime!(2024-01-01 02:00:00 UTC));
        assert!(current.created_at <= current.updated_at);
        assert_eq!(store.meter_history_rows().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_partition_create_is_reported() {
        let store = MemoryStore::new();
        let key = PartitionKey::for_event(StreamKind::Vehicle, datetime!(2024-01-01 00:00:00 UTC));

        store.create_partition(&key).await.unwrap();
        let err = store.create_partition(&key).await.unwrap_err();
        assert!(err.is_duplicate_object());
    }

    #[tokio::test]
    async fn window_aggregates_are_half_open() {
        let store = MemoryStore::new();
        let key = PartitionKey::for_event(StreamKind::Meter, datetime!(2024-01-01 00:00:00 UTC));
        store.create_partition(&key).await.unwrap();

        let mut tx = TelemetryStore::<MeterReading>::begin(&store).await.unwrap();
        let rows = [
            meter("meter_1", dec!(1.25), datetime!(2024-01-01 00:00:00 UTC)),
            meter("meter_1", dec!(2.5), datetime!(2024-01-01 06:00:00 UTC)),
        ];
        tx.append_history(&rows).await.unwrap();
        tx.commit().await.unwrap();

        let agg = store
            .meter_window(
                "meter_1",
                datetime!(2024-01-01 00:00:00 UTC),
                datetime!(2024-01-01 06:00:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(agg.total_ac_consumed, Some(dec!(1.25)));
        assert_eq!(agg.data_points, 1);

        let empty = store
            .meter_window(
                "meter_2",
                datetime!(2024-01-01 00:00:00 UTC),
                datetime!(2024-01-02 00:00:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(empty, MeterWindowAggregate::default());
    }
}
