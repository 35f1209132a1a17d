mod recovery;

pub use recovery::RecoveryPolicy;

use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

use energy_client::TelemetryReading;
use futures::future::try_join_all;
use tracing::{error, info, warn};

use crate::error::{BatchError, TelemetryError};
use crate::partition::{
    EnsureOutcome, PartitionCatalog, PartitionDirectory, PartitionError, PartitionKey,
};
use crate::store::{Envelope, HistoryStore, StateStore, StorageError, TelemetryStore, UnitOfWork};

/// Readings per batch transaction.
pub const BATCH_CHUNK_SIZE: usize = 500;

/// Single ingestions slower than this are logged.
pub const SLOW_INGEST_THRESHOLD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// 1 on the happy path, 2 if partition recovery ran.
    pub attempts: u32,
    /// Time spent writing, recovery included. Partition ensure is excluded.
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub records: usize,
    pub chunks: usize,
    pub partitions: Vec<(PartitionKey, EnsureOutcome)>,
}

/// Writes validated readings to the hot and cold paths in one transaction
/// per unit of work, provisioning day partitions on the way.
pub struct IngestionEngine<S> {
    store: S,
    partitions: PartitionDirectory<S>,
    recovery: RecoveryPolicy,
}

impl<S> IngestionEngine<S>
where
    S: PartitionCatalog + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            partitions: PartitionDirectory::new(store.clone()),
            store,
            recovery: RecoveryPolicy::default(),
        }
    }

    pub fn partitions(&self) -> &PartitionDirectory<S> {
        &self.partitions
    }

    /// Ingests one reading: ensure its day partition, then upsert the
    /// snapshot and append history atomically.
    ///
    /// A failed partition ensure is logged and the write still goes ahead;
    /// if the write then hits a missing partition, recovery takes over.
    pub async fn ingest<T>(&self, reading: T) -> Result<IngestReport, TelemetryError>
    where
        T: TelemetryReading,
        S: TelemetryStore<T>,
    {
        let stream = T::STREAM;
        let key = PartitionKey::for_event(stream, reading.recorded_at());
        let device_id = reading.device_id().to_string();

        if let Err(e) = self.partitions.ensure(key).await {
            error!(
                stream = %stream,
                device_id = %device_id,
                error = %e,
                "partition ensure failed, attempting write anyway"
            );
        }

        // Latency covers the unit of work and its recovery, not the ensure.
        let started = Instant::now();

        let rows = [Envelope::new(reading)];
        let result = self.write_with_recovery(&rows, &[key]).await;

        let elapsed = started.elapsed();
        metrics::histogram!("telemetry_ingest_latency_seconds", "stream" => stream.as_str())
            .record(elapsed.as_secs_f64());

        if elapsed > SLOW_INGEST_THRESHOLD {
            warn!(
                stream = %stream,
                device_id = %device_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow telemetry ingestion"
            );
        }

        match result {
            Ok(attempts) => {
                metrics::counter!("telemetry_ingested_records_total", "stream" => stream.as_str())
                    .increment(1);
                Ok(IngestReport { attempts, elapsed })
            }
            Err(e) => {
                metrics::counter!("telemetry_ingest_failures_total", "stream" => stream.as_str())
                    .increment(1);
                error!(stream = %stream, device_id = %device_id, error = %e, "telemetry ingestion failed");
                Err(e)
            }
        }
    }

    /// Ingests many readings of one stream.
    ///
    /// Every distinct day partition is ensured up front, then readings are
    /// written in chunks of [`BATCH_CHUNK_SIZE`], each in its own
    /// transaction, in input order. A failing chunk stops the batch; chunks
    /// committed before it stay committed and are reported in the error.
    pub async fn ingest_batch<T>(&self, readings: Vec<T>) -> Result<BatchReport, BatchError>
    where
        T: TelemetryReading,
        S: TelemetryStore<T>,
    {
        if readings.is_empty() {
            return Ok(BatchReport::default());
        }

        let stream = T::STREAM;
        let started = Instant::now();

        let partitions = self
            .partitions
            .ensure_all(stream, readings.iter().map(|r| r.recorded_at()))
            .await
            .map_err(|e| {
                error!(stream = %stream, error = %e, "failed to ensure batch partitions");
                BatchError::before_commit(e)
            })?;

        let envelopes: Vec<Envelope<T>> = readings.into_iter().map(Envelope::new).collect();
        let mut report = BatchReport {
            partitions,
            ..BatchReport::default()
        };

        for (index, chunk) in envelopes.chunks(BATCH_CHUNK_SIZE).enumerate() {
            let keys: Vec<PartitionKey> = chunk
                .iter()
                .map(|env| PartitionKey::for_event(stream, env.payload.recorded_at()))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            if let Err(source) = self.write_with_recovery(chunk, &keys).await {
                metrics::counter!("telemetry_ingest_failures_total", "stream" => stream.as_str())
                    .increment(1);
                error!(
                    stream = %stream,
                    chunk = index + 1,
                    committed_chunks = report.chunks,
                    committed_records = report.records,
                    error = %source,
                    "batch chunk failed, remaining chunks skipped"
                );
                return Err(BatchError {
                    committed_chunks: report.chunks,
                    committed_records: report.records,
                    source,
                });
            }

            report.chunks += 1;
            report.records += chunk.len();
            metrics::counter!("telemetry_batch_chunks_committed_total", "stream" => stream.as_str())
                .increment(1);
            metrics::counter!("telemetry_ingested_records_total", "stream" => stream.as_str())
                .increment(chunk.len() as u64);
        }

        info!(
            stream = %stream,
            records = report.records,
            chunks = report.chunks,
            partitions = report.partitions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingested telemetry batch"
        );

        Ok(report)
    }

    /// Runs one unit of work, re-provisioning `keys` and retrying when the
    /// write is rejected for a missing partition. Returns the attempt count.
    async fn write_with_recovery<T>(
        &self,
        rows: &[Envelope<T>],
        keys: &[PartitionKey],
    ) -> Result<u32, TelemetryError>
    where
        T: TelemetryReading,
        S: TelemetryStore<T>,
    {
        let mut attempt = 1;

        loop {
            let err = match self.write_unit(rows).await {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };

            if !err.is_missing_partition() {
                return Err(TelemetryError::Storage(err));
            }

            let Some(first) = keys.first() else {
                return Err(TelemetryError::Storage(err));
            };

            if !self.recovery.allows_retry(attempt) {
                return Err(PartitionError::new(first, err).into());
            }

            warn!(
                stream = %first.stream,
                partitions = keys.len(),
                attempt,
                error = %err,
                "write hit a missing partition, re-provisioning and retrying"
            );
            metrics::counter!("partition_recovery_total", "stream" => first.stream.as_str())
                .increment(1);

            for key in keys {
                self.partitions.forget(key);
            }
            try_join_all(keys.iter().map(|key| self.partitions.ensure(*key))).await?;

            attempt += 1;
        }
    }

    async fn write_unit<T>(&self, rows: &[Envelope<T>]) -> Result<(), StorageError>
    where
        T: TelemetryReading,
        S: TelemetryStore<T>,
    {
        let latest = latest_per_device(rows);

        let mut tx = self.store.begin().await?;
        tx.upsert_current(&latest).await?;
        tx.append_history(rows).await?;
        tx.commit().await
    }
}

/// Last entry per device in input order, so a chunk holding several
/// readings of one device upserts its snapshot once with the final reading.
fn latest_per_device<T: TelemetryReading>(rows: &[Envelope<T>]) -> Vec<Envelope<T>> {
    let mut seen = HashSet::new();
    let mut latest: Vec<Envelope<T>> = rows
        .iter()
        .rev()
        .filter(|env| seen.insert(env.payload.device_id()))
        .cloned()
        .collect();
    latest.reverse();
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::MeterReading;
    use rust_decimal::dec;
    use time::macros::datetime;

    fn meter(id: &str, kwh: rust_decimal::Decimal) -> Envelope<MeterReading> {
        Envelope::new(MeterReading {
            meter_id: id.to_string(),
            kwh_consumed_ac: kwh,
            voltage: dec!(230),
            recorded_at: datetime!(2024-01-01 00:00:00 UTC),
        })
    }

    #[test]
    fn latest_per_device_keeps_final_reading() {
        let rows = vec![
            meter("meter_1", dec!(1)),
            meter("meter_2", dec!(5)),
            meter("meter_1", dec!(2)),
        ];

        let latest = latest_per_device(&rows);
        let summary: Vec<_> = latest
            .iter()
            .map(|env| (env.payload.meter_id.as_str(), env.payload.kwh_consumed_ac))
            .collect();

        assert_eq!(summary, vec![("meter_2", dec!(5)), ("meter_1", dec!(2))]);
    }
}
