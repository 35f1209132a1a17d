use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use energy_client::StreamKind;
use futures::future::try_join_all;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, error, info};

use crate::store::StorageError;

/// One UTC calendar day of one stream's history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub stream: StreamKind,
    pub day: Date,
}

impl PartitionKey {
    pub fn new(stream: StreamKind, day: Date) -> Self {
        Self { stream, day }
    }

    /// The partition a row recorded at `at` belongs to.
    pub fn for_event(stream: StreamKind, at: OffsetDateTime) -> Self {
        Self {
            stream,
            day: at.to_offset(UtcOffset::UTC).date(),
        }
    }

    /// `<history table>_YYYY_MM_DD`
    pub fn name(&self) -> String {
        format!(
            "{}_{:04}_{:02}_{:02}",
            self.stream.history_table(),
            self.day.year(),
            u8::from(self.day.month()),
            self.day.day()
        )
    }

    pub fn parent_table(&self) -> &'static str {
        self.stream.history_table()
    }

    /// Inclusive lower bound: midnight UTC of `day`.
    pub fn lower_bound(&self) -> OffsetDateTime {
        self.day.midnight().assume_utc()
    }

    /// Exclusive upper bound: midnight UTC of the following day.
    pub fn upper_bound(&self) -> OffsetDateTime {
        self.day.next_day().unwrap_or(Date::MAX).midnight().assume_utc()
    }

    pub fn covers(&self, at: OffsetDateTime) -> bool {
        at >= self.lower_bound() && at < self.upper_bound()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

#[derive(thiserror::Error, Debug)]
#[error("partition {partition} could not be ensured: {source}")]
pub struct PartitionError {
    pub partition: String,
    #[source]
    pub source: StorageError,
}

impl PartitionError {
    pub fn new(key: &PartitionKey, source: StorageError) -> Self {
        Self {
            partition: key.name(),
            source,
        }
    }
}

/// DDL access to the day partitions of the history tables.
#[async_trait::async_trait]
pub trait PartitionCatalog: Send + Sync {
    async fn partition_exists(&self, partition: &PartitionKey) -> Result<bool, StorageError>;

    /// Creates the partition. Fails with a duplicate-object error if another
    /// caller got there first.
    async fn create_partition(&self, partition: &PartitionKey) -> Result<(), StorageError>;
}

/// Idempotent partition provisioning in front of a [`PartitionCatalog`].
///
/// Days already known to exist are remembered so steady-state ingestion
/// skips the catalog round-trip. The cache is advisory: a write that still
/// hits a missing partition calls [`PartitionDirectory::forget`] and ensures
/// again.
pub struct PartitionDirectory<C> {
    catalog: C,
    known: Mutex<HashSet<PartitionKey>>,
}

impl<C: PartitionCatalog> PartitionDirectory<C> {
    pub fn new(catalog: C) -> Self {
        Self {
            catalog,
            known: Mutex::new(HashSet::new()),
        }
    }

    /// Makes sure the partition for `key` exists. Losing a creation race
    /// to a concurrent caller counts as success.
    pub async fn ensure(&self, key: PartitionKey) -> Result<EnsureOutcome, PartitionError> {
        if self.known().contains(&key) {
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        let name = key.name();

        let exists = self
            .catalog
            .partition_exists(&key)
            .await
            .map_err(|e| PartitionError::new(&key, e))?;

        let outcome = if exists {
            debug!(partition = %name, "partition already exists");
            EnsureOutcome::AlreadyPresent
        } else {
            match self.catalog.create_partition(&key).await {
                Ok(()) => {
                    info!(
                        partition = %name,
                        from = %key.lower_bound(),
                        to = %key.upper_bound(),
                        "created partition"
                    );
                    metrics::counter!("partition_created_total", "stream" => key.stream.as_str())
                        .increment(1);
                    EnsureOutcome::Created
                }
                Err(e) if e.is_duplicate_object() => {
                    debug!(partition = %name, "partition created concurrently");
                    EnsureOutcome::AlreadyPresent
                }
                Err(e) => {
                    error!(partition = %name, error = %e, "failed to create partition");
                    return Err(PartitionError::new(&key, e));
                }
            }
        };

        self.known().insert(key);
        Ok(outcome)
    }

    /// Ensures the partitions for every distinct day in `timestamps`,
    /// concurrently. Fails if any single ensure fails.
    pub async fn ensure_all<I>(
        &self,
        stream: StreamKind,
        timestamps: I,
    ) -> Result<Vec<(PartitionKey, EnsureOutcome)>, PartitionError>
    where
        I: IntoIterator<Item = OffsetDateTime>,
    {
        let keys: BTreeSet<PartitionKey> = timestamps
            .into_iter()
            .map(|at| PartitionKey::for_event(stream, at))
            .collect();

        try_join_all(keys.into_iter().map(|key| async move {
            let outcome = self.ensure(key).await?;
            Ok::<_, PartitionError>((key, outcome))
        }))
        .await
    }

    /// Drops `key` from the cache so the next ensure consults the catalog.
    pub fn forget(&self, key: &PartitionKey) {
        self.known().remove(key);
    }

    fn known(&self) -> MutexGuard<'_, HashSet<PartitionKey>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use time::macros::{date, datetime};

    /// Reports every partition missing, lets the first create through and
    /// rejects the rest as duplicates, like two racing CREATE TABLEs.
    #[derive(Default)]
    struct RacingCatalog {
        creates: AtomicUsize,
        lookups: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PartitionCatalog for Arc<RacingCatalog> {
        async fn partition_exists(&self, _partition: &PartitionKey) -> Result<bool, StorageError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn create_partition(&self, partition: &PartitionKey) -> Result<(), StorageError> {
            if self.creates.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(StorageError::AlreadyExists(partition.name()))
            }
        }
    }

    struct BrokenCatalog;

    #[async_trait::async_trait]
    impl PartitionCatalog for BrokenCatalog {
        async fn partition_exists(&self, _partition: &PartitionKey) -> Result<bool, StorageError> {
            Ok(false)
        }

        async fn create_partition(&self, _partition: &PartitionKey) -> Result<(), StorageError> {
            Err(StorageError::Backend("permission denied".to_string()))
        }
    }

    #[test]
    fn key_is_the_utc_day_of_the_event() {
        let key = PartitionKey::for_event(
            StreamKind::Meter,
            datetime!(2024-01-15 23:30:00 -02:00),
        );
        assert_eq!(key.day, date!(2024 - 01 - 16));
        assert_eq!(key.name(), "meter_telemetry_2024_01_16");
    }

    #[test]
    fn bounds_are_half_open_utc_days() {
        let key = PartitionKey::new(StreamKind::Vehicle, date!(2024 - 02 - 29));
        assert_eq!(key.lower_bound(), datetime!(2024-02-29 00:00:00 UTC));
        assert_eq!(key.upper_bound(), datetime!(2024-03-01 00:00:00 UTC));
        assert!(key.covers(datetime!(2024-02-29 23:59:59.999 UTC)));
        assert!(!key.covers(datetime!(2024-03-01 00:00:00 UTC)));
    }

    #[tokio::test]
    async fn losing_a_creation_race_is_success() {
        let catalog = Arc::new(RacingCatalog::default());
        let first = PartitionDirectory::new(catalog.clone());
        let second = PartitionDirectory::new(catalog.clone());
        let key = PartitionKey::new(StreamKind::Meter, date!(2024 - 01 - 01));

        let (a, b) = tokio::join!(first.ensure(key), second.ensure(key));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o == EnsureOutcome::AlreadyPresent);

        assert_eq!(outcomes, vec![EnsureOutcome::Created, EnsureOutcome::AlreadyPresent]);
    }

    #[tokio::test]
    async fn known_partitions_skip_the_catalog() {
        let catalog = Arc::new(RacingCatalog::default());
        let directory = PartitionDirectory::new(catalog.clone());
        let key = PartitionKey::new(StreamKind::Meter, date!(2024 - 01 - 01));

        assert_eq!(directory.ensure(key).await.unwrap(), EnsureOutcome::Created);
        assert_eq!(directory.ensure(key).await.unwrap(), EnsureOutcome::AlreadyPresent);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 1);

        directory.forget(&key);
        directory.ensure(key).await.unwrap();
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ensure_all_deduplicates_days() {
        let catalog = Arc::new(RacingCatalog::default());
        let directory = PartitionDirectory::new(catalog.clone());

        let ensured = directory
            .ensure_all(
                StreamKind::Vehicle,
                [
                    datetime!(2024-01-01 01:00:00 UTC),
                    datetime!(2024-01-01 22:00:00 UTC),
                    datetime!(2024-01-02 00:00:00 UTC),
                ],
            )
            .await
            .unwrap();

        assert_eq!(ensured.len(), 2);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn creation_failure_names_the_partition() {
        let directory = PartitionDirectory::new(BrokenCatalog);
        let key = PartitionKey::new(StreamKind::Meter, date!(2024 - 03 - 05));

        let err = directory.ensure(key).await.unwrap_err();
        assert_eq!(err.partition, "meter_telemetry_2024_03_05");
        assert!(matches!(err.source, StorageError::Backend(_)));
    }
}
