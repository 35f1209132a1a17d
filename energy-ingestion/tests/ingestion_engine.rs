use energy_client::{MeterReading, StreamKind, VehicleReading};
use energy_ingestion::{
    engine::BATCH_CHUNK_SIZE,
    partition::{EnsureOutcome, PartitionKey},
    store::{MemoryStore, TelemetryReader},
    IngestionEngine, TelemetryError,
};
use rust_decimal::{dec, Decimal};
use time::{macros::datetime, Duration, OffsetDateTime};

fn meter(id: &str, kwh: Decimal, at: OffsetDateTime) -> MeterReading {
    MeterReading {
        meter_id: id.to_string(),
        kwh_consumed_ac: kwh,
        voltage: dec!(231.25),
        recorded_at: at,
    }
}

fn vehicle(id: &str, dc: Decimal, at: OffsetDateTime) -> VehicleReading {
    VehicleReading {
        vehicle_id: id.to_string(),
        soc: dec!(64.5),
        kwh_delivered_dc: dc,
        battery_temp: Some(dec!(30.1)),
        recorded_at: at,
    }
}

#[tokio::test]
async fn single_ingest_writes_both_paths() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());
    let at = datetime!(2024-01-15 10:30:00 UTC);

    let report = engine.ingest(meter("meter_001", dec!(12.3456), at)).await.unwrap();
    assert_eq!(report.attempts, 1);

    let current = store.meter_current("meter_001").await.unwrap().unwrap();
    assert_eq!(current.kwh_consumed_ac, dec!(12.3456));
    assert_eq!(current.voltage, dec!(231.25));
    assert_eq!(current.last_reading_at, at);

    let history = store.meter_history_rows();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].recorded_at, at);

    assert_eq!(
        store.partitions(),
        vec![PartitionKey::for_event(StreamKind::Meter, at)]
    );
}

#[tokio::test]
async fn later_ingest_overwrites_snapshot_and_appends_history() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());

    engine
        .ingest(vehicle("vehicle_001", dec!(1), datetime!(2024-01-15 10:00:00 UTC)))
        .await
        .unwrap();
    engine
        .ingest(vehicle("vehicle_001", dec!(2), datetime!(2024-01-16 10:00:00 UTC)))
        .await
        .unwrap();

    let current = store.vehicle_current("vehicle_001").await.unwrap().unwrap();
    assert_eq!(current.kwh_delivered_dc, dec!(2));
    assert_eq!(store.vehicle_history_rows().len(), 2);
    assert_eq!(store.partitions().len(), 2);
}

#[tokio::test]
async fn out_of_order_reading_still_overwrites_snapshot() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());

    engine
        .ingest(meter("meter_001", dec!(5), datetime!(2024-01-15 12:00:00 UTC)))
        .await
        .unwrap();
    engine
        .ingest(meter("meter_001", dec!(4), datetime!(2024-01-15 11:00:00 UTC)))
        .await
        .unwrap();

    let current = store.meter_current("meter_001").await.unwrap().unwrap();
    assert_eq!(current.last_reading_at, datetime!(2024-01-15 11:00:00 UTC));
}

#[tokio::test]
async fn missing_partition_is_recreated_and_write_retried_once() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());
    let at = datetime!(2024-01-15 10:00:00 UTC);
    let key = PartitionKey::for_event(StreamKind::Meter, at);

    engine.ingest(meter("meter_001", dec!(1), at)).await.unwrap();
    store.drop_partition(&key);

    let report = engine
        .ingest(meter("meter_001", dec!(2), at + Duration::minutes(1)))
        .await
        .unwrap();

    assert_eq!(report.attempts, 2);
    assert_eq!(store.partitions(), vec![key]);
    assert_eq!(store.meter_history_rows().len(), 2);
}

#[tokio::test]
async fn unresolvable_partition_surfaces_as_partition_error() {
    let store = MemoryStore::new();
    store.reject_partition_creates(true);
    let engine = IngestionEngine::new(store.clone());

    let err = engine
        .ingest(meter("meter_001", dec!(1), datetime!(2024-01-15 10:00:00 UTC)))
        .await
        .unwrap_err();

    match err {
        TelemetryError::Partition(e) => assert_eq!(e.partition, "meter_telemetry_2024_01_15"),
        other => panic!("expected partition error, got {other:?}"),
    }
    assert_eq!(store.commits(), 0);
    assert!(store.meter_current("meter_001").await.unwrap().is_none());
}

#[tokio::test]
async fn other_storage_failures_are_not_retried() {
    let store = MemoryStore::new();
    store.fail_commit(1);
    let engine = IngestionEngine::new(store.clone());
    let at = datetime!(2024-01-15 10:00:00 UTC);

    let err = engine.ingest(meter("meter_001", dec!(1), at)).await.unwrap_err();
    assert!(matches!(err, TelemetryError::Storage(_)));
    assert!(store.meter_history_rows().is_empty());

    // The next commit is attempt 2, so a fresh reading goes through first time.
    let report = engine.ingest(meter("meter_001", dec!(2), at)).await.unwrap();
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn ingest_latency_excludes_partition_ensure() {
    let store = MemoryStore::new();
    store.slow_partition_checks(std::time::Duration::from_millis(250));
    let engine = IngestionEngine::new(store.clone());

    let report = engine
        .ingest(meter("meter_001", dec!(1), datetime!(2024-01-15 10:00:00 UTC)))
        .await
        .unwrap();

    assert_eq!(report.attempts, 1);
    assert!(report.elapsed < std::time::Duration::from_millis(250));
}

#[tokio::test]
async fn concurrent_ensures_yield_one_partition() {
    let store = MemoryStore::new();
    let first = IngestionEngine::new(store.clone());
    let second = IngestionEngine::new(store.clone());
    let key = PartitionKey::for_event(StreamKind::Vehicle, datetime!(2024-01-15 00:00:00 UTC));

    let (a, b) = tokio::join!(first.partitions().ensure(key), second.partitions().ensure(key));
    a.unwrap();
    b.unwrap();

    assert_eq!(store.partitions(), vec![key]);
    assert_eq!(
        first.partitions().ensure(key).await.unwrap(),
        EnsureOutcome::AlreadyPresent
    );
}

#[tokio::test]
async fn concurrent_readings_for_one_device_keep_all_history() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());

    let (a, b) = tokio::join!(
        engine.ingest(vehicle("vehicle_009", dec!(1), datetime!(2024-01-15 10:00:00 UTC))),
        engine.ingest(vehicle("vehicle_009", dec!(2), datetime!(2024-01-15 10:01:00 UTC))),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(store.vehicle_history_rows().len(), 2);
    let current = store.vehicle_current("vehicle_009").await.unwrap().unwrap();
    assert!(current.kwh_delivered_dc == dec!(1) || current.kwh_delivered_dc == dec!(2));
}

#[tokio::test]
async fn batch_ensures_one_partition_per_day_and_commits_per_chunk() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());
    let start = datetime!(2024-01-15 00:00:00 UTC);

    // 1201 readings spread over three UTC days.
    let readings: Vec<MeterReading> = (0..1201)
        .map(|i| {
            let at = start + Duration::days(i % 3) + Duration::seconds(i);
            meter(&format!("meter_{:03}", i % 100), Decimal::from(i), at)
        })
        .collect();

    let report = engine.ingest_batch(readings).await.unwrap();

    assert_eq!(report.records, 1201);
    assert_eq!(report.chunks, 1201_usize.div_ceil(BATCH_CHUNK_SIZE));
    assert_eq!(report.partitions.len(), 3);
    assert!(report
        .partitions
        .iter()
        .all(|(_, outcome)| *outcome == EnsureOutcome::Created));
    assert_eq!(store.partitions().len(), 3);
    assert_eq!(store.commits(), 3);
    assert_eq!(store.meter_history_rows().len(), 1201);
}

#[tokio::test]
async fn failed_chunk_keeps_earlier_chunks_and_skips_the_rest() {
    let store = MemoryStore::new();
    store.fail_commit(2);
    let engine = IngestionEngine::new(store.clone());
    let start = datetime!(2024-01-15 00:00:00 UTC);

    let readings: Vec<VehicleReading> = (0..1300)
        .map(|i| vehicle(&format!("vehicle_{i:04}"), dec!(1.5), start + Duration::seconds(i)))
        .collect();

    let err = engine.ingest_batch(readings).await.unwrap_err();

    assert_eq!(err.committed_chunks, 1);
    assert_eq!(err.committed_records, BATCH_CHUNK_SIZE);
    assert!(matches!(err.source, TelemetryError::Storage(_)));

    let history = store.vehicle_history_rows();
    assert_eq!(history.len(), BATCH_CHUNK_SIZE);
    assert!(history.iter().all(|row| row.recorded_at < start + Duration::seconds(500)));
    assert!(store.vehicle_current("vehicle_0499").await.unwrap().is_some());
    assert!(store.vehicle_current("vehicle_0500").await.unwrap().is_none());
}

#[tokio::test]
async fn batch_snapshot_reflects_last_reading_in_input_order() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());

    let readings = vec![
        meter("meter_001", dec!(1), datetime!(2024-01-15 10:00:00 UTC)),
        meter("meter_002", dec!(7), datetime!(2024-01-15 10:00:00 UTC)),
        meter("meter_001", dec!(3), datetime!(2024-01-15 09:00:00 UTC)),
    ];

    engine.ingest_batch(readings).await.unwrap();

    let current = store.meter_current("meter_001").await.unwrap().unwrap();
    assert_eq!(current.kwh_consumed_ac, dec!(3));
    assert_eq!(store.meter_history_rows().len(), 3);
}

#[tokio::test]
async fn batch_chunk_recovers_from_a_dropped_partition() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());
    let day1 = datetime!(2024-01-15 08:00:00 UTC);
    let day2 = datetime!(2024-01-16 08:00:00 UTC);

    engine
        .ingest_batch(vec![meter("meter_001", dec!(1), day1), meter("meter_001", dec!(2), day2)])
        .await
        .unwrap();

    // The directory still believes day 1 exists.
    let dropped = PartitionKey::for_event(StreamKind::Meter, day1);
    store.drop_partition(&dropped);

    let report = engine
        .ingest_batch(vec![
            meter("meter_002", dec!(3), day1 + Duration::hours(1)),
            meter("meter_002", dec!(4), day2 + Duration::hours(1)),
        ])
        .await
        .unwrap();

    assert_eq!(report.chunks, 1);
    assert_eq!(report.records, 2);
    assert!(report
        .partitions
        .iter()
        .all(|(_, outcome)| *outcome == EnsureOutcome::AlreadyPresent));
    assert_eq!(store.partitions().len(), 2);
    assert!(store.partitions().contains(&dropped));
    assert_eq!(store.commits(), 2);

    let history = store.meter_history_rows();
    assert_eq!(history.iter().filter(|r| r.meter_id == "meter_002").count(), 2);
    let current = store.meter_current("meter_002").await.unwrap().unwrap();
    assert_eq!(current.kwh_consumed_ac, dec!(4));
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let store = MemoryStore::new();
    let engine = IngestionEngine::new(store.clone());

    let report = engine.ingest_batch(Vec::<MeterReading>::new()).await.unwrap();

    assert_eq!(report.records, 0);
    assert_eq!(report.chunks, 0);
    assert!(store.partitions().is_empty());
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn batch_partition_failure_commits_nothing() {
    let store = MemoryStore::new();
    store.reject_partition_creates(true);
    let engine = IngestionEngine::new(store.clone());

    let err = engine
        .ingest_batch(vec![meter("meter_001", dec!(1), datetime!(2024-01-15 10:00:00 UTC))])
        .await
        .unwrap_err();

    assert_eq!(err.committed_chunks, 0);
    assert_eq!(err.committed_records, 0);
    assert!(matches!(err.source, TelemetryError::Partition(_)));
    assert_eq!(store.commits(), 0);
}
