use classbook::{
    BookingEngine, BookingError, BookingOutcome, CancelOutcome, ClassStore, EngineConfig,
    MaxRetries, Operation, StoreError,
};
use classbook_memory::{InMemoryClassStore, InMemoryUserDirectory};
use classbook_testing::chaos::{ChaosConfig, ChaosClassStoreExt};
use classbook_testing::{test_user, test_users, ClassRecordBuilder};
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn injected_conflicts_are_absorbed_by_retries() {
    // Given: a store that loses the next two compare-and-swaps
    let record = ClassRecordBuilder::new().capacity(1).build();
    let inner = InMemoryClassStore::new();
    let _ = inner.insert(record.clone()).await.unwrap();
    let store = inner.clone().with_chaos(
        ChaosConfig::deterministic()
            .with_version_conflict_probability(1.0)
            .with_max_injections(2),
    );
    let engine = BookingEngine::new(store, InMemoryUserDirectory::with_users(test_users(1)))
        .with_config(EngineConfig::testing());

    // When: booking
    let outcome = engine.book(record.id(), &test_user(1)).await;

    // Then: the third attempt succeeds and the booking is stored once
    assert_eq!(outcome, Ok(BookingOutcome::Booked));
    assert_eq!(engine.store().injected_faults(), 2);
    let stored = inner.load(record.id()).await.unwrap().unwrap();
    assert_eq!(stored.record.slots(), &[test_user(1)]);
    assert_eq!(stored.version.into_inner(), 1);
    assert!(logs_contain("[engine.retry] version conflict, retrying"));
}

#[tokio::test]
async fn persistent_conflicts_surface_as_retryable_error() {
    let record = ClassRecordBuilder::new().capacity(1).build();
    let inner = InMemoryClassStore::new();
    let _ = inner.insert(record.clone()).await.unwrap();
    let store = inner
        .clone()
        .with_chaos(ChaosConfig::deterministic().with_version_conflict_probability(1.0));
    let config = EngineConfig::testing().with_max_retries(MaxRetries::try_new(3).unwrap());
    let engine = BookingEngine::new(store, InMemoryUserDirectory::with_users(test_users(1)))
        .with_config(config);

    let error = engine
        .book(record.id(), &test_user(1))
        .await
        .expect_err("every save conflicts");

    assert_eq!(
        error,
        BookingError::ConcurrencyConflict {
            class_id: record.id().clone(),
            attempts: 4,
        }
    );
    assert!(error.is_retryable());
    assert_eq!(error.status_code(), 409);
    assert!(inner.load(record.id()).await.unwrap().unwrap().record.slots().is_empty());
}

#[tokio::test]
async fn store_failures_surface_without_mutation() {
    let record = ClassRecordBuilder::new().capacity(1).build();
    let inner = InMemoryClassStore::new();
    let _ = inner.insert(record.clone()).await.unwrap();
    let users = InMemoryUserDirectory::with_users(test_users(2));

    // Book one user through a healthy engine first
    let healthy = BookingEngine::new(inner.clone(), users.clone()).with_config(EngineConfig::testing());
    let _ = healthy.book(record.id(), &test_user(1)).await.unwrap();

    let failing = BookingEngine::new(
        inner.clone().with_chaos(ChaosConfig::deterministic().with_failure_probability(1.0)),
        users,
    )
    .with_config(EngineConfig::testing());

    let book = failing.book(record.id(), &test_user(2)).await;
    let cancel = failing.cancel(record.id(), &test_user(1)).await;

    for result in [book.map(|_| ()), cancel.map(|_| ())] {
        let error = result.expect_err("store is down");
        assert!(matches!(
            error,
            BookingError::Store(StoreError::StoreFailure {
                operation: Operation::LoadClass,
                ..
            })
        ));
        assert!(!error.is_retryable());
        assert_eq!(error.status_code(), 503);
    }

    let stored = inner.load(record.id()).await.unwrap().unwrap();
    assert_eq!(stored.record.slots(), &[test_user(1)]);
    assert!(stored.record.waiting_list().is_empty());
    assert_eq!(stored.version.into_inner(), 1);
}

#[tokio::test]
async fn engine_recovers_once_store_is_healthy_again() {
    let record = ClassRecordBuilder::new().capacity(2).build();
    let inner = InMemoryClassStore::new();
    let _ = inner.insert(record.clone()).await.unwrap();
    let users = InMemoryUserDirectory::with_users(test_users(1));

    // One injection: consumed by the first load
    let store = inner.clone().with_chaos(
        ChaosConfig::deterministic()
            .with_failure_probability(1.0)
            .with_max_injections(1),
    );
    let engine = BookingEngine::new(store, users).with_config(EngineConfig::testing());

    assert!(engine.book(record.id(), &test_user(1)).await.is_err());
    assert_eq!(engine.book(record.id(), &test_user(1)).await, Ok(BookingOutcome::Booked));
    assert_eq!(
        engine.cancel(record.id(), &test_user(1)).await,
        Ok(CancelOutcome::Cancelled { promoted: None })
    );
}
