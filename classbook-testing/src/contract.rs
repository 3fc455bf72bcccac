//! Behaviour every class store adapter must share.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use classbook::{
    BookingOutcome, ClassCatalog, ClassId, ClassKind, ClassRecord, ClassStore, ListingQuery,
    PageNumber, PageSize, RecordVersion, SortField, StoreError, Timestamp,
};
use uuid::Uuid;

use crate::fixtures::{test_user, ClassRecordBuilder};

/// A contract scenario that did not hold, with what went wrong.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: StoreError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Result of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

fn contract_class_id(scenario: &'static str, label: &str) -> Result<String, ContractTestFailure> {
    // Unique per run so suites can share a database.
    let raw = format!("contract-{label}-{}", Uuid::now_v7().simple());

    match ClassId::try_new(raw.as_str()) {
        Ok(_) => Ok(raw),
        Err(error) => Err(ContractTestFailure::assertion(
            scenario,
            format!("unable to construct class id `{raw}`: {error}"),
        )),
    }
}

async fn insert_contract_class<S: ClassStore>(
    scenario: &'static str,
    store: &S,
    record: ClassRecord,
) -> Result<RecordVersion, ContractTestFailure> {
    store
        .insert(record)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "insert", error))
}

/// An inserted record loads back unchanged at the initial version.
pub async fn test_insert_then_load<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "insert_then_load";

    let store = make_store();
    let record = ClassRecordBuilder::new()
        .id(&contract_class_id(SCENARIO, "class")?)
        .named("Contract Pilates")
        .kind(ClassKind::Dance)
        .capacity(12)
        .build();

    let version = insert_contract_class(SCENARIO, &store, record.clone()).await?;
    if version != RecordVersion::initial() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected insert to return version 0, observed {version}"),
        ));
    }

    let loaded = store
        .load(record.id())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "load", error))?;

    match loaded {
        Some(versioned) if versioned.record == record && versioned.version == version => Ok(()),
        Some(versioned) => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("loaded record differs from inserted one: {versioned:?}"),
        )),
        None => Err(ContractTestFailure::assertion(
            SCENARIO,
            "inserted class could not be loaded",
        )),
    }
}

/// Loading an unknown class yields `None`, not an error.
pub async fn test_missing_class_loads_none<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "missing_class_loads_none";

    let store = make_store();
    let class_id = ClassId::try_new(contract_class_id(SCENARIO, "absent")?)
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;

    match store.load(&class_id).await {
        Ok(None) => Ok(()),
        Ok(Some(_)) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "load of a never-inserted class returned a record",
        )),
        Err(error) => Err(ContractTestFailure::store_error(SCENARIO, "load", error)),
    }
}

/// Inserting a class id twice fails with `DuplicateClass`.
pub async fn test_duplicate_insert_rejected<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "duplicate_insert_rejected";

    let store = make_store();
    let record = ClassRecordBuilder::new()
        .id(&contract_class_id(SCENARIO, "class")?)
        .build();
    let _ = insert_contract_class(SCENARIO, &store, record.clone()).await?;

    match store.insert(record.clone()).await {
        Err(StoreError::DuplicateClass(id)) if &id == record.id() => Ok(()),
        Err(error) => Err(ContractTestFailure::store_error(SCENARIO, "insert", error)),
        Ok(_) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "expected duplicate insert to fail but it succeeded",
        )),
    }
}

/// A save at the current version succeeds and bumps the version by one.
pub async fn test_save_advances_version<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "save_advances_version";

    let store = make_store();
    let record = ClassRecordBuilder::new()
        .id(&contract_class_id(SCENARIO, "class")?)
        .capacity(1)
        .build();
    let version = insert_contract_class(SCENARIO, &store, record.clone()).await?;

    let mut updated = record.clone();
    let _ = updated.reserve(&test_user(1));
    let _ = updated.reserve(&test_user(2));

    let new_version = store
        .save(updated.clone(), version)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "save", error))?;
    if new_version != version.next() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected save to return version 1, observed {new_version}"),
        ));
    }

    let loaded = store
        .load(record.id())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "load", error))?
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "saved class disappeared"))?;

    if loaded.record != updated || loaded.version != new_version {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!(
                "expected roster {:?} / waiting {:?} at {new_version}, observed {:?}",
                updated.slots(),
                updated.waiting_list(),
                loaded
            ),
        ));
    }

    Ok(())
}

/// A save at an outdated version fails with `VersionConflict` and changes nothing.
pub async fn test_stale_save_conflicts<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "stale_save_conflicts";

    let store = make_store();
    let record = ClassRecordBuilder::new()
        .id(&contract_class_id(SCENARIO, "class")?)
        .capacity(2)
        .build();
    let version = insert_contract_class(SCENARIO, &store, record.clone()).await?;

    let mut first = record.clone();
    let _ = first.reserve(&test_user(1));
    let _ = store
        .save(first.clone(), version)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "save", error))?;

    let mut stale = record.clone();
    let _ = stale.reserve(&test_user(2));
    match store.save(stale, version).await {
        Err(StoreError::VersionConflict { expected, .. }) if expected == version => {}
        Err(error) => return Err(ContractTestFailure::store_error(SCENARIO, "save", error)),
        Ok(_) => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                "expected version conflict but save succeeded",
            ))
        }
    }

    let loaded = store
        .load(record.id())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "load", error))?
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "class disappeared"))?;

    if loaded.record != first {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("conflicting save leaked into stored record: {:?}", loaded.record),
        ));
    }

    Ok(())
}

/// Saving a class that was never inserted is an error.
pub async fn test_save_missing_class_fails<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "save_missing_class_fails";

    let store = make_store();
    let record = ClassRecordBuilder::new()
        .id(&contract_class_id(SCENARIO, "class")?)
        .build();

    match store.save(record, RecordVersion::initial()).await {
        Err(StoreError::MissingClass(_)) => Ok(()),
        Err(error) => Err(ContractTestFailure::store_error(SCENARIO, "save", error)),
        Ok(_) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "save of a never-inserted class succeeded",
        )),
    }
}

/// Of many saves racing on one version, exactly one wins.
pub async fn test_concurrent_saves_single_winner<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "concurrent_saves_single_winner";
    const WRITERS: u32 = 8;

    let store = Arc::new(make_store());
    let record = ClassRecordBuilder::new()
        .id(&contract_class_id(SCENARIO, "class")?)
        .capacity(WRITERS)
        .build();
    let version = insert_contract_class(SCENARIO, store.as_ref(), record.clone()).await?;

    let barrier = Arc::new(tokio::sync::Barrier::new(WRITERS as usize));
    let mut handles = Vec::new();
    for n in 1..=WRITERS {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let mut candidate = record.clone();
        handles.push(tokio::spawn(async move {
            let _ = candidate.reserve(&test_user(n));
            let _ = barrier.wait().await;
            store.save(candidate, version).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(_)) => winners += 1,
            Ok(Err(StoreError::VersionConflict { .. })) => {}
            Ok(Err(error)) => return Err(ContractTestFailure::store_error(SCENARIO, "save", error)),
            Err(join_error) => {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("writer task panicked: {join_error}"),
                ))
            }
        }
    }

    if winners != 1 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly one save to win, observed {winners}"),
        ));
    }

    let loaded = store
        .load(record.id())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "load", error))?
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "class disappeared"))?;

    if loaded.record.slots().len() != 1 || loaded.version != version.next() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected one booking at version 1, observed {loaded:?}"),
        ));
    }

    Ok(())
}

/// Lists classes in a far-future window no other scenario writes to and
/// checks filtering, ordering and pagination against [`ListingQuery::apply`].
pub async fn test_listing_matches_reference<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + ClassCatalog + Send + Sync + 'static,
{
    const SCENARIO: &str = "listing_matches_reference";

    let store = make_store();
    let window_start = Utc
        .with_ymd_and_hms(2300, 1, 1, 0, 0, 0)
        .single()
        .map(Timestamp::new)
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "invalid window start"))?;
    let at = |hours: i64| Timestamp::new(window_start.into_datetime() + Duration::hours(hours));

    let specs = [
        ("a", "Morning Flow", ClassKind::Yoga, 10, at(3)),
        ("b", "Power Lift", ClassKind::Gym, 5, at(1)),
        ("c", "Salsa", ClassKind::Dance, 20, at(2)),
        ("d", "Evening Flow", ClassKind::Yoga, 8, at(10)),
        ("e", "Circuit", ClassKind::Gym, 5, at(1)),
    ];
    let mut ours = Vec::new();
    for (label, name, kind, capacity, start) in specs {
        let record = ClassRecordBuilder::new()
            .id(&contract_class_id(SCENARIO, label)?)
            .named(name)
            .kind(kind)
            .capacity(capacity)
            .starts_at(start)
            .build();
        let _ = insert_contract_class(SCENARIO, &store, record.clone()).await?;
        ours.push(record);
    }

    let size = PageSize::try_new(2)
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;

    for sort in [
        SortField::StartTime,
        SortField::Name,
        SortField::Capacity,
        SortField::Kind,
    ] {
        for kind in [None, Some(ClassKind::Yoga), Some(ClassKind::Gym)] {
            let mut base = ListingQuery::new()
                .starting_from(window_start)
                .sort_by(sort)
                .page_size(size);
            if let Some(kind) = kind {
                base = base.kind(kind);
            }

            let mut listed = Vec::new();
            let mut page_number = 1_u32;
            loop {
                let page_index = PageNumber::try_new(page_number)
                    .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;
                let page = store
                    .list_classes(&base.clone().page(page_index))
                    .await
                    .map_err(|error| ContractTestFailure::store_error(SCENARIO, "list_classes", error))?;

                if page.total_pages != page.total.div_ceil(2) {
                    return Err(ContractTestFailure::assertion(
                        SCENARIO,
                        format!("total_pages {} inconsistent with total {}", page.total_pages, page.total),
                    ));
                }
                if page.classes.len() > 2 {
                    return Err(ContractTestFailure::assertion(
                        SCENARIO,
                        format!("page of size 2 returned {} classes", page.classes.len()),
                    ));
                }

                let done = page.classes.is_empty() || !page.has_next();
                listed.extend(page.classes);
                if done {
                    break;
                }
                page_number += 1;
            }

            let observed: Vec<ClassId> = listed
                .iter()
                .filter(|class| ours.iter().any(|own| own.id() == class.id()))
                .map(|class| class.id().clone())
                .collect();

            let reference = base.clone().page_size(
                PageSize::try_new(1000)
                    .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?,
            );
            let expected_all: Vec<ClassId> = reference
                .apply(ours.clone())
                .classes
                .into_iter()
                .map(|class| class.id().clone())
                .collect();

            if observed != expected_all {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("sort={sort:?} kind={kind:?}: expected {expected_all:?}, observed {observed:?}"),
                ));
            }

            if listed.iter().any(|class| !base.matches(class)) {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("sort={sort:?} kind={kind:?}: listing returned a class outside the filters"),
                ));
            }
        }
    }

    Ok(())
}

/// Books through a store directly to check that roster order survives a round trip.
/// Slot and waiting-list order survive a save and load.
pub async fn test_roster_order_round_trips<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ClassStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "roster_order_round_trips";

    let store = make_store();
    let record = ClassRecordBuilder::new()
        .id(&contract_class_id(SCENARIO, "class")?)
        .capacity(2)
        .build();
    let mut version = insert_contract_class(SCENARIO, &store, record.clone()).await?;

    let mut current = record;
    for n in [3, 1, 4, 2, 5] {
        let outcome = current.reserve(&test_user(n));
        if !matches!(outcome, BookingOutcome::Booked | BookingOutcome::Waitlisted) {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                format!("unexpected outcome {outcome:?} for user-{n}"),
            ));
        }
        version = store
            .save(current.clone(), version)
            .await
            .map_err(|error| ContractTestFailure::store_error(SCENARIO, "save", error))?;
    }

    let loaded = store
        .load(current.id())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "load", error))?
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "class disappeared"))?;

    let slots = [test_user(3), test_user(1)];
    let waiting = [test_user(4), test_user(2), test_user(5)];
    if loaded.record.slots() != &slots[..]
        || !loaded.record.waiting_list().iter().eq(waiting.iter())
    {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("roster order not preserved: {:?}", loaded.record),
        ));
    }

    Ok(())
}

/// Expands to one `#[tokio::test]` per contract scenario.
///
/// ```ignore
/// class_store_contract_tests! {
///     suite = in_memory,
///     make_store = InMemoryClassStore::new,
/// }
/// ```
#[macro_export]
macro_rules! class_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_concurrent_saves_single_winner, test_duplicate_insert_rejected,
                test_insert_then_load, test_listing_matches_reference,
                test_missing_class_loads_none, test_roster_order_round_trips,
                test_save_advances_version, test_save_missing_class_fails,
                test_stale_save_conflicts,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn insert_then_load_contract() {
                test_insert_then_load($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn missing_class_loads_none_contract() {
                test_missing_class_loads_none($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn duplicate_insert_rejected_contract() {
                test_duplicate_insert_rejected($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn save_advances_version_contract() {
                test_save_advances_version($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn stale_save_conflicts_contract() {
                test_stale_save_conflicts($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn save_missing_class_fails_contract() {
                test_save_missing_class_fails($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_saves_single_winner_contract() {
                test_concurrent_saves_single_winner($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn listing_matches_reference_contract() {
                test_listing_matches_reference($make_store)
                    .await
                    .expect("class store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn roster_order_round_trips_contract() {
                test_roster_order_round_trips($make_store)
                    .await
                    .expect("class store contract failed");
            }
        }
    };
}

pub use class_store_contract_tests;
