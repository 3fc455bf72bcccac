//! Fault injection for class stores.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use classbook::{
    ClassCatalog, ClassId, ClassPage, ClassRecord, ClassStore, ListingQuery, Operation,
    RecordVersion, StoreError, StoreResult, VersionedClass,
};
use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};

/// Probability value for fault injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject faults and 1.0 means always inject faults.
///
/// # Examples
///
/// ```ignore
/// use classbook_testing::chaos::Probability;
///
/// let never = Probability::try_new(0.0).unwrap();
/// let always = Probability::try_new(1.0).unwrap();
///
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// How often, and how many times, a [`ChaosClassStore`] injects faults.
///
/// The default never injects anything.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    version_conflict_probability: Probability,
    max_injections: Option<u32>,
}

impl ChaosConfig {
    /// A config whose random draws repeat from run to run.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Chance that a load, save or listing fails with a store failure.
    /// Clamped to `[0.0, 1.0]`.
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Chance that a save loses with a version conflict. Clamped to `[0.0, 1.0]`.
    pub fn with_version_conflict_probability(mut self, probability: f32) -> Self {
        self.version_conflict_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Stops injecting faults once `limit` have been injected.
    pub const fn with_max_injections(mut self, limit: u32) -> Self {
        self.max_injections = Some(limit);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            version_conflict_probability: Probability::try_new(0.0)
                .expect("0.0 is valid probability"),
            max_injections: None,
        }
    }
}

/// Adds `.with_chaos(config)` to every class store.
pub trait ChaosClassStoreExt: Sized {
    /// Wraps `self` in a [`ChaosClassStore`].
    fn with_chaos(self, config: ChaosConfig) -> ChaosClassStore<Self>;
}

/// Wraps a store and injects version conflicts and store failures.
///
/// Injected faults are raised before the inner store is touched, so a faulted
/// call never has a side effect.
pub struct ChaosClassStore<S> {
    store: S,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    injected: AtomicU32,
}

impl<S> ChaosClassStore<S> {
    /// Wraps `store`, injecting faults as `config` describes.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            config,
            rng: Mutex::new(rng),
            injected: AtomicU32::new(0),
        }
    }

    /// The wrapped store, for inspecting state behind the faults.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// Number of faults injected so far.
    pub fn injected_faults(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let prob_f32: f32 = probability.into();

        if prob_f32 <= 0.0 {
            return false;
        }

        let inject = prob_f32 >= 1.0 || {
            let mut rng = self.rng.lock();
            rng.random_bool(f64::from(prob_f32))
        };
        if !inject {
            return false;
        }

        // Reserve the injection atomically so concurrent callers cannot overshoot the cap.
        let limit = self.config.max_injections.unwrap_or(u32::MAX);
        self.injected
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < limit).then(|| count + 1)
            })
            .is_ok()
    }

    fn failure(operation: Operation) -> StoreError {
        StoreError::failure(operation, "injected by chaos store")
    }
}

impl<S> ClassStore for ChaosClassStore<S>
where
    S: ClassStore + Sync,
{
    fn load(
        &self,
        class_id: &ClassId,
    ) -> impl Future<Output = StoreResult<Option<VersionedClass>>> + Send {
        let should_fail = self.should_inject(self.config.failure_probability);
        let store = &self.store;

        async move {
            if should_fail {
                return Err(Self::failure(Operation::LoadClass));
            }

            store.load(class_id).await
        }
    }

    fn save(
        &self,
        record: ClassRecord,
        expected: RecordVersion,
    ) -> impl Future<Output = StoreResult<RecordVersion>> + Send {
        let should_conflict = self.should_inject(self.config.version_conflict_probability);
        let should_fail = !should_conflict && self.should_inject(self.config.failure_probability);
        let store = &self.store;

        async move {
            if should_conflict {
                return Err(StoreError::VersionConflict {
                    class_id: record.id().clone(),
                    expected,
                });
            }

            if should_fail {
                return Err(Self::failure(Operation::SaveClass));
            }

            store.save(record, expected).await
        }
    }

    fn insert(&self, record: ClassRecord) -> impl Future<Output = StoreResult<RecordVersion>> + Send {
        // Seeding test data is never faulted.
        self.store.insert(record)
    }
}

impl<S> ClassCatalog for ChaosClassStore<S>
where
    S: ClassCatalog + Sync,
{
    fn list_classes(
        &self,
        query: &ListingQuery,
    ) -> impl Future<Output = StoreResult<ClassPage>> + Send {
        let should_fail = self.should_inject(self.config.failure_probability);
        let store = &self.store;

        async move {
            if should_fail {
                return Err(Self::failure(Operation::ListClasses));
            }

            store.list_classes(query).await
        }
    }
}

impl<S> ChaosClassStoreExt for S
where
    S: ClassStore + Sync,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosClassStore<Self> {
        ChaosClassStore::new(self, config)
    }
}
