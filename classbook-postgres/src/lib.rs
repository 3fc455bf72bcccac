//! PostgreSQL adapter for classbook.
//!
//! [`PostgresClassStore`] persists class records in `classbook_classes` and
//! implements the version-checked save with a single conditional `UPDATE`,
//! so several engine processes can share one database safely.
//! [`PostgresUserDirectory`] answers user lookups from `classbook_users`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook::{
    Capacity, ClassCatalog, ClassId, ClassKind, ClassName, ClassPage, ClassRecord, ClassStore,
    ListingQuery, Operation, RecordVersion, SortField, StoreError, StoreResult, UserDirectory,
    UserId, VersionedClass,
};
use nutype::nutype;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{query, query_scalar, Pool, Postgres, Row};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors raised while setting up the store.
#[derive(Debug, Error)]
pub enum PostgresClassStoreError {
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),
    #[error("failed to apply classbook migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
///
/// # Examples
///
/// ```ignore
/// use classbook_postgres::MaxConnections;
/// use std::num::NonZeroU32;
///
/// let small_pool = MaxConnections::new(NonZeroU32::new(5).expect("5 is non-zero"));
/// ```
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the `PostgresClassStore` connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

const CLASS_COLUMNS: &str =
    "class_id, name, kind, capacity, start_time, slots, waiting_list, version";

const LISTING_FILTER: &str =
    "($1::text IS NULL OR kind = $1) AND ($2::timestamptz IS NULL OR start_time >= $2)";

/// Class records persisted in `classbook_classes`.
#[derive(Debug, Clone)]
pub struct PostgresClassStore {
    pool: Pool<Postgres>,
}

impl PostgresClassStore {
    /// Create a new store with default configuration.
    pub async fn new<S: Into<String>>(
        connection_string: S,
    ) -> Result<Self, PostgresClassStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Create a new store with custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresClassStoreError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresClassStoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool.
    ///
    /// Use this to share a pool with other components.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// A user directory backed by the same pool.
    pub fn users(&self) -> PostgresUserDirectory {
        PostgresUserDirectory {
            pool: self.pool.clone(),
        }
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), PostgresClassStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresClassStoreError::MigrationFailed)
    }
}

impl ClassStore for PostgresClassStore {
    #[instrument(name = "postgres.load", skip(self))]
    async fn load(&self, class_id: &ClassId) -> StoreResult<Option<VersionedClass>> {
        let sql = format!("SELECT {CLASS_COLUMNS} FROM classbook_classes WHERE class_id = $1");
        let row = query(&sql)
            .bind(class_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::LoadClass))?;

        let Some(row) = row else {
            debug!(class_id = %class_id, "[postgres.load] class not found");
            return Ok(None);
        };

        decode_class(&row, Operation::LoadClass).map(Some)
    }

    #[instrument(
        name = "postgres.save",
        skip(self, record),
        fields(class_id = %record.id(), expected = %expected)
    )]
    async fn save(&self, record: ClassRecord, expected: RecordVersion) -> StoreResult<RecordVersion> {
        let expected_param = version_param(expected, Operation::SaveClass)?;

        let saved = query_scalar::<_, i64>(
            "UPDATE classbook_classes \
             SET name = $2, kind = $3, capacity = $4, start_time = $5, \
                 slots = $6, waiting_list = $7, version = version + 1 \
             WHERE class_id = $1 AND version = $8 \
             RETURNING version",
        )
        .bind(record.id().as_str())
        .bind(record.name().as_str())
        .bind(record.kind().as_str())
        .bind(i64::from(record.capacity().into_inner()))
        .bind(record.start_time().into_datetime())
        .bind(Json(record.slots()))
        .bind(Json(record.waiting_list()))
        .bind(expected_param)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::SaveClass))?;

        if let Some(version) = saved {
            let version = version_from_db(version, record.id(), Operation::SaveClass)?;
            debug!(version = %version, "[postgres.save] class record saved");
            return Ok(version);
        }

        // Nothing matched: either the class is gone or another writer got there first.
        let current = query_scalar::<_, i64>("SELECT version FROM classbook_classes WHERE class_id = $1")
            .bind(record.id().as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::SaveClass))?;

        match current {
            None => Err(StoreError::MissingClass(record.id().clone())),
            Some(current) => {
                warn!(
                    current = current,
                    "[postgres.version_conflict] optimistic concurrency check failed"
                );
                Err(StoreError::VersionConflict {
                    class_id: record.id().clone(),
                    expected,
                })
            }
        }
    }

    #[instrument(name = "postgres.insert", skip(self, record), fields(class_id = %record.id()))]
    async fn insert(&self, record: ClassRecord) -> StoreResult<RecordVersion> {
        let result = query(
            "INSERT INTO classbook_classes \
             (class_id, name, kind, capacity, start_time, slots, waiting_list, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0)",
        )
        .bind(record.id().as_str())
        .bind(record.name().as_str())
        .bind(record.kind().as_str())
        .bind(i64::from(record.capacity().into_inner()))
        .bind(record.start_time().into_datetime())
        .bind(Json(record.slots()))
        .bind(Json(record.waiting_list()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("[postgres.insert] class record inserted");
                Ok(RecordVersion::initial())
            }
            Err(error) if is_unique_violation(&error) => {
                Err(StoreError::DuplicateClass(record.id().clone()))
            }
            Err(error) => Err(map_sqlx_error(error, Operation::InsertClass)),
        }
    }
}

impl ClassCatalog for PostgresClassStore {
    #[instrument(name = "postgres.list_classes", skip(self))]
    async fn list_classes(&self, query_spec: &ListingQuery) -> StoreResult<ClassPage> {
        let kind = query_spec.kind_filter().map(ClassKind::as_str);
        let starts_at_or_after: Option<DateTime<Utc>> = query_spec
            .starts_at_or_after()
            .map(classbook::Timestamp::into_datetime);
        let limit = i64::from(query_spec.size().into_inner());
        let offset = i64::try_from(query_spec.offset()).map_err(|_| {
            StoreError::failure(Operation::ListClasses, "page offset out of range")
        })?;

        // Count and page come from one snapshot so `total` agrees with the rows.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;

        let _ = query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;

        let count_sql = format!("SELECT COUNT(*) FROM classbook_classes WHERE {LISTING_FILTER}");
        let total = query_scalar::<_, i64>(&count_sql)
            .bind(kind)
            .bind(starts_at_or_after)
            .fetch_one(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ListClasses))?;

        let page_sql = format!(
            "SELECT {CLASS_COLUMNS} FROM classbook_classes WHERE {LISTING_FILTER} \
             ORDER BY {} LIMIT $3 OFFSET $4",
            order_clause(query_spec.sort())
        );
        let rows = query(&page_sql)
            .bind(kind)
            .bind(starts_at_or_after)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ListClasses))?;

        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction))?;

        let classes = rows
            .iter()
            .map(|row| decode_class(row, Operation::ListClasses).map(|versioned| versioned.record))
            .collect::<StoreResult<Vec<_>>>()?;
        let total = u64::try_from(total).unwrap_or_default();

        info!(
            returned = classes.len(),
            total = total,
            "[postgres.list_classes] listing completed"
        );

        Ok(ClassPage::new(classes, total, query_spec))
    }
}

/// Known users, stored in `classbook_users`.
#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: Pool<Postgres>,
}

impl PostgresUserDirectory {
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Add a user. Fails with [`StoreError::DuplicateUser`] if already known.
    #[instrument(name = "postgres.register_user", skip(self))]
    pub async fn register(&self, user_id: &UserId) -> StoreResult<()> {
        let result = query("INSERT INTO classbook_users (user_id) VALUES ($1)")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => {
                Err(StoreError::DuplicateUser(user_id.clone()))
            }
            Err(error) => Err(map_sqlx_error(error, Operation::RegisterUser)),
        }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[instrument(name = "postgres.user_exists", skip(self))]
    async fn user_exists(&self, user_id: &UserId) -> StoreResult<bool> {
        query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM classbook_users WHERE user_id = $1)")
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindUser))
    }
}

/// Ties are broken by class id. `COLLATE "C"` compares bytes, matching the
/// ordering of the in-memory catalog.
const fn order_clause(sort: SortField) -> &'static str {
    match sort {
        SortField::StartTime => r#"start_time ASC, class_id COLLATE "C" ASC"#,
        SortField::Name => r#"name COLLATE "C" ASC, class_id COLLATE "C" ASC"#,
        SortField::Capacity => r#"capacity ASC, class_id COLLATE "C" ASC"#,
        SortField::Kind => r#"kind COLLATE "C" ASC, class_id COLLATE "C" ASC"#,
    }
}

fn decode_class(row: &PgRow, operation: Operation) -> StoreResult<VersionedClass> {
    let raw_id: String = row
        .try_get("class_id")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let class_id = ClassId::try_new(raw_id.clone()).map_err(|error| {
        StoreError::failure(operation, format!("stored class id '{raw_id}' is invalid: {error}"))
    })?;
    let corrupt = |detail: String| StoreError::CorruptRecord {
        class_id: class_id.clone(),
        detail,
    };

    let name: String = row
        .try_get("name")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let kind: String = row
        .try_get("kind")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let capacity: i64 = row
        .try_get("capacity")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let start_time: DateTime<Utc> = row
        .try_get("start_time")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let slots: Value = row
        .try_get("slots")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let waiting_list: Value = row
        .try_get("waiting_list")
        .map_err(|error| map_sqlx_error(error, operation))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|error| map_sqlx_error(error, operation))?;

    let name = ClassName::try_new(name).map_err(|error| corrupt(format!("name: {error}")))?;
    let kind: ClassKind = kind.parse().map_err(|error| corrupt(format!("kind: {error}")))?;
    let capacity = u32::try_from(capacity)
        .map_err(|error| corrupt(format!("capacity: {error}")))
        .and_then(|capacity| {
            Capacity::try_new(capacity).map_err(|error| corrupt(format!("capacity: {error}")))
        })?;
    let slots: Vec<UserId> =
        serde_json::from_value(slots).map_err(|error| corrupt(format!("slots: {error}")))?;
    let waiting_list: Vec<UserId> = serde_json::from_value(waiting_list)
        .map_err(|error| corrupt(format!("waiting list: {error}")))?;

    let record = ClassRecord::new(class_id.clone(), name, kind, capacity, start_time.into())
        .with_roster(slots, waiting_list)
        .map_err(|violation| corrupt(violation.to_string()))?;
    let version = version_from_db(version, &class_id, operation)?;

    Ok(VersionedClass { record, version })
}

fn version_param(version: RecordVersion, operation: Operation) -> StoreResult<i64> {
    i64::try_from(version.into_inner())
        .map_err(|_| StoreError::failure(operation, format!("version {version} out of range")))
}

fn version_from_db(
    version: i64,
    class_id: &ClassId,
    operation: Operation,
) -> StoreResult<RecordVersion> {
    u64::try_from(version)
        .map(RecordVersion::new)
        .map_err(|_| {
            warn!(operation = %operation, version = version, "[postgres.decode] negative version");
            StoreError::CorruptRecord {
                class_id: class_id.clone(),
                detail: format!("negative version {version}"),
            }
        })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::failure(operation, error.to_string())
}
