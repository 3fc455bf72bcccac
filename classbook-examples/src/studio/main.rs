//! Studio example application
//!
//! Seeds a few classes, lets a crowd of members book the same class at once,
//! cancels a booking to show promotion from the waiting list, then prints a
//! listing page as JSON.
//!
//! Runs against the in-memory store unless `DATABASE_URL` is set, in which
//! case the Postgres store is migrated and used. `CLASSBOOK_ENGINE` may hold
//! an `EngineConfig` as JSON, e.g. `{"max_retries": 5}`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, SubsecRound, Utc};
use classbook::{
    BookingEngine, Capacity, ClassCatalog, ClassId, ClassKind, ClassName, ClassRecord,
    ClassStore, EngineConfig, ListingQuery, PageSize, SortField, Timestamp, UserDirectory, UserId,
};
use classbook_memory::{InMemoryClassStore, InMemoryUserDirectory};
use classbook_postgres::PostgresClassStore;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MEMBERS: u32 = 12;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match std::env::var("CLASSBOOK_ENGINE") {
        Ok(raw) => serde_json::from_str::<EngineConfig>(&raw)
            .context("CLASSBOOK_ENGINE is not a valid engine configuration")?,
        Err(_) => EngineConfig::default(),
    };
    let members = (1..=MEMBERS)
        .map(|n| UserId::try_new(format!("member-{n:02}")))
        .collect::<Result<Vec<_>, _>>()?;

    if let Ok(url) = std::env::var("DATABASE_URL") {
        info!("Using postgres store");
        let store = PostgresClassStore::new(url).await?;
        store.migrate().await?;
        let users = store.users();
        for member in &members {
            if let Err(error) = users.register(member).await {
                warn!(member = %member, error = %error, "Member already registered");
            }
        }
        run(store, users, config, &members).await
    } else {
        info!("Using in-memory store");
        let users = InMemoryUserDirectory::with_users(members.clone());
        run(InMemoryClassStore::new(), users, config, &members).await
    }
}

async fn run<S, U>(store: S, users: U, config: EngineConfig, members: &[UserId]) -> Result<()>
where
    S: ClassStore + ClassCatalog + Clone + Send + Sync + 'static,
    U: UserDirectory + 'static,
{
    let schedule = seed_schedule(&store).await?;
    let popular = &schedule[0];

    let engine = Arc::new(BookingEngine::new(store.clone(), users).with_config(config));

    info!(class_id = %popular, members = members.len(), "Everyone books the same class at once");
    let handles: Vec<_> = members
        .iter()
        .cloned()
        .map(|member| {
            let engine = Arc::clone(&engine);
            let class_id = popular.clone();
            tokio::spawn(async move {
                let outcome = engine.book(&class_id, &member).await;
                (member, outcome)
            })
        })
        .collect();

    for handle in handles {
        let (member, outcome) = handle.await?;
        match outcome {
            Ok(outcome) => info!(member = %member, outcome = ?outcome, "{}", outcome.message()),
            Err(error) => warn!(
                member = %member,
                status = error.status_code(),
                retryable = error.is_retryable(),
                "Booking failed: {error}"
            ),
        }
    }

    let roster = store
        .load(popular)
        .await?
        .context("seeded class disappeared")?
        .record;
    if let Some(first) = roster.slots().first().cloned() {
        let outcome = engine.cancel(popular, &first).await?;
        info!(
            member = %first,
            promoted = ?outcome.promoted(),
            "{}",
            outcome.message()
        );
    }

    let page = store
        .list_classes(
            &ListingQuery::new()
                .starting_from(Timestamp::now())
                .sort_by(SortField::StartTime)
                .page_size(PageSize::try_new(10)?),
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&page)?);

    Ok(())
}

async fn seed_schedule<S: ClassStore>(store: &S) -> Result<Vec<ClassId>> {
    let now = Utc::now().trunc_subsecs(6);
    let plan = [
        ("Sunrise Flow", ClassKind::Yoga, 4, Duration::hours(3)),
        ("Lunch Lift", ClassKind::Gym, 8, Duration::hours(5)),
        ("Salsa Social", ClassKind::Dance, 16, Duration::days(1)),
    ];

    let mut seeded = Vec::with_capacity(plan.len());
    for (name, kind, capacity, offset) in plan {
        let record = ClassRecord::new(
            ClassId::generate(),
            ClassName::try_new(name)?,
            kind,
            Capacity::try_new(capacity)?,
            Timestamp::new(now + offset),
        );
        let id = record.id().clone();
        let _ = store.insert(record).await?;
        info!(class_id = %id, name, kind = %kind, capacity, "Class scheduled");
        seeded.push(id);
    }
    Ok(seeded)
}
