mod config;
mod wiring;

use anyhow::Result;
use config::WorkerConfig;
use relay_domain::outbox::WorkerId;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wiring::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_domain=debug,relay_application=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = WorkerConfig::from_env()?;
    let worker = match &config.worker_id {
        Some(id) => WorkerId::new(id.clone())?,
        None => WorkerId::generate(),
    };
    tracing::info!(worker = %worker, env = %config.environment, "starting outbox relay worker");

    let relay = build(&config, worker).await?;
    run(relay).await
}

#[cfg(not(feature = "postgres"))]
async fn build(config: &WorkerConfig, worker: WorkerId) -> Result<Relay> {
    use relay_application::command_bus::CommandBus;
    use relay_application::context::AppContext;
    use relay_application::users::{CreateUser, InMemoryUserRepository};
    use relay_domain::persist::{InMemoryDatabase, InMemoryOutboxRepository};

    let db = InMemoryDatabase::new();
    let relay = wiring::assemble(
        config,
        worker,
        Arc::new(InMemoryOutboxRepository::new(db.clone())),
        Arc::new(InMemoryUserRepository::new(db)),
    )?;

    for n in 1..=config.seed_users {
        let created = relay
            .commands
            .dispatch(
                &AppContext::new(),
                CreateUser {
                    first_name: "Demo".into(),
                    last_name: format!("User {n}"),
                    email: format!("demo{n}@example.com"),
                },
            )
            .await?;
        tracing::info!(user_id = %created.identifier, "seeded user");
    }
    Ok(relay)
}

#[cfg(feature = "postgres")]
async fn build(config: &WorkerConfig, worker: WorkerId) -> Result<Relay> {
    use anyhow::Context;
    use relay_application::users::PgUserRepository;
    use relay_domain::persist::PgOutboxRepository;

    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    let pool = sqlx::PgPool::connect(url)
        .await
        .context("failed to connect to postgres")?;

    // 表结构由 migrations/ 下的脚本预先创建
    wiring::assemble(
        config,
        worker,
        Arc::new(PgOutboxRepository::new(pool.clone())),
        Arc::new(PgUserRepository::new(pool)),
    )
}

async fn run(relay: Relay) -> Result<()> {
    let Relay {
        engine,
        commands: _,
        mut invalidation_failures,
    } = relay;

    let handle = engine.start();

    let failures = tokio::spawn(async move {
        while let Some(failure) = invalidation_failures.recv().await {
            tracing::error!(
                user_id = %failure.notice.aggregate_id,
                trace_id = %failure.notice.trace_id,
                error = %failure.error,
                "shared cache invalidation lost"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    handle.shutdown();
    handle.join().await;
    failures.abort();

    tracing::info!("outbox relay worker stopped");
    Ok(())
}
