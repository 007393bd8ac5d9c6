//! Campus Gate - Main Entry Point

use campus_common::{Clock, SystemClock};
use campus_gate::{Environment, GatekeeperConfig};
use campus_ratelimit::{spawn_sweeper, FailoverStore, MemoryWindowStore, RedisWindowStore, WindowStore};
use campusgate_api::seed::seed_demo;
use campusgate_api::{build_router, ApiState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Campus Gate v{}", env!("CARGO_PKG_VERSION"));

    let config = GatekeeperConfig::load()?;
    tracing::info!(environment = ?config.environment, bind = %config.bind, "configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let local: Arc<dyn WindowStore> = Arc::new(MemoryWindowStore::new());
    let (store, failover) = rate_limit_store(&config, local.clone()).await;
    spawn_sweeper(local, clock.clone(), config.sweep_interval());

    let state = ApiState::new(&config, store, failover, clock.clone());

    if config.environment == Environment::Development {
        let seed = seed_demo(&state, clock.as_ref())?;
        for login in [&seed.teacher, &seed.admin, &seed.operator] {
            tracing::info!(login = login.label, token = %login.token, "demo session");
        }
    }

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Distributed store behind failover when configured, local store otherwise
async fn rate_limit_store(
    config: &GatekeeperConfig,
    local: Arc<dyn WindowStore>,
) -> (Arc<dyn WindowStore>, Option<Arc<FailoverStore>>) {
    let Some(url) = config.rate_limit.redis_url.as_deref() else {
        tracing::warn!("no redis_url configured, rate limits are per instance");
        return (local, None);
    };

    let connect = RedisWindowStore::connect(url, config.rate_limit.key_prefix.clone());
    match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, connect).await {
        Ok(Ok(redis)) => {
            tracing::info!("rate limits shared through redis");
            let failover = Arc::new(FailoverStore::new(
                Arc::new(redis),
                local,
                config.failover_config(),
            ));
            (failover.clone(), Some(failover))
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "redis unavailable, running with local rate limits");
            (local, None)
        }
        Err(_) => {
            tracing::warn!("redis connect timed out, running with local rate limits");
            (local, None)
        }
    }
}
