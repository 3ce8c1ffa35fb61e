use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::limiters::FixedWindowLimiter;
use crate::prometheus::setup_metrics_recorder;
use crate::router;
use crate::stores::memory::MemoryStore;
use crate::stores::postgres::PgStore;
use crate::time::SystemTime;

fn spawn_limiter_tasks(limiter: &FixedWindowLimiter, export_prometheus: bool) {
    if export_prometheus {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            limiter.report_metrics().await;
        });
    }

    {
        // Ensure that the rate limiter state does not grow unbounded
        let limiter = limiter.clone();
        tokio::spawn(async move {
            limiter.clean_state().await;
        });
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let limiter = FixedWindowLimiter::new(
        config.rate_limit_max_requests,
        Duration::from_secs(config.rate_limit_window_secs.get()),
    );
    spawn_limiter_tasks(&limiter, config.export_prometheus);

    let metrics = if config.export_prometheus {
        Some(setup_metrics_recorder().context("failed to install prometheus recorder")?)
    } else {
        None
    };

    let request_timeout = Duration::from_secs(config.request_timeout_seconds);

    let app = if config.memory_store {
        tracing::warn!("using the in-memory store, data will not survive a restart");
        router::router(
            SystemTime {},
            MemoryStore::new(),
            limiter,
            config.campaign_id_policy,
            request_timeout,
            config.max_body_bytes,
            metrics,
        )
    } else {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required unless MEMORY_STORE is set")?;
        let store = PgStore::new(
            database_url,
            config.max_pg_connections,
            Duration::from_secs(config.pg_acquire_timeout_secs),
        )
        .await
        .context("failed to connect to postgres")?;

        if config.run_migrations {
            store
                .run_migrations()
                .await
                .context("failed to run migrations")?;
        }

        router::router(
            SystemTime {},
            store,
            limiter,
            config.campaign_id_policy,
            request_timeout,
            config.max_body_bytes,
            metrics,
        )
    };

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
