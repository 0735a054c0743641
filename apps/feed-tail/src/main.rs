use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use feed_bus::{Bus, LocalBus};
use feed_engine::{FeedChange, FeedSession, SseTransport};
use feed_sdk::FeedClient;
use feed_tail::config::{AppConfig, Cli};
use feed_tail::metrics;
use feed_tail::observer::spawn_observer;
use feed_tail::routes;
use feed_tail::state::AppState;
use feed_tail::telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::try_from(Cli::parse()).context("invalid configuration")?;
    init_tracing(&cfg.log_filter);

    let transport = SseTransport::new(cfg.stream_url.as_str(), cfg.token.clone())
        .context("building stream transport")?
        .with_view(cfg.feed.sort, cfg.feed.page_size);
    let api = FeedClient::new(cfg.api_base.as_str(), cfg.token.clone());
    let bus: Arc<LocalBus<FeedChange>> = Arc::new(LocalBus::new());
    let observer = spawn_observer(bus.subscribe(&cfg.feed.topic));

    let session = Arc::new(FeedSession::open(
        cfg.feed.clone(),
        Arc::new(transport),
        Arc::new(api),
        bus,
    ));
    let app: Router = routes::router(AppState::new(Arc::clone(&session)));

    info!(
        addr = %cfg.bind_addr,
        stream = %cfg.stream_url,
        api = %cfg.api_base,
        topic = %cfg.feed.topic,
        viewer = %cfg.feed.viewer,
        sort = %cfg.feed.sort,
        page_size = cfg.feed.page_size,
        heartbeat_secs = cfg.feed.heartbeat_timeout.as_secs(),
        authenticated = cfg.token.is_some(),
        "starting feed-tail"
    );
    metrics::BOOT_COUNTER.inc();
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server")?;

    session.close();
    observer.abort();
    Ok(())
}
