use apbridge::{
    bridge_accounts::BridgeAccountProfile,
    build_app_state,
    config::AppSettings,
    engagement_notifier::EngagementNotifier,
    error::Error,
    external_reply_processor::ExternalReplyProcessor,
    firehose::FirehoseIngester,
    nonce_janitor::NonceJanitor,
    web::build_router,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for in-flight inbox requests to finish once shutdown starts (spec §5: "finish
/// in-flight inbox handlers with a 30 s grace").
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "apbridge=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args().nth(1);
    let settings = AppSettings::load(config_path.as_deref()).map_err(|e| Error::Fatal(e.to_string()))?;
    let port = settings.port;
    let firehose_enabled = settings.firehose.enabled;
    let firehose_cursor = settings.firehose.cursor;
    let bridge_settings = settings.bridge.clone();
    let poll_interval = Duration::from_secs(settings.constellation.poll_interval_secs);

    let config = build_app_state(settings).await?;
    let app_state: apbridge::AppState = (*config).clone();

    tracing::info!("ensuring bridge accounts are ready");
    app_state
        .bridge_mastodon
        .ensure_ready(&BridgeAccountProfile {
            handle: bridge_settings.mastodon.handle,
            display_name: bridge_settings.mastodon.display_name,
            description: bridge_settings.mastodon.description,
            avatar_url: bridge_settings.mastodon.avatar_url,
        })
        .await?;
    app_state
        .bridge_bluesky
        .ensure_ready(&BridgeAccountProfile {
            handle: bridge_settings.bluesky.handle,
            display_name: bridge_settings.bluesky.display_name,
            description: bridge_settings.bluesky.description,
            avatar_url: bridge_settings.bluesky.avatar_url,
        })
        .await?;

    let mut shutdown_handles = Vec::new();

    if firehose_enabled {
        let ingester = FirehoseIngester::new(app_state.clone(), firehose_cursor)?;
        shutdown_handles.push(ingester.shutdown_handle());
        tokio::spawn(ingester.run());
    }

    let engagement_notifier = EngagementNotifier::new(config.clone());
    shutdown_handles.push(engagement_notifier.shutdown_handle());
    tokio::spawn(engagement_notifier.run());

    let external_reply_processor = ExternalReplyProcessor::new(config.clone(), poll_interval);
    shutdown_handles.push(external_reply_processor.shutdown_handle());
    tokio::spawn(external_reply_processor.run());

    let nonce_janitor = NonceJanitor::new(config.clone());
    shutdown_handles.push(nonce_janitor.shutdown_handle());
    tokio::spawn(nonce_janitor.run());

    let app = build_router(config.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::Fatal(e.to_string()))?;
    tracing::info!(port, "listening for HTTP");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_handles))
        .await
        .map_err(|e| Error::Fatal(e.to_string()))?;

    tracing::info!("HTTP server stopped, waiting for in-flight work to settle");
    tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
    // The outbound queue is durable in Postgres (spec §4.4), so any delivery still in flight at
    // this point resumes from the retry table on the next start rather than needing to be drained
    // here.
    app_state.store.close().await;
    Ok(())
}

/// Waits for Ctrl+C, then flips every background task's shutdown handle so they stop scheduling
/// further cycles while the HTTP listener finishes draining (spec §5).
async fn shutdown_signal(handles: Vec<std::sync::Arc<std::sync::atomic::AtomicBool>>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    for handle in handles {
        handle.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}
