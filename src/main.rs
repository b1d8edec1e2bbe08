//! PPE Monitor - real-time safety monitoring client
//!
//! Main entry point: wires the components, starts the background loops and
//! serves the view API until interrupted.

use ppe_monitor::{
    ai_client::{AiClient, Detector},
    camera_pipeline::{PipelineContext, PipelineManager},
    camera_registry::CameraRegistry,
    frame_source::HttpSnapshotSource,
    overlay::OverlayRenderer,
    push_channel::{PushChannel, WsConnector},
    state::{AppConfig, AppState},
    store::AggregateStore,
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_RETRY: Duration = Duration::from_secs(5);

fn load_renderer(config: &AppConfig) -> OverlayRenderer {
    let Some(path) = &config.overlay_font else {
        tracing::info!("OVERLAY_FONT not set, labels drawn without text");
        return OverlayRenderer::new();
    };
    match OverlayRenderer::with_font_file(path) {
        Ok(renderer) => {
            tracing::info!(font = %path.display(), "Overlay font loaded");
            renderer
        }
        Err(e) => {
            tracing::warn!(font = %path.display(), error = %e, "Overlay font unusable, labels drawn without text");
            OverlayRenderer::new()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ppe_monitor=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PPE Monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    config.validate()?;
    tracing::info!(
        inference_url = %config.inference_url,
        push_url = %config.push_url,
        discovery_url = %config.discovery_url,
        stream_base_url = %config.stream_base_url,
        snapshot_url_template = ?config.snapshot_url_template,
        infer_interval_ms = config.infer_interval_ms,
        render_fps = config.render_fps,
        working = %format!("{}x{}", config.working_width, config.working_height),
        "Configuration loaded"
    );

    // Initialize components
    let store = Arc::new(AggregateStore::new(
        config.alert_capacity,
        config.confidence_threshold,
    ));

    let ai_client = Arc::new(AiClient::with_timeout(
        config.inference_url.clone(),
        config.inference_timeout(),
    )?);
    let source = Arc::new(
        HttpSnapshotSource::new(
            Some(config.stream_base_url.as_str()),
            config.inference_timeout(),
        )?
        .with_template(config.snapshot_url_template.clone()),
    );

    let pipelines = Arc::new(PipelineManager::new(PipelineContext {
        source,
        detector: ai_client.clone(),
        store: store.clone(),
        renderer: Arc::new(load_renderer(&config)),
        config: config.pipeline_config(),
    }));
    tracing::info!("PipelineManager initialized");

    let push = Arc::new(PushChannel::new(
        config.push_url.clone(),
        config.reconnect_delay(),
        Arc::new(WsConnector),
        store.clone(),
    ));

    let registry = Arc::new(CameraRegistry::new(
        config.discovery_url.clone(),
        store.clone(),
        DISCOVERY_TIMEOUT,
        DISCOVERY_RETRY,
    )?);

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        ai_client: ai_client.clone(),
        pipelines: pipelines.clone(),
        push: push.clone(),
        registry: registry.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Push channel (process-wide singleton)
    push.start();

    // Camera list changes -> pipelines + push subscription
    let mut cameras_rx = registry.subscribe();
    let camera_pipelines = pipelines.clone();
    let camera_push = push.clone();
    tokio::spawn(async move {
        while cameras_rx.changed().await.is_ok() {
            let cameras = cameras_rx.borrow_and_update().clone();
            camera_pipelines.reconcile(&cameras).await;
            camera_push.subscribe(cameras.iter().map(|c| c.id.clone()).collect());
        }
    });

    // Camera discovery
    tokio::spawn(registry.clone().run(shutdown_rx.clone()));
    tracing::info!("CameraRegistry started");

    // Inference health poll
    let health_client = ai_client.clone();
    let health_store = store.clone();
    let health_interval = config.health_poll_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(health_interval);
        loop {
            interval.tick().await;
            let healthy = health_client.health_check().await;
            health_store.set_inference_health(healthy);
        }
    });

    // View API
    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown
    shutdown_tx.send_replace(true);
    push.shutdown().await;
    pipelines.stop_all().await;
    tracing::info!("PPE Monitor stopped");

    Ok(())
}
