//! Local dashboard built on Axum.

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware, routing::get};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::ApiClient;
use crate::camera_manager::open_camera;
use crate::config::Settings;
use crate::dispatcher::UploadDispatcher;
use crate::frame_sampler::FrameSampler;
use crate::image_batch::{ImageBatch, PreviewRegistry};
use crate::ingredient_store::IngredientStore;
use crate::live_scan::{flush_updates, persist_updates, run_live_scan};
use crate::renderer::ResultRenderer;
use crate::web_server::{api, dashboard, dishes, images, middleware::no_cache_middleware};
use crate::{OurError, OurResult};

/// Application state shared across handlers
pub struct AppState {
    pub settings: Settings,
    pub api: ApiClient,
    pub renderer: ResultRenderer,
    pub store: IngredientStore,
    pub previews: PreviewRegistry,
    /// Images uploaded through the dashboard; registers into `previews`
    pub images: ImageBatch<ApiClient>,
}

impl AppState {
    pub fn new(settings: Settings) -> OurResult<Self> {
        let api = ApiClient::from_settings(&settings)?;
        let previews = PreviewRegistry::new();
        Ok(Self {
            images: ImageBatch::new(Arc::new(api.clone()), previews.clone()),
            api,
            renderer: ResultRenderer::new(settings.render_policy),
            store: IngredientStore::new(settings.ingredient_store_path()),
            previews,
            settings,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(dashboard::dashboard))
        .route("/scan", get(dashboard::scan_page))
        .route("/dishes", get(dishes::dishes_page))
        .route("/api/status", get(api::status))
        .route("/api/detections", get(api::detections))
        .route("/api/events", get(api::events))
        .route("/api/ingredients", get(api::ingredients))
        .route(
            "/api/images",
            get(images::list_images).post(images::upload_images),
        )
        .route(
            "/api/images/{id}",
            get(images::get_image).delete(images::remove_image),
        )
        .route("/previews/{id}", get(api::preview))
        .layer(middleware::from_fn(no_cache_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the dashboard until `shutdown` flips to `true`
pub async fn start_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> OurResult<()> {
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OurError::App(format!("Failed to bind to {addr}: {e}")))?;

    info!("Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| OurError::App(format!("Server error: {e}")))?;

    Ok(())
}

/// Run the dashboard, plus a live scan when a camera is given.
///
/// Ctrl-C stops the capture loop and the server. Uploads already sent get up
/// to the request timeout to finish so their results still reach the store.
pub async fn serve(
    settings: Settings,
    host: String,
    port: u16,
    device_id: Option<String>,
) -> OurResult<()> {
    let state = Arc::new(AppState::new(settings)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let writer = persist_updates(state.renderer.subscribe(), state.store.clone());

    let dispatcher = UploadDispatcher::new(
        Arc::new(state.api.clone()),
        state.renderer.clone(),
        state.settings.max_in_flight,
    );

    let scanner = device_id.map(|device_id| {
        let state = state.clone();
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let settings = &state.settings;
            let acquirer = match open_camera(device_id, settings.camera_resolution).await {
                Ok(acquirer) => acquirer,
                Err(e) => {
                    warn!("Live scan unavailable: {e}");
                    return;
                }
            };
            let Some(stream) = acquirer.stream() else {
                return;
            };

            let sampler = FrameSampler::new(settings.jpeg_quality);
            run_live_scan(
                stream,
                &sampler,
                &dispatcher,
                Duration::from_millis(settings.capture_interval_ms),
                shutdown,
            )
            .await;
        })
    });

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("Shutting down");
        let _ = signal_tx.send(true);
    });

    let result = start_server(&host, port, state.clone(), shutdown_rx).await;
    let _ = shutdown_tx.send(true);

    if let Some(scanner) = scanner {
        if let Err(e) = scanner.await {
            error!("Live scan task failed: {e}");
        }
    }
    // Let uploads sent before shutdown land in the store
    let drain_limit = Duration::from_secs(state.settings.request_timeout_secs + 1);
    drop(state);
    flush_updates(dispatcher, writer, drain_limit).await;
    result
}
