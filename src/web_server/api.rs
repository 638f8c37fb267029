//! JSON and streaming endpoints behind the dashboard.

use std::convert::Infallible;

use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;

use super::prelude::*;
use crate::ingredient_store::StoredIngredients;
use crate::renderer::RenderSnapshot;

pub(crate) async fn detections(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<RenderSnapshot>> {
    Json(ApiResponse::success(state.renderer.snapshot().await))
}

/// Every [`crate::protocol::ScanEvent`] as a server-sent event named after its kind
pub(crate) async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.renderer.subscribe();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => warn!("Failed to encode scan event: {e}"),
                },
                Err(RecvError::Lagged(missed)) => debug!("Event stream lagged by {missed} events"),
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub(crate) async fn ingredients(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Option<StoredIngredients>>> {
    match state.store.get().await {
        Ok(stored) => Json(ApiResponse::success(stored)),
        Err(e) => {
            error!("Failed to read ingredient store: {e}");
            Json(ApiResponse::error(format!(
                "Failed to read detected ingredients: {e}"
            )))
        }
    }
}

pub(crate) async fn preview(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, StatusCode> {
    let bytes = state.previews.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes.as_ref().clone()))
}

/// Summary the dashboard uses for its status badge
#[derive(Serialize)]
pub(crate) struct StatusData {
    backend_online: bool,
    previews: usize,
}

pub(crate) async fn status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusData>> {
    let backend_online = state.api.health().await.unwrap_or_else(|e| {
        debug!("Backend health check failed: {e}");
        false
    });
    Json(ApiResponse::success(StatusData {
        backend_online,
        previews: state.previews.len().await,
    }))
}
