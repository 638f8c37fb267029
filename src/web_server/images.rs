//! Image batches uploaded through the dashboard.

use axum::extract::Multipart;
use uuid::Uuid;

use super::prelude::*;
use crate::image_batch::UploadedImage;

/// `POST /api/images`: every file field becomes one batch entry.
///
/// Answers as soon as the entries exist; analysis carries on in the
/// background and shows up in `GET /api/images`.
pub(crate) async fn upload_images(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<Vec<Uuid>>>, StatusCode> {
    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Bad multipart upload: {e}");
                return Err(StatusCode::BAD_REQUEST);
            }
        };
        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!("Skipping non-file field {:?}", field.name());
            continue;
        };
        match field.bytes().await {
            Ok(bytes) => files.push((file_name, bytes.to_vec())),
            Err(e) => {
                warn!("Failed to read {file_name}: {e}");
                return Err(StatusCode::BAD_REQUEST);
            }
        }
    }

    if files.is_empty() {
        return Ok(Json(ApiResponse::error("No image files in upload")));
    }
    let upload = state.images.add_uploads(files).await;
    Ok(Json(ApiResponse::success(upload.ids.clone())))
}

pub(crate) async fn list_images(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<UploadedImage>>> {
    Json(ApiResponse::success(state.images.images().await))
}

pub(crate) async fn get_image(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<UploadedImage>>, StatusCode> {
    let image = state.images.get(id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ApiResponse::success(image)))
}

/// `DELETE /api/images/{id}`: drops the entry and revokes its preview
pub(crate) async fn remove_image(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    if state.images.remove(id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
