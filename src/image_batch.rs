//! Multi-image uploads with per-image state.
//!
//! Each selected file becomes an [`UploadedImage`] with its own preview and
//! analysis task. Responses are matched back to their entry by id, so the
//! order results arrive in never affects which card shows what.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::types::DetectionTotals;
use crate::api::{Detection, DetectionService};
use crate::constants::{PREVIEW_MAX_EDGE, PREVIEW_SCHEME};
use crate::{OurError, OurResult};

/// In-memory JPEG thumbnails addressed by `preview://<uuid>`
#[derive(Clone, Default)]
pub struct PreviewRegistry {
    previews: Arc<RwLock<HashMap<Uuid, Arc<Vec<u8>>>>>,
}

/// Extract the id from a `preview://` URL or a bare uuid
pub fn parse_preview_url(url: &str) -> Option<Uuid> {
    Uuid::parse_str(url.strip_prefix(PREVIEW_SCHEME).unwrap_or(url)).ok()
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, shrink to a thumbnail and register it. Returns the preview URL.
    pub async fn create(&self, bytes: Vec<u8>) -> OurResult<String> {
        let thumbnail = tokio::task::spawn_blocking(move || -> OurResult<Vec<u8>> {
            let image = image::load_from_memory(&bytes)?;
            let thumbnail = image.thumbnail(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE).to_rgb8();
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, 75).encode_image(&thumbnail)?;
            Ok(buf)
        })
        .await
        .map_err(|e| OurError::App(format!("Preview task failed: {e}")))??;

        let id = Uuid::new_v4();
        self.previews.write().await.insert(id, Arc::new(thumbnail));
        Ok(format!("{PREVIEW_SCHEME}{id}"))
    }

    pub async fn get(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        let id = parse_preview_url(url)?;
        self.previews.read().await.get(&id).cloned()
    }

    /// Release a preview. Returns whether it existed.
    pub async fn revoke(&self, url: &str) -> bool {
        match parse_preview_url(url) {
            Some(id) => self.previews.write().await.remove(&id).is_some(),
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.previews.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.previews.read().await.is_empty()
    }
}

/// One selected image and its analysis state
#[derive(Debug, Clone, Serialize)]
pub struct UploadedImage {
    pub id: Uuid,
    pub path: PathBuf,
    pub file_name: String,
    /// `None` when the file could not be decoded for a preview
    pub preview_url: Option<String>,
    pub ingredients: Option<Detection>,
    pub is_analyzing: bool,
    pub error: Option<String>,
}

/// Tasks started by [`ImageBatch::add_files`]
#[derive(Debug, Default)]
pub struct BatchUpload {
    pub ids: Vec<Uuid>,
    tasks: Vec<JoinHandle<()>>,
}

impl BatchUpload {
    /// Wait until every image of this upload has resolved
    pub async fn finish(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Image analysis task failed: {e}");
            }
        }
    }
}

pub struct ImageBatch<S: DetectionService> {
    service: Arc<S>,
    previews: PreviewRegistry,
    images: Arc<RwLock<Vec<UploadedImage>>>,
}

impl<S: DetectionService> Clone for ImageBatch<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            previews: self.previews.clone(),
            images: self.images.clone(),
        }
    }
}

impl<S: DetectionService> ImageBatch<S> {
    pub fn new(service: Arc<S>, previews: PreviewRegistry) -> Self {
        Self {
            service,
            previews,
            images: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    /// Add one entry per path, in order, and start analysing each of them.
    ///
    /// Unreadable files still get an entry, resolved straight away with an error.
    pub async fn add_files(&self, paths: &[PathBuf]) -> BatchUpload {
        let mut upload = BatchUpload::default();
        for path in paths {
            let read = tokio::fs::read(path).await.map_err(OurError::from);
            self.start(path.clone(), read, &mut upload).await;
        }
        info!("Analysing {} images", upload.ids.len());
        upload
    }

    /// Same as [`ImageBatch::add_files`] for files that are already in memory,
    /// such as dashboard uploads. Each entry's path is its file name.
    pub async fn add_uploads(&self, files: Vec<(String, Vec<u8>)>) -> BatchUpload {
        let mut upload = BatchUpload::default();
        for (file_name, bytes) in files {
            self.start(PathBuf::from(file_name), Ok(bytes), &mut upload).await;
        }
        info!("Analysing {} uploaded images", upload.ids.len());
        upload
    }

    async fn start(&self, path: PathBuf, read: OurResult<Vec<u8>>, upload: &mut BatchUpload) {
        let id = Uuid::new_v4();
        let file_name = display_name(&path);

        let preview_url = match &read {
            Ok(bytes) => match self.previews.create(bytes.clone()).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("No preview for {file_name}: {e}");
                    None
                }
            },
            Err(_) => None,
        };

        self.images.write().await.push(UploadedImage {
            id,
            path,
            file_name: file_name.clone(),
            preview_url,
            ingredients: None,
            is_analyzing: true,
            error: None,
        });
        upload.ids.push(id);

        let batch = self.clone();
        upload.tasks.push(tokio::spawn(async move {
            let result = match read {
                Ok(bytes) => batch.service.detect_image(file_name, bytes).await,
                Err(e) => Err(e),
            };
            batch.resolve(id, result).await;
        }));
    }

    /// Record the outcome for image `id`.
    ///
    /// Returns `false` when the image was removed meanwhile or already resolved.
    pub async fn resolve(&self, id: Uuid, result: OurResult<Detection>) -> bool {
        let mut images = self.images.write().await;
        let Some(image) = images.iter_mut().find(|image| image.id == id) else {
            debug!(%id, "Result for a removed image ignored");
            return false;
        };
        if !image.is_analyzing {
            debug!(%id, "Image already resolved");
            return false;
        }

        image.is_analyzing = false;
        match result {
            Ok(detection) => {
                debug!(%id, items = detection.ingredients.len(), "Image analysed");
                image.ingredients = Some(detection);
            }
            Err(e) => {
                warn!("Error analysing {}: {e}", image.file_name);
                image.error = Some("Error analyzing image".to_string());
            }
        }
        true
    }

    /// Remove image `id` and revoke its preview. Other entries are untouched.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut images = self.images.write().await;
            images
                .iter()
                .position(|image| image.id == id)
                .map(|index| images.remove(index))
        };
        match removed {
            Some(image) => {
                if let Some(url) = &image.preview_url {
                    self.previews.revoke(url).await;
                }
                true
            }
            None => false,
        }
    }

    pub async fn images(&self) -> Vec<UploadedImage> {
        self.images.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<UploadedImage> {
        self.images
            .read()
            .await
            .iter()
            .find(|image| image.id == id)
            .cloned()
    }

    /// Every resolved ingredient across the batch, in display order
    pub async fn merged(&self) -> Detection {
        let images = self.images.read().await;
        let mut merged = Detection::default();
        for detection in images.iter().filter_map(|image| image.ingredients.as_ref()) {
            merged.ingredients.extend(detection.ingredients.iter().cloned());
            merged.totals = DetectionTotals {
                items: merged.totals.items + detection.totals.items,
                fresh: merged.totals.fresh + detection.totals.fresh,
                spoiled: merged.totals.spoiled + detection.totals.spoiled,
            };
        }
        merged
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
