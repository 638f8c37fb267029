//! Shared store of the most recently detected ingredients.
//!
//! Scanners write here; daily specials read from here. The store is a single
//! JSON file in the data directory so that separate CLI runs can share it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::OurResult;
use crate::api::Detection;

/// What is persisted on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIngredients {
    pub updated_at: DateTime<Utc>,
    pub detection: Detection,
}

#[derive(Clone, Debug)]
pub struct IngredientStore {
    path: PathBuf,
    // Serialises writers within this process
    lock: Arc<RwLock<()>>,
}

impl IngredientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored ingredients, or `None` when nothing has been stored yet
    pub async fn get(&self) -> OurResult<Option<StoredIngredients>> {
        let _guard = self.lock.read().await;
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let contents = tokio::fs::read(&self.path).await?;
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    /// Replace the stored ingredients
    pub async fn put(&self, detection: &Detection) -> OurResult<()> {
        let _guard = self.lock.write().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let stored = StoredIngredients {
            updated_at: Utc::now(),
            detection: detection.clone(),
        };
        let contents = serde_json::to_vec_pretty(&stored)?;
        tokio::fs::write(&self.path, contents).await?;
        debug!(
            items = detection.ingredients.len(),
            "Stored detected ingredients at {}",
            self.path.display()
        );
        Ok(())
    }

    pub async fn clear(&self) -> OurResult<()> {
        let _guard = self.lock.write().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Cleared detected ingredients");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored detection if it holds at least one ingredient
    pub async fn non_empty(&self) -> OurResult<Option<Detection>> {
        Ok(self
            .get()
            .await?
            .map(|stored| stored.detection)
            .filter(|detection| !detection.is_empty()))
    }
}
