//! Error handling for the kitchen scanner.

use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum OurError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Image decode/encode errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Camera and media stream errors
    #[error("Camera error: {0}")]
    Camera(String),

    /// The remote service answered, but not with what we asked for
    #[error("API error: {0}")]
    Api(String),

    /// Video source errors
    #[error("Video error: {0}")]
    Video(String),

    /// Generic application errors
    #[error("Application error: {0}")]
    App(String),
}

/// Application result type
pub type OurResult<T> = std::result::Result<T, OurError>;
