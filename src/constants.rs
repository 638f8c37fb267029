//! Fixed values shared by the capture pipeline and the API client.

/// Default location of the restaurant backend
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

/// JPEG quality used for every captured frame (0.8 on a 0..1 scale)
pub const FRAME_JPEG_QUALITY: u8 = 80;

/// Wall-clock period between live captures
pub const LIVE_CAPTURE_INTERVAL_MS: u64 = 1000;

/// How far the video walker seeks on each step
pub const VIDEO_STEP_SECS: f64 = 1.0;

pub const PREFERRED_CAMERA_WIDTH: u32 = 1280;
pub const PREFERRED_CAMERA_HEIGHT: u32 = 720;

/// Multipart field names the backend expects
pub const FIELD_FRAME: &str = "frame";
pub const FIELD_IMAGE: &str = "image";
pub const FIELD_VIDEO: &str = "video";
pub const FIELD_FILE: &str = "file";

pub const FRAME_FILENAME: &str = "frame.jpg";
pub const DISH_PHOTO_FILENAME: &str = "dish_photo.jpg";

/// Scheme used for in-memory preview handles
pub const PREVIEW_SCHEME: &str = "preview://";

/// Longest edge of generated preview thumbnails
pub const PREVIEW_MAX_EDGE: u32 = 320;

/// Environment variable prefix for settings overrides
pub const ENV_PREFIX: &str = "KITCHEN_SCANNER_";

/// File name of the shared detected-ingredients store inside the data directory
pub const INGREDIENT_STORE_FILE: &str = "detected_ingredients.json";
