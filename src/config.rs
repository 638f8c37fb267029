//! Configuration management for the kitchen scanner.
//!
//! [`Settings`] holds runtime options with defaults and environment variable
//! overrides (`KITCHEN_SCANNER_*`). [`UserConfig`] holds choices the user made
//! that should survive restarts, such as the selected camera.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};
use url::Url;

use crate::constants::{
    DEFAULT_API_BASE_URL, ENV_PREFIX, FRAME_JPEG_QUALITY, INGREDIENT_STORE_FILE,
    LIVE_CAPTURE_INTERVAL_MS, PREFERRED_CAMERA_HEIGHT, PREFERRED_CAMERA_WIDTH, VIDEO_STEP_SECS,
};
use crate::{OurError, OurResult};

/// Which response the renderer keeps when uploads resolve out of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderPolicy {
    /// Whatever resolved most recently is shown, regardless of capture order
    #[default]
    LastResolvedWins,
    /// Responses older than the one on screen are dropped
    LastSentWins,
}

impl FromStr for RenderPolicy {
    type Err = OurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-resolved-wins" | "resolved" => Ok(Self::LastResolvedWins),
            "last-sent-wins" | "sent" => Ok(Self::LastSentWins),
            other => Err(OurError::Config(format!("Unknown render policy '{other}'"))),
        }
    }
}

/// Requested capture resolution, written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResolution {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureResolution {
    fn default() -> Self {
        Self {
            width: PREFERRED_CAMERA_WIDTH,
            height: PREFERRED_CAMERA_HEIGHT,
        }
    }
}

impl FromStr for CaptureResolution {
    type Err = OurError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| OurError::Config(format!("Resolution '{s}' is not WIDTHxHEIGHT")))?;
        let width = w
            .trim()
            .parse()
            .map_err(|e| OurError::Config(format!("Bad resolution width '{w}': {e}")))?;
        let height = h
            .trim()
            .parse()
            .map_err(|e| OurError::Config(format!("Bad resolution height '{h}': {e}")))?;
        if width == 0 || height == 0 {
            return Err(OurError::Config(format!("Resolution '{s}' has a zero edge")));
        }
        Ok(Self { width, height })
    }
}

impl std::fmt::Display for CaptureResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Configuration settings for the kitchen scanner.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Dashboard host address
    pub host: String,
    /// Dashboard port
    pub port: u16,
    /// Enable debug logging
    pub debug: bool,
    /// Base URL of the restaurant backend
    pub api_base_url: Url,
    /// Per-request timeout against the backend
    pub request_timeout_secs: u64,
    /// Period of the live capture loop
    pub capture_interval_ms: u64,
    /// JPEG quality for captured frames, 1..=100
    pub jpeg_quality: u8,
    /// Preferred camera resolution
    #[serde_as(as = "DisplayFromStr")]
    pub camera_resolution: CaptureResolution,
    /// Upper bound on concurrent frame uploads, unbounded when `None`
    pub max_in_flight: Option<usize>,
    /// How out-of-order detection responses are displayed
    pub render_policy: RenderPolicy,
    /// Seek step of the video walker, in seconds
    pub video_step_secs: f64,
    /// Directory for the ingredient store and saved graphs
    pub data_directory: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            debug: false,
            api_base_url: Url::parse(DEFAULT_API_BASE_URL)
                .unwrap_or_else(|_| unreachable!("default base URL is valid")),
            request_timeout_secs: 30,
            capture_interval_ms: LIVE_CAPTURE_INTERVAL_MS,
            jpeg_quality: FRAME_JPEG_QUALITY,
            camera_resolution: CaptureResolution::default(),
            max_in_flight: None,
            render_policy: RenderPolicy::default(),
            video_step_secs: VIDEO_STEP_SECS,
            data_directory: PathBuf::from("./data"),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}")).ok()
}

impl Settings {
    /// Create settings from defaults plus environment overrides, and make sure
    /// the data directory exists.
    pub fn new() -> OurResult<Self> {
        let settings = Self::from_env()?;
        settings.create_directories()?;
        Ok(settings)
    }

    /// Apply environment overrides on top of the defaults without touching disk.
    pub fn from_env() -> OurResult<Self> {
        let mut settings = Settings::default();

        if let Some(host) = env_var("HOST") {
            settings.host = host;
        }
        if let Some(port) = env_var("PORT") {
            settings.port = parse_setting("PORT", &port)?;
        }
        if let Some(debug) = env_var("DEBUG") {
            settings.debug = parse_setting("DEBUG", &debug)?;
        }
        if let Some(base) = env_var("API_BASE_URL") {
            settings.api_base_url = Url::parse(&base)?;
        }
        if let Some(timeout) = env_var("REQUEST_TIMEOUT_SECS") {
            settings.request_timeout_secs = parse_setting("REQUEST_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(interval) = env_var("CAPTURE_INTERVAL_MS") {
            settings.capture_interval_ms = parse_setting("CAPTURE_INTERVAL_MS", &interval)?;
        }
        if let Some(quality) = env_var("JPEG_QUALITY") {
            settings.jpeg_quality = parse_setting("JPEG_QUALITY", &quality)?;
        }
        if let Some(resolution) = env_var("CAMERA_RESOLUTION") {
            settings.camera_resolution = resolution.parse()?;
        }
        if let Some(max) = env_var("MAX_IN_FLIGHT") {
            let max: usize = parse_setting("MAX_IN_FLIGHT", &max)?;
            settings.max_in_flight = (max > 0).then_some(max);
        }
        if let Some(policy) = env_var("RENDER_POLICY") {
            settings.render_policy = policy.parse()?;
        }
        if let Some(step) = env_var("VIDEO_STEP_SECS") {
            settings.video_step_secs = parse_setting("VIDEO_STEP_SECS", &step)?;
        }
        if let Some(dir) = env_var("DATA_DIRECTORY") {
            settings.data_directory = PathBuf::from(dir);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the capture pipeline cannot work with
    pub fn validate(&self) -> OurResult<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(OurError::Config(format!(
                "JPEG quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.capture_interval_ms == 0 {
            return Err(OurError::Config(
                "Capture interval must be greater than zero".to_string(),
            ));
        }
        if self.video_step_secs.is_nan() || self.video_step_secs <= 0.0 {
            return Err(OurError::Config(format!(
                "Video step must be positive, got {}",
                self.video_step_secs
            )));
        }
        Ok(())
    }

    fn create_directories(&self) -> OurResult<()> {
        if !self.data_directory.exists() {
            fs::create_dir_all(&self.data_directory)?;
        }
        Ok(())
    }

    /// Path of the shared detected-ingredients store
    pub fn ingredient_store_path(&self) -> PathBuf {
        self.data_directory.join(INGREDIENT_STORE_FILE)
    }

    /// Get the path to the user config file
    pub fn get_config_path() -> PathBuf {
        if let Some(config_path_override) = env_var("CONFIG_PATH") {
            let config_path = PathBuf::from(config_path_override);
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent).ok();
            }
            return config_path;
        }

        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&config_dir).ok();
        config_dir.join("kitchen-scanner.json")
    }

    /// Load user configuration, falling back to defaults when missing or unreadable
    pub fn load_user_config() -> UserConfig {
        let config_path = Self::get_config_path();
        if !config_path.exists() {
            return UserConfig::default();
        }

        match fs::read_to_string(&config_path) {
            Ok(contents) => match serde_json::from_str::<UserConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse user config from {config_path:?}: {e}");
                    UserConfig::default()
                }
            },
            Err(e) => {
                warn!("Failed to read user config from {config_path:?}: {e}");
                UserConfig::default()
            }
        }
    }

    /// Save user configuration
    pub fn save_user_config(config: &UserConfig) -> OurResult<()> {
        let config_path = Self::get_config_path();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(config)?;
        fs::write(&config_path, contents)?;

        debug!("Saved user config to {config_path:?}");
        Ok(())
    }
}

fn parse_setting<T>(key: &str, value: &str) -> OurResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| OurError::Config(format!("{ENV_PREFIX}{key}='{value}': {e}")))
}

/// User configuration that persists across application restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Camera picked in a previous session
    #[serde(default)]
    pub selected_camera: Option<String>,
    /// Season last used for a consumption CSV upload
    #[serde(default)]
    pub last_season: Option<String>,
}
