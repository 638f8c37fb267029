#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

pub mod api;
pub mod camera_manager;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod frame_sampler;
pub mod image_batch;
pub mod ingredient_store;
pub mod live_scan;
pub mod protocol;
pub mod renderer;
pub mod server;
pub mod video_walker;
pub(crate) mod web_server;

pub use error::{OurError, OurResult};
