//! Contract with the remote restaurant service.

use std::future::Future;

use crate::OurResult;

pub mod client;
pub mod types;

pub use client::ApiClient;
pub use types::Detection;

/// The two detection calls the capture pipeline and image batches depend on.
///
/// [`ApiClient`] is the production implementation; tests substitute their own.
pub trait DetectionService: Send + Sync + 'static {
    /// Submit one captured JPEG frame
    fn detect_frame(&self, jpeg: Vec<u8>) -> impl Future<Output = OurResult<Detection>> + Send;

    /// Submit one user-selected image file
    fn detect_image(
        &self,
        file_name: String,
        bytes: Vec<u8>,
    ) -> impl Future<Output = OurResult<Detection>> + Send;
}
