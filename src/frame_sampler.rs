//! Frame capture and JPEG serialisation.

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::{debug, instrument};

use crate::camera_manager::FrameSource;
use crate::{OurError, OurResult};

/// Draws the current frame of a source at its native size and encodes it.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    quality: u8,
}

impl FrameSampler {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Capture one frame as JPEG.
    ///
    /// Returns `Ok(None)` while the source has no decodable frame yet (natural
    /// width of zero). Encoding runs on the blocking pool.
    #[instrument(skip_all, level = "debug")]
    pub async fn capture<S>(&self, source: &S) -> OurResult<Option<Vec<u8>>>
    where
        S: FrameSource + Sync + ?Sized,
    {
        let (width, height) = source.natural_size();
        if width == 0 || height == 0 {
            debug!("Source not ready, skipping capture");
            return Ok(None);
        }
        let Some(frame) = source.current_frame() else {
            debug!("Source reported a size but no frame");
            return Ok(None);
        };

        let quality = self.quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(frame, width, height, quality))
            .await
            .map_err(|e| OurError::App(format!("JPEG encoder task failed: {e}")))??;

        debug!(bytes = jpeg.len(), width, height, "Captured frame");
        Ok(Some(jpeg))
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(crate::constants::FRAME_JPEG_QUALITY)
    }
}

/// Draw `frame` onto a `width`x`height` canvas and encode it as JPEG.
pub fn encode_jpeg(frame: RgbImage, width: u32, height: u32, quality: u8) -> OurResult<Vec<u8>> {
    let canvas = if frame.dimensions() == (width, height) {
        frame
    } else {
        image::imageops::resize(&frame, width, height, FilterType::Triangle)
    };

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&canvas)?;
    Ok(buf)
}
