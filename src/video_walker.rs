//! Walk a local video one step at a time, submitting a frame at each position.
//!
//! The walker reuses the live pipeline: [`FrameSampler`] for capture and
//! [`UploadDispatcher`] for upload. It is driven by seek completion rather than
//! a timer, so each step captures exactly one frame.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, RgbImage};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api::DetectionService;
use crate::camera_manager::FrameSource;
use crate::dispatcher::UploadDispatcher;
use crate::frame_sampler::FrameSampler;
use crate::protocol::ScanEvent;
use crate::{OurError, OurResult};

/// Browsers show zero-delay GIF frames for 100ms
const ZERO_DELAY_FALLBACK: Duration = Duration::from_millis(100);

const STILL_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "webp", "gif"];

/// A video that can report its length and seek to a time
pub trait SeekableVideo: FrameSource + Send + Sync {
    /// Length in seconds
    fn duration(&self) -> f64;

    /// Playback position in seconds
    fn current_time(&self) -> f64;

    /// Move to `seconds`. The frame at the new position is available once this returns.
    fn seek(&mut self, seconds: f64) -> OurResult<()>;
}

/// Decoded frames with their start times
pub struct FrameSequence {
    starts: Vec<f64>,
    frames: Vec<RgbImage>,
    duration: f64,
    position: f64,
}

impl FrameSequence {
    /// Build from frames and how long each one is shown
    pub fn from_frames(frames: Vec<(RgbImage, Duration)>) -> Self {
        let mut starts = Vec::with_capacity(frames.len());
        let mut images = Vec::with_capacity(frames.len());
        let mut elapsed = 0.0;
        for (image, shown_for) in frames {
            starts.push(elapsed);
            images.push(image);
            elapsed += shown_for.as_secs_f64();
        }
        Self {
            starts,
            frames: images,
            duration: elapsed,
            position: 0.0,
        }
    }

    /// Open an animated GIF, or a directory of stills played at `fps`
    pub fn open(path: &Path, fps: f64) -> OurResult<Self> {
        if path.is_dir() {
            Self::open_dir(path, fps)
        } else {
            Self::open_gif(path)
        }
    }

    pub fn open_gif(path: &Path) -> OurResult<Self> {
        let decoder = GifDecoder::new(BufReader::new(File::open(path)?))?;
        let frames = decoder
            .into_frames()
            .collect_frames()?
            .into_iter()
            .map(|frame| {
                let (numer, denom) = frame.delay().numer_denom_ms();
                let millis = if denom == 0 { 0 } else { numer / denom };
                let shown_for = match millis {
                    0 => ZERO_DELAY_FALLBACK,
                    ms => Duration::from_millis(u64::from(ms)),
                };
                (DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8(), shown_for)
            })
            .collect::<Vec<_>>();

        if frames.is_empty() {
            return Err(OurError::Video(format!("{} has no frames", path.display())));
        }
        info!("Loaded {} GIF frames from {}", frames.len(), path.display());
        Ok(Self::from_frames(frames))
    }

    /// Stills sorted by file name, each shown for `1 / fps` seconds
    pub fn open_dir(dir: &Path, fps: f64) -> OurResult<Self> {
        if fps.is_nan() || fps <= 0.0 {
            return Err(OurError::Video(format!("Frame rate must be positive, got {fps}")));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_ascii_lowercase)
                    .is_some_and(|ext| STILL_EXTENSIONS.contains(&ext.as_str()))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(OurError::Video(format!(
                "{} contains no image frames",
                dir.display()
            )));
        }

        let shown_for = Duration::from_secs_f64(1.0 / fps);
        let frames = paths
            .iter()
            .map(|path| Ok((image::open(path)?.to_rgb8(), shown_for)))
            .collect::<OurResult<Vec<_>>>()?;
        info!("Loaded {} frames from {}", frames.len(), dir.display());
        Ok(Self::from_frames(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn frame_index_at(&self, seconds: f64) -> Option<usize> {
        if self.frames.is_empty() {
            return None;
        }
        let after = self.starts.partition_point(|start| *start <= seconds);
        Some(after.saturating_sub(1))
    }
}

impl FrameSource for FrameSequence {
    fn natural_size(&self) -> (u32, u32) {
        self.frames.first().map_or((0, 0), |f| f.dimensions())
    }

    fn current_frame(&self) -> Option<RgbImage> {
        self.frame_index_at(self.position)
            .and_then(|i| self.frames.get(i))
            .cloned()
    }
}

impl SeekableVideo for FrameSequence {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn current_time(&self) -> f64 {
        self.position
    }

    fn seek(&mut self, seconds: f64) -> OurResult<()> {
        if seconds.is_nan() {
            return Err(OurError::Video("Cannot seek to NaN".to_string()));
        }
        self.position = seconds.clamp(0.0, self.duration);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkerState {
    Idle,
    Capturing,
    Done,
}

pub struct VideoWalker<V: SeekableVideo> {
    video: V,
    step: f64,
    state: WalkerState,
    progress: watch::Sender<f64>,
}

impl<V: SeekableVideo> VideoWalker<V> {
    pub fn new(video: V, step_secs: f64) -> Self {
        let (progress, _) = watch::channel(0.0);
        Self {
            video,
            step: step_secs,
            state: WalkerState::Idle,
            progress,
        }
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    /// Progress in percent; never decreases and ends at exactly 100
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    pub fn video(&self) -> &V {
        &self.video
    }

    fn publish_progress(&self, percent: f64) {
        self.progress.send_if_modified(|current| {
            if percent > *current {
                *current = percent;
                true
            } else {
                false
            }
        });
    }

    /// Run one step of the walk and return the state after it.
    ///
    /// At or past the end this transitions to `Done` with progress 100.
    /// Otherwise the frame at the current position is captured and submitted,
    /// progress is published, and the video seeks forward by one step.
    #[instrument(skip_all, level = "debug")]
    pub async fn step<S: DetectionService>(
        &mut self,
        sampler: &FrameSampler,
        dispatcher: &UploadDispatcher<S>,
    ) -> OurResult<WalkerState> {
        if self.state == WalkerState::Done {
            return Ok(WalkerState::Done);
        }
        self.state = WalkerState::Capturing;

        let current = self.video.current_time();
        let duration = self.video.duration();
        if current >= duration {
            self.state = WalkerState::Done;
            self.progress.send_replace(100.0);
            dispatcher.renderer().publish(ScanEvent::Progress { percent: 100.0 });
            dispatcher.renderer().publish(ScanEvent::WalkerDone);
            info!("Video walk finished at {current:.1}s");
            return Ok(WalkerState::Done);
        }

        match sampler.capture(&self.video).await {
            Ok(Some(jpeg)) => {
                if let Some(in_flight) = dispatcher.submit_frame(jpeg) {
                    debug!(seq = in_flight.seq, "Submitted video frame at {current:.1}s");
                }
            }
            Ok(None) => debug!("No frame at {current:.1}s"),
            Err(e) => warn!("Error capturing video frame at {current:.1}s: {e}"),
        }

        let percent = (current / duration * 100.0).min(100.0);
        self.publish_progress(percent);
        dispatcher.renderer().publish(ScanEvent::Progress { percent });

        self.video.seek((current + self.step).min(duration))?;
        Ok(WalkerState::Capturing)
    }

    /// Step until the walk is done or `shutdown` fires
    pub async fn run<S: DetectionService>(
        &mut self,
        sampler: &FrameSampler,
        dispatcher: &UploadDispatcher<S>,
        mut shutdown: watch::Receiver<bool>,
    ) -> OurResult<WalkerState> {
        info!(
            "Walking {:.1}s of video in {:.1}s steps",
            self.video.duration(),
            self.step
        );
        loop {
            if *shutdown.borrow_and_update() {
                info!("Video walk stopped early");
                return Ok(self.state);
            }
            if self.step(sampler, dispatcher).await? == WalkerState::Done {
                return Ok(WalkerState::Done);
            }
        }
    }
}
