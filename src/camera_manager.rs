//! Camera acquisition.
//!
//! [`CameraAcquirer`] owns at most one [`MediaStream`] at a time. Starting a
//! new stream stops the old one first, stopping is idempotent, and dropping the
//! acquirer releases the stream. Permission and device errors are logged and
//! never returned to the caller; the feature simply stays unavailable.
//!
//! The production backend uses `nokhwa`. Its `Camera` is `!Send`, so each open
//! stream lives on a dedicated capture thread that keeps the most recent
//! decoded frame available for the sampler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use image::RgbImage;
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CaptureResolution;
use crate::{OurError, OurResult};

/// A video input device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Identifier passed back to [`CameraAcquirer::start`]
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Anything the frame sampler can draw from: a live stream or a video file.
pub trait FrameSource {
    /// Native frame size; `(0, 0)` until the first frame is decodable
    fn natural_size(&self) -> (u32, u32);

    /// The frame currently on display, if any
    fn current_frame(&self) -> Option<RgbImage>;
}

/// An open camera stream with its tracks
pub trait MediaStream: FrameSource + Send + Sync {
    /// Number of tracks still producing frames
    fn active_tracks(&self) -> usize;

    /// Stop every track. Calling it again is a no-op.
    fn stop(&mut self);
}

/// Device enumeration and stream opening
pub trait CameraBackend: Send + Sync {
    type Stream: MediaStream;

    fn devices(&self) -> OurResult<Vec<CameraDevice>>;

    fn open(&self, device_id: &str, resolution: CaptureResolution) -> OurResult<Self::Stream>;
}

/// Owns the single current stream of one scanner
pub struct CameraAcquirer<B: CameraBackend> {
    backend: B,
    resolution: CaptureResolution,
    current: Option<B::Stream>,
    device_id: Option<String>,
}

impl<B: CameraBackend> CameraAcquirer<B> {
    pub fn new(backend: B, resolution: CaptureResolution) -> Self {
        Self {
            backend,
            resolution,
            current: None,
            device_id: None,
        }
    }

    /// Enumerate video inputs. Failures are logged and yield an empty list.
    pub fn list_cameras(&self) -> Vec<CameraDevice> {
        match self.backend.devices() {
            Ok(devices) => {
                debug!("Found {} video input devices", devices.len());
                devices
            }
            Err(e) => {
                warn!("Error getting camera devices: {e}");
                Vec::new()
            }
        }
    }

    /// Stop any current stream, then open `device_id` at the preferred
    /// resolution. Returns whether a stream is now running; errors are logged.
    pub fn start(&mut self, device_id: &str) -> bool {
        self.stop();

        match self.backend.open(device_id, self.resolution) {
            Ok(stream) => {
                info!(
                    "Camera {device_id} streaming at requested {}",
                    self.resolution
                );
                self.current = Some(stream);
                self.device_id = Some(device_id.to_string());
                true
            }
            Err(e) => {
                error!("Error accessing camera {device_id}: {e}");
                false
            }
        }
    }

    /// Stop every track of the current stream and forget it
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.current.take() {
            stream.stop();
            if let Some(device_id) = self.device_id.take() {
                info!("Camera {device_id} stopped");
            }
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.current.is_some()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn stream(&self) -> Option<&B::Stream> {
        self.current.as_ref()
    }

    /// Tracks still running on the current stream
    pub fn active_tracks(&self) -> usize {
        self.current.as_ref().map_or(0, |s| s.active_tracks())
    }
}

impl<B: CameraBackend> Drop for CameraAcquirer<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `nokhwa`-backed camera access
#[derive(Debug, Clone, Copy, Default)]
pub struct NokhwaBackend;

/// Open `device_id` on the blocking pool and hand back the running acquirer
pub async fn open_camera(
    device_id: String,
    resolution: CaptureResolution,
) -> OurResult<CameraAcquirer<NokhwaBackend>> {
    tokio::task::spawn_blocking(move || {
        let mut acquirer = CameraAcquirer::new(NokhwaBackend, resolution);
        if acquirer.start(&device_id) {
            Ok(acquirer)
        } else {
            Err(OurError::Camera(format!("Camera {device_id} is unavailable")))
        }
    })
    .await
    .map_err(|e| OurError::Camera(format!("Camera open task failed: {e}")))?
}

impl CameraBackend for NokhwaBackend {
    type Stream = NokhwaStream;

    fn devices(&self) -> OurResult<Vec<CameraDevice>> {
        let backend = nokhwa::native_api_backend()
            .ok_or_else(|| OurError::Camera("No camera backend available".to_string()))?;
        let cameras = nokhwa::query(backend)
            .map_err(|e| OurError::Camera(format!("Failed to query cameras: {e}")))?;

        Ok(cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.clone(),
                };
                CameraDevice {
                    id,
                    name: info.human_name(),
                    description: info.description().to_string(),
                }
            })
            .collect())
    }

    fn open(&self, device_id: &str, resolution: CaptureResolution) -> OurResult<NokhwaStream> {
        NokhwaStream::open(device_id, resolution)
    }
}

type SharedFrame = Arc<Mutex<Option<RgbImage>>>;

fn lock_frame(frame: &SharedFrame) -> MutexGuard<'_, Option<RgbImage>> {
    frame.lock().unwrap_or_else(|e| {
        error!("Camera frame mutex poisoned: {e}");
        e.into_inner()
    })
}

/// A camera stream running on its own capture thread
pub struct NokhwaStream {
    latest: SharedFrame,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl NokhwaStream {
    fn open(device_id: &str, resolution: CaptureResolution) -> OurResult<Self> {
        let index = match device_id.parse::<u32>() {
            Ok(i) => CameraIndex::Index(i),
            Err(_) => CameraIndex::String(device_id.to_string()),
        };
        let latest: SharedFrame = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<OurResult<()>>(1);

        let thread_latest = latest.clone();
        let thread_running = running.clone();
        let worker = std::thread::Builder::new()
            .name(format!("camera-{device_id}"))
            .spawn(move || {
                capture_thread(index, resolution, thread_latest, thread_running, ready_tx)
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                latest,
                running,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(OurError::Camera(
                    "Camera thread exited before opening the stream".to_string(),
                ))
            }
        }
    }
}

fn capture_thread(
    index: CameraIndex,
    resolution: CaptureResolution,
    latest: SharedFrame,
    running: Arc<AtomicBool>,
    ready_tx: mpsc::SyncSender<OurResult<()>>,
) {
    let camera_format = CameraFormat::new(
        Resolution::new(resolution.width, resolution.height),
        FrameFormat::MJPEG,
        30,
    );
    let requested =
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(camera_format));

    let mut camera = match Camera::new(index.clone(), requested) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready_tx.send(Err(OurError::Camera(format!(
                "Failed to create camera: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        let _ = ready_tx.send(Err(OurError::Camera(format!(
            "Failed to open camera stream: {e}"
        ))));
        return;
    }

    let actual = camera.camera_format().resolution();
    debug!(
        "Camera {index} opened at {}x{}",
        actual.width_x, actual.height_y
    );
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::Acquire) {
        match camera.frame() {
            Ok(buffer) => match buffer.decode_image::<RgbFormat>() {
                Ok(decoded) => {
                    let (width, height) = (decoded.width(), decoded.height());
                    if let Some(frame) = RgbImage::from_raw(width, height, decoded.into_raw()) {
                        *lock_frame(&latest) = Some(frame);
                    }
                }
                Err(e) => warn!("Failed to decode camera frame: {e}"),
            },
            Err(e) => {
                warn!("Failed to capture camera frame: {e}");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        warn!("Failed to stop camera stream: {e}");
    }
    debug!("Camera {index} capture thread finished");
}

impl FrameSource for NokhwaStream {
    fn natural_size(&self) -> (u32, u32) {
        lock_frame(&self.latest)
            .as_ref()
            .map_or((0, 0), |f| f.dimensions())
    }

    fn current_frame(&self) -> Option<RgbImage> {
        lock_frame(&self.latest).clone()
    }
}

impl MediaStream for NokhwaStream {
    fn active_tracks(&self) -> usize {
        usize::from(self.worker.is_some() && self.running.load(Ordering::Acquire))
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Camera capture thread panicked");
            }
        }
        *lock_frame(&self.latest) = None;
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop();
    }
}
