//! The live capture loop: sample on a fixed interval, upload, move on.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::DetectionService;
use crate::camera_manager::FrameSource;
use crate::dispatcher::UploadDispatcher;
use crate::frame_sampler::FrameSampler;
use crate::ingredient_store::IngredientStore;
use crate::protocol::ScanEvent;

/// What one run of the loop did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiveScanStats {
    pub ticks: u64,
    /// Ticks where the source had no frame or encoding failed
    pub skipped: u64,
    pub submitted: u64,
    /// Frames refused by the in-flight bound
    pub dropped: u64,
}

/// Capture from `source` every `period` until `shutdown` flips to `true` or
/// its sender goes away.
///
/// Uploads are never awaited here, so a slow response cannot delay the next
/// tick. Ticks missed while a capture was encoding are skipped, not queued.
/// Stopping only ends future ticks; uploads already sent run to completion.
pub async fn run_live_scan<F, S>(
    source: &F,
    sampler: &FrameSampler,
    dispatcher: &UploadDispatcher<S>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> LiveScanStats
where
    F: FrameSource + Sync + ?Sized,
    S: DetectionService,
{
    let mut stats = LiveScanStats::default();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Live scan started, capturing every {period:?}");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                stats.ticks += 1;
                match sampler.capture(source).await {
                    Ok(Some(jpeg)) => match dispatcher.submit_frame(jpeg) {
                        Some(in_flight) => {
                            debug!(seq = in_flight.seq, "Frame submitted");
                            stats.submitted += 1;
                        }
                        None => stats.dropped += 1,
                    },
                    Ok(None) => stats.skipped += 1,
                    Err(e) => {
                        warn!("Error capturing frame: {e}");
                        stats.skipped += 1;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(
        ticks = stats.ticks,
        submitted = stats.submitted,
        skipped = stats.skipped,
        dropped = stats.dropped,
        "Live scan stopped"
    );
    stats
}

/// Write every displayed detection into the shared ingredient store
pub fn persist_updates(
    mut events: broadcast::Receiver<ScanEvent>,
    store: IngredientStore,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ScanEvent::Updated { seq, detection }) => {
                    if let Err(e) = store.put(&detection).await {
                        warn!(seq, "Failed to store detected ingredients: {e}");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("Ingredient writer lagged by {missed} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// How long [`flush_updates`] waits for the writer once uploads are done
const WRITER_SETTLE: Duration = Duration::from_secs(2);

/// Wait for uploads still in flight, then for `writer` to store their results.
///
/// The writer only finishes once every other renderer handle is gone, so drop
/// those before calling this. Returns `false` if either wait gave up.
pub async fn flush_updates<S: DetectionService>(
    dispatcher: UploadDispatcher<S>,
    mut writer: JoinHandle<()>,
    drain_limit: Duration,
) -> bool {
    let drained = dispatcher.drain(drain_limit).await;
    if !drained {
        warn!("Gave up waiting for in-flight uploads");
    }
    drop(dispatcher);

    if tokio::time::timeout(WRITER_SETTLE, &mut writer).await.is_err() {
        warn!("Ingredient writer did not finish, stopping it");
        writer.abort();
        return false;
    }
    drained
}
