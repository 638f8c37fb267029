//! Fire-and-forget frame uploads.
//!
//! Every submitted frame becomes its own task. Submitting never waits on an
//! earlier upload, and responses are handed to the [`ResultRenderer`] in
//! whatever order they arrive. An optional in-flight bound drops frames
//! instead of queueing them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::DetectionService;
use crate::protocol::ScanEvent;
use crate::renderer::ResultRenderer;

const DRAIN_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Totals since the dispatcher was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dropped: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// An upload that has been handed off
#[derive(Debug)]
pub struct InFlight {
    pub seq: u64,
    pub handle: JoinHandle<()>,
}

pub struct UploadDispatcher<S: DetectionService> {
    service: Arc<S>,
    renderer: ResultRenderer,
    next_seq: Arc<AtomicU64>,
    limit: Option<Arc<Semaphore>>,
    max_in_flight: Option<usize>,
    counters: Arc<Counters>,
}

impl<S: DetectionService> Clone for UploadDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            renderer: self.renderer.clone(),
            next_seq: self.next_seq.clone(),
            limit: self.limit.clone(),
            max_in_flight: self.max_in_flight,
            counters: self.counters.clone(),
        }
    }
}

impl<S: DetectionService> UploadDispatcher<S> {
    /// `max_in_flight` of `None` leaves uploads unbounded
    pub fn new(service: Arc<S>, renderer: ResultRenderer, max_in_flight: Option<usize>) -> Self {
        Self {
            service,
            renderer,
            next_seq: Arc::new(AtomicU64::new(1)),
            limit: max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            max_in_flight,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn renderer(&self) -> &ResultRenderer {
        &self.renderer
    }

    /// Hand one JPEG frame to a background upload and return at once.
    ///
    /// Returns `None` when the in-flight bound is reached; the frame is then
    /// dropped, counted, and never retried.
    pub fn submit_frame(&self, jpeg: Vec<u8>) -> Option<InFlight> {
        let permit = match &self.limit {
            Some(limit) => match limit.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    let in_flight = self.max_in_flight.unwrap_or_default();
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(in_flight, "Upload bound reached, dropping frame");
                    self.renderer.publish(ScanEvent::FrameDropped { in_flight });
                    return None;
                }
            },
            None => None,
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let service = self.service.clone();
        let renderer = self.renderer.clone();
        let counters = self.counters.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            renderer.begin(seq).await;
            let result = service.detect_frame(jpeg).await;
            if let Err(e) = &result {
                warn!(seq, "Frame upload failed: {e}");
            }
            let succeeded = result.is_ok();
            renderer.resolve(seq, result).await;
            if succeeded {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        });

        Some(InFlight { seq, handle })
    }

    /// Wait until every submitted upload has resolved, giving up after `limit`.
    /// Returns whether everything resolved.
    pub async fn drain(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            loop {
                let stats = self.stats();
                if stats.succeeded + stats.failed >= stats.submitted {
                    break;
                }
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
