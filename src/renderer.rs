//! Display state for detection results.
//!
//! The renderer keeps the ingredient list currently on screen, counts pending
//! uploads, and announces every change as a [`ScanEvent`]. Which response wins
//! when uploads resolve out of order is decided by [`RenderPolicy`].

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::OurResult;
use crate::api::Detection;
use crate::config::RenderPolicy;
use crate::protocol::ScanEvent;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct RenderState {
    detection: Option<Detection>,
    displayed_seq: Option<u64>,
    pending: usize,
    last_error: Option<String>,
    resolved: u64,
    discarded: u64,
}

/// Point-in-time copy of what is on screen
#[derive(Debug, Clone, Serialize)]
pub struct RenderSnapshot {
    pub detection: Option<Detection>,
    pub displayed_seq: Option<u64>,
    pub pending: usize,
    pub loading: bool,
    pub last_error: Option<String>,
    pub resolved: u64,
    pub discarded: u64,
    pub policy: RenderPolicy,
}

#[derive(Clone)]
pub struct ResultRenderer {
    state: Arc<RwLock<RenderState>>,
    policy: RenderPolicy,
    events: broadcast::Sender<ScanEvent>,
}

impl ResultRenderer {
    pub fn new(policy: RenderPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(RenderState::default())),
            policy,
            events,
        }
    }

    pub fn policy(&self) -> RenderPolicy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Send an event to every listener. Having no listeners is fine.
    pub fn publish(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }

    /// Record that upload `seq` is in flight
    pub async fn begin(&self, seq: u64) {
        self.state.write().await.pending += 1;
        self.publish(ScanEvent::Pending { seq });
    }

    /// Apply the outcome of upload `seq`. Returns whether the display changed.
    ///
    /// Failures never touch the displayed ingredients.
    pub async fn resolve(&self, seq: u64, result: OurResult<Detection>) -> bool {
        let mut state = self.state.write().await;
        state.pending = state.pending.saturating_sub(1);

        let detection = match result {
            Ok(detection) => detection,
            Err(e) => {
                warn!(seq, "Error processing frame: {e}");
                let message = e.to_string();
                state.last_error = Some(message.clone());
                drop(state);
                self.publish(ScanEvent::Failed { seq, message });
                return false;
            }
        };

        if self.policy == RenderPolicy::LastSentWins
            && state.displayed_seq.is_some_and(|shown| seq < shown)
        {
            debug!(seq, "Discarding response older than the one on screen");
            state.discarded += 1;
            drop(state);
            self.publish(ScanEvent::Discarded { seq });
            return false;
        }

        state.detection = Some(detection.clone());
        state.displayed_seq = Some(seq);
        state.last_error = None;
        state.resolved += 1;
        drop(state);

        debug!(seq, items = detection.ingredients.len(), "Display updated");
        self.publish(ScanEvent::Updated { seq, detection });
        true
    }

    /// Loading shows only while something is pending and nothing is displayed yet
    pub async fn is_loading(&self) -> bool {
        let state = self.state.read().await;
        state.pending > 0 && state.detection.is_none()
    }

    pub async fn current(&self) -> Option<Detection> {
        self.state.read().await.detection.clone()
    }

    pub async fn snapshot(&self) -> RenderSnapshot {
        let state = self.state.read().await;
        RenderSnapshot {
            detection: state.detection.clone(),
            displayed_seq: state.displayed_seq,
            pending: state.pending,
            loading: state.pending > 0 && state.detection.is_none(),
            last_error: state.last_error.clone(),
            resolved: state.resolved,
            discarded: state.discarded,
            policy: self.policy,
        }
    }
}

/// Plain-text results table for the terminal
pub fn render_table(detection: &Detection) -> String {
    if detection.is_empty() {
        return "No ingredients detected.\n".to_string();
    }

    let name_width = detection
        .ingredients
        .iter()
        .map(|i| i.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Ingredient".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<name_width$}  {:>8}  {:<8}  Status",
        "Ingredient", "Quantity", "Unit"
    );
    let _ = writeln!(out, "{}", "-".repeat(name_width + 30));
    for ingredient in &detection.ingredients {
        let _ = writeln!(
            out,
            "{:<name_width$}  {:>8}  {:<8}  {}",
            ingredient.name,
            format_quantity(ingredient.quantity),
            ingredient.unit,
            ingredient.status.label()
        );
    }
    let totals = detection.totals;
    let _ = writeln!(
        out,
        "Total: {} items ({} fresh, {} at risk)",
        totals.items, totals.fresh, totals.spoiled
    );
    out
}

pub(crate) fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 {
        format!("{quantity:.0}")
    } else {
        format!("{quantity:.2}")
    }
}
