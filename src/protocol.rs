use serde::{Deserialize, Serialize};

use crate::api::Detection;

/// Generic API response returned by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }
}

/// Everything the scanning pipeline announces to its listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanEvent {
    /// A frame upload has been sent
    Pending { seq: u64 },
    /// The displayed ingredient list was replaced
    Updated { seq: u64, detection: Detection },
    /// An upload failed; the display is unchanged
    Failed { seq: u64, message: String },
    /// A response arrived after a newer one was already displayed
    Discarded { seq: u64 },
    /// A tick's frame was dropped because too many uploads were in flight
    FrameDropped { in_flight: usize },
    /// Video walker progress, 0 to 100
    Progress { percent: f64 },
    WalkerDone,
}

impl ScanEvent {
    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            ScanEvent::Pending { .. } => "pending",
            ScanEvent::Updated { .. } => "updated",
            ScanEvent::Failed { .. } => "failed",
            ScanEvent::Discarded { .. } => "discarded",
            ScanEvent::FrameDropped { .. } => "frame_dropped",
            ScanEvent::Progress { .. } => "progress",
            ScanEvent::WalkerDone => "walker_done",
        }
    }
}

#[test]
fn test_scan_event_serialisation() {
    let event = ScanEvent::Failed {
        seq: 4,
        message: "timeout".to_string(),
    };
    let json = serde_json::to_value(&event).expect("Failed to serialize");
    assert_eq!(json["kind"], "failed");
    assert_eq!(json["seq"], 4);
    assert_eq!(event.kind(), "failed");

    let json = serde_json::to_string(&ScanEvent::WalkerDone).expect("Failed to serialize");
    assert_eq!(json, r#"{"kind":"walker_done"}"#);
}

#[test]
fn test_api_response_error_has_no_data() {
    let response: ApiResponse<()> = ApiResponse::error("nope");
    assert!(!response.success);
    assert!(response.data.is_none());
    assert_eq!(response.message, "nope");
}
