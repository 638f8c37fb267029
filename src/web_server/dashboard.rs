//! Dashboard landing page and the live scan table.

use super::prelude::*;
use crate::renderer::format_quantity;

#[derive(Template, WebTemplate)]
#[template(path = "dashboard.html")]
pub(crate) struct DashboardTemplate {
    api_base_url: String,
    backend_online: bool,
    render_policy: String,
    capture_interval_ms: u64,
    max_in_flight: String,
}

pub(crate) async fn dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    let backend_online = match state.api.health().await {
        Ok(online) => online,
        Err(e) => {
            debug!("Backend health check failed: {e}");
            false
        }
    };

    let template = DashboardTemplate {
        api_base_url: state.settings.api_base_url.to_string(),
        backend_online,
        render_policy: format!("{:?}", state.renderer.policy()),
        capture_interval_ms: state.settings.capture_interval_ms,
        max_in_flight: state
            .settings
            .max_in_flight
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
    };

    template.render().map(Html::from).map_err(|e| {
        error!("Failed to render dashboard template: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Template rendering failed",
        )
    })
}

pub(crate) struct ScanRow {
    name: String,
    quantity: String,
    unit: String,
    status: &'static str,
    at_risk: bool,
}

#[derive(Template, WebTemplate)]
#[template(path = "scan.html")]
pub(crate) struct ScanTemplate {
    loading: bool,
    has_result: bool,
    rows: Vec<ScanRow>,
    items: u32,
    fresh: u32,
    spoiled: u32,
    pending: usize,
    last_error: Option<String>,
}

pub(crate) async fn scan_page(
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    let snapshot = state.renderer.snapshot().await;
    let detection = snapshot.detection.unwrap_or_default();

    let template = ScanTemplate {
        loading: snapshot.loading,
        has_result: !detection.is_empty(),
        rows: detection
            .ingredients
            .iter()
            .map(|i| ScanRow {
                name: i.name.clone(),
                quantity: format_quantity(i.quantity),
                unit: i.unit.clone(),
                status: i.status.label(),
                at_risk: i.status == crate::api::types::Freshness::Spoiled,
            })
            .collect(),
        items: detection.totals.items,
        fresh: detection.totals.fresh,
        spoiled: detection.totals.spoiled,
        pending: snapshot.pending,
        last_error: snapshot.last_error,
    };

    template.render().map(Html::from).map_err(|e| {
        error!("Failed to render scan template: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Template rendering failed",
        )
    })
}
