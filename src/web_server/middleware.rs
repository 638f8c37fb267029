use std::time::{SystemTime, UNIX_EPOCH};

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};

/// Stop browsers from caching dashboard pages, snapshots and previews
pub(crate) async fn no_cache_middleware(request: Request, next: Next) -> Response {
    let is_preview = request.uri().path().starts_with("/previews/");
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        "Cache-Control",
        HeaderValue::from_static("no-cache, no-store, must-revalidate, max-age=0"),
    );
    headers.insert("Pragma", HeaderValue::from_static("no-cache"));
    headers.insert("Expires", HeaderValue::from_static("0"));

    if let Ok(timestamp) = SystemTime::now().duration_since(UNIX_EPOCH) {
        let etag_value = format!("\"{}\"", timestamp.as_millis());
        if let Ok(etag_header) = HeaderValue::from_str(&etag_value) {
            headers.insert("ETag", etag_header);
        }
    }

    // Revoked previews must never be served from a cache
    if is_preview {
        headers.insert(
            "Cache-Control",
            HeaderValue::from_static("no-cache, no-store, must-revalidate, max-age=0, private"),
        );
    }

    response
}
