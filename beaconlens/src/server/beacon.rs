//! `GET /beacon`: fire-and-forget tracking pixel.

use super::{request_context, AppState};
use axum::extract::{RawQuery, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use beaconlens_core::ingest::normalize_beacon;

/// 1x1 transparent GIF.
pub const PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Always answers 200 with the pixel; the event is queued if it decodes.
///
/// Nothing about the outcome reaches the client. Persistence happens on the
/// beacon queue after this returns.
pub async fn handle_beacon(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&headers);
    match normalize_beacon(query.as_deref().unwrap_or(""), &ctx) {
        Ok(event) => {
            state.queue.enqueue(event).await;
        }
        Err(e) => {
            tracing::debug!(error = %e, "Beacon discarded");
        }
    }
    pixel()
}

fn pixel() -> Response {
    (
        [
            (CONTENT_TYPE, "image/gif"),
            (CACHE_CONTROL, "no-store, no-cache, must-revalidate, private"),
            (PRAGMA, "no-cache"),
            (EXPIRES, "0"),
        ],
        &PIXEL_GIF[..],
    )
        .into_response()
}
