//! Long-poll glue — one batch-attached request/response cycle.

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use comet_core::{
    BatchResponse, BatchSink, Coord, Registry, SessionGuid, Transport, UserId, BATCH_CONTENT_TYPE,
    EMPTY_BATCH_BODY,
};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::metrics::{POLL_FALLBACKS_TOTAL, POLL_REQUESTS_TOTAL};

/// Response header echoing the session GUID, so clients polling without one
/// can adopt the minted GUID on their next cycle.
pub const GUID_HEADER: &str = "x-comet-guid";

/// Reconnect parameters shared by both transport routes. Missing last-seen
/// parameters decode as the origin coordinate.
#[derive(Clone, Debug, Deserialize)]
pub struct ReconnectQuery {
    /// Authenticated principal (trusted as-is at this layer).
    pub user: String,
    /// Session GUID; minted server-side when absent.
    pub guid: Option<String>,
    /// Last-seen envelope timestamp, epoch ms.
    pub timestamp: Option<i64>,
    /// Last-seen envelope sequence within the timestamp.
    pub sequence: Option<u32>,
}

impl ReconnectQuery {
    /// The coordinate everything at or before which the client acknowledges.
    #[must_use]
    pub fn last_seen(&self) -> Coord {
        Coord::new(self.timestamp.unwrap_or(0), self.sequence.unwrap_or(0))
    }

    /// The session identity, minting a GUID if the client sent none.
    #[must_use]
    pub fn identity(&self) -> (UserId, SessionGuid) {
        let guid = self
            .guid
            .as_deref()
            .map_or_else(SessionGuid::new, SessionGuid::from);
        (UserId::from(self.user.as_str()), guid)
    }
}

/// Serve one long-poll cycle: attach a batch transport (which replays and
/// responds within the same call), flush, and relay the engine's response.
///
/// The await is bounded by the engine's ping interval plus slack; if the
/// attach was skipped on a lock timeout the fallback guarantees the client
/// still receives `[]` rather than hanging.
#[instrument(skip_all, fields(user = %query.user))]
pub async fn run_long_poll(registry: Arc<Registry>, query: ReconnectQuery) -> Response {
    counter!(POLL_REQUESTS_TOTAL).increment(1);
    let (user, guid) = query.identity();
    let session = registry.lookup_or_create(user, guid.clone());

    let (sink, response_rx) = BatchSink::channel();
    let _ = session.set_deadline(registry.config().ping_interval());
    session.attach_and_replay(Transport::Batch(sink), query.last_seen());
    session.flush();

    let wait = registry.config().ping_interval() + std::time::Duration::from_secs(1);
    let batch = match tokio::time::timeout(wait, response_rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) | Err(_) => {
            counter!(POLL_FALLBACKS_TOTAL).increment(1);
            warn!(guid = %guid, "no engine response for long poll, answering empty");
            BatchResponse {
                status: 200,
                content_type: BATCH_CONTENT_TYPE,
                body: EMPTY_BATCH_BODY.to_owned(),
            }
        }
    };
    debug!(guid = %guid, bytes = batch.body.len(), "long poll answered");

    let status = StatusCode::from_u16(batch.status).unwrap_or(StatusCode::OK);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(batch.content_type),
    );
    if let Ok(value) = HeaderValue::from_str(guid.as_str()) {
        headers.insert(GUID_HEADER, value);
    }
    (status, headers, batch.body).into_response()
}
