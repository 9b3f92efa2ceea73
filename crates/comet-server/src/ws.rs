//! WebSocket glue — pumps one frame-attached session from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use comet_core::{Coord, Frame, FrameSink, Session, Transport};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tracing::{debug, info, instrument};

use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Depth of the per-connection outbound frame buffer.
const OUTBOUND_BUFFER: usize = 256;

/// Run a WebSocket session for a connected client.
///
/// 1. Attaches the socket as a frame transport, replaying what the client's
///    `last_seen` coordinate says it may have missed
/// 2. Flushes pending strong messages
/// 3. Forwards outbound engine frames to the socket from a dedicated task
/// 4. Records receive coordinates and liveness from inbound traffic
///
/// On disconnect the forwarder stops and the engine detaches the dead
/// channel at its next operation.
#[instrument(skip_all, fields(user = %session.user(), guid = %session.guid()))]
pub async fn run_ws_session(
    socket: WebSocket,
    session: Arc<Session>,
    last_seen: Coord,
    ping_interval: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sink, mut outbound_rx) = FrameSink::channel(OUTBOUND_BUFFER);

    info!("frame client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    // Outbound forwarder: engine frames → socket.
    let outbound = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let message = match frame {
                Frame::Text(json) => Message::Text(json.as_str().into()),
                Frame::Ping(payload) => Message::Ping(payload.into_bytes().into()),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    session.attach_and_replay(Transport::Frame(sink), last_seen);
    let _ = session.set_deadline(ping_interval);
    session.flush();

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => record_inbound(&session, text.as_str(), ping_interval),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => record_inbound(&session, text, ping_interval),
                Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
            },
            Message::Ping(_) | Message::Pong(_) => {
                let _ = session.set_deadline(ping_interval);
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        }
    }

    info!("frame client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    outbound.abort();
    // The engine observes the closed channel and detaches on its next
    // operation.
}

/// Any inbound traffic proves liveness; messages carrying an envelope
/// metadata block additionally advance the receive high-water mark.
fn record_inbound(session: &Session, text: &str, ping_interval: Duration) {
    let _ = session.set_deadline(ping_interval);
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        debug!("ignoring non-JSON inbound message");
        return;
    };
    let metadata = &value["metadata"];
    if let (Some(timestamp), Some(sequence)) =
        (metadata["timestamp"].as_i64(), metadata["sequence"].as_u64())
    {
        let sequence = u32::try_from(sequence).unwrap_or(u32::MAX);
        session.record_receive(Coord::new(timestamp, sequence));
    }
}
