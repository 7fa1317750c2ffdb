//! HTTP/WebSocket front door.
//!
//! `/signal` upgrades to the signaling WebSocket. Each connection gets a
//! fresh `ConnectionId` and one bounded outbound channel; a dedicated send
//! task is the only writer on the socket, so concurrent broadcasts can never
//! interleave frames on the wire. `/metrics` exposes the prometheus registry
//! and `/healthz` answers liveness probes.

use crate::dispatcher::SignalingDispatcher;
use crate::id_types::ConnectionId;
use crate::types::OutboundFrame;
use futures_util::{SinkExt, StreamExt};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use warp::ws::{Message, WebSocket, Ws};
use warp::Filter;

/// Bounded channel capacity per client. Messages queued beyond this are
/// stale and dropped early rather than buffered without limit.
const CHANNEL_CAPACITY: usize = 64;

pub async fn serve(dispatcher: Arc<SignalingDispatcher>, port: u16) {
    let dispatcher = warp::any().map(move || dispatcher.clone());

    let signal = warp::path("signal")
        .and(warp::ws())
        .and(dispatcher)
        .map(|ws: Ws, dispatcher: Arc<SignalingDispatcher>| {
            ws.on_upgrade(move |socket| handle_connection(socket, dispatcher))
        });

    let metrics = warp::path("metrics").map(render_metrics);
    let healthz = warp::path("healthz").map(|| "ok");

    let routes = signal.or(metrics).or(healthz);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "signaling server listening");
    warp::serve(routes).run(addr).await;
}

async fn handle_connection(socket: WebSocket, dispatcher: Arc<SignalingDispatcher>) {
    let connection_id = ConnectionId::new();
    info!(connection_id = %connection_id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(CHANNEL_CAPACITY);

    let send_connection_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_tx.send(Message::text(frame.as_str())).await {
                debug!(connection_id = %send_connection_id, error = %e, "socket send failed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "websocket receive error");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        // warp answers pings itself; binary frames are not part of the
        // protocol and are ignored.
        if let Ok(text) = msg.to_str() {
            dispatcher.handle_frame(&connection_id, text, &tx).await;
        }
    }

    dispatcher.handle_disconnect(&connection_id).await;
    drop(tx);
    send_task.abort();
    info!(connection_id = %connection_id, "websocket closed");
}

fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "could not encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
