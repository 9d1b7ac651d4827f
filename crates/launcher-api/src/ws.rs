//! Viewer WebSocket endpoint.
//!
//! One reader (this handler) and one writer task per connection. The writer drains the
//! hub's bounded queue and sends pings as heartbeats.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{
        ConnectInfo, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use launcher_exec::Lifecycle;
use launcher_model::ServerMessage;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::{error::ApiError, hub::Hub};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// GET /ws/{slug}
pub(crate) async fn ws_handler<L>(
    State(hub): State<Arc<Hub<L>>>,
    Path(slug): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError>
where
    L: Lifecycle,
{
    let origin = origin_of(&headers, peer, hub.config().trust_forwarded_for);
    if let Err(e) = hub.admit(&slug, &origin) {
        debug!(%slug, %origin, error = %e, "connection refused");
        return Err(e);
    }
    Ok(ws.on_upgrade(move |socket| serve_socket(hub, socket, slug, origin)))
}

/// Viewer address: the peer IP, or the first `X-Forwarded-For` hop when trusted and valid.
pub(crate) fn origin_of(headers: &HeaderMap, peer: SocketAddr, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}

async fn serve_socket<L: Lifecycle>(hub: Arc<Hub<L>>, socket: WebSocket, slug: String, origin: String) {
    let session = match hub.attach(&slug, &origin) {
        Ok(session) => session,
        Err(e) => {
            warn!(%slug, %origin, error = %e, "attach failed");
            return;
        }
    };
    let viewer = session.viewer;
    let mut outbound = session.outbound;

    let (mut sink, mut stream) = socket.split();
    let heartbeat = hub.config().heartbeat_interval;
    let conn = viewer.id;

    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            let frame = tokio::select! {
                msg = outbound.recv() => match msg {
                    Some(msg) => match encode(&msg) {
                        Some(frame) => frame,
                        None => continue,
                    },
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Bytes::new()),
            };
            if sink.send(frame).await.is_err() {
                debug!(%conn, "socket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => hub.handle_text(&viewer, text.as_str()),
            Ok(Message::Binary(_)) => {
                hub.send_to(&viewer, ServerMessage::error("binary frames are not supported"));
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                debug!(slug = %viewer.slug, %conn, error = %e, "socket read failed");
                break;
            }
        }
    }

    hub.detach(&viewer);
    writer.abort();
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!(kind = msg.kind(), error = %e, "failed to encode message");
            None
        }
    }
}
