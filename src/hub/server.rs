//! TCP accept loop and `/health` interception for the hub.
//!
//! Uses a split read/write task pattern: here the hub accepts connections
//! rather than dialing out.

use crate::error::{SessionError, SessionResult};
use crate::frame::Frame;
use crate::hub::state::AdmissionPhase;
use crate::hub::{ConnCtx, Hub, HubConfig};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Bind the hub's listener, probing successive ports if the requested one
/// is busy, trying the next free port in the probe range.
pub async fn bind(config: &HubConfig) -> SessionResult<(TcpListener, u16)> {
    let requested = config.port;
    for offset in 0..=crate::PORT_PROBE_RANGE {
        let port = requested.saturating_add(offset);
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
            let bound_port = listener.local_addr()?.port();
            if offset > 0 {
                log::info!("port {requested} busy, bound {bound_port} instead");
            }
            return Ok((listener, bound_port));
        }
    }
    Err(SessionError::Resource)
}

/// Accept connections until the listener errors out. Each connection starts
/// at admission phase CONNECTED.
pub async fn serve(hub: Hub, listener: TcpListener) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(hub, stream).await {
                log::debug!("connection ended: {e}");
            }
        });
    }
}

/// Synthesize the `/health` response inline during the WebSocket handshake,
/// so both endpoints share one listener and one port.
fn health_callback(
    node_id: String,
    roster_len: usize,
    room_count: usize,
) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> {
    move |req: &Request, response: Response| {
        if req.uri().path() != "/health" {
            return Ok(response);
        }
        let body = serde_json::json!({
            "status": "ok",
            "nodeId": node_id,
            "nodes_count": roster_len,
            "chats_count": room_count,
            "mode": "host",
        })
        .to_string();
        let reply = http::Response::builder()
            .status(http::StatusCode::OK)
            .header("content-type", "application/json")
            .body(Some(body))
            .expect("a fixed-shape health response always builds");
        Err(reply)
    }
}

async fn handle_connection(hub: Hub, stream: TcpStream) -> SessionResult<()> {
    let roster_len = hub.roster_len().await;
    let room_count = hub.room_count().await;
    let callback = health_callback(hub.node_id().0.clone(), roster_len, room_count);
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(text) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = close_rx.recv() => {
                    let _ = write.close().await;
                    break;
                }
            }
        }
    });

    let mut ctx = ConnCtx {
        phase: AdmissionPhase::Connected,
        node_id: None,
        outbound: outbound_tx,
        close: close_tx,
    };

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Ok(frame) = Frame::decode(&text) else {
                    log::debug!("discarding malformed frame");
                    continue;
                };
                let frame = hub.unwrap_inbound(frame).await;
                hub.handle_frame(&mut ctx, frame).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    if let Some(node_id) = ctx.node_id {
        hub.release_connection(&node_id).await;
    }
    Ok(())
}
