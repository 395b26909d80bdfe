//! WebSocket connection lifecycle: accept → frame loop → cleanup.
//!
//! Each connection gets a write task fed by an mpsc channel (one JSON
//! serialization per send) and a read loop that fully processes a frame
//! before taking the next one, which serializes all per-connection handling.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    switchyard_auth::HandshakeAuth,
    switchyard_protocol::{
        DecodeError, ErrorCode, Frame, MAX_FRAME_BYTES, SCHEMA_ERROR_LIMIT, close_codes,
        decode_frame,
    },
};

use crate::{
    handlers::handle_frame,
    state::{Connection, GatewayState, WsOut},
    throttle::FrameThrottle,
};

/// Drive a single accepted WebSocket until it closes.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
    handshake_auth: HandshakeAuth,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let remote_ip = remote_addr.ip().to_string();
    info!(conn_id = %conn_id, remote_ip = %remote_ip, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsOut>();

    // Write loop: forwards frames from the channel to the socket. Ends when
    // every sender is dropped or a close is requested; post-close sends are
    // simply never read.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                WsOut::Frame(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        debug!(conn_id = %write_conn_id, "ws: write loop closed");
                        break;
                    }
                },
                WsOut::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                },
            }
        }
    });

    state
        .register_connection(Connection {
            conn_id: conn_id.clone(),
            sender: out_tx.clone(),
            connected_at: Instant::now(),
            remote_ip: Some(remote_ip),
            handshake_auth,
        })
        .await;

    let mut throttle = FrameThrottle::new(state.config.max_frames_per_second);
    let mut decode_errors: u32 = 0;

    loop {
        let msg = tokio::select! {
            _ = state.cancel.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_FRAME_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: frame too large");
            state
                .send_to_conn(
                    &conn_id,
                    &Frame::error(
                        ErrorCode::FrameTooLarge,
                        Some(format!("limit is {MAX_FRAME_BYTES} bytes")),
                    ),
                )
                .await;
            continue;
        }

        if !throttle.admit() {
            state
                .send_to_conn(&conn_id, &Frame::error(ErrorCode::RateLimited, None))
                .await;
            continue;
        }

        let frame = match decode_frame(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: undecodable frame");
                state
                    .send_to_conn(&conn_id, &Frame::error(e.code(), Some(decode_detail(&e))))
                    .await;
                decode_errors += 1;
                if decode_errors >= SCHEMA_ERROR_LIMIT {
                    warn!(conn_id = %conn_id, "ws: too many consecutive schema errors, closing");
                    if let Some(conn) = state.connections.read().await.get(&conn_id) {
                        conn.close(close_codes::NORMAL, "too many schema errors");
                    }
                    break;
                }
                continue;
            },
        };
        decode_errors = 0;

        handle_frame(&state, &conn_id, frame).await;
    }

    // Cleanup runs exactly once per connection regardless of how the loop
    // ended; a prior deregister leaves nothing to do here.
    state.disconnect_conn(&conn_id).await;
    drop(out_tx);
    let _ = write_handle.await;
    info!(conn_id = %conn_id, "ws: connection closed");
}

fn decode_detail(err: &DecodeError) -> String {
    match err {
        DecodeError::Parse(e) => format!("invalid JSON: {e}"),
        DecodeError::Schema(e) => format!("invalid frame: {e}"),
    }
}
