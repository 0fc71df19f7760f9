//! WebSocket upgrade handler and per-socket read/write loops.
//!
//! Each accepted socket is registered (allocating its bounded outbound
//! channel), then split: the write loop drains the channel onto the wire,
//! the read loop decodes `{event, data}` envelopes and hands them to the
//! event router. Closing the socket from either side tears the session
//! down exactly once.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use tilemud_core::{codes, Envelope};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::network::connection::OutboundFrame;

use super::AppState;

/// Upgrades an HTTP connection to a game WebSocket session.
pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let engine = state.engine;
    let _guard = state.shutdown.in_flight_guard();
    let mut shutdown = state.shutdown.shutdown_receiver();

    let (handle, rx) = engine.sockets.register(&engine.config.network.connection);
    let socket_id = handle.id;
    debug!(socket = socket_id.0, "socket opened");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, rx));

    let max_frame = engine.config.network.connection.max_frame_bytes;
    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > max_frame {
                            engine.send_info(socket_id, codes::WRONG_DATA);
                            continue;
                        }
                        match Envelope::decode(text.as_str()) {
                            Ok(envelope) => engine.handle_frame(socket_id, envelope).await,
                            Err(err) => {
                                trace!(socket = socket_id.0, error = %err, "bad frame");
                                engine.send_info(socket_id, codes::WRONG_DATA);
                            }
                        }
                    }
                    // Binary frames are not part of the protocol.
                    Some(Ok(Message::Binary(_))) => {
                        engine.send_info(socket_id, codes::WRONG_DATA);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    engine.handle_socket_close(socket_id).await;
    engine.sockets.remove(socket_id);
    writer.abort();
    debug!(socket = socket_id.0, "socket closed");
}

/// Drains the outbound channel onto the wire. Exits when the channel
/// closes (socket removed) or the peer stops accepting writes.
async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text.into()),
            OutboundFrame::Close(reason) => {
                let _ = sink
                    .send(Message::Close(reason.map(|r| axum::extract::ws::CloseFrame {
                        code: axum::extract::ws::close_code::AWAY,
                        reason: r.into(),
                    })))
                    .await;
                break;
            }
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
}
