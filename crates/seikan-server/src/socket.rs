//! Bridges one WebSocket to the mediator core
//!
//! The socket is split: a writer task drains the connection's outbound queue
//! into text frames while the reader loop decodes incoming frames and hands
//! them to the [`TunnelHandler`]. When the mediator closes the connection the
//! writer sends the final `error` frame, if any, followed by a close frame.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tracing::{debug, warn};

use seikan_control::{ConnectionId, OutboundReceiver, Outgoing, PeerConnection, TunnelHandler};
use seikan_proto::{decode_client_frame_limited, encode_server_frame, CodecError, ServerMessage};

use crate::handlers::AppState;

pub(crate) async fn serve_socket(socket: WebSocket, state: Arc<AppState>) {
    let handler = &state.handler;
    let (conn, outbound) = handler.open_connection();
    let (sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(write_outbound(sink, outbound, conn.clone()));

    loop {
        let frame = tokio::select! {
            _ = conn.closed() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                match decode_client_frame_limited(text.as_str(), state.max_message_size) {
                    Ok(message) => handler.handle_message(&conn, message).await,
                    Err(error) => {
                        debug!(connection_id = %conn.id(), %error, "Undecodable frame");
                        handler.handle_invalid_frame(&conn, error.to_string());
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                handler.handle_invalid_frame(&conn, CodecError::UnsupportedFrame.to_string());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                debug!(connection_id = %conn.id(), "Client closed the socket");
                break;
            }
            Some(Err(error)) => {
                debug!(connection_id = %conn.id(), %error, "WebSocket read failed");
                break;
            }
        }
    }

    handler.handle_disconnect(&conn);

    if tokio::time::timeout(state.close_grace, &mut writer)
        .await
        .is_err()
    {
        warn!(connection_id = %conn.id(), "Socket did not drain in time, dropping it");
        writer.abort();
    }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    conn: Arc<PeerConnection>,
) {
    let id = conn.id().clone();

    loop {
        match outbound.recv().await {
            Outgoing::Message(message) => {
                if send_frame(&mut sink, &message, &id).await.is_err() {
                    debug!(connection_id = %id, "WebSocket write failed");
                    conn.close();
                    return;
                }
            }
            Outgoing::Close(last) => {
                if let Some(message) = last {
                    let _ = send_frame(&mut sink, &message, &id).await;
                }
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "".into(),
                    })))
                    .await;
                return;
            }
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
    id: &ConnectionId,
) -> Result<(), axum::Error> {
    match encode_server_frame(message) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(error) => {
            warn!(connection_id = %id, %error, event = message.event(), "Dropping unencodable message");
            Ok(())
        }
    }
}
