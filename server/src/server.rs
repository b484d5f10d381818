//! The gateway: accepts WebSocket connections, frames JSON messages and
//! routes them. `JoinRoom` goes through the matchmaker; everything else is
//! forwarded into the session's room, which processes it in FIFO order.

use std::sync::Arc;

use cove_core::error::{Error, Result};
use cove_core::protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::ApplicationContext;
use crate::frame::RoomFrame;
use crate::game::room::RoomHandle;
use crate::session::SessionInfo;

const OUTBOUND_BUFFER: usize = 256;

pub async fn run_server(context: Arc<ApplicationContext>) -> Result<()> {
    let host = format!("0.0.0.0:{}", context.config.port);
    let listener = TcpListener::bind(&host)
        .await
        .map_err(|e| Error::InternalError(format!("Failed to bind {}: {}", host, e)))?;
    info!("Server started at {}", host);
    serve(listener, context).await
}

pub async fn serve(listener: TcpListener, context: Arc<ApplicationContext>) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::InternalError(format!("Accept failed: {}", e)))?;
        debug!("Connection from {}", peer);
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, context).await {
                debug!("Connection ended: {}", e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, context: Arc<ApplicationContext>) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::InternalError(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let session_id = format!("player-{}", Uuid::new_v4());
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    // Writer task: drain the session's queue into WebSocket text frames.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    info!("Session connected: {}", session_id);
    let mut room: Option<RoomHandle> = None;

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        let msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(_) => {
                // Non-JSON frames are dropped silently; well-formed JSON
                // that isn't a known message gets an error reply.
                if serde_json::from_str::<Value>(&text).is_ok() {
                    let reply = ServerMessage::error(
                        Error::UnknownMessage(truncate(&text)).to_string(),
                    );
                    let _ = out_tx.send(reply).await;
                }
                continue;
            }
        };

        match msg {
            ClientMessage::Ping { t } => {
                let _ = out_tx.send(ServerMessage::Pong { t }).await;
            }
            ClientMessage::JoinRoom { address } => {
                if room.is_some() {
                    let reply = ServerMessage::error(Error::AlreadyInRoom.to_string());
                    let _ = out_tx.send(reply).await;
                    continue;
                }
                let info = SessionInfo {
                    id: session_id.clone(),
                    address,
                    outbound: out_tx.clone(),
                };
                match context.rooms.join(info).await {
                    Ok(handle) => room = Some(handle),
                    Err(e) => {
                        warn!("Join failed for {}: {}", session_id, e);
                        let _ = out_tx.send(ServerMessage::error(e.to_string())).await;
                    }
                }
            }
            ClientMessage::LeaveRoom => match room.take() {
                Some(handle) => {
                    let _ = handle
                        .frame_tx
                        .send(RoomFrame::ClientMsg {
                            session_id: session_id.clone(),
                            msg: ClientMessage::LeaveRoom,
                        })
                        .await;
                }
                None => {
                    let reply = ServerMessage::error(Error::NotInRoom.to_string());
                    let _ = out_tx.send(reply).await;
                }
            },
            msg => match &room {
                Some(handle) => {
                    let frame = RoomFrame::ClientMsg {
                        session_id: session_id.clone(),
                        msg,
                    };
                    if handle.frame_tx.send(frame).await.is_err() {
                        // The room retired; late messages are expected
                        // around the end-of-game grace.
                        room = None;
                        let reply = ServerMessage::error(Error::RoomNotFound.to_string());
                        let _ = out_tx.send(reply).await;
                    }
                }
                None => {
                    let reply = ServerMessage::error(Error::NotInRoom.to_string());
                    let _ = out_tx.send(reply).await;
                }
            },
        }
    }

    if let Some(handle) = room {
        let _ = handle
            .frame_tx
            .send(RoomFrame::PlayerLeaving {
                session_id: session_id.clone(),
            })
            .await;
    }
    writer.abort();
    info!("Session disconnected: {}", session_id);
    Ok(())
}

fn truncate(text: &str) -> String {
    const MAX: usize = 64;
    if text.len() <= MAX {
        return text.to_owned();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
