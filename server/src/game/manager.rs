//! Matchmaking and room routing: a joining player lands in any lobby with
//! spare capacity, or a fresh room. Rooms remove themselves from the table
//! when their task finishes.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use cove_core::error::{Error, Result};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::frame::RoomFrame;
use crate::game::ledger::WagerLedger;
use crate::game::room::{GameRoom, RoomHandle};
use crate::session::SessionInfo;

pub struct RoomManager {
    cfg: Arc<Config>,
    ledger: Arc<WagerLedger>,
    server_address: String,
    asset: String,
    rooms: Arc<Mutex<HashMap<String, RoomHandle>>>,
}

fn wait_and_unload(
    room_id: String,
    join_handle: JoinHandle<()>,
    rooms: Arc<Mutex<HashMap<String, RoomHandle>>>,
) {
    tokio::spawn(async move {
        let _ = join_handle.await;
        let mut rooms = rooms.lock().await;
        rooms.remove(&room_id);
        info!("Cleaned room handle: {}", room_id);
    });
}

impl RoomManager {
    pub fn new(
        cfg: Arc<Config>,
        ledger: Arc<WagerLedger>,
        server_address: String,
        asset: String,
    ) -> Self {
        Self {
            cfg,
            ledger,
            server_address,
            asset,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Put the session into a lobby, creating a room when none has space.
    pub async fn join(&self, session: SessionInfo) -> Result<RoomHandle> {
        let handle = self.find_or_create().await;
        match self.join_room(&handle, &session).await {
            Ok(()) => Ok(handle),
            // The lobby flag can be stale: the room may have filled or
            // locked between the lookup and the join. Fall back to a
            // fresh room once.
            Err(Error::RoomIsFull(_)) | Err(Error::WrongPhase) => {
                let handle = self.create_room().await;
                self.join_room(&handle, &session).await?;
                Ok(handle)
            }
            Err(e) => Err(e),
        }
    }

    async fn join_room(&self, handle: &RoomHandle, session: &SessionInfo) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .frame_tx
            .send(RoomFrame::PlayerJoining {
                session: SessionInfo {
                    id: session.id.clone(),
                    address: session.address.clone(),
                    outbound: session.outbound.clone(),
                },
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::RoomNotFound)?;
        reply_rx.await.map_err(|_| Error::RoomNotFound)?
    }

    async fn find_or_create(&self) -> RoomHandle {
        {
            let rooms = self.rooms.lock().await;
            if let Some(handle) = rooms.values().find(|h| h.joinable.load(Ordering::SeqCst)) {
                return handle.clone();
            }
        }
        self.create_room().await
    }

    async fn create_room(&self) -> RoomHandle {
        let seed: u32 = rand::random();
        let (handle, join_handle) = GameRoom::spawn(
            self.cfg.clone(),
            self.ledger.clone(),
            seed,
            self.server_address.clone(),
            self.asset.clone(),
        );
        let mut rooms = self.rooms.lock().await;
        rooms.insert(handle.id.clone(), handle.clone());
        wait_and_unload(handle.id.clone(), join_handle, self.rooms.clone());
        handle
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Ask every room to stop. In-flight settlements finish on their own
    /// tasks; on-chain custody stays the source of truth for funds.
    pub async fn shutdown(&self) {
        let rooms = self.rooms.lock().await;
        for handle in rooms.values() {
            let _ = handle.frame_tx.send(RoomFrame::Shutdown).await;
        }
    }
}
