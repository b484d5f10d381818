//! Frames processed by a room's serialized loop. Everything that can
//! mutate a room arrives here, in FIFO order: client messages, timer
//! fires, action completions and the settlement outcome.

use cove_core::error::Result;
use cove_core::protocol::ClientMessage;
use tokio::sync::oneshot;

use crate::session::SessionInfo;

pub enum RoomFrame {
    ClientMsg {
        session_id: String,
        msg: ClientMessage,
    },
    PlayerJoining {
        session: SessionInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    PlayerLeaving {
        session_id: String,
    },
    ActionCompleted {
        session_id: String,
        seq: u64,
    },
    CountdownFired {
        gen: u64,
    },
    TimeoutFired,
    SyncTick,
    PayoutDone {
        winner_id: Option<String>,
        amount: u64,
    },
    DestroyFired,
    Shutdown,
}

impl std::fmt::Display for RoomFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomFrame::ClientMsg { session_id, .. } => write!(f, "ClientMsg: {}", session_id),
            RoomFrame::PlayerJoining { session, .. } => {
                write!(f, "PlayerJoining: {}", session.id)
            }
            RoomFrame::PlayerLeaving { session_id } => {
                write!(f, "PlayerLeaving: {}", session_id)
            }
            RoomFrame::ActionCompleted { session_id, seq } => {
                write!(f, "ActionCompleted: {} seq = {}", session_id, seq)
            }
            RoomFrame::CountdownFired { gen } => write!(f, "CountdownFired: gen = {}", gen),
            RoomFrame::TimeoutFired => write!(f, "TimeoutFired"),
            RoomFrame::SyncTick => write!(f, "SyncTick"),
            RoomFrame::PayoutDone { amount, .. } => write!(f, "PayoutDone: {}", amount),
            RoomFrame::DestroyFired => write!(f, "DestroyFired"),
            RoomFrame::Shutdown => write!(f, "Shutdown"),
        }
    }
}
