//! Connection-bound player state. The gateway creates a [`SessionInfo`]
//! per connection; the room it joins expands it into a [`PlayerSession`]
//! and owns it for the session's lifetime.

use cove_core::protocol::ServerMessage;
use cove_core::types::{CurrentAction, Inventory, PlayerSnapshot, Upgrades, Vec3};
use tokio::sync::mpsc;
use tracing::warn;

/// What a room needs to adopt a connection.
pub struct SessionInfo {
    pub id: String,
    pub address: String,
    pub outbound: mpsc::Sender<ServerMessage>,
}

pub struct PlayerSession {
    pub id: String,
    pub address: String,
    outbound: mpsc::Sender<ServerMessage>,
    pub position: Vec3,
    pub last_position_ms: u64,
    pub current_action: CurrentAction,
    /// Invalidates stale action timer fires; bumped on every start/cancel.
    pub action_seq: u64,
    pub pending_harvest: Option<String>,
    pub pending_dig: Option<Vec3>,
    pub wagered: bool,
    pub inventory: Inventory,
    pub upgrades: Upgrades,
}

impl PlayerSession {
    pub fn new(info: SessionInfo) -> Self {
        Self {
            id: info.id,
            address: info.address,
            outbound: info.outbound,
            position: Vec3::default(),
            last_position_ms: 0,
            current_action: CurrentAction::Idle,
            action_seq: 0,
            pending_harvest: None,
            pending_dig: None,
            wagered: false,
            inventory: Inventory::default(),
            upgrades: Upgrades::default(),
        }
    }

    /// Queue a message for this player's connection. Slow consumers lose
    /// messages rather than stalling the room.
    pub fn send(&self, msg: ServerMessage) {
        if let Err(e) = self.outbound.try_send(msg) {
            warn!("Dropping message to {}: {}", self.id, e);
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            position: self.position,
            action: self.current_action,
            connected: true,
            wagered: self.wagered,
            inventory: self.inventory,
            upgrades: self.upgrades,
        }
    }
}
