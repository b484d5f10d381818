//! Wire messages exchanged with clients. Each WebSocket frame is one JSON
//! object tagged by `type`; encode/decode must be the identity.

use serde::{Deserialize, Serialize};

use crate::types::{
    EndReason, Inventory, Phase, PlayerSnapshot, Resource, ResourceKind, UpgradeKind, Upgrades,
    Vec3,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinRoom { address: String },
    LeaveRoom,
    WagerConfirmed,
    Ready,
    PositionUpdate { position: Vec3 },
    StartHarvest { resource_id: String },
    StartDig { position: Vec3 },
    CancelHarvest,
    CancelDig,
    Ping { t: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    RoomJoined {
        room_id: String,
        player_id: String,
        phase: Phase,
        players: Vec<PlayerSnapshot>,
    },
    WagerRequired {
        amount: u64,
        server_address: String,
        asset: String,
    },
    WagerAccepted {
        player_id: String,
    },
    GameStarting {
        countdown: u64,
    },
    GameStarted {
        seed: u32,
        resources: Vec<Resource>,
    },
    PlayerMoved {
        player_id: String,
        position: Vec3,
    },
    PlayersSync {
        players: Vec<PlayerSnapshot>,
    },
    HarvestStarted {
        player_id: String,
        resource_id: String,
    },
    HarvestComplete {
        player_id: String,
        resource_id: String,
        resource_type: ResourceKind,
        inventory: Inventory,
        upgrades: Upgrades,
    },
    DigStarted {
        player_id: String,
        position: Vec3,
    },
    DigComplete {
        player_id: String,
        found: bool,
    },
    ChestFound {
        player_id: String,
        position: Vec3,
    },
    UpgradeUnlocked {
        player_id: String,
        upgrade: UpgradeKind,
    },
    MapRevealed {
        center: Vec3,
        radius: f64,
    },
    GameEnded {
        winner_id: Option<String>,
        reason: EndReason,
    },
    PayoutComplete {
        winner_id: Option<String>,
        amount: u64,
    },
    PlayerLeft {
        player_id: String,
    },
    Error {
        message: String,
    },
    Pong {
        t: u64,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerMessage::RoomJoined { room_id, .. } => write!(f, "RoomJoined: {}", room_id),
            ServerMessage::WagerRequired { amount, .. } => write!(f, "WagerRequired: {}", amount),
            ServerMessage::WagerAccepted { player_id } => write!(f, "WagerAccepted: {}", player_id),
            ServerMessage::GameStarting { countdown } => write!(f, "GameStarting: {}", countdown),
            ServerMessage::GameStarted { seed, resources } => {
                write!(f, "GameStarted: seed = {}, resources = {}", seed, resources.len())
            }
            ServerMessage::PlayerMoved { player_id, .. } => write!(f, "PlayerMoved: {}", player_id),
            ServerMessage::PlayersSync { players } => write!(f, "PlayersSync: {}", players.len()),
            ServerMessage::HarvestStarted { player_id, resource_id } => {
                write!(f, "HarvestStarted: {} -> {}", player_id, resource_id)
            }
            ServerMessage::HarvestComplete { player_id, resource_id, .. } => {
                write!(f, "HarvestComplete: {} -> {}", player_id, resource_id)
            }
            ServerMessage::DigStarted { player_id, .. } => write!(f, "DigStarted: {}", player_id),
            ServerMessage::DigComplete { player_id, found } => {
                write!(f, "DigComplete: {}, found = {}", player_id, found)
            }
            ServerMessage::ChestFound { player_id, .. } => write!(f, "ChestFound: {}", player_id),
            ServerMessage::UpgradeUnlocked { player_id, upgrade } => {
                write!(f, "UpgradeUnlocked: {} {:?}", player_id, upgrade)
            }
            ServerMessage::MapRevealed { .. } => write!(f, "MapRevealed"),
            ServerMessage::GameEnded { winner_id, reason } => {
                write!(f, "GameEnded: {:?}, {:?}", winner_id, reason)
            }
            ServerMessage::PayoutComplete { winner_id, amount } => {
                write!(f, "PayoutComplete: {:?}, {}", winner_id, amount)
            }
            ServerMessage::PlayerLeft { player_id } => write!(f, "PlayerLeft: {}", player_id),
            ServerMessage::Error { message } => write!(f, "Error: {}", message),
            ServerMessage::Pong { .. } => write!(f, "Pong"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CurrentAction;

    fn roundtrip_client(msg: ClientMessage) {
        let text = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg, back);
    }

    fn roundtrip_server(msg: ServerMessage) {
        let text = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_client_messages_roundtrip() {
        roundtrip_client(ClientMessage::JoinRoom {
            address: "0xabc".into(),
        });
        roundtrip_client(ClientMessage::LeaveRoom);
        roundtrip_client(ClientMessage::WagerConfirmed);
        roundtrip_client(ClientMessage::Ready);
        roundtrip_client(ClientMessage::PositionUpdate {
            position: Vec3::new(1.5, 0.0, -2.25),
        });
        roundtrip_client(ClientMessage::StartHarvest {
            resource_id: "res_7".into(),
        });
        roundtrip_client(ClientMessage::StartDig {
            position: Vec3::new(10.0, 0.0, 20.0),
        });
        roundtrip_client(ClientMessage::CancelHarvest);
        roundtrip_client(ClientMessage::CancelDig);
        roundtrip_client(ClientMessage::Ping { t: 1234 });
    }

    #[test]
    fn test_server_messages_roundtrip() {
        roundtrip_server(ServerMessage::RoomJoined {
            room_id: "room-1".into(),
            player_id: "p1".into(),
            phase: Phase::Lobby,
            players: vec![PlayerSnapshot {
                id: "p1".into(),
                address: "0xabc".into(),
                position: Vec3::default(),
                action: CurrentAction::Idle,
                connected: true,
                wagered: false,
                inventory: Inventory::default(),
                upgrades: Upgrades::default(),
            }],
        });
        roundtrip_server(ServerMessage::GameStarted {
            seed: 12345,
            resources: vec![Resource {
                id: "res_0".into(),
                kind: ResourceKind::Berry,
                position: Vec3::new(4.0, 0.0, 9.0),
                harvested: false,
            }],
        });
        roundtrip_server(ServerMessage::GameEnded {
            winner_id: Some("p1".into()),
            reason: EndReason::ChestFound,
        });
        roundtrip_server(ServerMessage::GameEnded {
            winner_id: None,
            reason: EndReason::Timeout,
        });
        roundtrip_server(ServerMessage::PayoutComplete {
            winner_id: None,
            amount: 0,
        });
        roundtrip_server(ServerMessage::UpgradeUnlocked {
            player_id: "p1".into(),
            upgrade: UpgradeKind::DigSpeed,
        });
        roundtrip_server(ServerMessage::Pong { t: 77 });
    }

    #[test]
    fn test_wire_field_names() {
        let text = serde_json::to_string(&ClientMessage::StartHarvest {
            resource_id: "res_3".into(),
        })
        .unwrap();
        assert!(text.contains("\"type\":\"StartHarvest\""));
        assert!(text.contains("\"resourceId\":\"res_3\""));

        let text = serde_json::to_string(&ServerMessage::GameEnded {
            winner_id: None,
            reason: EndReason::ChestFound,
        })
        .unwrap();
        assert!(text.contains("\"winnerId\":null"));
        assert!(text.contains("\"chest_found\""));

        let text = serde_json::to_string(&ServerMessage::UpgradeUnlocked {
            player_id: "p".into(),
            upgrade: UpgradeKind::DigSpeed,
        })
        .unwrap();
        assert!(text.contains("\"dig_speed\""));
    }
}
