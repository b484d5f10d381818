use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Room is full: {0}")]
    RoomIsFull(u32),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Wrong phase")]
    WrongPhase,

    #[error("Player is busy")]
    PlayerBusy,

    #[error("Invalid resource")]
    InvalidResource,

    #[error("Too far away")]
    TooFarAway,

    #[error("Moving too fast")]
    MovingTooFast,

    #[error("Invalid dig position")]
    InvalidDigPosition,

    #[error("Player not in game")]
    PlayerNotInGame,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Broker not ready")]
    NotReady,

    #[error("Rpc error: {0}")]
    RpcError(String),

    #[error("Auth failed: {0}")]
    AuthFailed(String),

    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Config missing: {0}")]
    ConfigMissing(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
