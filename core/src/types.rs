//! Game state types shared by the server and the reference clients.

use serde::{Deserialize, Serialize};

/// Berry count to movement speed conversion.
pub const BERRY_BONUS: f64 = 0.08;
/// Per-tier dig duration multiplier, below 1 means faster.
pub const DIG_MULT: f64 = 0.90;
/// Wood and stone required per dig upgrade tier.
pub const DIG_UPGRADE_STEP: u32 = 5;
/// Wood required to unlock the treasure map hint.
pub const MAP_WOOD_THRESHOLD: u32 = 50;
/// Disclosed radius of the treasure map hint, meters.
pub const MAP_REVEAL_RADIUS: f64 = 30.0;

/// A position in meters. `y` is elevation and advisory only, the server
/// validates horizontally.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance on the horizontal plane, ignoring elevation.
    pub fn horizontal_distance(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Wood,
    Stone,
    Berry,
}

/// A harvestable node on the island. Created at room start from the seed,
/// mutated only by a successful harvest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub position: Vec3,
    pub harvested: bool,
}

/// Non-negative resource counts, monotonically non-decreasing during a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub wood: u32,
    pub stone: u32,
    pub berry: u32,
}

impl Inventory {
    pub fn add(&mut self, kind: ResourceKind) {
        match kind {
            ResourceKind::Wood => self.wood += 1,
            ResourceKind::Stone => self.stone += 1,
            ResourceKind::Berry => self.berry += 1,
        }
    }
}

/// Derived modifiers, a pure function of the inventory. `dig_upgrades_taken`
/// and `has_map` are clamped so they never regress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrades {
    pub speed_multiplier: f64,
    pub dig_upgrades_taken: u32,
    pub dig_multiplier: f64,
    pub has_map: bool,
}

impl Default for Upgrades {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            dig_upgrades_taken: 0,
            dig_multiplier: 1.0,
            has_map: false,
        }
    }
}

impl Upgrades {
    /// Recompute from the inventory, carrying the monotonic parts forward
    /// from the previous derivation.
    pub fn derive(inventory: &Inventory, prior: &Upgrades) -> Upgrades {
        let tiers = (inventory.stone / DIG_UPGRADE_STEP).min(inventory.wood / DIG_UPGRADE_STEP);
        let dig_upgrades_taken = tiers.max(prior.dig_upgrades_taken);
        Upgrades {
            speed_multiplier: 1.0 + inventory.berry as f64 * BERRY_BONUS,
            dig_upgrades_taken,
            dig_multiplier: DIG_MULT.powi(dig_upgrades_taken as i32),
            has_map: prior.has_map || inventory.wood >= MAP_WOOD_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurrentAction {
    Idle,
    Harvesting,
    Digging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Lobby,
    Playing,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ChestFound,
    Timeout,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeKind {
    Speed,
    DigSpeed,
    Map,
}

/// Per-player state as broadcast in the periodic sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: String,
    pub address: String,
    pub position: Vec3,
    pub action: CurrentAction,
    pub connected: bool,
    pub wagered: bool,
    pub inventory: Inventory,
    pub upgrades: Upgrades,
}

/// One staked wager. Added on confirmation, removed by payout or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerRecord {
    pub player_id: String,
    pub address: String,
    pub amount: u64,
    pub timestamp: u64,
}
