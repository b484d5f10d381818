//! Configuration of the server, read from the environment.

use std::env;
use std::str::FromStr;

use cove_core::error::{Error, Result};
use tracing::warn;

const DEFAULT_BROKER_WS_URL: &str = "wss://clearnet.yellow.com/ws";
const DEFAULT_ASSET: &str = "usdc";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Wallet key used for broker session authorization. Required.
    pub private_key: String,
    pub broker_ws_url: String,
    pub asset: String,
    pub custody: Option<String>,
    pub adjudicator: Option<String>,
    pub rpc_url: Option<String>,
    pub wager_amount: u64,
    pub channel_collateral: u64,

    // Room rules. The first block is tunable from the environment.
    pub countdown_ms: u64,
    pub harvest_duration_ms: u64,
    pub dig_duration_ms: u64,
    pub chest_find_radius: f64,
    pub game_timeout_ms: u64,
    pub max_speed: f64,

    pub min_players: usize,
    pub max_players: usize,
    pub harvest_proximity: f64,
    pub speed_tolerance: f64,
    pub sync_broadcast_rate_ms: u64,
    pub position_min_interval_ms: u64,
    pub end_grace_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let private_key = env::var("PRIVATE_KEY")
            .map_err(|_| Error::ConfigMissing("PRIVATE_KEY".into()))?;

        Ok(Config {
            port: env_or("GAME_PORT", 3002),
            private_key,
            broker_ws_url: env::var("YELLOW_WS_URL")
                .unwrap_or_else(|_| DEFAULT_BROKER_WS_URL.into()),
            asset: env::var("YELLOW_TOKEN").unwrap_or_else(|_| DEFAULT_ASSET.into()),
            custody: env::var("YELLOW_CUSTODY").ok(),
            adjudicator: env::var("YELLOW_ADJUDICATOR").ok(),
            rpc_url: env::var("RPC_URL").ok(),
            wager_amount: env_or("WAGER_AMOUNT", 5),
            channel_collateral: env_or("CHANNEL_COLLATERAL", 1000),

            countdown_ms: env_or("COUNTDOWN_MS", 10_000),
            harvest_duration_ms: env_or("HARVEST_DURATION_MS", 3_000),
            dig_duration_ms: env_or("DIG_DURATION_MS", 3_000),
            chest_find_radius: env_or("CHEST_FIND_RADIUS", 2.0),
            game_timeout_ms: env_or("GAME_TIMEOUT_MS", 1_800_000),
            max_speed: env_or("MAX_SPEED", 40.0),

            min_players: 2,
            max_players: 8,
            harvest_proximity: 5.0,
            speed_tolerance: 1.5,
            sync_broadcast_rate_ms: 100,
            position_min_interval_ms: 50,
            end_grace_ms: 10_000,
        })
    }
}

/// Read and parse an environment variable, falling back to `default` when
/// unset or unparseable.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Invalid {}: {:?}, using default {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Millisecond-scale timers for driving rooms in tests.
#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        port: 0,
        private_key: String::new(),
        broker_ws_url: String::new(),
        asset: "usdc".into(),
        custody: None,
        adjudicator: None,
        rpc_url: None,
        wager_amount: 5,
        channel_collateral: 1000,
        countdown_ms: 40,
        harvest_duration_ms: 30,
        dig_duration_ms: 30,
        chest_find_radius: 2.0,
        game_timeout_ms: 60_000,
        max_speed: 10_000.0,
        min_players: 2,
        max_players: 8,
        harvest_proximity: 5.0,
        speed_tolerance: 1.5,
        sync_broadcast_rate_ms: 500,
        position_min_interval_ms: 0,
        end_grace_ms: 40,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_when_unset() {
        let port: u16 = env_or("COVE_TEST_UNSET_VAR", 3002);
        assert_eq!(port, 3002);
    }

    #[test]
    fn test_env_or_parses_set_value() {
        env::set_var("COVE_TEST_PORT_VAR", "4100");
        let port: u16 = env_or("COVE_TEST_PORT_VAR", 3002);
        assert_eq!(port, 4100);
        env::remove_var("COVE_TEST_PORT_VAR");
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        env::set_var("COVE_TEST_BAD_VAR", "not-a-number");
        let amount: u64 = env_or("COVE_TEST_BAD_VAR", 5);
        assert_eq!(amount, 5);
        env::remove_var("COVE_TEST_BAD_VAR");
    }
}
