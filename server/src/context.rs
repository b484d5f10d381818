//! Server runtime context.

use std::sync::Arc;

use cove_broker::{BrokerClient, BrokerConfig};
use cove_core::error::Result;
use cove_core::payments::PaymentsT;
use tracing::info;

use crate::config::Config;
use crate::game::ledger::WagerLedger;
use crate::game::manager::RoomManager;

pub struct ApplicationContext {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomManager>,
}

impl ApplicationContext {
    /// Wire the broker connection and the room manager. Broker failures
    /// here are fatal; the caller exits.
    pub async fn try_new(config: Config) -> Result<Self> {
        info!("Initialize application context");
        let config = Arc::new(config);

        let broker = BrokerClient::connect(BrokerConfig {
            ws_url: config.broker_ws_url.clone(),
            private_key: config.private_key.clone(),
            asset: config.asset.clone(),
            custody: config.custody.clone(),
            adjudicator: config.adjudicator.clone(),
            channel_collateral: config.channel_collateral,
        })
        .await?;
        let server_address = broker.address();
        info!("Server wallet address: {}", server_address);
        if let Some(rpc_url) = &config.rpc_url {
            info!("RPC endpoint: {}", rpc_url);
        }

        let payments: Arc<dyn PaymentsT> = Arc::new(broker);
        let ledger = Arc::new(WagerLedger::new(payments));
        let rooms = Arc::new(RoomManager::new(
            config.clone(),
            ledger,
            server_address,
            config.asset.clone(),
        ));

        Ok(Self { config, rooms })
    }

    /// Test wiring with an arbitrary payments implementation.
    #[cfg(test)]
    pub fn with_payments(config: Config, payments: Arc<dyn PaymentsT>) -> Self {
        let config = Arc::new(config);
        let ledger = Arc::new(WagerLedger::new(payments));
        let rooms = Arc::new(RoomManager::new(
            config.clone(),
            ledger,
            "0xserver".into(),
            config.asset.clone(),
        ));
        Self { config, rooms }
    }
}
