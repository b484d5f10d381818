//! Client for the off-chain payment channel broker.
//!
//! The broker holds the collateral; this crate keeps one authenticated
//! connection to it, makes sure a funded channel exists for the configured
//! asset, and exposes [`BrokerClient::transfer`]. All protocol details
//! (session-key authorization, challenge/verify, channel resizing) stay
//! behind this boundary.

mod auth;
mod client;
mod rpc;

pub use client::{BrokerClient, BrokerConfig};
