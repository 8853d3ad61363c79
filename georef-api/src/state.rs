//! Shared application state for the tier-independent routes.
//!
//! Tier routers (feed, storage, manager) carry their own state; this is
//! what `/health` and `/version` need on every tier.

use crate::config::{ConfigHandle, Tier};
use crate::gateway::ServiceGateway;

/// Peer tiers whose health and version this tier reports alongside its own.
#[derive(Clone, Default)]
pub struct Peers {
    pub gateway: Option<ServiceGateway>,
    pub services: Vec<String>,
}

impl Peers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(gateway: ServiceGateway, services: Vec<String>) -> Self {
        Self {
            gateway: Some(gateway),
            services,
        }
    }
}

/// Application-wide state shared across the common routes.
#[derive(Clone)]
pub struct AppState {
    pub tier: Tier,
    pub config: ConfigHandle,
    pub peers: Peers,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(tier: Tier, config: ConfigHandle, peers: Peers) -> Self {
        Self {
            tier,
            config,
            peers,
            start_time: std::time::Instant::now(),
        }
    }
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(Tier, tier);
crate::impl_from_ref!(ConfigHandle, config);
crate::impl_from_ref!(Peers, peers);
crate::impl_from_ref!(std::time::Instant, start_time);
