//! georef API - HTTP Tiers for Geographic Reference Data
//!
//! One binary, three tiers selected at startup:
//! - Feed accessor: downloads and normalizes the government locality and
//!   street feeds
//! - Storage accessor: partitioned document store with fingerprinted,
//!   cached reads and bulk writes that keep the cache consistent
//! - Manager: public `/v1` surface that orchestrates ingestion through the
//!   service gateway and proxies reads

pub mod config;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod macros;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::{ConfigHandle, ConfigSnapshot, GeorefConfig, Tier};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use feed::{FeedClient, GovernmentFeed, HttpFeedClient};
pub use gateway::{
    GatewayError, HttpTransport, InvocationContext, RemoteTransport, ServiceGateway,
    TransportError, TransportRequest, TransportResponse, CORRELATION_HEADER, FEED_SERVICE,
    STORAGE_SERVICE,
};
pub use middleware::{CorrelationId, RequestContext};
pub use routes::{
    feed_router, finish_router, health_router, manager::ManagerState, manager_router,
    storage_router,
};
pub use state::{AppState, Peers};
