//! # Betfair Exchange Stream Rust Client
//!
//! A Rust client for the Betfair Exchange Stream API.
//!
//! ## Modules
//!
//! - [`stream`]: Socket transport, session pumps, message handlers and caches
//! - [`auth`]: Client certificate and stream credentials
//! - [`config`]: Account config file and session tuning
//! - [`network`]: Live and integration endpoints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use betfair_stream::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExchangeConfig::load("config.json")?;
//!     let mut client = BetfairStreamClient::from_config(&config, StreamConfig::default())?;
//!
//!     // Session token from a prior login
//!     let mut outputs = client.start("session-token").await?;
//!
//!     client
//!         .subscribe_to_markets(
//!             MarketFilter::markets(["1.23456789"]),
//!             MarketDataFilter::default(),
//!         )
//!         .await?;
//!
//!     while let Some(book) = outputs.market_updates.recv().await {
//!         println!("{} matched {}", book.market_id, book.total_matched);
//!     }
//!
//!     client.stop();
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Streaming endpoint constants.
pub mod network;

/// Client certificate and stream credentials.
pub mod auth;

/// Account config file and session tuning.
pub mod config;

/// Stream client, session, message handlers and caches.
pub mod stream;

// ============================================================================
// PRELUDE
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use betfair_stream::prelude::*;
/// ```
pub mod prelude {
    // Client and session
    pub use crate::stream::{BetfairStreamClient, Session, StreamOutputs, StreamError, StreamResult};

    // Subscription filters
    pub use crate::stream::{
        MarketDataField, MarketDataFilter, MarketFilter, OrderFilter,
    };

    // Snapshots and events
    pub use crate::stream::{
        ExchangePrices, MarketBook, MarketSubscriptionResponse, OrderBookCache, PriceLevel,
        RunnerBook, RunnerOrderState, StartingPrices, StatusMessage, StreamClock, StreamEvent,
    };

    // Configuration and credentials
    pub use crate::auth::{ClientCertificate, Credentials};
    pub use crate::config::{ConfigError, ExchangeConfig, StreamConfig};
    pub use crate::network::{Endpoint, INTEGRATION_STREAM_ENDPOINT, LIVE_STREAM_ENDPOINT};
}
