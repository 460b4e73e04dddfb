//! Betfair Exchange Stream API client.
//!
//! The stream is a TLS socket carrying CRLF-terminated JSON frames. After the
//! connection frame and an authentication exchange, the session runs two
//! pumps: one writes queued subscription requests, the other decodes incoming
//! frames, folds change messages into local caches, and publishes snapshots.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use betfair_stream::prelude::*;
//!
//! let mut client = BetfairStreamClient::from_config(&config, StreamConfig::default())?;
//! let mut outputs = client.start(&session_token).await?;
//!
//! client
//!     .subscribe_to_markets(MarketFilter::markets(["1.23456789"]), MarketDataFilter::default())
//!     .await?;
//!
//! while let Some(book) = outputs.market_updates.recv().await {
//!     if let Some(runner) = book.runners.first() {
//!         println!("{} best back: {:?}", runner.selection_id, runner.ex.best_back());
//!     }
//! }
//! ```

pub mod client;
pub mod error;
pub mod handlers;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::BetfairStreamClient;
pub use error::{StreamError, StreamResult};
pub use handlers::{
    MarketHandler, MarketSubscriptionResponse, MessageHandler, OrderHandler, StreamClock,
    StreamEvent,
};
pub use session::{Session, StreamOutputs};
pub use state::{
    ExchangePrices, MarketBook, MarketCache, OrderBookCache, PositionedPriceLevel, PriceLevel,
    RunnerBook, RunnerOrderState, StartingPrices,
};
pub use transport::{FrameReader, FrameWriter, Transport};
pub use types::*;
