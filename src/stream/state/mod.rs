//! Cache state rebuilt from stream change messages.
//!
//! - `ladder`: price ladders and the merge-then-resort algorithm
//! - `market`: market and runner caches plus `MarketBook` snapshots
//! - `order`: per-market order caches

pub mod ladder;
pub mod market;
pub mod order;

pub use ladder::{
    Ladder, PositionedLadder, PositionedPriceLevel, PriceLadder, PriceLevel, SortDirection,
};
pub use market::{ExchangePrices, MarketBook, MarketCache, RunnerBook, RunnerCache, StartingPrices};
pub use order::{OrderBookCache, RunnerOrderState};
