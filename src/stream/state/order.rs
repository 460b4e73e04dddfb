//! Order cache state rebuilt from `ocm` change records.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::stream::state::ladder::{replace_or_append, PriceLevel};
use crate::stream::types::{OrderMarketChange, OrderRunnerChange, UnmatchedOrder};

/// Matched amounts and open orders for one selection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunnerOrderState {
    pub selection_id: i64,
    pub handicap: Option<f64>,
    /// Matched back amounts by price, in arrival order
    pub matched_backs: Vec<PriceLevel>,
    /// Matched lay amounts by price, in arrival order
    pub matched_lays: Vec<PriceLevel>,
    /// Full current set of unmatched orders
    pub unmatched_orders: Vec<UnmatchedOrder>,
}

impl RunnerOrderState {
    /// Adopt a runner record verbatim
    pub fn from_change(change: &OrderRunnerChange) -> Self {
        Self {
            selection_id: change.id,
            handicap: change.hc,
            matched_backs: change.mb.iter().copied().map(PriceLevel::from).collect(),
            matched_lays: change.ml.iter().copied().map(PriceLevel::from).collect(),
            unmatched_orders: change.uo.clone().unwrap_or_default(),
        }
    }

    /// Merge a runner delta: matched levels by price, unmatched list replaced
    pub fn apply(&mut self, change: &OrderRunnerChange) {
        if change.hc.is_some() {
            self.handicap = change.hc;
        }
        replace_or_append(
            &mut self.matched_backs,
            change.mb.iter().copied().map(PriceLevel::from),
        );
        replace_or_append(
            &mut self.matched_lays,
            change.ml.iter().copied().map(PriceLevel::from),
        );
        if let Some(orders) = &change.uo {
            self.unmatched_orders = orders.clone();
        }
    }
}

/// Order state for one market
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderBookCache {
    pub market_id: String,
    /// Publish time of the last applied message, epoch milliseconds
    pub publish_time: i64,
    pub closed: bool,
    pub account_id: Option<i64>,
    runners: BTreeMap<i64, RunnerOrderState>,
}

impl OrderBookCache {
    /// Build a cache from a record, discarding any earlier state
    pub fn from_change(publish_time: i64, change: &OrderMarketChange) -> Self {
        let runners = change
            .orc
            .iter()
            .map(|runner| (runner.id, RunnerOrderState::from_change(runner)))
            .collect();

        Self {
            market_id: change.id.clone(),
            publish_time,
            closed: change.closed.unwrap_or(false),
            account_id: change.account_id,
            runners,
        }
    }

    /// Merge a delta record; runner records flagged as full images replace
    /// that runner's state
    pub fn apply(&mut self, publish_time: i64, change: &OrderMarketChange) {
        if publish_time < self.publish_time {
            tracing::warn!(
                "Order market {} publish time went backwards: {} -> {}",
                self.market_id,
                self.publish_time,
                publish_time
            );
        }
        self.publish_time = publish_time;

        if let Some(closed) = change.closed {
            self.closed = closed;
        }
        if change.account_id.is_some() {
            self.account_id = change.account_id;
        }

        for runner in &change.orc {
            if runner.full_image {
                self.runners
                    .insert(runner.id, RunnerOrderState::from_change(runner));
            } else {
                self.runners
                    .entry(runner.id)
                    .or_insert_with(|| RunnerOrderState {
                        selection_id: runner.id,
                        ..Default::default()
                    })
                    .apply(runner);
            }
        }
    }

    pub fn runner(&self, selection_id: i64) -> Option<&RunnerOrderState> {
        self.runners.get(&selection_id)
    }

    /// Runners ordered by selection id
    pub fn runners(&self) -> impl Iterator<Item = &RunnerOrderState> {
        self.runners.values()
    }
}
