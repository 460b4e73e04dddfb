//! Market cache state rebuilt from `mcm` change records.
//!
//! The cache is mutable and owned by the market handler; consumers only ever
//! see [`MarketBook`] snapshots derived from it after each change.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stream::state::ladder::{
    PositionedLadder, PositionedPriceLevel, PriceLadder, PriceLevel, SortDirection,
};
use crate::stream::types::{MarketChange, MarketDefinition, RunnerChange, RunnerDefinition};

/// Scalar fields are cumulative on the wire; zero means "not sent"
fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

// ============================================================================
// Runner cache
// ============================================================================

/// Cached book for one selection
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerCache {
    pub selection_id: i64,
    pub handicap: Option<f64>,
    pub last_traded_price: f64,
    pub traded_volume: f64,
    pub starting_price_near: f64,
    pub starting_price_far: f64,
    pub traded: PriceLadder,
    pub available_to_back: PriceLadder,
    pub available_to_lay: PriceLadder,
    pub starting_price_back: PriceLadder,
    pub starting_price_lay: PriceLadder,
    pub best_available_to_back: PositionedLadder,
    pub best_available_to_lay: PositionedLadder,
    pub best_display_available_to_back: PositionedLadder,
    pub best_display_available_to_lay: PositionedLadder,
}

impl RunnerCache {
    /// Empty cache; back ladders sort descending, lay and traded ascending
    pub fn new(selection_id: i64) -> Self {
        use SortDirection::{Ascending, Descending};

        Self {
            selection_id,
            handicap: None,
            last_traded_price: 0.0,
            traded_volume: 0.0,
            starting_price_near: 0.0,
            starting_price_far: 0.0,
            traded: PriceLadder::new(Ascending),
            available_to_back: PriceLadder::new(Descending),
            available_to_lay: PriceLadder::new(Ascending),
            starting_price_back: PriceLadder::new(Descending),
            starting_price_lay: PriceLadder::new(Ascending),
            best_available_to_back: PositionedLadder::new(Descending),
            best_available_to_lay: PositionedLadder::new(Ascending),
            best_display_available_to_back: PositionedLadder::new(Descending),
            best_display_available_to_lay: PositionedLadder::new(Ascending),
        }
    }

    /// Merge one runner change record
    pub fn apply(&mut self, change: &RunnerChange) {
        if change.hc.is_some() {
            self.handicap = change.hc;
        }
        if let Some(ltp) = non_zero(change.ltp) {
            self.last_traded_price = ltp;
        }
        if let Some(tv) = non_zero(change.tv) {
            self.traded_volume = tv;
        }
        if let Some(spn) = non_zero(change.spn) {
            self.starting_price_near = spn;
        }
        if let Some(spf) = non_zero(change.spf) {
            self.starting_price_far = spf;
        }

        merge(&mut self.traded, &change.trd);
        merge(&mut self.available_to_back, &change.atb);
        merge(&mut self.available_to_lay, &change.atl);
        merge(&mut self.starting_price_back, &change.spb);
        merge(&mut self.starting_price_lay, &change.spl);
        merge_positioned(&mut self.best_available_to_back, &change.batb);
        merge_positioned(&mut self.best_available_to_lay, &change.batl);
        merge_positioned(&mut self.best_display_available_to_back, &change.bdatb);
        merge_positioned(&mut self.best_display_available_to_lay, &change.bdatl);
    }

    /// Snapshot of this runner combined with its definition entry
    pub fn snapshot(&self, definition: Option<&RunnerDefinition>) -> RunnerBook {
        RunnerBook {
            selection_id: self.selection_id,
            handicap: definition
                .map(|d| d.hc)
                .or(self.handicap)
                .unwrap_or_default(),
            status: definition.map(|d| d.status.clone()).unwrap_or_default(),
            adjustment_factor: definition.map(|d| d.adjustment_factor).unwrap_or_default(),
            last_price_traded: self.last_traded_price,
            total_matched: self.traded_volume,
            removal_date: definition.and_then(|d| d.removal_date),
            sp: StartingPrices {
                near_price: self.starting_price_near,
                far_price: self.starting_price_far,
                back_stake_taken: self.starting_price_back.levels().to_vec(),
                lay_liability_taken: self.starting_price_lay.levels().to_vec(),
            },
            ex: ExchangePrices {
                available_to_back: self.available_to_back.levels().to_vec(),
                available_to_lay: self.available_to_lay.levels().to_vec(),
                traded_volume: self.traded.levels().to_vec(),
                best_available_to_back: self.best_available_to_back.levels().to_vec(),
                best_available_to_lay: self.best_available_to_lay.levels().to_vec(),
                best_display_available_to_back: self.best_display_available_to_back.levels().to_vec(),
                best_display_available_to_lay: self.best_display_available_to_lay.levels().to_vec(),
            },
        }
    }
}

fn merge(ladder: &mut PriceLadder, deltas: &[[f64; 2]]) {
    if !deltas.is_empty() {
        ladder.apply(deltas.iter().copied().map(PriceLevel::from));
    }
}

fn merge_positioned(ladder: &mut PositionedLadder, deltas: &[[f64; 3]]) {
    if !deltas.is_empty() {
        ladder.apply(deltas.iter().copied().map(PositionedPriceLevel::from));
    }
}

// ============================================================================
// Market cache
// ============================================================================

/// Cached state for one market
#[derive(Debug, Clone, PartialEq)]
pub struct MarketCache {
    pub market_id: String,
    /// Publish time of the last applied message, epoch milliseconds
    pub publish_time: i64,
    pub traded_volume: f64,
    pub definition: Option<MarketDefinition>,
    runners: BTreeMap<i64, RunnerCache>,
}

impl MarketCache {
    pub fn new(market_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            publish_time: 0,
            traded_volume: 0.0,
            definition: None,
            runners: BTreeMap::new(),
        }
    }

    /// Merge one market change record published at `publish_time`.
    ///
    /// Initial images and incremental updates share this path: on a fresh
    /// cache every ladder starts empty.
    pub fn apply(&mut self, publish_time: i64, change: &MarketChange) {
        if publish_time < self.publish_time {
            tracing::warn!(
                "Market {} publish time went backwards: {} -> {}",
                self.market_id,
                self.publish_time,
                publish_time
            );
        }
        self.publish_time = publish_time;

        if let Some(definition) = &change.market_definition {
            self.definition = Some(definition.clone());
        }
        if let Some(tv) = non_zero(change.tv) {
            self.traded_volume = tv;
        }

        for runner_change in &change.rc {
            self.runners
                .entry(runner_change.id)
                .or_insert_with(|| RunnerCache::new(runner_change.id))
                .apply(runner_change);
        }
    }

    pub fn runner(&self, selection_id: i64) -> Option<&RunnerCache> {
        self.runners.get(&selection_id)
    }

    /// Runners ordered by selection id
    pub fn runners(&self) -> impl Iterator<Item = &RunnerCache> {
        self.runners.values()
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    /// Definition entry for a selection, if a definition has been received
    pub fn runner_definition(&self, selection_id: i64) -> Option<&RunnerDefinition> {
        self.definition
            .as_ref()?
            .runners
            .iter()
            .find(|runner| runner.id == selection_id)
    }

    /// Derive an immutable snapshot of the current state
    pub fn snapshot(&self) -> MarketBook {
        let definition = self.definition.as_ref();
        let runners = self
            .runners
            .values()
            .map(|runner| runner.snapshot(self.runner_definition(runner.selection_id)))
            .collect();

        MarketBook {
            publish_time: self.publish_time,
            market_id: self.market_id.clone(),
            status: definition.map(|d| d.status.clone()).unwrap_or_default(),
            bet_delay: definition.map(|d| d.bet_delay).unwrap_or_default(),
            bsp_reconciled: definition.is_some_and(|d| d.bsp_reconciled),
            complete: definition.is_some_and(|d| d.complete),
            in_play: definition.is_some_and(|d| d.in_play),
            number_of_winners: definition.map(|d| d.number_of_winners).unwrap_or_default(),
            number_of_runners: self.runners.len(),
            number_of_active_runners: definition
                .map(|d| d.number_of_active_runners)
                .unwrap_or_default(),
            total_matched: self.traded_volume,
            cross_matching: definition.is_some_and(|d| d.cross_matching),
            runners_voidable: definition.is_some_and(|d| d.runners_voidable),
            version: definition.map(|d| d.version).unwrap_or_default(),
            market_time: definition.and_then(|d| d.market_time),
            runners,
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Read-only view of a market at one publish time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketBook {
    pub publish_time: i64,
    pub market_id: String,
    pub status: String,
    pub bet_delay: i32,
    pub bsp_reconciled: bool,
    pub complete: bool,
    pub in_play: bool,
    pub number_of_winners: i32,
    pub number_of_runners: usize,
    pub number_of_active_runners: i32,
    pub total_matched: f64,
    pub cross_matching: bool,
    pub runners_voidable: bool,
    pub version: i64,
    pub market_time: Option<DateTime<Utc>>,
    pub runners: Vec<RunnerBook>,
}

impl MarketBook {
    pub fn runner(&self, selection_id: i64) -> Option<&RunnerBook> {
        self.runners.iter().find(|r| r.selection_id == selection_id)
    }
}

/// Read-only view of one runner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerBook {
    pub selection_id: i64,
    pub handicap: f64,
    pub status: String,
    pub adjustment_factor: f64,
    pub last_price_traded: f64,
    pub total_matched: f64,
    pub removal_date: Option<DateTime<Utc>>,
    pub sp: StartingPrices,
    pub ex: ExchangePrices,
}

/// Exchange ladders, best price first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExchangePrices {
    pub available_to_back: Vec<PriceLevel>,
    pub available_to_lay: Vec<PriceLevel>,
    pub traded_volume: Vec<PriceLevel>,
    pub best_available_to_back: Vec<PositionedPriceLevel>,
    pub best_available_to_lay: Vec<PositionedPriceLevel>,
    pub best_display_available_to_back: Vec<PositionedPriceLevel>,
    pub best_display_available_to_lay: Vec<PositionedPriceLevel>,
}

impl ExchangePrices {
    /// Best back price from the full ladder, else from the depth-limited one
    pub fn best_back(&self) -> Option<PriceLevel> {
        self.available_to_back.first().copied().or_else(|| {
            self.best_available_to_back
                .first()
                .map(|l| PriceLevel::new(l.price, l.size))
        })
    }

    /// Best lay price from the full ladder, else from the depth-limited one
    pub fn best_lay(&self) -> Option<PriceLevel> {
        self.available_to_lay.first().copied().or_else(|| {
            self.best_available_to_lay
                .first()
                .map(|l| PriceLevel::new(l.price, l.size))
        })
    }
}

/// Starting price projections and ladders
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartingPrices {
    pub near_price: f64,
    pub far_price: f64,
    pub back_stake_taken: Vec<PriceLevel>,
    pub lay_liability_taken: Vec<PriceLevel>,
}
