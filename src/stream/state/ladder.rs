//! Price ladders rebuilt from `[price, size]` deltas.
//!
//! A size of exactly `0.0` removes the level at that price. Prices are
//! joined by exact floating-point equality, as the exchange sends them.

use serde::Serialize;

/// Sort order of a ladder, fixed when the ladder is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    /// Lowest price first (lay side, traded)
    Ascending,
    /// Highest price first (back side)
    Descending,
}

/// One ladder rung
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

impl From<[f64; 2]> for PriceLevel {
    fn from([price, size]: [f64; 2]) -> Self {
        Self { price, size }
    }
}

/// Ladder rung of a depth-limited view; `position` is informational only
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionedPriceLevel {
    pub position: u32,
    pub price: f64,
    pub size: f64,
}

impl PositionedPriceLevel {
    pub fn new(position: u32, price: f64, size: f64) -> Self {
        Self {
            position,
            price,
            size,
        }
    }
}

impl From<[f64; 3]> for PositionedPriceLevel {
    fn from([position, price, size]: [f64; 3]) -> Self {
        Self {
            position: position as u32,
            price,
            size,
        }
    }
}

/// A rung that can live in a [`Ladder`]
pub trait Level: Copy {
    fn price(&self) -> f64;
    fn size(&self) -> f64;
}

impl Level for PriceLevel {
    fn price(&self) -> f64 {
        self.price
    }

    fn size(&self) -> f64 {
        self.size
    }
}

impl Level for PositionedPriceLevel {
    fn price(&self) -> f64 {
        self.price
    }

    fn size(&self) -> f64 {
        self.size
    }
}

/// Sorted levels for one side of a runner's book.
///
/// Invariants after every [`Ladder::apply`]: sorted by the ladder's
/// direction, at most one level per price, no zero-size levels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ladder<L> {
    levels: Vec<L>,
    direction: SortDirection,
}

/// Ladder of `[price, size]` levels
pub type PriceLadder = Ladder<PriceLevel>;

/// Ladder of `[position, price, size]` levels
pub type PositionedLadder = Ladder<PositionedPriceLevel>;

impl<L: Level> Ladder<L> {
    /// Create an empty ladder
    pub fn new(direction: SortDirection) -> Self {
        Self {
            levels: Vec::new(),
            direction,
        }
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    /// All levels, best price first
    pub fn levels(&self) -> &[L] {
        &self.levels
    }

    /// Best level (head of the ladder)
    pub fn best(&self) -> Option<&L> {
        self.levels.first()
    }

    /// Level at an exact price
    pub fn get(&self, price: f64) -> Option<&L> {
        self.levels.iter().find(|level| level.price() == price)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Merge a batch of deltas, then re-sort.
    ///
    /// Matching price with size zero removes the level; matching price
    /// otherwise replaces it; an unknown price is appended unless its size is
    /// zero, in which case the delta is ignored.
    pub fn apply<I>(&mut self, deltas: I)
    where
        I: IntoIterator<Item = L>,
    {
        for delta in deltas {
            let existing = self
                .levels
                .iter()
                .position(|level| level.price() == delta.price());

            match existing {
                Some(index) if delta.size() == 0.0 => {
                    self.levels.swap_remove(index);
                }
                Some(index) => self.levels[index] = delta,
                None if delta.size() != 0.0 => self.levels.push(delta),
                None => {}
            }
        }
        self.sort();
    }

    fn sort(&mut self) {
        match self.direction {
            SortDirection::Ascending => self
                .levels
                .sort_by(|a, b| a.price().total_cmp(&b.price())),
            SortDirection::Descending => self
                .levels
                .sort_by(|a, b| b.price().total_cmp(&a.price())),
        }
    }
}

/// Replace the level at a matching price or append a new one.
///
/// Used for matched amounts, which are never removed by a zero size and keep
/// their arrival order.
pub fn replace_or_append<I>(levels: &mut Vec<PriceLevel>, updates: I)
where
    I: IntoIterator<Item = PriceLevel>,
{
    for update in updates {
        match levels.iter_mut().find(|level| level.price == update.price) {
            Some(level) => *level = update,
            None => levels.push(update),
        }
    }
}
