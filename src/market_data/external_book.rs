use std::collections::BTreeMap;
use std::fmt;

use crate::engine::types::PriceLevel;
use crate::market_data::normaliser::{KeyedLevel, PriceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        })
    }
}

// One side of the mirrored venue book: the map is the store, `view` the
// sorted depth-capped copy handed to readers.
#[derive(Debug, Clone)]
pub struct BookSide {
    side: Side,
    depth: usize,
    levels: BTreeMap<PriceKey, PriceLevel>,
    view: Vec<PriceLevel>,
}

impl BookSide {
    pub fn new(side: Side, depth: usize) -> Self {
        Self { side, depth: depth.max(1), levels: BTreeMap::new(), view: Vec::new() }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    // Wholesale replacement; rows without a positive size are skipped
    pub fn replace(&mut self, levels: &[KeyedLevel]) {
        self.levels.clear();
        for level in levels.iter().filter(|l| l.size > 0.0 && l.size.is_finite()) {
            self.levels.insert(level.key, PriceLevel::new(level.price, level.size));
        }
    }

    // Upsert positive sizes, delete on zero/negative
    pub fn apply(&mut self, updates: &[KeyedLevel]) {
        for update in updates {
            if !update.size.is_finite() {
                continue;
            }
            if update.size > 0.0 {
                self.levels.insert(update.key, PriceLevel::new(update.price, update.size));
            } else {
                self.levels.remove(&update.key);
            }
        }
    }

    pub fn refresh_view(&mut self) {
        self.view.clear();
        match self.side {
            Side::Bid => self.view.extend(self.levels.values().rev().take(self.depth).copied()),
            Side::Ask => self.view.extend(self.levels.values().take(self.depth).copied()),
        }
    }

    pub fn view(&self) -> &[PriceLevel] {
        &self.view
    }

    pub fn best(&self) -> Option<PriceLevel> {
        match self.side {
            Side::Bid => self.levels.values().next_back().copied(),
            Side::Ask => self.levels.values().next().copied(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.view.clear();
    }
}

// Local mirror of the primary venue's book
#[derive(Debug, Clone)]
pub struct ExternalBook {
    pub bids: BookSide, // highest price = best bid
    pub asks: BookSide, // lowest price  = best ask
}

impl ExternalBook {
    pub fn new(depth: usize) -> Self {
        Self { bids: BookSide::new(Side::Bid, depth), asks: BookSide::new(Side::Ask, depth) }
    }

    // Replace the whole book with a fresh snapshot
    pub fn apply_snapshot(&mut self, bids: &[KeyedLevel], asks: &[KeyedLevel]) {
        self.bids.replace(bids);
        self.asks.replace(asks);
        self.refresh();
    }

    pub fn apply_diff(&mut self, bids: &[KeyedLevel], asks: &[KeyedLevel]) {
        self.bids.apply(bids);
        self.asks.apply(asks);
        self.refresh();
    }

    pub fn bbo(&self) -> (Option<PriceLevel>, Option<PriceLevel>) {
        (self.bids.best(), self.asks.best())
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    fn refresh(&mut self) {
        self.bids.refresh_view();
        self.asks.refresh_view();
    }
}
