use std::fmt;

use serde::Serialize;

use crate::engine::types::{DepthSnapshot, PriceLevel};

/// Provenance of a tick: authoritative push data or the degraded poll fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    Ws,
    Poll,
}

impl FeedSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedSource::Ws => "ws",
            FeedSource::Poll => "poll",
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summed notional (price x size) and volume over the exposed levels of each side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DepthSummary {
    pub bid_notional: f64,
    pub ask_notional: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
}

impl DepthSummary {
    pub fn from_levels(bids: &[PriceLevel], asks: &[PriceLevel]) -> Self {
        Self {
            bid_notional: bids.iter().map(PriceLevel::notional).sum(),
            ask_notional: asks.iter().map(PriceLevel::notional).sum(),
            bid_volume: bids.iter().map(|l| l.size).sum(),
            ask_volume: asks.iter().map(|l| l.size).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookTick {
    pub bid: f64,
    pub ask: f64,
    pub spread_abs: f64,
    pub spread_pct: f64,
    pub mid: f64,
    pub depth: DepthSummary,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp_ms: u64,
    pub source: FeedSource,
}

impl BookTick {
    /// Build a tick from sorted levels (best first). `None` when either side is empty.
    pub fn from_levels(
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        timestamp_ms: u64,
        source: FeedSource,
    ) -> Option<Self> {
        let bid = bids.first()?.price;
        let ask = asks.first()?.price;
        let mid = (bid + ask) / 2.0;
        let spread_abs = ask - bid;
        Some(Self {
            bid,
            ask,
            spread_abs,
            spread_pct: if mid > 0.0 { spread_abs / mid * 100.0 } else { f64::NAN },
            mid,
            depth: DepthSummary::from_levels(bids, asks),
            bids: bids.to_vec(),
            asks: asks.to_vec(),
            timestamp_ms,
            source,
        })
    }

    /// Top levels for pricing taker legs in `compute_edge`.
    pub fn depth_snapshot(&self) -> DepthSnapshot {
        DepthSnapshot::from_levels(&self.bids, &self.asks)
    }
}
