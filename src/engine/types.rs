use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Levels per side the depth walk and size warning look at.
pub const DEPTH_LEVELS: usize = 3;

/// Whether a leg rests on the book or crosses the spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Maker,
    Taker,
}

// Buy leg first, sell leg second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RouteProfile {
    #[default]
    MakerMaker,
    MakerTaker,
    TakerMaker,
    TakerTaker,
}

impl RouteProfile {
    /// Lenient parse: case, whitespace and `-`/`/` separators are ignored,
    /// anything unrecognised falls back to maker/maker.
    pub fn parse(token: &str) -> Self {
        let normalized: String = token
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c == '-' { '/' } else { c.to_ascii_lowercase() })
            .collect();
        match normalized.as_str() {
            "maker/taker" => Self::MakerTaker,
            "taker/maker" => Self::TakerMaker,
            "taker/taker" => Self::TakerTaker,
            _ => Self::MakerMaker,
        }
    }

    pub fn legs(self) -> (Liquidity, Liquidity) {
        match self {
            Self::MakerMaker => (Liquidity::Maker, Liquidity::Maker),
            Self::MakerTaker => (Liquidity::Maker, Liquidity::Taker),
            Self::TakerMaker => (Liquidity::Taker, Liquidity::Maker),
            Self::TakerTaker => (Liquidity::Taker, Liquidity::Taker),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MakerMaker => "maker-maker",
            Self::MakerTaker => "maker-taker",
            Self::TakerMaker => "taker-maker",
            Self::TakerTaker => "taker-taker",
        }
    }
}

impl fmt::Display for RouteProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteProfile {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for RouteProfile {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<RouteProfile> for String {
    fn from(value: RouteProfile) -> Self {
        value.as_str().to_string()
    }
}

/// One aggregated price level as consumers see it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }

    pub fn is_valid(&self) -> bool {
        is_valid_level(self.price, self.size)
    }
}

/// A level is usable when both price and size are finite and strictly positive.
pub fn is_valid_level(price: f64, size: f64) -> bool {
    price.is_finite() && price > 0.0 && size.is_finite() && size > 0.0
}

/// Best few levels per side, used to price taker legs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthSnapshot {
    pub bids: SmallVec<[PriceLevel; DEPTH_LEVELS]>,
    pub asks: SmallVec<[PriceLevel; DEPTH_LEVELS]>,
}

impl DepthSnapshot {
    /// Keeps the first `DEPTH_LEVELS` valid levels of each side, in the order given.
    pub fn from_levels(bids: &[PriceLevel], asks: &[PriceLevel]) -> Self {
        let top = |levels: &[PriceLevel]| {
            levels
                .iter()
                .copied()
                .filter(PriceLevel::is_valid)
                .take(DEPTH_LEVELS)
                .collect()
        };
        Self { bids: top(bids), asks: top(asks) }
    }

    pub fn bid_notional(&self) -> f64 {
        self.bids.iter().map(PriceLevel::notional).sum()
    }

    pub fn ask_notional(&self) -> f64 {
        self.asks.iter().map(PriceLevel::notional).sum()
    }
}

/// Inputs of the edge calculation. Percentages are in percent units (0.15 = 0.15%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeParameters {
    pub maker_fee_pct: f64,
    pub taker_fee_pct: f64,
    pub route_profile: RouteProfile,
    pub slippage_pct: f64,
    pub min_edge_pct: f64,
    pub position_notional: f64,
    pub tick: f64,
    /// Only advise `go` when the raw spread also covers breakeven plus the minimum edge.
    pub require_spread_cover: bool,
}

impl Default for EdgeParameters {
    fn default() -> Self {
        Self {
            maker_fee_pct: 0.15,
            taker_fee_pct: 0.25,
            route_profile: RouteProfile::MakerMaker,
            slippage_pct: 0.05,
            min_edge_pct: 0.25,
            position_notional: 250.0,
            tick: 0.0001,
            require_spread_cover: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeState {
    Negative,
    Breakeven,
    Positive,
    Neutral,
}

impl EdgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::Breakeven => "breakeven",
            Self::Positive => "positive",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for EdgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advice for one top-of-book. `NaN` marks a figure that could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeResult {
    pub buy_price: f64,
    pub sell_price: f64,
    pub exec_buy_price: f64,
    pub exec_sell_price: f64,
    pub edge_pct: f64,
    pub pnl: f64,
    pub breakeven_pct: f64,
    pub round_trip_fee_pct: f64,
    pub min_edge_pct: f64,
    pub spread_pct: f64,
    pub edge_state: EdgeState,
    pub show_advice: bool,
    pub go: bool,
    pub size_warning: Option<String>,
}

impl EdgeResult {
    pub(crate) fn without_advice(breakeven_pct: f64, round_trip_fee_pct: f64, min_edge_pct: f64) -> Self {
        Self {
            buy_price: f64::NAN,
            sell_price: f64::NAN,
            exec_buy_price: f64::NAN,
            exec_sell_price: f64::NAN,
            edge_pct: f64::NAN,
            pnl: f64::NAN,
            breakeven_pct,
            round_trip_fee_pct,
            min_edge_pct,
            spread_pct: f64::NAN,
            edge_state: EdgeState::Neutral,
            show_advice: false,
            go: false,
            size_warning: None,
        }
    }
}
