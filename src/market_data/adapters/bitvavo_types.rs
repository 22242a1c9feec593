// Wire types for the Bitvavo v2 book channel and REST book endpoint

use serde::{Deserialize, Serialize};

use crate::market_data::normaliser::WireNumber;

// Outbound: {"action":"subscribe","markets":["ARK-EUR"],"channels":["book"]}
#[derive(Debug, Serialize)]
pub struct SubscribeRequest<'a> {
    pub action: &'static str,
    pub markets: [&'a str; 1],
    pub channels: [&'static str; 1],
}

impl<'a> SubscribeRequest<'a> {
    pub fn book(market: &'a str) -> Self {
        Self { action: "subscribe", markets: [market], channels: ["book"] }
    }
}

// Inbound frames, dispatched on "event"
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WsMessage {
    Book(WsBook),
    Subscribed {
        #[serde(default)]
        channel: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct WsBook {
    pub market: String,
    #[serde(default)]
    pub nonce: u64, // missing nonce -> 0 -> rejected downstream
    #[serde(default)]
    pub bids: Vec<Vec<WireNumber>>, // [[price, size], ...]
    #[serde(default)]
    pub asks: Vec<Vec<WireNumber>>,
}

// GET /{market}/book?depth=N
#[derive(Debug, Deserialize)]
pub struct RestBook {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub bids: Vec<Vec<WireNumber>>,
    #[serde(default)]
    pub asks: Vec<Vec<WireNumber>>,
}

// GET /markets?market=ARK-EUR. Seen as a bare object, a list, or {"markets": [...]}
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MarketsResponse {
    List(Vec<MarketSpec>),
    Wrapped { markets: Vec<MarketSpec> },
    Single(MarketSpec),
}

impl MarketsResponse {
    pub fn specs(&self) -> &[MarketSpec] {
        match self {
            MarketsResponse::List(specs) | MarketsResponse::Wrapped { markets: specs } => specs,
            MarketsResponse::Single(spec) => std::slice::from_ref(spec),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSpec {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub tick_size: Option<WireNumber>,
    #[serde(default)]
    pub price_tick_size: Option<WireNumber>,
    #[serde(default)]
    pub step_size: Option<WireNumber>,
}

impl MarketSpec {
    // tickSize, then priceTickSize, then stepSize
    pub fn tick(&self) -> Option<f64> {
        [&self.tick_size, &self.price_tick_size, &self.step_size]
            .into_iter()
            .flatten()
            .next()
            .and_then(WireNumber::as_f64)
            .filter(|tick| *tick > 0.0)
    }
}
