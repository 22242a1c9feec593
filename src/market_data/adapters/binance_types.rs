// Binance spot REST payloads used by the poll fallback

use serde::Deserialize;

use crate::market_data::normaliser::WireNumber;

// GET /depth?symbol=ARKUSDT&limit=N
#[derive(Debug, Deserialize)]
pub struct DepthResponse {
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: u64,
    #[serde(default)]
    pub bids: Vec<Vec<WireNumber>>, // [["0.5410", "1200.0"], ...]
    #[serde(default)]
    pub asks: Vec<Vec<WireNumber>>,
}

// GET /ticker/price?symbol=EURUSDT
#[derive(Debug, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: WireNumber,
}
