// Binance REST poll fallback, converted into the primary market's quote currency

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::binance_types::{DepthResponse, TickerPrice};
use super::{http_client, FeedError, PollSource, PolledBook, DEFAULT_REQUEST_TIMEOUT};
use crate::engine::types::PriceLevel;
use crate::market_data::external_book::Side;
use crate::market_data::normaliser::{split_market_id, WireNumber};

pub const DEFAULT_REST_URL: &str = "https://api.binance.com/api/v3";
pub const DEFAULT_QUOTE_ASSET: &str = "USDT";
pub const DEFAULT_FX_SYMBOL: &str = "EURUSDT";

// Venue cap on /depth limit
const MAX_LIMIT: usize = 5000;

pub struct BinanceFallback {
    pub rest_url: String,    // "https://api.binance.com/api/v3"
    pub quote_asset: String, // fallback market quote, e.g. "USDT"
    pub fx_symbol: String,   // price of one primary-quote unit in quote_asset, e.g. "EURUSDT"
    client: reqwest::Client,
}

impl Default for BinanceFallback {
    fn default() -> Self {
        Self::new(DEFAULT_REST_URL, DEFAULT_QUOTE_ASSET, DEFAULT_FX_SYMBOL)
    }
}

impl BinanceFallback {
    pub fn new(rest_url: &str, quote_asset: &str, fx_symbol: &str) -> Self {
        Self {
            rest_url: rest_url.trim_end_matches('/').to_string(),
            quote_asset: quote_asset.to_ascii_uppercase(),
            fx_symbol: fx_symbol.to_ascii_uppercase(),
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    // "ARK-EUR" -> "ARKUSDT"
    pub fn symbol_for(&self, market: &str) -> Option<String> {
        let (base, _) = split_market_id(market)?;
        Some(format!("{}{}", base, self.quote_asset))
    }

    // Primary market already quoted in the fallback currency: no FX leg
    fn needs_fx(&self, market: &str) -> bool {
        split_market_id(market).map_or(true, |(_, quote)| quote != self.quote_asset)
    }

    async fn fetch_depth(&self, symbol: &str, depth: usize) -> Result<DepthResponse, FeedError> {
        let url = format!("{}/depth", self.rest_url);
        let limit = depth.clamp(1, MAX_LIMIT).to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("limit", limit.as_str())])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn fetch_fx_rate(&self) -> Result<f64, FeedError> {
        let url = format!("{}/ticker/price", self.rest_url);
        let ticker: TickerPrice = self
            .client
            .get(&url)
            .query(&[("symbol", self.fx_symbol.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match ticker.price.as_f64() {
            Some(rate) if rate > 0.0 => {
                trace!(symbol = %ticker.symbol, rate, "fx rate");
                Ok(rate)
            }
            _ => Err(FeedError::InvalidPayload(format!("unusable fx rate for {}", ticker.symbol))),
        }
    }
}

/// Divide prices by `rate`, drop invalid rows, sort best-first and cap at `depth`.
pub fn convert_levels(rows: &[Vec<WireNumber>], rate: f64, side: Side, depth: usize) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = rows
        .iter()
        .filter_map(|row| match row.as_slice() {
            [price, size, ..] => Some(PriceLevel::new(price.as_f64()? / rate, size.as_f64()?)),
            _ => None,
        })
        .filter(PriceLevel::is_valid)
        .collect();
    match side {
        Side::Bid => levels.sort_by(|a, b| b.price.total_cmp(&a.price)),
        Side::Ask => levels.sort_by(|a, b| a.price.total_cmp(&b.price)),
    }
    levels.truncate(depth.max(1));
    levels
}

#[async_trait]
impl PollSource for BinanceFallback {
    async fn poll_book(&self, market: &str, depth: usize) -> Result<PolledBook, FeedError> {
        let symbol = self
            .symbol_for(market)
            .ok_or_else(|| FeedError::InvalidPayload(format!("cannot map {market} to a fallback symbol")))?;

        let (book, rate) = if self.needs_fx(market) {
            tokio::try_join!(self.fetch_depth(&symbol, depth), self.fetch_fx_rate())?
        } else {
            (self.fetch_depth(&symbol, depth).await?, 1.0)
        };

        let bids = convert_levels(&book.bids, rate, Side::Bid, depth);
        let asks = convert_levels(&book.asks, rate, Side::Ask, depth);
        debug!(%symbol, update_id = book.last_update_id, rate, bids = bids.len(), asks = asks.len(), "polled fallback book");
        Ok(PolledBook { bids, asks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(json: &str) -> Vec<Vec<WireNumber>> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_symbol_mapping() {
        let fallback = BinanceFallback::default();
        assert_eq!(fallback.symbol_for("ARK-EUR").as_deref(), Some("ARKUSDT"));
        assert_eq!(fallback.symbol_for("ARKEUR"), None);
        assert!(fallback.needs_fx("ARK-EUR"));
        assert!(!fallback.needs_fx("BTC-USDT"));
    }

    #[test]
    fn test_convert_levels_through_fx() {
        let bids = rows(r#"[["0.54","100"],["0.55","10"],["0.53","0"],["bad","1"]]"#);
        let converted = convert_levels(&bids, 1.08, Side::Bid, 10);
        assert_eq!(converted.len(), 2);
        assert!((converted[0].price - 0.55 / 1.08).abs() < 1e-12);
        assert_eq!(converted[0].size, 10.0);
        assert!(converted[0].price > converted[1].price);
    }

    #[test]
    fn test_convert_levels_caps_depth() {
        let asks = rows(r#"[["3","1"],["1","1"],["2","1"]]"#);
        let converted = convert_levels(&asks, 1.0, Side::Ask, 2);
        let prices: Vec<f64> = converted.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![1.0, 2.0]);
    }

    #[test]
    fn test_depth_response_shape() {
        let body = r#"{"lastUpdateId":1027024,"bids":[["4.00000000","431.00000000"]],"asks":[["4.00000200","12.00000000"]]}"#;
        let depth: DepthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(depth.last_update_id, 1027024);
        assert_eq!(depth.asks[0][0].as_f64(), Some(4.000002));
        let ticker: TickerPrice = serde_json::from_str(r#"{"symbol":"EURUSDT","price":"1.08450000"}"#).unwrap();
        assert_eq!(ticker.price.as_f64(), Some(1.0845));
    }
}
