// Bitvavo adapter: WebSocket book diffs + REST snapshots

use std::time::Duration;

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace};

use super::bitvavo_types::{MarketsResponse, RestBook, SubscribeRequest, WsMessage};
use super::{http_client, EventStream, FeedError, MarketEvent, PushTransport, SnapshotSource, DEFAULT_REQUEST_TIMEOUT};
use crate::market_data::normaliser::Normaliser;
use crate::market_data::synchronizer::{BookDiff, BookSnapshot};

pub const DEFAULT_REST_URL: &str = "https://api.bitvavo.com/v2";
pub const DEFAULT_WS_URL: &str = "wss://ws.bitvavo.com/v2/";

pub struct BitvavoAdapter {
    pub rest_url: String, // "https://api.bitvavo.com/v2"
    pub ws_url: String,   // "wss://ws.bitvavo.com/v2/"
    client: reqwest::Client,
    normaliser: Normaliser,
}

impl Default for BitvavoAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_REST_URL, DEFAULT_WS_URL)
    }
}

impl BitvavoAdapter {
    pub fn new(rest_url: &str, ws_url: &str) -> Self {
        Self {
            rest_url: rest_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.to_string(),
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
            normaliser: Normaliser::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    /// Price tick of `market` from `GET /markets?market=..`.
    pub async fn fetch_market_tick(&self, market: &str) -> Result<f64, FeedError> {
        let url = format!("{}/markets", self.rest_url);
        let payload: MarketsResponse = self
            .client
            .get(&url)
            .query(&[("market", market)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let tick = market_tick(&payload, market)
            .ok_or_else(|| FeedError::InvalidPayload(format!("no tick size listed for {market}")))?;
        debug!(%market, tick, "market tick fetched");
        Ok(tick)
    }
}

/// Tick size listed for `market`, if the entry exists and carries a positive one.
pub fn market_tick(payload: &MarketsResponse, market: &str) -> Option<f64> {
    payload
        .specs()
        .iter()
        .find(|spec| spec.market.as_deref().is_some_and(|m| m.eq_ignore_ascii_case(market)))
        .and_then(|spec| spec.tick())
}

/// Decode one text frame for `market`.
///
/// `Ok(None)` for frames we do not care about (other markets, other events,
/// well-formed JSON we do not recognise). Invalid JSON is a transport fault.
pub fn decode_frame(normaliser: &Normaliser, market: &str, text: &str) -> Result<Option<MarketEvent>, FeedError> {
    let message = match serde_json::from_str::<WsMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            // Error/ack frames without an "event" tag are still valid JSON
            return match serde_json::from_str::<serde_json::Value>(text) {
                Ok(_) => {
                    debug!(frame = text, "ignoring unrecognised frame");
                    Ok(None)
                }
                Err(_) => Err(FeedError::Parse(err)),
            };
        }
    };

    match message {
        WsMessage::Subscribed { channel } => Ok(Some(MarketEvent::Subscribed { channel })),
        WsMessage::Book(book) if book.market == market => Ok(Some(MarketEvent::Diff(BookDiff {
            sequence: book.nonce,
            bids: normaliser.diff_levels(&book.bids),
            asks: normaliser.diff_levels(&book.asks),
        }))),
        WsMessage::Book(book) => {
            trace!(market = %book.market, "ignoring book frame for other market");
            Ok(None)
        }
        WsMessage::Other => Ok(None),
    }
}

#[async_trait]
impl PushTransport for BitvavoAdapter {
    async fn connect(&self, market: &str) -> Result<EventStream, FeedError> {
        let (mut ws, response) = connect_async(self.ws_url.as_str()).await?;
        info!(url = %self.ws_url, status = %response.status(), "websocket connected");

        let request = serde_json::to_string(&SubscribeRequest::book(market))?;
        ws.send(Message::Text(request)).await?;
        debug!(%market, "book subscription sent");

        let market = market.to_string();
        let normaliser = self.normaliser;
        let events = ws.filter_map(move |frame| {
            let event = match frame {
                Ok(Message::Text(text)) => decode_frame(&normaliser, &market, &text).transpose(),
                Ok(Message::Close(close)) => {
                    debug!(?close, "websocket closed by server");
                    Some(Err(FeedError::Closed))
                }
                Ok(_) => None,
                Err(err) => Some(Err(FeedError::WebSocket(err))),
            };
            future::ready(event)
        });
        Ok(events.boxed())
    }
}

#[async_trait]
impl SnapshotSource for BitvavoAdapter {
    async fn fetch_snapshot(&self, market: &str, depth: usize) -> Result<BookSnapshot, FeedError> {
        let url = format!("{}/{}/book", self.rest_url, market);
        let book: RestBook = self
            .client
            .get(&url)
            .query(&[("depth", depth)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(returned) = book.market.as_deref() {
            if returned != market {
                return Err(FeedError::InvalidPayload(format!("snapshot for {returned}, wanted {market}")));
            }
        }
        debug!(%market, nonce = book.nonce, bids = book.bids.len(), asks = book.asks.len(), "snapshot fetched");
        Ok(BookSnapshot {
            sequence: book.nonce,
            bids: self.normaliser.snapshot_levels(&book.bids),
            asks: self.normaliser.snapshot_levels(&book.asks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<Option<MarketEvent>, FeedError> {
        decode_frame(&Normaliser::default(), "ARK-EUR", text)
    }

    #[test]
    fn test_book_frame_becomes_diff() {
        let frame = r#"{"event":"book","market":"ARK-EUR","nonce":101,
            "bids":[["0.5012","120.5"],["0.5011","0"]],"asks":[["0,5020",30]]}"#;
        match decode(frame).unwrap() {
            Some(MarketEvent::Diff(diff)) => {
                assert_eq!(diff.sequence, 101);
                assert_eq!(diff.bids.len(), 2);
                assert_eq!(diff.bids[0].price, 0.5012);
                assert_eq!(diff.bids[1].size, 0.0);
                assert_eq!(diff.asks[0].price, 0.502);
                assert_eq!(diff.asks[0].size, 30.0);
            }
            _ => panic!("expected a diff"),
        }
    }

    #[test]
    fn test_subscribed_ack() {
        match decode(r#"{"event":"subscribed","channel":"book"}"#).unwrap() {
            Some(MarketEvent::Subscribed { channel }) => assert_eq!(channel.as_deref(), Some("book")),
            _ => panic!("expected an ack"),
        }
    }

    #[test]
    fn test_missing_nonce_defaults_to_zero() {
        match decode(r#"{"event":"book","market":"ARK-EUR","bids":[],"asks":[]}"#).unwrap() {
            Some(MarketEvent::Diff(diff)) => assert_eq!(diff.sequence, 0),
            _ => panic!("expected a diff"),
        }
    }

    #[test]
    fn test_ignored_frames() {
        assert!(decode(r#"{"event":"book","market":"BTC-EUR","nonce":5}"#).unwrap().is_none());
        assert!(decode(r#"{"event":"trade","market":"ARK-EUR"}"#).unwrap().is_none());
        assert!(decode(r#"{"action":"subscribe","errorCode":205,"error":"bad market"}"#).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_is_a_fault() {
        assert!(matches!(decode("{not json"), Err(FeedError::Parse(_))));
    }

    fn markets(json: &str) -> MarketsResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_market_tick_from_listing() {
        let listing = markets(
            r#"[{"market":"BTC-EUR","tickSize":"1"},
                {"market":"ARK-EUR","status":"trading","tickSize":"0.0001","amountQuoteDecimals":2}]"#,
        );
        assert_eq!(market_tick(&listing, "ARK-EUR"), Some(0.0001));
        assert_eq!(market_tick(&listing, "ark-eur"), Some(0.0001));
        assert_eq!(market_tick(&listing, "ETH-EUR"), None);
    }

    #[test]
    fn test_market_tick_alternate_shapes() {
        let single = markets(r#"{"market":"ARK-EUR","priceTickSize":0.001}"#);
        assert_eq!(market_tick(&single, "ARK-EUR"), Some(0.001));

        let wrapped = markets(r#"{"markets":[{"market":"ARK-EUR","stepSize":"0,005"}]}"#);
        assert_eq!(market_tick(&wrapped, "ARK-EUR"), Some(0.005));

        let preferred = markets(r#"[{"market":"ARK-EUR","tickSize":"0.01","priceTickSize":"0.5"}]"#);
        assert_eq!(market_tick(&preferred, "ARK-EUR"), Some(0.01));
    }

    #[test]
    fn test_market_tick_rejects_unusable_sizes() {
        assert_eq!(market_tick(&markets(r#"[{"market":"ARK-EUR","tickSize":"0"}]"#), "ARK-EUR"), None);
        assert_eq!(market_tick(&markets(r#"[{"market":"ARK-EUR","tickSize":"n/a"}]"#), "ARK-EUR"), None);
        assert_eq!(market_tick(&markets(r#"[{"market":"ARK-EUR"}]"#), "ARK-EUR"), None);
        assert_eq!(market_tick(&markets(r#"{"errorCode":205,"error":"bad market"}"#), "ARK-EUR"), None);
    }

    #[test]
    fn test_subscribe_request_shape() {
        let json = serde_json::to_value(SubscribeRequest::book("ARK-EUR")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "subscribe", "markets": ["ARK-EUR"], "channels": ["book"]})
        );
    }
}
