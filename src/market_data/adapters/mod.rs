// Shared traits + events for venue adapters

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tracing::warn;

use crate::engine::types::PriceLevel;
use crate::market_data::synchronizer::{BookDiff, BookSnapshot};

pub enum MarketEvent {
    // Venue acknowledged the book subscription
    Subscribed { channel: Option<String> },
    // Incremental update, already normalized and filtered to our market
    Diff(BookDiff),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("transport closed")]
    Closed,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// Cap on a whole REST request, connect through body
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder().timeout(timeout).build().unwrap_or_else(|err| {
        warn!(error = %err, "http client builder failed, using defaults");
        reqwest::Client::new()
    })
}

pub type EventStream = BoxStream<'static, Result<MarketEvent, FeedError>>;

// Primary push feed. The stream ends (or yields an error) when the transport dies.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self, market: &str) -> Result<EventStream, FeedError>;
}

// Authoritative full book from the primary venue
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, market: &str, depth: usize) -> Result<BookSnapshot, FeedError>;
}

// Both sides sorted best-first, already in the market's quote currency
#[derive(Debug, Clone, PartialEq)]
pub struct PolledBook {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

// Degraded REST fallback
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn poll_book(&self, market: &str, depth: usize) -> Result<PolledBook, FeedError>;
}

pub mod binance;
pub mod binance_types;
pub mod bitvavo;
pub mod bitvavo_types;
