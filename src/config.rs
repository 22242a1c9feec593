// Layered configuration: built-in defaults, then an optional TOML file, then
// `SPREADX__`-prefixed environment variables (`SPREADX__EDGE__MAKER_FEE_PCT=0.1`).

use std::path::Path;
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::edge::sanitize_pct;
use crate::engine::types::EdgeParameters;
use crate::market_data::adapters::{binance, bitvavo};
use crate::market_data::normaliser::{normalize_market_id, sanitize_depth, DEFAULT_DEPTH, DEFAULT_MARKET};
use crate::market_data::retry::FixedDelay;
use crate::market_data::synchronizer::DEFAULT_MAX_PENDING;

pub const DEFAULT_CONFIG_FILE: &str = "spreadx";
pub const ENV_PREFIX: &str = "SPREADX";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("config file not found: {0}")]
    MissingFile(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".into(), format: LogFormat::Compact }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub rest_url: String,
    pub ws_url: String,
    pub fallback_rest_url: String,
    pub fallback_quote: String,
    pub fx_symbol: String,
    pub reconnect_delay_ms: u64,
    pub snapshot_retry_ms: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub channel_capacity: usize,
    pub max_pending: usize,
    /// Look up the market's tick size at startup unless `edge.tick` is set.
    pub discover_tick: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            rest_url: bitvavo::DEFAULT_REST_URL.into(),
            ws_url: bitvavo::DEFAULT_WS_URL.into(),
            fallback_rest_url: binance::DEFAULT_REST_URL.into(),
            fallback_quote: binance::DEFAULT_QUOTE_ASSET.into(),
            fx_symbol: binance::DEFAULT_FX_SYMBOL.into(),
            reconnect_delay_ms: 5_000,
            snapshot_retry_ms: 5_000,
            poll_interval_ms: 2_000,
            connect_timeout_ms: 10_000,
            fetch_timeout_ms: 10_000,
            channel_capacity: 256,
            max_pending: DEFAULT_MAX_PENDING,
            discover_tick: true,
        }
    }
}

impl FeedSettings {
    pub fn retry_policy(&self) -> FixedDelay {
        FixedDelay::from_millis(self.reconnect_delay_ms, self.snapshot_retry_ms, self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub market: String,
    pub depth: usize,
    pub feed: FeedSettings,
    pub edge: EdgeParameters,
    pub logging: LoggingSettings,
    // edge.tick came from a file or the environment rather than the default
    #[serde(skip)]
    pub tick_pinned: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            market: DEFAULT_MARKET.into(),
            depth: DEFAULT_DEPTH,
            feed: FeedSettings::default(),
            edge: EdgeParameters::default(),
            logging: LoggingSettings::default(),
            tick_pinned: false,
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` (or `spreadx.toml` when present), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::MissingFile(path.display().to_string())),
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let layered = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?;
        let tick_pinned = layered.get::<f64>("edge.tick").is_ok();
        let loaded: AppConfig = layered.try_deserialize()?;
        Ok(AppConfig { tick_pinned, ..loaded }.validated())
    }

    /// Normalize the market, sanitize depth and clamp percentages and intervals.
    pub fn validated(mut self) -> Self {
        self.market = normalize_market_id(&self.market);
        self.depth = sanitize_depth(i64::try_from(self.depth).unwrap_or(i64::MAX));

        let edge = &mut self.edge;
        edge.maker_fee_pct = sanitize_pct(edge.maker_fee_pct);
        edge.taker_fee_pct = sanitize_pct(edge.taker_fee_pct);
        edge.slippage_pct = sanitize_pct(edge.slippage_pct);
        edge.min_edge_pct = sanitize_pct(edge.min_edge_pct);
        if !edge.position_notional.is_finite() || edge.position_notional < 0.0 {
            edge.position_notional = 0.0;
        }
        if !edge.tick.is_finite() || edge.tick <= 0.0 {
            edge.tick = EdgeParameters::default().tick;
        }

        let feed = &mut self.feed;
        feed.reconnect_delay_ms = feed.reconnect_delay_ms.max(1);
        feed.snapshot_retry_ms = feed.snapshot_retry_ms.max(1);
        feed.poll_interval_ms = feed.poll_interval_ms.max(1);
        feed.connect_timeout_ms = feed.connect_timeout_ms.max(1);
        feed.fetch_timeout_ms = feed.fetch_timeout_ms.max(1);
        feed.channel_capacity = feed.channel_capacity.max(1);
        feed.max_pending = feed.max_pending.max(1);
        self
    }
}
