// Append-only CSV log of the advice computed for each tick.

use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::engine::types::EdgeResult;
use crate::market_data::tick::BookTick;

#[derive(Debug, Serialize)]
struct AdviceRow<'a> {
    timestamp_ms: u64,
    source: &'a str,
    bid: f64,
    ask: f64,
    spread_pct: f64,
    buy: f64,
    sell: f64,
    edge_pct: f64,
    pnl: f64,
    state: &'a str,
    go: bool,
    warning: &'a str,
}

pub struct AdviceRecorder {
    writer: csv::Writer<File>,
    rows: u64,
}

impl AdviceRecorder {
    /// Open `path` for appending. The header is written only when the file is new or empty.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let has_content = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening advice log {}", path.display()))?;
        let writer = csv::WriterBuilder::new().has_headers(!has_content).from_writer(file);
        Ok(Self { writer, rows: 0 })
    }

    pub fn record(&mut self, tick: &BookTick, advice: &EdgeResult) -> anyhow::Result<()> {
        self.writer.serialize(AdviceRow {
            timestamp_ms: tick.timestamp_ms,
            source: tick.source.as_str(),
            bid: tick.bid,
            ask: tick.ask,
            spread_pct: tick.spread_pct,
            buy: advice.buy_price,
            sell: advice.sell_price,
            edge_pct: advice.edge_pct,
            pnl: advice.pnl,
            state: advice.edge_state.as_str(),
            go: advice.go,
            warning: advice.size_warning.as_deref().unwrap_or(""),
        })?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }
}
