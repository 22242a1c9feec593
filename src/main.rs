use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use spreadx_rs::config::AppConfig;
use spreadx_rs::engine::edge::compute_edge;
use spreadx_rs::engine::types::{EdgeParameters, EdgeResult, RouteProfile};
use spreadx_rs::market_data::adapters::bitvavo::BitvavoAdapter;
use spreadx_rs::market_data::supervisor::{start_feed, FeedEvent};
use spreadx_rs::market_data::tick::BookTick;
use spreadx_rs::recorder::AdviceRecorder;
use spreadx_rs::telemetry;

#[derive(Parser, Debug)]
#[command(name = "spreadx", version, about = "Spread and edge advisor for a single spot market")]
struct Cli {
    /// TOML config file (defaults to ./spreadx.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "spreadx_rs=debug"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Port for the Prometheus exporter (metrics-exporter builds only)
    #[arg(long, global = true, default_value_t = 9000)]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the live book and print advice on every tick
    Watch {
        #[arg(long)]
        market: Option<String>,
        #[arg(long)]
        depth: Option<usize>,
        /// Price tick; skips the venue lookup
        #[arg(long)]
        tick: Option<f64>,
        /// Append advice rows to this CSV file
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Compute advice once for a given bid/ask and print it as JSON
    Quote {
        #[arg(long, allow_negative_numbers = true)]
        bid: f64,
        #[arg(long, allow_negative_numbers = true)]
        ask: f64,
        #[arg(long)]
        tick: Option<f64>,
        #[arg(long)]
        position: Option<f64>,
        #[arg(long)]
        route: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    telemetry::init_tracing(&level, config.logging.format);
    telemetry::init_metrics(cli.metrics_port).context("starting metrics exporter")?;

    match cli.command {
        Command::Watch { market, depth, tick, record } => {
            let mut config = config;
            if let Some(market) = market {
                config.market = market;
            }
            if let Some(depth) = depth {
                config.depth = depth;
            }
            if let Some(tick) = tick {
                config.edge.tick = tick;
                config.tick_pinned = true;
            }
            let mut config = config.validated();
            if config.feed.discover_tick && !config.tick_pinned {
                config.edge.tick = discover_tick(&config).await;
            }
            run_watch(config, record).await
        }
        Command::Quote { bid, ask, tick, position, route } => {
            let params = EdgeParameters {
                tick: tick.unwrap_or(config.edge.tick),
                position_notional: position.unwrap_or(config.edge.position_notional),
                route_profile: route.as_deref().map(RouteProfile::parse).unwrap_or(config.edge.route_profile),
                ..config.edge.clone()
            };
            let advice = compute_edge(bid, ask, &params, None);
            println!("{}", serde_json::to_string_pretty(&advice)?);
            Ok(())
        }
    }
}

async fn run_watch(config: AppConfig, record: Option<PathBuf>) -> anyhow::Result<()> {
    let mut recorder = record.as_deref().map(AdviceRecorder::create).transpose()?;
    info!(
        market = %config.market,
        depth = config.depth,
        route = %config.edge.route_profile,
        "watching"
    );

    let mut feed = start_feed(&config);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            event = feed.recv() => match event {
                Some(FeedEvent::Tick(tick)) => {
                    let advice = compute_edge(tick.bid, tick.ask, &config.edge, Some(&tick.depth_snapshot()));
                    log_advice(&tick, &advice);
                    if let Some(recorder) = recorder.as_mut() {
                        if let Err(e) = recorder.record(&tick, &advice) {
                            warn!(error = %e, "failed to record advice");
                        }
                    }
                }
                Some(FeedEvent::SourceChanged(source)) => info!(%source, "source changed"),
                None => {
                    warn!("feed ended");
                    break;
                }
            }
        }
    }

    feed.stop();
    if let Some(recorder) = recorder {
        info!(rows = recorder.rows_written(), "advice log closed");
    }
    Ok(())
}

// Venue tick for the market, or the configured one when the lookup fails
async fn discover_tick(config: &AppConfig) -> f64 {
    let venue = BitvavoAdapter::new(&config.feed.rest_url, &config.feed.ws_url)
        .with_request_timeout(config.feed.fetch_timeout());
    match venue.fetch_market_tick(&config.market).await {
        Ok(tick) => {
            info!(market = %config.market, tick, "using venue tick size");
            tick
        }
        Err(e) => {
            warn!(error = %e, tick = config.edge.tick, "tick size lookup failed, keeping configured tick");
            config.edge.tick
        }
    }
}

fn log_advice(tick: &BookTick, advice: &EdgeResult) {
    info!(
        source = %tick.source,
        bid = tick.bid,
        ask = tick.ask,
        spread_pct = format_args!("{:.4}", tick.spread_pct),
        buy = advice.buy_price,
        sell = advice.sell_price,
        edge_pct = format_args!("{:.4}", advice.edge_pct),
        state = %advice.edge_state,
        go = advice.go,
        warning = advice.size_warning.as_deref().unwrap_or("-"),
        "advice"
    );
}
