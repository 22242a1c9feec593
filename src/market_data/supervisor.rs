// Feed supervision: push feed, snapshot resync, REST-poll fallback, reconnect.
// One task owns the synchronizer, the stream, every timer and every in-flight
// fetch, multiplexed with select!. Book state is only touched from that task.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::market_data::adapters::binance::BinanceFallback;
use crate::market_data::adapters::bitvavo::BitvavoAdapter;
use crate::market_data::adapters::{
    EventStream, FeedError, MarketEvent, PollSource, PolledBook, PushTransport, SnapshotSource,
};
use crate::market_data::retry::{Clock, FixedDelay, RetryPolicy, SystemClock};
use crate::market_data::synchronizer::{BookSnapshot, BookSynchronizer, DiffOutcome, SyncError};
use crate::market_data::tick::{BookTick, FeedSource};

// Back-to-back refetches allowed for a snapshot older than the queued diffs
const IMMEDIATE_REFETCHES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(BookTick),
    SourceChanged(FeedSource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub market: String,
    pub depth: usize,
    pub channel_capacity: usize,
    pub max_pending: usize,
    pub connect_timeout: Duration,
    /// Cap on one snapshot or poll fetch.
    pub fetch_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            market: config.market.clone(),
            depth: config.depth,
            channel_capacity: config.feed.channel_capacity,
            max_pending: config.feed.max_pending,
            connect_timeout: config.feed.connect_timeout(),
            fetch_timeout: config.feed.fetch_timeout(),
        }
    }
}

pub struct FeedSupervisor {
    config: SupervisorConfig,
    transport: Arc<dyn PushTransport>,
    snapshots: Arc<dyn SnapshotSource>,
    fallback: Arc<dyn PollSource>,
    retry: Arc<dyn RetryPolicy>,
    clock: Arc<dyn Clock>,
}

impl FeedSupervisor {
    pub fn new(
        config: SupervisorConfig,
        transport: Arc<dyn PushTransport>,
        snapshots: Arc<dyn SnapshotSource>,
        fallback: Arc<dyn PollSource>,
    ) -> Self {
        Self {
            config,
            transport,
            snapshots,
            fallback,
            retry: Arc::new(FixedDelay::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the supervisor task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> FeedHandle {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(FeedLoop::new(self, tx).run(shutdown_rx));
        FeedHandle { events: rx, shutdown: Some(shutdown_tx), task: Some(task) }
    }
}

/// Wire the production adapters (Bitvavo primary, Binance fallback) and start the feed.
pub fn start_feed(config: &AppConfig) -> FeedHandle {
    let primary = Arc::new(
        BitvavoAdapter::new(&config.feed.rest_url, &config.feed.ws_url)
            .with_request_timeout(config.feed.fetch_timeout()),
    );
    let fallback = Arc::new(
        BinanceFallback::new(&config.feed.fallback_rest_url, &config.feed.fallback_quote, &config.feed.fx_symbol)
            .with_request_timeout(config.feed.fetch_timeout()),
    );
    FeedSupervisor::new(SupervisorConfig::from_app(config), primary.clone(), primary, fallback)
        .with_retry_policy(Arc::new(config.feed.retry_policy()))
        .spawn()
}

/// Receiving end of a running feed.
pub struct FeedHandle {
    events: mpsc::Receiver<FeedEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Next event; `None` once the feed has stopped and the buffer is drained.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Tear the feed down. Idempotent, never blocks.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_none()
    }
}

impl Stream for FeedHandle {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct FeedLoop {
    config: SupervisorConfig,
    transport: Arc<dyn PushTransport>,
    snapshots: Arc<dyn SnapshotSource>,
    fallback: Arc<dyn PollSource>,
    retry: Arc<dyn RetryPolicy>,
    clock: Arc<dyn Clock>,
    sync: BookSynchronizer,
    events: mpsc::Sender<FeedEvent>,
    source: Option<FeedSource>,

    connecting: Option<BoxFuture<'static, Result<EventStream, FeedError>>>,
    stream: Option<EventStream>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    reconnect_attempt: u32,

    snapshot_inflight: Option<BoxFuture<'static, Result<BookSnapshot, FeedError>>>,
    snapshot_timer: Option<Pin<Box<Sleep>>>,
    snapshot_attempt: u32,
    lagging_snapshots: u32,

    poll_timer: Option<Interval>,
    poll_inflight: Option<BoxFuture<'static, Result<PolledBook, FeedError>>>,
}

impl FeedLoop {
    fn new(supervisor: FeedSupervisor, events: mpsc::Sender<FeedEvent>) -> Self {
        let FeedSupervisor { config, transport, snapshots, fallback, retry, clock } = supervisor;
        let sync = BookSynchronizer::with_clock(config.depth, config.max_pending, clock.clone());
        Self {
            config,
            transport,
            snapshots,
            fallback,
            retry,
            clock,
            sync,
            events,
            source: None,
            connecting: None,
            stream: None,
            reconnect_timer: None,
            reconnect_attempt: 0,
            snapshot_inflight: None,
            snapshot_timer: None,
            snapshot_attempt: 0,
            lagging_snapshots: 0,
            poll_timer: None,
            poll_inflight: None,
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(market = %self.config.market, depth = self.config.depth, "feed supervisor started");
        self.begin_connect();

        loop {
            let flow = tokio::select! {
                _ = &mut shutdown => break,
                result = settle(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connected(result).await
                }
                frame = next_frame(&mut self.stream) => self.on_frame(frame).await,
                _ = fire(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.begin_connect();
                    Flow::Continue
                }
                result = settle(&mut self.snapshot_inflight) => {
                    self.snapshot_inflight = None;
                    self.on_snapshot(result).await
                }
                _ = fire(&mut self.snapshot_timer) => {
                    self.snapshot_timer = None;
                    self.request_snapshot();
                    Flow::Continue
                }
                _ = tick(&mut self.poll_timer) => {
                    self.begin_poll();
                    Flow::Continue
                }
                result = settle(&mut self.poll_inflight) => {
                    self.poll_inflight = None;
                    self.on_poll(result).await
                }
            };
            if flow == Flow::Stop {
                debug!("feed consumer gone");
                break;
            }
        }

        info!(market = %self.config.market, "feed supervisor stopped");
    }

    fn begin_connect(&mut self) {
        let transport = Arc::clone(&self.transport);
        let market = self.config.market.clone();
        let limit = self.config.connect_timeout;
        debug!(%market, attempt = self.reconnect_attempt, "connecting");
        self.connecting = Some(
            async move {
                match timeout(limit, transport.connect(&market)).await {
                    Ok(result) => result,
                    Err(_) => Err(FeedError::Connect(format!("timed out after {limit:?}"))),
                }
            }
            .boxed(),
        );
    }

    async fn on_connected(&mut self, result: Result<EventStream, FeedError>) -> Flow {
        match result {
            Ok(stream) => {
                info!(market = %self.config.market, "transport up, awaiting subscription");
                self.stream = Some(stream);
                self.reconnect_attempt = 0;
                Flow::Continue
            }
            Err(err) => self.on_transport_fault(err).await,
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<MarketEvent, FeedError>>) -> Flow {
        match frame {
            None => self.on_transport_fault(FeedError::Closed).await,
            Some(Err(err)) => self.on_transport_fault(err).await,
            Some(Ok(MarketEvent::Subscribed { channel })) => {
                info!(channel = channel.as_deref().unwrap_or("book"), "subscribed");
                self.request_snapshot();
                Flow::Continue
            }
            Some(Ok(MarketEvent::Diff(diff))) => match self.sync.apply_diff(diff) {
                Ok(DiffOutcome::Applied { tick: Some(tick) }) => self.emit(FeedEvent::Tick(tick)).await,
                Ok(DiffOutcome::Applied { tick: None }) | Ok(DiffOutcome::Stale) => Flow::Continue,
                Ok(DiffOutcome::Queued) => {
                    self.request_snapshot();
                    Flow::Continue
                }
                Err(SyncError::Gap { .. }) => {
                    self.request_snapshot();
                    Flow::Continue
                }
                Err(err) => {
                    debug!(error = %err, "diff rejected");
                    Flow::Continue
                }
            },
        }
    }

    async fn on_transport_fault(&mut self, err: FeedError) -> Flow {
        warn!(error = %err, "transport fault, falling back to polling");
        metrics::counter!("spreadx_transport_faults_total").increment(1);

        self.stream = None;
        self.connecting = None;
        self.sync.reset();
        self.snapshot_inflight = None;
        self.snapshot_timer = None;
        self.lagging_snapshots = 0;

        self.reconnect_attempt += 1;
        let delay = self.retry.reconnect_delay(self.reconnect_attempt);
        debug!(?delay, attempt = self.reconnect_attempt, "reconnect scheduled");
        self.reconnect_timer = Some(Box::pin(sleep(delay)));

        self.enter_fallback().await
    }

    // No-op while a fetch is in flight or a retry is pending, or without a transport
    fn request_snapshot(&mut self) {
        if self.stream.is_none() || self.snapshot_inflight.is_some() || self.snapshot_timer.is_some() {
            return;
        }
        let snapshots = Arc::clone(&self.snapshots);
        let market = self.config.market.clone();
        let depth = self.config.depth;
        let limit = self.config.fetch_timeout;
        debug!(%market, depth, "requesting snapshot");
        self.snapshot_inflight = Some(bounded(limit, async move { snapshots.fetch_snapshot(&market, depth).await }));
    }

    async fn on_snapshot(&mut self, result: Result<BookSnapshot, FeedError>) -> Flow {
        let err = match result.map(|snapshot| self.sync.apply_snapshot(snapshot)) {
            Ok(Ok(applied)) => {
                self.snapshot_attempt = 0;
                self.lagging_snapshots = 0;
                self.exit_fallback();
                if self.set_source(FeedSource::Ws).await == Flow::Stop {
                    return Flow::Stop;
                }
                return match applied.tick {
                    Some(tick) => self.emit(FeedEvent::Tick(tick)).await,
                    None => Flow::Continue,
                };
            }
            Ok(Err(SyncError::Gap { expected, received })) => {
                self.lagging_snapshots += 1;
                if self.lagging_snapshots <= IMMEDIATE_REFETCHES {
                    debug!(expected, received, "snapshot older than queued diffs, refetching");
                    self.request_snapshot();
                } else {
                    let delay = self.retry.snapshot_retry_delay(self.lagging_snapshots - IMMEDIATE_REFETCHES);
                    debug!(expected, received, ?delay, "snapshot keeps lagging the stream, backing off");
                    self.snapshot_timer = Some(Box::pin(sleep(delay)));
                }
                return Flow::Continue;
            }
            Ok(Err(err)) => err.to_string(),
            Err(err) => err.to_string(),
        };

        warn!(error = %err, "snapshot unavailable, polling until retry");
        metrics::counter!("spreadx_snapshot_failures_total").increment(1);
        self.snapshot_attempt += 1;
        let delay = self.retry.snapshot_retry_delay(self.snapshot_attempt);
        self.snapshot_timer = Some(Box::pin(sleep(delay)));
        self.enter_fallback().await
    }

    async fn enter_fallback(&mut self) -> Flow {
        if self.poll_timer.is_none() {
            let mut timer = interval(self.retry.poll_interval().max(Duration::from_millis(1)));
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.poll_timer = Some(timer);
        }
        self.set_source(FeedSource::Poll).await
    }

    fn exit_fallback(&mut self) {
        self.poll_timer = None;
        self.poll_inflight = None;
    }

    // Single poll in flight; a slow venue just skips ticks
    fn begin_poll(&mut self) {
        if self.poll_inflight.is_some() {
            return;
        }
        let fallback = Arc::clone(&self.fallback);
        let market = self.config.market.clone();
        let depth = self.config.depth;
        let limit = self.config.fetch_timeout;
        self.poll_inflight = Some(bounded(limit, async move { fallback.poll_book(&market, depth).await }));
    }

    async fn on_poll(&mut self, result: Result<PolledBook, FeedError>) -> Flow {
        if self.poll_timer.is_none() {
            return Flow::Continue;
        }
        match result {
            Ok(book) => {
                metrics::counter!("spreadx_poll_ticks_total").increment(1);
                match BookTick::from_levels(&book.bids, &book.asks, self.clock.now_ms(), FeedSource::Poll) {
                    Some(tick) => self.emit(FeedEvent::Tick(tick)).await,
                    None => {
                        debug!("polled book has an empty side");
                        Flow::Continue
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "fallback poll failed");
                Flow::Continue
            }
        }
    }

    async fn set_source(&mut self, source: FeedSource) -> Flow {
        if self.source == Some(source) {
            return Flow::Continue;
        }
        info!(%source, "data source changed");
        metrics::gauge!("spreadx_source_ws").set(if source == FeedSource::Ws { 1.0 } else { 0.0 });
        self.source = Some(source);
        self.emit(FeedEvent::SourceChanged(source)).await
    }

    async fn emit(&mut self, event: FeedEvent) -> Flow {
        match self.events.send(event).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Stop,
        }
    }
}

// A fetch that outlives `limit` settles as FeedError::Timeout
fn bounded<T, F>(limit: Duration, fetch: F) -> BoxFuture<'static, Result<T, FeedError>>
where
    T: Send + 'static,
    F: std::future::Future<Output = Result<T, FeedError>> + Send + 'static,
{
    async move {
        match timeout(limit, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(limit)),
        }
    }
    .boxed()
}

// Each helper pends forever when its slot is empty, so select! skips it

async fn settle<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_frame(stream: &mut Option<EventStream>) -> Option<Result<MarketEvent, FeedError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}
