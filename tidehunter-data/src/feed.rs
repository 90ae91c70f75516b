use crate::{
    backoff::Backoff,
    calendar,
    error::DataError,
    exchange::{ExchangeClient, ExchangeId, KlineEvent},
    store::{SeriesKey, SeriesStore},
    streams::TimeoutStream,
    timeframe::Timeframe,
};
use fnv::FnvHashMap;
use futures::StreamExt;
use itertools::Itertools;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identity of one live subscription: uppercase symbol & [`Timeframe`], eg/ "BNBBTC_1h".
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub struct FeedKey {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
}

impl FeedKey {
    pub fn new<S>(symbol: S, timeframe: Timeframe) -> Self
    where
        S: AsRef<str>,
    {
        Self {
            symbol: SmolStr::new(symbol.as_ref().to_uppercase()),
            timeframe,
        }
    }
}

impl Display for FeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.symbol, self.timeframe)
    }
}

/// Normalised candle update ready to be written to the [`SeriesStore`].
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct Candle {
    pub exchange: ExchangeId,
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    /// Bucket start of the candle.
    pub time: i64,
    /// Cumulative quote volume of the candle so far.
    pub volume: Decimal,
    pub closed: bool,
}

impl Candle {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.exchange, &self.symbol, self.timeframe)
    }
}

impl From<(ExchangeId, Timeframe, KlineEvent)> for Candle {
    fn from((exchange, timeframe, event): (ExchangeId, Timeframe, KlineEvent)) -> Self {
        Self {
            exchange,
            symbol: SmolStr::new(event.symbol.to_lowercase()),
            timeframe,
            time: calendar::bucket_start(event.open_time, timeframe),
            volume: event.quote_volume,
            closed: event.closed,
        }
    }
}

/// Deferred subscription change, executed by [`LiveFeed::drain`].
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub enum FeedCommand {
    Subscribe(FeedKey),
    Unsubscribe(FeedKey),
}

impl FeedCommand {
    pub fn key(&self) -> &FeedKey {
        match self {
            FeedCommand::Subscribe(key) | FeedCommand::Unsubscribe(key) => key,
        }
    }
}

impl Display for FeedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedCommand::Subscribe(key) => write!(f, "subscribe({key})"),
            FeedCommand::Unsubscribe(key) => write!(f, "unsubscribe({key})"),
        }
    }
}

/// Live subscription settings.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedConfig {
    /// End a stream that yields nothing for this long, then reconnect.
    pub read_timeout: Duration,
    pub reconnect: Backoff,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            read_timeout: crate::streams::timeout::DEFAULT_READ_TIMEOUT,
            reconnect: Backoff::default(),
        }
    }
}

/// Active sockets & pending commands of one exchange's [`LiveFeed`].
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
pub struct FeedDebugState {
    pub exchange: ExchangeId,
    pub sockets: Vec<FeedKey>,
    pub pending: Vec<FeedCommand>,
}

impl Display for FeedDebugState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "📊 EXCHANGE STATS")?;
        writeln!(f, "==========================")?;
        writeln!(f, "{:<15}: {}", "Exchange", self.exchange)?;
        writeln!(f, "{:<15}: [{}]", "Sockets", self.sockets.iter().join(", "))?;
        writeln!(f, "{:<15}: [{}]", "Pending calls", self.pending.iter().join(", "))?;
        writeln!(f, "==========================")
    }
}

/// Per (symbol, timeframe) live kline subscriptions of one exchange, writing every update to
/// the [`SeriesStore`].
///
/// Callers usually [`schedule`](LiveFeed::schedule) [`FeedCommand`]s rather than subscribing
/// inline; a recurring task [`drain`](LiveFeed::drain)s the queue.
pub struct LiveFeed {
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<SeriesStore>,
    config: FeedConfig,
    tasks: Mutex<FnvHashMap<FeedKey, JoinHandle<()>>>,
    queue: Mutex<Vec<FeedCommand>>,
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("exchange", &self.exchange.id())
            .field("config", &self.config)
            .field("sockets", &self.sockets())
            .field("pending", &self.pending())
            .finish()
    }
}

impl LiveFeed {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<SeriesStore>,
        config: FeedConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            config,
            tasks: Mutex::new(FnvHashMap::default()),
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn exchange(&self) -> ExchangeId {
        self.exchange.id()
    }

    /// Queue the [`FeedCommand`] for the next [`drain`](LiveFeed::drain).
    pub fn schedule(&self, command: FeedCommand) {
        debug!(exchange = %self.exchange(), %command, "scheduling feed command");
        self.queue.lock().push(command);
    }

    /// Execute every queued [`FeedCommand`] in submission order, returning the number run.
    ///
    /// The queue stays locked for the whole pass, so commands scheduled meanwhile run on the
    /// next drain.
    pub fn drain(&self) -> usize {
        let mut queue = self.queue.lock();

        for command in queue.iter() {
            match command {
                FeedCommand::Subscribe(key) => {
                    self.start_task(key.clone());
                }
                FeedCommand::Unsubscribe(key) => {
                    self.stop_task(key);
                }
            }
        }

        let executed = queue.len();
        queue.clear();
        executed
    }

    /// Start the live subscription for the key, returning false if one is already running.
    ///
    /// A finished subscription task is replaced.
    pub fn subscribe(&self, key: FeedKey) -> bool {
        self.start_task(key)
    }

    /// Cancel the live subscription for the key & drop any pending subscribe for it. Safe to
    /// call when no subscription exists.
    pub fn unsubscribe(&self, key: &FeedKey) -> bool {
        self.queue
            .lock()
            .retain(|command| *command != FeedCommand::Subscribe(key.clone()));
        self.stop_task(key)
    }

    pub fn is_subscribed(&self, key: &FeedKey) -> bool {
        self.tasks
            .lock()
            .get(key)
            .is_some_and(|task| !task.is_finished())
    }

    /// Keys of every subscription task, sorted.
    pub fn sockets(&self) -> Vec<FeedKey> {
        self.tasks.lock().keys().cloned().sorted().collect()
    }

    pub fn pending(&self) -> Vec<FeedCommand> {
        self.queue.lock().clone()
    }

    pub fn debug_state(&self) -> FeedDebugState {
        FeedDebugState {
            exchange: self.exchange(),
            sockets: self.sockets(),
            pending: self.pending(),
        }
    }

    /// Abort every subscription task.
    pub fn shutdown(&self) {
        for (key, task) in self.tasks.lock().drain() {
            debug!(exchange = %self.exchange(), %key, "aborting feed task");
            task.abort();
        }
    }

    fn start_task(&self, key: FeedKey) -> bool {
        let mut tasks = self.tasks.lock();

        if tasks.get(&key).is_some_and(|task| !task.is_finished()) {
            debug!(exchange = %self.exchange(), %key, "feed already subscribed");
            return false;
        }

        info!(exchange = %self.exchange(), %key, "subscribing to live feed");
        let task = tokio::spawn(run_feed(
            Arc::clone(&self.exchange),
            Arc::clone(&self.store),
            key.clone(),
            self.config,
        ));

        if let Some(previous) = tasks.insert(key, task) {
            previous.abort();
        }
        true
    }

    fn stop_task(&self, key: &FeedKey) -> bool {
        match self.tasks.lock().remove(key) {
            Some(task) => {
                info!(exchange = %self.exchange(), %key, "unsubscribed from live feed");
                task.abort();
                true
            }
            None => false,
        }
    }
}

/// Receive loop of one subscription: connect, write every update to the store, and
/// reconnect with backoff whenever the stream fails, ends or idles out.
async fn run_feed(
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<SeriesStore>,
    key: FeedKey,
    config: FeedConfig,
) {
    let exchange_id = exchange.id();
    let mut backoff = config.reconnect.start();

    loop {
        match exchange.kline_stream(&key.symbol, key.timeframe).await {
            Ok(stream) => {
                info!(exchange = %exchange_id, %key, "live feed connected");
                let mut stream = TimeoutStream::new(stream, config.read_timeout);

                while let Some(event) = stream.next().await {
                    match event {
                        Ok(event) => {
                            backoff.reset();
                            publish(&store, Candle::from((exchange_id, key.timeframe, event)));
                        }
                        Err(error) if error.is_terminal() => {
                            warn!(exchange = %exchange_id, %key, ?error, "live feed terminated");
                            break;
                        }
                        Err(error) => {
                            warn!(exchange = %exchange_id, %key, ?error, "skipping kline event");
                        }
                    }
                }

                if stream.timed_out() {
                    warn!(
                        exchange = %exchange_id,
                        %key,
                        timeout = ?config.read_timeout,
                        "live feed idle past read timeout"
                    );
                } else {
                    warn!(exchange = %exchange_id, %key, "live feed disconnected");
                }
            }
            Err(error) => {
                warn!(exchange = %exchange_id, %key, ?error, "live feed failed to connect");
            }
        }

        match backoff.next_delay() {
            Some(delay) => {
                info!(exchange = %exchange_id, %key, ?delay, "reconnecting live feed");
                tokio::time::sleep(delay).await;
            }
            None => {
                let error = DataError::SubscriptionFailure {
                    key: key.clone(),
                    reason: format!("gave up after {} reconnect attempts", backoff.attempt()),
                };
                error!(exchange = %exchange_id, %error, "live feed stopped");
                return;
            }
        }
    }
}

fn publish(store: &SeriesStore, candle: Candle) {
    match store.append_or_update(&candle.series_key(), candle.time, candle.volume) {
        Ok(write) => {
            debug!(
                key = %candle.series_key(),
                time = candle.time,
                volume = %candle.volume,
                closed = candle.closed,
                ?write,
                "live candle"
            );
        }
        Err(error) => {
            warn!(%error, "dropping live candle");
        }
    }
}
