use crate::{
    backoff::Backoff,
    error::DataError,
    exchange::{ExchangeClient, ExchangeId, KlineEvent, KlineStream},
    feed::FeedKey,
    notify::{NotificationSink, Notifier},
    store::{SeriesKey, VolumePoint},
    timeframe::Timeframe,
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type KlineSender = mpsc::UnboundedSender<Result<KlineEvent, DataError>>;

type HistoryHook = Box<dyn Fn() + Send + Sync>;

/// In-memory [`ExchangeClient`] serving canned history and test-driven kline streams.
#[derive(Default)]
pub struct MockExchange {
    history: Mutex<FnvHashMap<SeriesKey, Result<Vec<VolumePoint>, DataError>>>,
    history_requests: Mutex<Vec<(SeriesKey, i64)>>,
    history_hook: Mutex<Option<HistoryHook>>,
    streams: Mutex<FnvHashMap<FeedKey, Vec<KlineSender>>>,
    taken: Mutex<FnvHashMap<FeedKey, usize>>,
}

impl MockExchange {
    pub fn set_history(&self, key: &SeriesKey, history: Result<Vec<VolumePoint>, DataError>) {
        self.history.lock().insert(key.clone(), history);
    }

    /// Run `hook` while every historical request is in flight.
    pub fn on_history<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.history_hook.lock() = Some(Box::new(hook));
    }

    pub fn history_requests(&self) -> Vec<(SeriesKey, i64)> {
        self.history_requests.lock().clone()
    }

    /// Number of kline streams opened for the key.
    pub fn connections(&self, key: &FeedKey) -> usize {
        self.streams.lock().get(key).map(Vec::len).unwrap_or_default()
    }

    /// Wait for the next kline stream opened for the key, returning its sender.
    pub async fn next_stream(&self, key: &FeedKey) -> KlineSender {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let taken = self.taken.lock().get(key).copied().unwrap_or_default();
                let next = self
                    .streams
                    .lock()
                    .get(key)
                    .and_then(|senders| senders.get(taken))
                    .cloned();

                if let Some(sender) = next {
                    self.taken.lock().insert(key.clone(), taken + 1);
                    return sender;
                }

                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("kline stream was never opened")
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn id(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn historical_points(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
    ) -> Result<Vec<VolumePoint>, DataError> {
        let key = SeriesKey::new(self.id(), symbol, timeframe);
        self.history_requests.lock().push((key.clone(), start_ms));

        if let Some(hook) = self.history_hook.lock().as_ref() {
            hook();
        }

        self.history
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn kline_stream(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<KlineStream, DataError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .entry(FeedKey::new(symbol, timeframe))
            .or_default()
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// [`Notifier`] recording every attempt, optionally failing the first `failures` attempts.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingNotifier {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<(String, Option<String>)> {
        self.delivered.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str, target: Option<&str>) -> Result<(), DataError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(DataError::Http("503 Service Unavailable".to_string()));
        }

        self.delivered
            .lock()
            .push((message.to_string(), target.map(str::to_string)));
        Ok(())
    }
}

/// [`NotificationSink`] over the notifier with fast, bounded retries.
pub fn sink(notifier: Arc<dyn Notifier>) -> NotificationSink {
    let retry = Backoff::new(Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(false)
        .with_max_attempts(3);
    NotificationSink::spawn(notifier, retry).0
}
