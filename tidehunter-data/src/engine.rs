use crate::{
    alert::{
        AlertDefinition, AlertKey, evaluator::AlertEvaluator, fire::FireState,
        registry::AlertRegistry,
    },
    backfill::{Backfill, BackfillOutcome},
    backoff::Backoff,
    collector::Collector,
    error::DataError,
    exchange::{ExchangeClient, ExchangeId},
    feed::{FeedConfig, FeedDebugState, LiveFeed},
    notify::NotificationSink,
    scheduler::{Cadence, spawn_recurring},
    store::{SeriesStore, SeriesSummary},
};
use async_trait::async_trait;
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Source of the [`AlertDefinition`]s registered at start-up.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn load_alerts(&self) -> Result<Vec<AlertDefinition>, DataError>;
}

/// Intervals & retry policies of a [`Tidehunter`] engine.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    pub evaluate_interval: Duration,
    pub collect_interval: Duration,
    pub drain_interval: Duration,
    pub feed: FeedConfig,
    pub notify_retry: Backoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluate_interval: Duration::from_secs(2),
            collect_interval: Duration::from_secs(10),
            drain_interval: Duration::from_secs(2),
            feed: FeedConfig::default(),
            notify_retry: Backoff::new(Duration::from_secs(1), Duration::from_secs(30))
                .with_max_attempts(5),
        }
    }
}

impl EngineConfig {
    pub fn with_evaluate_interval(mut self, interval: Duration) -> Self {
        self.evaluate_interval = interval;
        self
    }

    pub fn with_collect_interval(mut self, interval: Duration) -> Self {
        self.collect_interval = interval;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.feed.read_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: Backoff) -> Self {
        self.feed.reconnect = reconnect;
        self
    }

    pub fn with_notify_retry(mut self, retry: Backoff) -> Self {
        self.notify_retry = retry;
        self
    }
}

/// Registered alert keys & the shape of every stored series.
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
pub struct StoreSummary {
    pub alerts: Vec<AlertKey>,
    pub series: Vec<SeriesSummary>,
}

impl Display for StoreSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // eg/ {binance: {bnbbtc: [1h(100), 4h(100)], ethbtc: [1d(100)]}}
        let data = self
            .series
            .iter()
            .chunk_by(|summary| summary.key.exchange)
            .into_iter()
            .map(|(exchange, series)| {
                let symbols = series
                    .chunk_by(|summary| summary.key.symbol.clone())
                    .into_iter()
                    .map(|(symbol, series)| {
                        let timeframes = series
                            .map(|summary| format!("{}({})", summary.key.timeframe, summary.len))
                            .join(", ");
                        format!("{symbol}: [{timeframes}]")
                    })
                    .join(", ");
                format!("{exchange}: {{{symbols}}}")
            })
            .join(", ");

        writeln!(f, "📊 STORE STATS")?;
        writeln!(f, "==========================")?;
        writeln!(f, "{:<15}: [{}]", "Alerts", self.alerts.iter().join(", "))?;
        writeln!(f, "{:<15}: {{{data}}}", "Data")?;
        writeln!(f, "==========================")
    }
}

/// Last fired candle bucket per alert key.
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
pub struct AlerterDebugState {
    pub last_alerts: Vec<(AlertKey, i64)>,
}

impl Display for AlerterDebugState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last_alerts = self
            .last_alerts
            .iter()
            .map(|(key, time)| format!("{key}: {time}"))
            .join(", ");

        writeln!(f, "📊 ALERTER STATS")?;
        writeln!(f, "==========================")?;
        writeln!(f, "{:<15}: {{{last_alerts}}}", "Last alerts")?;
        writeln!(f, "==========================")
    }
}

/// Exchange client, live feed & backfill loader sharing one exchange connection.
#[derive(Debug, Clone)]
struct Connector {
    feed: Arc<LiveFeed>,
    backfill: Backfill,
}

/// Background tasks started by [`Tidehunter::start`].
#[derive(Debug)]
pub struct EngineHandles {
    pub evaluator: JoinHandle<()>,
    pub collector: JoinHandle<()>,
    pub drain: JoinHandle<()>,
}

impl EngineHandles {
    pub fn abort_all(&self) {
        self.evaluator.abort();
        self.collector.abort();
        self.drain.abort();
    }
}

/// Volume spike alerting engine.
///
/// Owns the [`SeriesStore`], [`AlertRegistry`] & [`FireState`] plus one connector per
/// configured exchange, and runs the evaluator, collector and feed command drain as
/// recurring tasks once [`started`](Tidehunter::start).
#[derive(Debug)]
pub struct Tidehunter {
    config: EngineConfig,
    store: Arc<SeriesStore>,
    registry: Arc<AlertRegistry>,
    fire_state: Arc<FireState>,
    sink: NotificationSink,
    connectors: FnvHashMap<ExchangeId, Connector>,
}

impl Tidehunter {
    pub fn new(config: EngineConfig, sink: NotificationSink) -> Self {
        Self {
            config,
            store: Arc::new(SeriesStore::new()),
            registry: Arc::new(AlertRegistry::new()),
            fire_state: Arc::new(FireState::new()),
            sink,
            connectors: FnvHashMap::default(),
        }
    }

    /// Connect the [`ExchangeClient`], replacing any previous client for the same exchange.
    pub fn with_exchange(mut self, client: Arc<dyn ExchangeClient>) -> Self {
        let feed = Arc::new(LiveFeed::new(
            Arc::clone(&client),
            Arc::clone(&self.store),
            self.config.feed,
        ));
        let backfill = Backfill::new(
            Arc::clone(&client),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&feed),
        );

        self.connectors
            .insert(client.id(), Connector { feed, backfill });
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SeriesStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AlertRegistry> {
        &self.registry
    }

    pub fn fire_state(&self) -> &Arc<FireState> {
        &self.fire_state
    }

    pub fn evaluator(&self) -> AlertEvaluator {
        AlertEvaluator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.fire_state),
            self.sink.clone(),
        )
    }

    pub fn collector(&self) -> Collector {
        self.connectors.values().fold(
            Collector::new(
                Arc::clone(&self.store),
                Arc::clone(&self.registry),
                Arc::clone(&self.fire_state),
            ),
            |collector, connector| collector.with_feed(Arc::clone(&connector.feed)),
        )
    }

    fn connector(&self, exchange: ExchangeId) -> Result<&Connector, DataError> {
        self.connectors
            .get(&exchange)
            .ok_or_else(|| DataError::UnsupportedExchange(exchange.to_string()))
    }

    /// Register the alert, backfill its series if new, and make sure its live feed gets
    /// subscribed.
    ///
    /// A failed backfill is logged and does not unregister the alert: the series fills from
    /// the live feed instead.
    pub async fn add_alert(&self, definition: AlertDefinition) -> Result<AlertKey, DataError> {
        let connector = self.connector(definition.exchange)?;
        let key = definition.key();
        let series_key = definition.series_key();

        if !self.registry.insert(definition) {
            debug!(%key, "alert already registered");
        }

        match connector.backfill.load(&series_key).await {
            Ok(BackfillOutcome::Seeded { points }) => {
                info!(%key, points, "alert registered with backfilled series");
            }
            Ok(BackfillOutcome::AlreadySeeded) => {
                info!(%key, "alert registered on existing series");
            }
            Err(error) => {
                warn!(%key, ?error, "alert registered without backfill");
            }
        }

        Ok(key)
    }

    /// Unregister the alert & forget its fire state. The series is dropped and the live feed
    /// unsubscribed once no other alert references them.
    pub fn remove_alert(&self, key: &AlertKey) -> Result<AlertDefinition, DataError> {
        let definition = self
            .registry
            .remove(key)
            .ok_or_else(|| DataError::AlertNotFound(key.to_string()))?;
        self.fire_state.remove(key);

        let series_key = definition.series_key();
        if !self.registry.references_series(&series_key) && self.store.remove_series(&series_key)
        {
            debug!(%series_key, "removed series of last referencing alert");
        }

        let feed_key = definition.feed_key();
        if !self.registry.references_feed(definition.exchange, &feed_key) {
            if let Some(connector) = self.connectors.get(&definition.exchange) {
                connector.feed.unsubscribe(&feed_key);
            }
        }

        info!(%key, "alert removed");
        Ok(definition)
    }

    /// Register every alert supplied by the [`AlertRepository`], returning the number
    /// registered. Alerts that cannot be registered are logged & skipped.
    pub async fn load_from(&self, repository: &dyn AlertRepository) -> Result<usize, DataError> {
        let definitions = repository.load_alerts().await?;
        let total = definitions.len();

        let mut registered = 0;
        for definition in definitions {
            match self.add_alert(definition).await {
                Ok(_) => registered += 1,
                Err(error) => warn!(?error, "skipping stored alert"),
            }
        }

        info!(registered, total, "loaded stored alerts");
        Ok(registered)
    }

    /// Run every pending feed command of every exchange, returning the number run.
    pub fn drain_feeds(&self) -> usize {
        self.connectors
            .values()
            .map(|connector| connector.feed.drain())
            .sum()
    }

    pub fn get_store_snapshot_summary(&self) -> StoreSummary {
        StoreSummary {
            alerts: self.registry.keys(),
            series: self.store.summary(),
        }
    }

    pub fn get_alerter_debug_state(&self) -> AlerterDebugState {
        AlerterDebugState {
            last_alerts: self.fire_state.snapshot(),
        }
    }

    pub fn get_exchange_debug_state(
        &self,
        exchange: ExchangeId,
    ) -> Result<FeedDebugState, DataError> {
        self.connector(exchange)
            .map(|connector| connector.feed.debug_state())
    }

    /// Store, alerter & exchange stats blocks as one plain-text message.
    pub fn stats_message(&self) -> String {
        let exchanges = self
            .connectors
            .keys()
            .sorted()
            .filter_map(|exchange| self.get_exchange_debug_state(*exchange).ok())
            .map(|state| state.to_string());

        std::iter::once(self.get_store_snapshot_summary().to_string())
            .chain(std::iter::once(self.get_alerter_debug_state().to_string()))
            .chain(exchanges)
            .join("\n")
    }

    /// Spawn the evaluator, collector & feed command drain tasks.
    pub fn start(self: &Arc<Self>) -> EngineHandles {
        let evaluator = self.evaluator();
        let evaluator = spawn_recurring(
            "evaluate",
            self.config.evaluate_interval,
            Cadence::Dynamic,
            move || {
                let evaluator = evaluator.clone();
                async move {
                    evaluator.tick();
                }
            },
        );

        let collector = self.collector();
        let collector = spawn_recurring(
            "collect",
            self.config.collect_interval,
            Cadence::Dynamic,
            move || {
                let collector = collector.clone();
                async move {
                    collector.collect();
                }
            },
        );

        let engine = Arc::clone(self);
        let drain = spawn_recurring(
            "drain",
            self.config.drain_interval,
            Cadence::Dynamic,
            move || {
                let engine = Arc::clone(&engine);
                async move {
                    engine.drain_feeds();
                }
            },
        );

        info!(config = ?self.config, exchanges = self.connectors.len(), "engine started");
        EngineHandles {
            evaluator,
            collector,
            drain,
        }
    }

    /// Abort the recurring tasks & every live feed.
    pub fn shutdown(&self, handles: &EngineHandles) {
        handles.abort_all();
        for connector in self.connectors.values() {
            connector.feed.shutdown();
        }
        info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calendar,
        exchange::KlineEvent,
        feed::{FeedCommand, FeedKey},
        store::{SeriesKey, VolumePoint},
        test_utils::{MockExchange, RecordingNotifier, sink},
        timeframe::Timeframe,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    const HOUR: i64 = 3_600_000;

    struct StaticRepository(Vec<AlertDefinition>);

    #[async_trait]
    impl AlertRepository for StaticRepository {
        async fn load_alerts(&self) -> Result<Vec<AlertDefinition>, DataError> {
            Ok(self.0.clone())
        }
    }

    fn engine(exchange: Arc<MockExchange>, notifier: Arc<RecordingNotifier>) -> Tidehunter {
        Tidehunter::new(EngineConfig::default(), sink(notifier)).with_exchange(exchange)
    }

    async fn eventually<F>(condition: F)
    where
        F: Fn() -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn test_alert_lifecycle_from_backfill_to_notification() {
        let exchange = Arc::new(MockExchange::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(exchange.clone(), notifier.clone());

        let definition = AlertDefinition::from_str("binance_bnbbtc_1h_50_100").unwrap();
        let key = definition.key();
        let series_key = SeriesKey::new(ExchangeId::Binance, "bnbbtc", Timeframe::H1);
        let feed_key = FeedKey::new("BNBBTC", Timeframe::H1);

        let incomplete = calendar::latest_incomplete_bucket(Timeframe::H1);
        let history = (0..100)
            .map(|hour| VolumePoint::new(incomplete - (99 - hour) * HOUR, dec!(10)))
            .collect::<Vec<_>>();
        exchange.set_history(&series_key, Ok(history));

        // Backfill seeds the series & schedules the live subscription
        assert_eq!(engine.add_alert(definition).await, Ok(key.clone()));
        assert_eq!(engine.store().snapshot(&series_key).len(), 100);
        assert_eq!(
            engine.get_exchange_debug_state(ExchangeId::Binance).unwrap().pending,
            vec![FeedCommand::Subscribe(feed_key.clone())]
        );

        // Flat history never fires
        let evaluator = engine.evaluator();
        assert!(evaluator.tick().is_empty());

        assert_eq!(engine.drain_feeds(), 1);
        let live = exchange.next_stream(&feed_key).await;

        // Next hour opens at 2.5x the trailing average
        let next = incomplete + HOUR;
        live.send(Ok(KlineEvent {
            time_exchange: Utc::now(),
            symbol: "BNBBTC".to_string(),
            open_time: next,
            close_time: next + HOUR - 1,
            closed: false,
            quote_volume: dec!(25),
        }))
        .unwrap();

        let store = Arc::clone(engine.store());
        let latest = series_key.clone();
        eventually(move || {
            store.snapshot(&latest).last().map(|point| point.time) == Some(next)
        })
        .await;
        assert_eq!(engine.store().snapshot(&series_key).len(), 100);

        assert_eq!(evaluator.tick(), vec![key.clone()]);
        assert!(evaluator.tick().is_empty());
        assert_eq!(engine.fire_state().last_fired(&key), Some(next));

        let delivered = notifier.clone();
        eventually(move || delivered.messages().len() == 1).await;
        let message = &notifier.messages()[0];
        assert!(message.contains("binance_bnbbtc_1h_50_100"));
        assert!(message.contains("Current volume"));

        // Removing the only alert drops its series, fire state & subscription
        assert_eq!(
            engine.remove_alert(&key).map(|definition| definition.key()),
            Ok(key.clone())
        );
        assert!(!engine.store().contains(&series_key));
        assert_eq!(engine.fire_state().last_fired(&key), None);
        assert!(
            engine
                .get_exchange_debug_state(ExchangeId::Binance)
                .unwrap()
                .sockets
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_remove_alert_keeps_shared_series_and_feed() {
        let exchange = Arc::new(MockExchange::default());
        let engine = engine(exchange, Arc::new(RecordingNotifier::default()));

        let narrow = AlertDefinition::from_str("binance_bnbbtc_1h_3_10").unwrap();
        let wide = AlertDefinition::from_str("binance_bnbbtc_1h_50_100").unwrap();
        engine.add_alert(narrow.clone()).await.unwrap();
        engine.add_alert(wide.clone()).await.unwrap();
        engine
            .store()
            .append_or_update(&narrow.series_key(), 0, dec!(1))
            .unwrap();
        engine.drain_feeds();

        engine.remove_alert(&narrow.key()).unwrap();
        assert!(engine.store().contains(&wide.series_key()));
        assert_eq!(
            engine.get_exchange_debug_state(ExchangeId::Binance).unwrap().sockets,
            vec![wide.feed_key()]
        );

        assert_eq!(
            engine.remove_alert(&narrow.key()),
            Err(DataError::AlertNotFound(narrow.key().to_string()))
        );
    }

    #[tokio::test]
    async fn test_alert_removed_during_backfill_leaves_no_subscription() {
        let exchange = Arc::new(MockExchange::default());
        let engine = Arc::new(engine(
            exchange.clone(),
            Arc::new(RecordingNotifier::default()),
        ));
        let definition = AlertDefinition::from_str("binance_bnbbtc_1h_50_100").unwrap();
        let key = definition.key();
        exchange.set_history(
            &definition.series_key(),
            Ok(vec![VolumePoint::new(0, dec!(1))]),
        );

        // Alert is removed while its historical request is in flight
        let removing = Arc::clone(&engine);
        let removed = key.clone();
        exchange.on_history(move || {
            removing.remove_alert(&removed).unwrap();
        });

        assert_eq!(engine.add_alert(definition.clone()).await, Ok(key));
        assert!(engine.registry().is_empty());

        assert_eq!(engine.drain_feeds(), 0);
        let report = engine.collector().collect();
        assert_eq!(report.feeds_unsubscribed, 0);
        assert_eq!(report.series_removed, 1);

        let exchange_state = engine.get_exchange_debug_state(ExchangeId::Binance).unwrap();
        assert!(exchange_state.sockets.is_empty());
        assert!(exchange_state.pending.is_empty());
        assert!(!engine.store().contains(&definition.series_key()));
    }

    #[tokio::test]
    async fn test_add_alert_without_connector_is_rejected() {
        let engine = Tidehunter::new(
            EngineConfig::default(),
            sink(Arc::new(RecordingNotifier::default())),
        );
        let definition = AlertDefinition::from_str("binance_bnbbtc_1h_3_10").unwrap();

        assert_eq!(
            engine.add_alert(definition).await,
            Err(DataError::UnsupportedExchange("binance".to_string()))
        );
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_load_from_repository_and_stats_message() {
        let exchange = Arc::new(MockExchange::default());
        let engine = engine(exchange, Arc::new(RecordingNotifier::default()));

        let repository = StaticRepository(vec![
            AlertDefinition::from_str("binance_bnbbtc_1h_3_10").unwrap(),
            AlertDefinition::from_str("binance_ethbtc_1d_5_20").unwrap(),
        ]);
        assert_eq!(engine.load_from(&repository).await, Ok(2));

        let bnbbtc = SeriesKey::new(ExchangeId::Binance, "bnbbtc", Timeframe::H1);
        engine
            .store()
            .append_or_update(&bnbbtc, 0, dec!(1))
            .unwrap();
        engine
            .store()
            .append_or_update(&bnbbtc, HOUR, dec!(2))
            .unwrap();

        let stats = engine.stats_message();
        assert!(stats.contains("📊 STORE STATS"));
        assert!(stats.contains("📊 ALERTER STATS"));
        assert!(stats.contains("📊 EXCHANGE STATS"));
        assert!(stats.contains(
            "Alerts         : [binance_bnbbtc_1h_3_10, binance_ethbtc_1d_5_20]"
        ));
        // Empty history still leaves an empty series to fill from the live feed
        assert!(stats.contains(
            "Data           : {binance: {bnbbtc: [1h(2)], ethbtc: [1d(0)]}}"
        ));
        assert!(stats.contains("Pending calls  : [subscribe(BNBBTC_1h), subscribe(ETHBTC_1d)]"));
    }

    #[test]
    fn test_alerter_debug_state_display() {
        let state = AlerterDebugState {
            last_alerts: vec![(
                AlertKey::from_str("binance_bnbbtc_1h_3_10").unwrap(),
                1_704_103_200_000,
            )],
        };

        assert_eq!(
            state.to_string(),
            "📊 ALERTER STATS\n\
             ==========================\n\
             Last alerts    : {binance_bnbbtc_1h_3_10: 1704103200000}\n\
             ==========================\n"
        );
    }
}
