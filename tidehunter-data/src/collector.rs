use crate::{
    alert::{fire::FireState, registry::AlertRegistry},
    calendar,
    feed::{FeedCommand, LiveFeed},
    store::SeriesStore,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Work done by one [`Collector::collect`] pass.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct CollectReport {
    pub points_pruned: usize,
    pub fires_expired: usize,
    pub series_removed: usize,
    pub feeds_unsubscribed: usize,
}

/// Garbage collector trimming every series to its retention window, expiring fire state
/// for candles that have rolled out of the complete-candle window, and tearing down series &
/// live feeds no alert references.
#[derive(Debug, Clone)]
pub struct Collector {
    store: Arc<SeriesStore>,
    registry: Arc<AlertRegistry>,
    fire_state: Arc<FireState>,
    feeds: Vec<Arc<LiveFeed>>,
}

impl Collector {
    pub fn new(
        store: Arc<SeriesStore>,
        registry: Arc<AlertRegistry>,
        fire_state: Arc<FireState>,
    ) -> Self {
        Self {
            store,
            registry,
            fire_state,
            feeds: Vec::new(),
        }
    }

    /// Also unsubscribe the [`LiveFeed`]'s subscriptions once no alert references them.
    pub fn with_feed(mut self, feed: Arc<LiveFeed>) -> Self {
        self.feeds.push(feed);
        self
    }

    pub fn collect(&self) -> CollectReport {
        self.collect_at(calendar::now_ms())
    }

    /// Run one collection pass as of `now`.
    ///
    /// Keys to clean are gathered from snapshots first and deleted afterwards, so concurrent
    /// writers are never iterated over.
    pub fn collect_at(&self, now: i64) -> CollectReport {
        let mut report = CollectReport::default();

        let referenced = self.registry.series_keys();
        for key in self.store.keys() {
            if !referenced.contains(&key) {
                if self.store.remove_series(&key) {
                    debug!(%key, "removed unreferenced series");
                    report.series_removed += 1;
                }
                continue;
            }

            report.points_pruned += self
                .store
                .prune(&key, calendar::retention_floor_at(now, key.timeframe));
        }

        for feed in &self.feeds {
            let exchange = feed.exchange();
            let orphans = feed
                .sockets()
                .into_iter()
                .chain(feed.pending().into_iter().filter_map(|command| match command {
                    FeedCommand::Subscribe(key) => Some(key),
                    FeedCommand::Unsubscribe(_) => None,
                }))
                .unique()
                .filter(|key| !self.registry.references_feed(exchange, key))
                .collect::<Vec<_>>();

            for key in orphans {
                feed.unsubscribe(&key);
                debug!(%exchange, %key, "unsubscribed unreferenced live feed");
                report.feeds_unsubscribed += 1;
            }
        }

        for (key, last_fired) in self.fire_state.snapshot() {
            let expired = match key.timeframe() {
                Ok(timeframe) => calendar::latest_complete_bucket_at(now, timeframe) > last_fired,
                Err(error) => {
                    warn!(%key, ?error, "removing fire state with unparseable alert key");
                    true
                }
            };

            if expired && self.fire_state.expire(&key, last_fired) {
                report.fires_expired += 1;
            }
        }

        debug!(?report, "collected garbage");
        report
    }
}
