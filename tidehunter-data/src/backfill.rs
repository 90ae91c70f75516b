use crate::{
    alert::registry::AlertRegistry,
    calendar,
    error::DataError,
    exchange::ExchangeClient,
    feed::{FeedCommand, FeedKey, LiveFeed},
    store::{SeriesKey, SeriesStore},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful [`Backfill::load`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub enum BackfillOutcome {
    /// Series seeded with the provided number of historical points.
    Seeded { points: usize },
    /// Series already held data, nothing was written.
    AlreadySeeded,
}

/// Seeds new series with one retention window of exchange history, then makes sure the live
/// feed is subscribed while an alert still references it.
#[derive(Debug, Clone)]
pub struct Backfill {
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<SeriesStore>,
    registry: Arc<AlertRegistry>,
    feed: Arc<LiveFeed>,
}

impl Backfill {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<SeriesStore>,
        registry: Arc<AlertRegistry>,
        feed: Arc<LiveFeed>,
    ) -> Self {
        Self {
            exchange,
            store,
            registry,
            feed,
        }
    }

    pub async fn load(&self, key: &SeriesKey) -> Result<BackfillOutcome, DataError> {
        self.load_at(key, calendar::now_ms()).await
    }

    /// Seed the series from exchange history spanning the retention window as of `now`, and
    /// schedule a live subscription if none is active.
    ///
    /// The subscription is requested even if the historical fetch fails, so the series still
    /// fills from live data. It is skipped if every alert on the feed was removed while the
    /// history was in flight.
    pub async fn load_at(&self, key: &SeriesKey, now: i64) -> Result<BackfillOutcome, DataError> {
        let outcome = self.seed(key, now).await;

        let feed_key = FeedKey::new(&key.symbol, key.timeframe);
        if !self.registry.references_feed(key.exchange, &feed_key) {
            debug!(%key, "alert removed during backfill, not subscribing");
        } else if !self.feed.is_subscribed(&feed_key) {
            self.feed.schedule(FeedCommand::Subscribe(feed_key));
        }

        outcome
    }

    async fn seed(&self, key: &SeriesKey, now: i64) -> Result<BackfillOutcome, DataError> {
        if self.store.is_seeded(key) {
            return Ok(BackfillOutcome::AlreadySeeded);
        }

        let start = calendar::retention_floor_at(now, key.timeframe);
        let points = self
            .exchange
            .historical_points(&key.symbol, key.timeframe, start)
            .await
            .inspect_err(|error| warn!(%key, ?error, "failed to fetch historical volume"))?;

        match self.store.seed(key, points) {
            Ok(points) => {
                info!(%key, points, start, "backfilled series");
                Ok(BackfillOutcome::Seeded { points })
            }
            Err(DataError::AlreadySeeded(_)) => {
                warn!(%key, "live data landed during backfill, discarding history");
                Ok(BackfillOutcome::AlreadySeeded)
            }
            Err(error) => Err(error),
        }
    }
}
