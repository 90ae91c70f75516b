use crate::{error::DataError, exchange::ExchangeId, timeframe::Timeframe};
use derive_more::Constructor;
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{fmt::Display, sync::Arc};
use tracing::warn;

/// Bounded rolling window of volume points for a single series.
pub mod series;

pub use series::{Series, Write};

/// Volume accumulated in the candle bucket starting at `time` (milliseconds since epoch).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize, Constructor)]
pub struct VolumePoint {
    pub time: i64,
    pub volume: Decimal,
}

/// Identity of one series held in the [`SeriesStore`]: (exchange, lowercase symbol, timeframe).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub struct SeriesKey {
    pub exchange: ExchangeId,
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new<S>(exchange: ExchangeId, symbol: S, timeframe: Timeframe) -> Self
    where
        S: AsRef<str>,
    {
        Self {
            exchange,
            symbol: SmolStr::new(symbol.as_ref().to_lowercase()),
            timeframe,
        }
    }
}

impl Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.exchange, self.symbol, self.timeframe)
    }
}

/// Length & latest point of one series, used to render store statistics.
#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
pub struct SeriesSummary {
    pub key: SeriesKey,
    pub len: usize,
    pub latest: Option<VolumePoint>,
}

type SymbolSeries = FnvHashMap<Timeframe, Arc<Mutex<Series>>>;
type ExchangeSeries = FnvHashMap<SmolStr, SymbolSeries>;

/// Concurrent in-memory table of rolling volume series, keyed exchange -> symbol -> timeframe.
///
/// The outer [`RwLock`] only guards the map structure (series creation & removal). Every
/// series sits behind its own [`Mutex`], so an append, prune or snapshot of one series is
/// atomic with respect to the others on the same series, and writers to different series
/// never contend.
#[derive(Debug, Default)]
pub struct SeriesStore {
    series: RwLock<FnvHashMap<ExchangeId, ExchangeSeries>>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, key: &SeriesKey) -> Option<Arc<Mutex<Series>>> {
        self.series
            .read()
            .get(&key.exchange)
            .and_then(|symbols| symbols.get(&key.symbol))
            .and_then(|timeframes| timeframes.get(&key.timeframe))
            .cloned()
    }

    fn find_or_create(&self, key: &SeriesKey) -> Arc<Mutex<Series>> {
        if let Some(series) = self.find(key) {
            return series;
        }

        Arc::clone(
            self.series
                .write()
                .entry(key.exchange)
                .or_default()
                .entry(key.symbol.clone())
                .or_default()
                .entry(key.timeframe)
                .or_insert_with(|| Arc::new(Mutex::new(Series::new(key.timeframe.max_length())))),
        )
    }

    /// Append `volume` as the new latest bucket of the series, or overwrite the latest
    /// bucket's volume if `time` equals it. Creates the series if absent.
    ///
    /// Writes older than the latest bucket are rejected with [`DataError::OutOfOrderWrite`]
    /// and leave the series unchanged.
    pub fn append_or_update(
        &self,
        key: &SeriesKey,
        time: i64,
        volume: Decimal,
    ) -> Result<Write, DataError> {
        let series = self.find_or_create(key);
        let mut series = series.lock();

        match series.write(time, volume) {
            Write::OutOfOrder { latest } => Err(DataError::OutOfOrderWrite {
                key: key.clone(),
                latest,
                received: time,
            }),
            write => Ok(write),
        }
    }

    /// Populate an absent or empty series with chronologically ordered points, returning the
    /// number of points held afterwards.
    ///
    /// Fails with [`DataError::AlreadySeeded`] without touching the series if it already holds
    /// data, so a slow backfill never clobbers live updates.
    pub fn seed<Points>(&self, key: &SeriesKey, points: Points) -> Result<usize, DataError>
    where
        Points: IntoIterator<Item = VolumePoint>,
    {
        let series = self.find_or_create(key);
        let mut series = series.lock();

        if !series.is_empty() {
            return Err(DataError::AlreadySeeded(key.clone()));
        }

        for point in points {
            if let Write::OutOfOrder { latest } = series.write(point.time, point.volume) {
                warn!(
                    %key,
                    latest,
                    received = point.time,
                    "skipping out of order seed point"
                );
            }
        }

        Ok(series.len())
    }

    /// Consistent, chronologically ordered copy of the series. Empty if the series is absent.
    pub fn snapshot(&self, key: &SeriesKey) -> Vec<VolumePoint> {
        self.find(key)
            .map(|series| series.lock().points().copied().collect())
            .unwrap_or_default()
    }

    /// Remove every point of the series strictly older than `floor`, returning the number
    /// of points removed.
    pub fn prune(&self, key: &SeriesKey, floor: i64) -> usize {
        self.find(key)
            .map(|series| series.lock().prune(floor))
            .unwrap_or_default()
    }

    /// Delete the whole series, returning true if it was present.
    pub fn remove_series(&self, key: &SeriesKey) -> bool {
        let mut exchanges = self.series.write();

        let Some(symbols) = exchanges.get_mut(&key.exchange) else {
            return false;
        };
        let Some(timeframes) = symbols.get_mut(&key.symbol) else {
            return false;
        };

        let removed = timeframes.remove(&key.timeframe).is_some();

        if timeframes.is_empty() {
            symbols.remove(&key.symbol);
        }
        if symbols.is_empty() {
            exchanges.remove(&key.exchange);
        }

        removed
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.find(key).is_some()
    }

    /// Determine if the series exists and holds at least one point.
    pub fn is_seeded(&self, key: &SeriesKey) -> bool {
        self.find(key)
            .is_some_and(|series| !series.lock().is_empty())
    }

    /// Keys of every series currently held, sorted.
    pub fn keys(&self) -> Vec<SeriesKey> {
        self.series
            .read()
            .iter()
            .flat_map(|(exchange, symbols)| {
                symbols.iter().flat_map(move |(symbol, timeframes)| {
                    timeframes
                        .keys()
                        .map(move |timeframe| SeriesKey::new(*exchange, symbol, *timeframe))
                })
            })
            .sorted()
            .collect()
    }

    /// Number of series currently held.
    pub fn len(&self) -> usize {
        self.series
            .read()
            .values()
            .flat_map(|symbols| symbols.values())
            .map(|timeframes| timeframes.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length & latest point of every series, sorted by key.
    pub fn summary(&self) -> Vec<SeriesSummary> {
        self.keys()
            .into_iter()
            .filter_map(|key| {
                let series = self.find(&key)?;
                let series = series.lock();
                Some(SeriesSummary {
                    len: series.len(),
                    latest: series.latest().copied(),
                    key,
                })
            })
            .collect()
    }
}
