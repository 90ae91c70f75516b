use crate::{error::DataError, store::VolumePoint, timeframe::Timeframe};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// `Binance` spot [`ExchangeClient`] implementation: REST kline history & WebSocket kline
/// streams.
pub mod binance;

/// Unique identifier for an exchange the alerter can source volume from.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
}

impl ExchangeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
        }
    }
}

impl FromStr for ExchangeId {
    type Err = DataError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "binance" => Ok(ExchangeId::Binance),
            _ => Err(DataError::UnsupportedExchange(input.to_string())),
        }
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exchange agnostic kline update received on a live stream.
///
/// Symbol and timestamps are passed through as the exchange sent them; the
/// [`LiveFeed`](crate::feed::LiveFeed) normalises them into a [`Candle`](crate::feed::Candle).
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct KlineEvent {
    pub time_exchange: DateTime<Utc>,
    pub symbol: String,
    pub open_time: i64,
    pub close_time: i64,
    pub closed: bool,
    pub quote_volume: Decimal,
}

/// Stream of [`KlineEvent`]s for a single symbol & [`Timeframe`].
pub type KlineStream = BoxStream<'static, Result<KlineEvent, DataError>>;

/// Exchange collaborator consumed by the [`Backfill`](crate::backfill::Backfill) loader and the
/// [`LiveFeed`](crate::feed::LiveFeed) adapter.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn id(&self) -> ExchangeId;

    /// Fetch historical (bucket start, volume) points from `start_ms` up to now, oldest first.
    async fn historical_points(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
    ) -> Result<Vec<VolumePoint>, DataError>;

    /// Open a live kline stream for the symbol & [`Timeframe`].
    async fn kline_stream(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<KlineStream, DataError>;
}

impl std::fmt::Debug for dyn ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExchangeClient({})", self.id())
    }
}
