use crate::{
    error::DataError, exchange::ExchangeId, feed::FeedKey, store::SeriesKey,
    timeframe::Timeframe,
};
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use std::{borrow::Borrow, fmt::Display, str::FromStr};

/// Spike evaluation over a rolling volume series & the periodic evaluator task.
pub mod evaluator;

/// Last fired candle bucket per alert key.
pub mod fire;

/// Registered [`AlertDefinition`]s keyed by [`AlertKey`].
pub mod registry;

/// Largest accepted trigger delta, in percent.
pub const MAX_DELTA: u32 = 100;

/// Composite alert identifier: `<exchange>_<symbol>_<timeframe>_<lookback>_<delta>`,
/// eg/ "binance_bnbbtc_1h_50_100".
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub struct AlertKey(SmolStr);

impl AlertKey {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Parse the [`Timeframe`] component of the key.
    pub fn timeframe(&self) -> Result<Timeframe, DataError> {
        self.0
            .split('_')
            .nth(2)
            .ok_or_else(|| DataError::InvalidAlertKey(self.0.to_string()))
            .and_then(Timeframe::from_str)
    }
}

impl FromStr for AlertKey {
    type Err = DataError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        AlertDefinition::from_str(input).map(|definition| definition.key())
    }
}

impl Borrow<str> for AlertKey {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Volume spike alert: fire when the current candle's volume is at least `delta` percent
/// above the average volume of the `lookback` candles preceding it.
///
/// Construct via [`AlertDefinition::new`] or deserialisation, both of which validate.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
#[serde(try_from = "AlertDefinitionRaw")]
pub struct AlertDefinition {
    pub exchange: ExchangeId,
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    pub lookback: usize,
    pub delta: u32,
}

#[derive(Deserialize)]
struct AlertDefinitionRaw {
    exchange: ExchangeId,
    symbol: String,
    timeframe: Timeframe,
    lookback: usize,
    delta: u32,
}

impl TryFrom<AlertDefinitionRaw> for AlertDefinition {
    type Error = DataError;

    fn try_from(raw: AlertDefinitionRaw) -> Result<Self, Self::Error> {
        Self::new(raw.exchange, raw.symbol, raw.timeframe, raw.lookback, raw.delta)
    }
}

impl AlertDefinition {
    /// Construct a validated [`AlertDefinition`].
    ///
    /// `lookback` must be in `1..=timeframe.max_length()` and `delta` in `1..=100`.
    pub fn new<S>(
        exchange: ExchangeId,
        symbol: S,
        timeframe: Timeframe,
        lookback: usize,
        delta: u32,
    ) -> Result<Self, DataError>
    where
        S: AsRef<str>,
    {
        let symbol = symbol.as_ref().to_lowercase();

        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DataError::InvalidAlert(format!(
                "symbol must be non-empty ascii alphanumeric, got: {symbol:?}"
            )));
        }

        if !(1..=timeframe.max_length()).contains(&lookback) {
            return Err(DataError::InvalidAlert(format!(
                "lookback for {timeframe} must be between 1 and {}, got: {lookback}",
                timeframe.max_length()
            )));
        }

        if !(1..=MAX_DELTA).contains(&delta) {
            return Err(DataError::InvalidAlert(format!(
                "delta must be between 1 and {MAX_DELTA}, got: {delta}"
            )));
        }

        Ok(Self {
            exchange,
            symbol: SmolStr::new(symbol),
            timeframe,
            lookback,
            delta,
        })
    }

    pub fn key(&self) -> AlertKey {
        AlertKey(format_smolstr!(
            "{}_{}_{}_{}_{}",
            self.exchange,
            self.symbol,
            self.timeframe,
            self.lookback,
            self.delta
        ))
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.exchange, &self.symbol, self.timeframe)
    }

    pub fn feed_key(&self) -> FeedKey {
        FeedKey::new(&self.symbol, self.timeframe)
    }
}

impl FromStr for AlertDefinition {
    type Err = DataError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || DataError::InvalidAlertKey(input.to_string());

        let parts = input.split('_').collect::<Vec<_>>();
        let [exchange, symbol, timeframe, lookback, delta] = parts.as_slice() else {
            return Err(invalid());
        };

        let exchange = ExchangeId::from_str(exchange)?;
        let timeframe = Timeframe::from_str(timeframe)?;
        let lookback = lookback.parse::<usize>().map_err(|_| invalid())?;
        let delta = delta.parse::<u32>().map_err(|_| invalid())?;

        Self::new(exchange, symbol, timeframe, lookback, delta)
    }
}
