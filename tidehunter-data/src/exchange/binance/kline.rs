use crate::{exchange::KlineEvent, store::VolumePoint};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Binance REST kline row.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#klinecandlestick-data>
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct BinanceKline(
    pub i64,    // 0: Open time
    pub String, // 1: Open
    pub String, // 2: High
    pub String, // 3: Low
    pub String, // 4: Close
    pub String, // 5: Volume
    pub i64,    // 6: Close time
    #[serde(with = "rust_decimal::serde::str")] pub Decimal, // 7: Quote asset volume
    pub i64,    // 8: Number of trades
    pub String, // 9: Taker buy base asset volume
    pub String, // 10: Taker buy quote asset volume
    pub String, // 11: Ignore
);

impl From<BinanceKline> for VolumePoint {
    fn from(kline: BinanceKline) -> Self {
        VolumePoint::new(kline.0, kline.7)
    }
}

/// Binance real-time kline WebSocket message.
///
/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#klinecandlestick-streams-for-utc>
/// ```json
/// {
///     "e": "kline",
///     "E": 1672515782136,
///     "s": "BNBBTC",
///     "k": {
///         "t": 1672515780000,
///         "T": 1672515839999,
///         "s": "BNBBTC",
///         "i": "1m",
///         "f": 100,
///         "L": 200,
///         "o": "0.0010",
///         "c": "0.0020",
///         "h": "0.0025",
///         "l": "0.0015",
///         "v": "1000",
///         "n": 100,
///         "x": false,
///         "q": "1.0000",
///         "V": "500",
///         "Q": "0.500",
///         "B": "123456"
///     }
/// }
/// ```
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceKlineMessage {
    #[serde(rename = "e")]
    pub kind: String,

    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "k")]
    pub kline: BinanceKlineInner,
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceKlineInner {
    #[serde(rename = "t")]
    pub open_time: i64,

    #[serde(rename = "T")]
    pub close_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "i")]
    pub interval: String,

    #[serde(rename = "x")]
    pub closed: bool,

    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    pub quote_volume: Decimal,
}

impl From<BinanceKlineMessage> for KlineEvent {
    fn from(message: BinanceKlineMessage) -> Self {
        Self {
            time_exchange: message.time,
            symbol: message.kline.symbol,
            open_time: message.kline.open_time,
            close_time: message.kline.close_time,
            closed: message.kline.closed,
            quote_volume: message.kline.quote_volume,
        }
    }
}
