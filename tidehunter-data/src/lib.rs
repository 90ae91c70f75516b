//! # Tidehunter-Data
//! Rolling candle volume store, live exchange kline feeds & volume spike alerting.
//!
//! Alerts are keyed `<exchange>_<symbol>_<timeframe>_<lookback>_<delta>`, eg/
//! "binance_bnbbtc_1h_50_100" fires once per candle when the current candle's quote volume
//! reaches 100% above the average of the preceding 50 candles.
//!
//! ## Examples
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidehunter_data::{
//!     EngineConfig, Tidehunter,
//!     alert::AlertDefinition,
//!     exchange::binance::BinanceSpot,
//!     notify::{LogNotifier, NotificationSink},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EngineConfig::default();
//!     let (sink, _worker) = NotificationSink::spawn(Arc::new(LogNotifier), config.notify_retry);
//!
//!     let engine = Arc::new(
//!         Tidehunter::new(config, sink).with_exchange(Arc::new(BinanceSpot::new())),
//!     );
//!
//!     let alert = "binance_bnbbtc_1h_50_100".parse::<AlertDefinition>().unwrap();
//!     engine.add_alert(alert).await.unwrap();
//!
//!     let handles = engine.start();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     engine.shutdown(&handles);
//! }
//! ```

/// All [`Error`](std::error::Error)s generated in Tidehunter-Data.
pub mod error;

/// Supported candle [`Timeframe`](timeframe::Timeframe)s.
pub mod timeframe;

/// Wall-clock aligned candle bucket arithmetic.
pub mod calendar;

/// Concurrent rolling volume series keyed exchange -> symbol -> timeframe.
pub mod store;

/// Alert definitions, registry, fire state & evaluation.
pub mod alert;

/// [`ExchangeClient`](exchange::ExchangeClient) abstraction & exchange implementations.
pub mod exchange;

/// Live kline subscriptions & the deferred subscription command queue.
pub mod feed;

/// One-time historical seeding of new series.
pub mod backfill;

/// Periodic retention pruning & fire state expiry.
pub mod collector;

/// Recurring background tasks.
pub mod scheduler;

/// Exponential [`Backoff`](backoff::Backoff) shared by reconnection & notification retries.
pub mod backoff;

/// Outbound [`Notifier`](notify::Notifier)s & the retrying notification queue.
pub mod notify;

/// Stream utilities.
pub mod streams;

/// [`Tidehunter`] engine facade tying every component together.
pub mod engine;

#[cfg(test)]
mod test_utils;

pub use engine::{
    AlertRepository, AlerterDebugState, EngineConfig, EngineHandles, StoreSummary, Tidehunter,
};
pub use error::DataError;
