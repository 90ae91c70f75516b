/// Idle read timeout wrapper for live kline streams.
pub mod timeout;

pub use timeout::TimeoutStream;
