use self::kline::{BinanceKline, BinanceKlineMessage};
use crate::{
    error::DataError,
    exchange::{ExchangeClient, ExchangeId, KlineEvent, KlineStream},
    store::VolumePoint,
    timeframe::Timeframe,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{future::Future, time::Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

/// Kline REST rows & WebSocket messages.
pub mod kline;

/// [`BinanceSpot`] REST base url.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api/general-api-information>
pub const BASE_URL_BINANCE_SPOT_REST: &str = "https://api.binance.com";

/// [`BinanceSpot`] WebSocket raw stream base url.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams>
pub const BASE_URL_BINANCE_SPOT_WS: &str = "wss://stream.binance.com:9443/ws";

/// Maximum rows returned by one `GET /api/v3/klines` request.
pub const KLINE_REQUEST_LIMIT: usize = 1_000;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Binance spot [`ExchangeClient`].
#[derive(Debug, Clone)]
pub struct BinanceSpot {
    http: reqwest::Client,
    rest_url: String,
    ws_url: String,
}

impl Default for BinanceSpot {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_url: BASE_URL_BINANCE_SPOT_REST.to_string(),
            ws_url: BASE_URL_BINANCE_SPOT_WS.to_string(),
        }
    }
}

impl BinanceSpot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// `GET /api/v3/klines` url for one page of rows starting at `start_ms`.
    pub fn klines_url(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
    ) -> Result<Url, DataError> {
        let base = format!("{}/api/v3/klines", self.rest_url.trim_end_matches('/'));
        Url::parse_with_params(
            &base,
            &[
                ("symbol", symbol.to_uppercase()),
                ("interval", timeframe.as_str().to_string()),
                ("startTime", start_ms.to_string()),
                ("limit", KLINE_REQUEST_LIMIT.to_string()),
            ],
        )
        .map_err(|error| DataError::Http(format!("invalid klines url {base}: {error}")))
    }

    /// Raw kline stream url, eg/ "wss://stream.binance.com:9443/ws/bnbbtc@kline_1h".
    pub fn kline_stream_url(&self, symbol: &str, timeframe: Timeframe) -> String {
        format!(
            "{}/{}@kline_{}",
            self.ws_url.trim_end_matches('/'),
            symbol.to_lowercase(),
            timeframe
        )
    }

    async fn fetch_klines(&self, url: Url) -> Result<Vec<BinanceKline>, DataError> {
        let response = self
            .http
            .get(url)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let payload = response.text().await?;
        serde_json::from_str(&payload).map_err(|error| DataError::Deserialise {
            error: error.to_string(),
            payload,
        })
    }
}

#[async_trait]
impl ExchangeClient for BinanceSpot {
    fn id(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn historical_points(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
    ) -> Result<Vec<VolumePoint>, DataError> {
        let points = paginate(timeframe, start_ms, |start| async move {
            self.fetch_klines(self.klines_url(symbol, timeframe, start)?)
                .await
        })
        .await?;

        debug!(symbol, %timeframe, start_ms, points = points.len(), "fetched historical klines");
        Ok(points)
    }

    async fn kline_stream(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<KlineStream, DataError> {
        let url = self.kline_stream_url(symbol, timeframe);
        let (websocket, _) = connect_async(url.as_str()).await?;
        debug!(%url, "connected kline stream");

        Ok(websocket
            .filter_map(|message| futures::future::ready(parse_message(message)))
            .boxed())
    }
}

/// Request pages of klines from `start_ms` onwards until a page comes back short of
/// [`KLINE_REQUEST_LIMIT`] rows.
async fn paginate<F, Fut>(
    timeframe: Timeframe,
    start_ms: i64,
    mut fetch_page: F,
) -> Result<Vec<VolumePoint>, DataError>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<Vec<BinanceKline>, DataError>>,
{
    let mut points = Vec::new();
    let mut start = start_ms;

    loop {
        let klines = fetch_page(start).await?;
        let page_len = klines.len();

        points.extend(klines.into_iter().map(VolumePoint::from));
        debug!(%timeframe, start, page_len, "fetched kline page");

        match points.last() {
            Some(last) if page_len == KLINE_REQUEST_LIMIT => {
                start = last.time + timeframe.duration_ms();
            }
            _ => break,
        }
    }

    Ok(points)
}

fn parse_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<KlineEvent, DataError>> {
    match message {
        Ok(Message::Text(text)) => Some(
            serde_json::from_str::<BinanceKlineMessage>(text.as_str())
                .map(KlineEvent::from)
                .map_err(|error| DataError::Deserialise {
                    error: error.to_string(),
                    payload: text.as_str().to_string(),
                }),
        ),
        Ok(Message::Close(frame)) => Some(Err(DataError::Socket(format!(
            "ConnectionClosed: {frame:?}"
        )))),
        Ok(_) => None,
        Err(error) => Some(Err(DataError::from(error))),
    }
}
