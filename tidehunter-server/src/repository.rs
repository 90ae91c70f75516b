use async_trait::async_trait;
use std::path::PathBuf;
use tidehunter_data::{AlertRepository, DataError, alert::AlertDefinition};
use tracing::{debug, warn};

/// [`AlertRepository`] over a JSON array of alert definitions, eg/
/// `[{"exchange":"binance","symbol":"bnbbtc","timeframe":"1h","lookback":50,"delta":100}]`.
///
/// Invalid entries are logged & skipped, a missing file is an empty repository.
#[derive(Debug, Clone)]
pub struct JsonAlertRepository {
    path: PathBuf,
}

impl JsonAlertRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(&self, payload: &str) -> Result<Vec<AlertDefinition>, DataError> {
        let entries = serde_json::from_str::<Vec<serde_json::Value>>(payload).map_err(|error| {
            DataError::Repository(format!("{}: {error}", self.path.display()))
        })?;

        Ok(entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                serde_json::from_value::<AlertDefinition>(entry)
                    .inspect_err(|error| {
                        warn!(path = %self.path.display(), index, %error, "skipping invalid stored alert")
                    })
                    .ok()
            })
            .collect())
    }
}

#[async_trait]
impl AlertRepository for JsonAlertRepository {
    async fn load_alerts(&self) -> Result<Vec<AlertDefinition>, DataError> {
        let payload = match tokio::fs::read_to_string(&self.path).await {
            Ok(payload) => payload,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored alerts");
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(DataError::Repository(format!(
                    "{}: {error}",
                    self.path.display()
                )));
            }
        };

        self.parse(&payload)
    }
}
