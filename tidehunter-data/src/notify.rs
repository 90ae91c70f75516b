use crate::{backoff::Backoff, error::DataError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

/// Outbound message collaborator (eg/ a chat bot).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Make one delivery attempt of `message` to `target`, or to the notifier's default
    /// recipient if `None`.
    async fn send(&self, message: &str, target: Option<&str>) -> Result<(), DataError>;
}

/// [`Notifier`] that writes every message to the log.
#[derive(Debug, Copy, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str, target: Option<&str>) -> Result<(), DataError> {
        info!(recipient = target.unwrap_or("default"), "\n{message}");
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct Notification {
    message: String,
    target: Option<String>,
}

/// Fire-and-forget handle to a queued [`Notifier`].
///
/// Messages are delivered one at a time in submission order by a background worker, which
/// retries each failed attempt with [`Backoff`] and logs a
/// [`DataError::DownstreamSendFailure`] once attempts are exhausted.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSink {
    /// Spawn the delivery worker for the [`Notifier`].
    pub fn spawn(notifier: Arc<dyn Notifier>, retry: Backoff) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver(notifier, rx, retry));
        (Self { tx }, worker)
    }

    /// Queue the message for delivery.
    pub fn send<S>(&self, message: S, target: Option<&str>)
    where
        S: Into<String>,
    {
        let notification = Notification {
            message: message.into(),
            target: target.map(str::to_string),
        };

        if self.tx.send(notification).is_err() {
            error!(
                error = %DataError::DownstreamSendFailure("notification worker stopped".to_string()),
                "dropping notification"
            );
        }
    }
}

async fn deliver(
    notifier: Arc<dyn Notifier>,
    mut rx: mpsc::UnboundedReceiver<Notification>,
    retry: Backoff,
) {
    while let Some(notification) = rx.recv().await {
        let mut backoff = retry.start();

        loop {
            let result = notifier
                .send(&notification.message, notification.target.as_deref())
                .await;

            let Err(error) = result else {
                break;
            };

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        ?error,
                        attempt = backoff.attempt(),
                        ?delay,
                        "notification delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(
                        error = %DataError::DownstreamSendFailure(error.to_string()),
                        attempts = backoff.attempt() + 1,
                        "notification dropped after exhausting retries"
                    );
                    break;
                }
            }
        }
    }

    info!("notification worker stopped");
}
