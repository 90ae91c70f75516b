//! Recurring background tasks.

use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;
use tracing::debug;

/// How the wait between two runs of a recurring task is measured.
///
/// Runs never overlap under either cadence.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Sleep the full interval after each run completes.
    #[default]
    Dynamic,
    /// Start the next run one interval after the previous run started, or as soon as the
    /// previous run completes if it took longer than the interval.
    Constant,
}

/// Spawn a task running `task` immediately and then forever at the provided interval.
pub fn spawn_recurring<F, Fut>(
    name: &'static str,
    interval: Duration,
    cadence: Cadence,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    debug!(name, ?interval, ?cadence, "spawning recurring task");

    tokio::spawn(async move {
        loop {
            match cadence {
                Cadence::Dynamic => {
                    task().await;
                    tokio::time::sleep(interval).await;
                }
                Cadence::Constant => {
                    tokio::join!(task(), tokio::time::sleep(interval));
                }
            }
        }
    })
}
