use super::{AlertDefinition, AlertKey, fire::FireState, registry::AlertRegistry};
use crate::{
    calendar,
    notify::NotificationSink,
    store::{SeriesStore, VolumePoint},
};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Volume spike detected on the latest point of a series.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct Spike {
    /// Bucket of the spiking (latest) point.
    pub time: i64,
    pub average: Decimal,
    pub threshold: Decimal,
    pub current: Decimal,
}

/// Compare the latest volume against `delta` percent above the average of the `lookback`
/// points preceding it.
///
/// Fewer than `lookback` preceding points are averaged as available. Returns `None` if the
/// series has no preceding point or the latest volume is below the threshold.
pub fn evaluate(points: &[VolumePoint], lookback: usize, delta: u32) -> Option<Spike> {
    let (latest, preceding) = points.split_last()?;
    if preceding.is_empty() || lookback == 0 {
        return None;
    }

    let base = &preceding[preceding.len().saturating_sub(lookback)..];
    let total = base.iter().map(|point| point.volume).sum::<Decimal>();
    let average = total / Decimal::from(base.len());
    let threshold = average + average * Decimal::from(delta) / Decimal::ONE_HUNDRED;

    (latest.volume >= threshold).then_some(Spike {
        time: latest.time,
        average,
        threshold,
        current: latest.volume,
    })
}

/// Plain text alert message delivered to the notification sink.
pub fn format_alert(key: &AlertKey, delta: u32, spike: &Spike, now: i64) -> String {
    let date = DateTime::from_timestamp_millis(now)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    format!(
        "🚨 ALERT TRIGGERED\n\
         ==========================\n\
         {:<15}: {date}\n\
         {:<15}: {key}\n\
         {:<15}: {:.3}\n\
         {:<15}: {:.3}%\n\
         {:<15}: {:.3}\n\
         {:<15}: {:.3}\n\
         ==========================\n",
        "Date",
        "Alert key",
        "Alert volume",
        spike.threshold,
        "Trigger delta",
        Decimal::from(delta),
        "Average volume",
        spike.average,
        "Current volume",
        spike.current,
    )
}

/// Periodic evaluation of every registered alert against the [`SeriesStore`].
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    store: Arc<SeriesStore>,
    registry: Arc<AlertRegistry>,
    fire_state: Arc<FireState>,
    sink: NotificationSink,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<SeriesStore>,
        registry: Arc<AlertRegistry>,
        fire_state: Arc<FireState>,
        sink: NotificationSink,
    ) -> Self {
        Self {
            store,
            registry,
            fire_state,
            sink,
        }
    }

    pub fn tick(&self) -> Vec<AlertKey> {
        self.tick_at(calendar::now_ms())
    }

    /// Evaluate every registered alert once, notifying & returning the keys fired.
    pub fn tick_at(&self, now: i64) -> Vec<AlertKey> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|definition| self.evaluate_alert(&definition, now))
            .collect()
    }

    fn evaluate_alert(&self, definition: &AlertDefinition, now: i64) -> Option<AlertKey> {
        let key = definition.key();
        let points = self.store.snapshot(&definition.series_key());

        if points.is_empty() {
            debug!(%key, "skipping alert with empty series");
            return None;
        }

        let spike = evaluate(&points, definition.lookback, definition.delta)?;

        if !self.fire_state.try_advance(&key, spike.time) {
            return None;
        }

        info!(
            %key,
            bucket = spike.time,
            average = %spike.average,
            threshold = %spike.threshold,
            current = %spike.current,
            "alert triggered"
        );
        self.sink
            .send(format_alert(&key, definition.delta, &spike, now), None);

        Some(key)
    }
}
