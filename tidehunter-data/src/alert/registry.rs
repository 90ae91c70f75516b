use super::{AlertDefinition, AlertKey};
use crate::{exchange::ExchangeId, feed::FeedKey, store::SeriesKey};
use fnv::FnvHashSet;
use indexmap::IndexMap;
use parking_lot::RwLock;

/// Registered [`AlertDefinition`]s, kept in registration order.
///
/// One definition may be shared by many subscribers; the subscriber relation lives in the
/// persistence layer, so the registry only tracks the unique definitions.
#[derive(Debug, Default)]
pub struct AlertRegistry {
    alerts: RwLock<IndexMap<AlertKey, AlertDefinition>>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the [`AlertDefinition`], returning false if its key was already registered.
    pub fn insert(&self, definition: AlertDefinition) -> bool {
        let mut alerts = self.alerts.write();
        let key = definition.key();
        if alerts.contains_key(&key) {
            return false;
        }
        alerts.insert(key, definition);
        true
    }

    pub fn remove(&self, key: &AlertKey) -> Option<AlertDefinition> {
        self.alerts.write().shift_remove(key)
    }

    /// Cloned copy of every registered definition, in registration order.
    pub fn list(&self) -> Vec<AlertDefinition> {
        self.alerts.read().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<AlertKey> {
        self.alerts.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    /// Determine if any registered definition reads the series.
    pub fn references_series(&self, key: &SeriesKey) -> bool {
        self.alerts
            .read()
            .values()
            .any(|definition| definition.series_key() == *key)
    }

    /// Determine if any registered definition needs the live feed of the exchange.
    pub fn references_feed(&self, exchange: ExchangeId, key: &FeedKey) -> bool {
        self.alerts
            .read()
            .values()
            .any(|definition| definition.exchange == exchange && definition.feed_key() == *key)
    }

    /// Every [`SeriesKey`] read by at least one registered definition.
    pub fn series_keys(&self) -> FnvHashSet<SeriesKey> {
        self.alerts
            .read()
            .values()
            .map(AlertDefinition::series_key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeframe::Timeframe;
    use std::str::FromStr;

    fn definition(key: &str) -> AlertDefinition {
        AlertDefinition::from_str(key).unwrap()
    }

    #[test]
    fn test_insert_remove_preserves_order() {
        let registry = AlertRegistry::new();

        assert!(registry.insert(definition("binance_bnbbtc_1h_50_100")));
        assert!(registry.insert(definition("binance_ethbtc_4h_20_10")));
        assert!(registry.insert(definition("binance_bnbbtc_1h_10_50")));
        assert!(!registry.insert(definition("binance_ethbtc_4h_20_10")));
        assert_eq!(registry.len(), 3);

        let removed = registry.remove(&definition("binance_ethbtc_4h_20_10").key());
        assert_eq!(removed, Some(definition("binance_ethbtc_4h_20_10")));
        assert_eq!(registry.remove(&definition("binance_ethbtc_4h_20_10").key()), None);

        assert_eq!(
            registry
                .keys()
                .iter()
                .map(AlertKey::to_string)
                .collect::<Vec<_>>(),
            vec!["binance_bnbbtc_1h_50_100", "binance_bnbbtc_1h_10_50"]
        );
    }

    #[test]
    fn test_references() {
        let registry = AlertRegistry::new();
        registry.insert(definition("binance_bnbbtc_1h_50_100"));
        registry.insert(definition("binance_bnbbtc_1h_10_50"));

        let series = SeriesKey::new(ExchangeId::Binance, "bnbbtc", Timeframe::H1);
        let feed = FeedKey::new("bnbbtc", Timeframe::H1);

        assert!(registry.references_series(&series));
        assert!(registry.references_feed(ExchangeId::Binance, &feed));
        assert_eq!(registry.series_keys().len(), 1);

        // Series still referenced until the last definition on it is removed
        registry.remove(&definition("binance_bnbbtc_1h_50_100").key());
        assert!(registry.references_series(&series));

        registry.remove(&definition("binance_bnbbtc_1h_10_50").key());
        assert!(!registry.references_series(&series));
        assert!(!registry.references_feed(ExchangeId::Binance, &feed));
        assert!(registry.is_empty());
    }
}
