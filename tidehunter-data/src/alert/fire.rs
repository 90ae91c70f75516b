use super::AlertKey;
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::Mutex;

/// Last fired candle bucket per [`AlertKey`].
///
/// A key only ever advances to a strictly later bucket, so an alert fires at most once per
/// candle.
#[derive(Debug, Default)]
pub struct FireState {
    last_fired: Mutex<FnvHashMap<AlertKey, i64>>,
}

impl FireState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fire for the bucket at `time` if it is strictly later than the last recorded
    /// fire, returning true if recorded.
    pub fn try_advance(&self, key: &AlertKey, time: i64) -> bool {
        let mut last_fired = self.last_fired.lock();
        match last_fired.get_mut(key) {
            Some(last) if *last >= time => false,
            Some(last) => {
                *last = time;
                true
            }
            None => {
                last_fired.insert(key.clone(), time);
                true
            }
        }
    }

    pub fn last_fired(&self, key: &AlertKey) -> Option<i64> {
        self.last_fired.lock().get(key).copied()
    }

    /// Remove the entry only if it still holds the `observed` bucket, so a fire recorded
    /// after the observation is kept.
    ///
    /// Once expired, a series whose latest bucket is still `observed` (eg/ a stalled feed)
    /// can fire again on that same bucket.
    pub fn expire(&self, key: &AlertKey, observed: i64) -> bool {
        let mut last_fired = self.last_fired.lock();
        if last_fired.get(key) == Some(&observed) {
            last_fired.remove(key);
            true
        } else {
            false
        }
    }

    pub fn remove(&self, key: &AlertKey) -> Option<i64> {
        self.last_fired.lock().remove(key)
    }

    /// Every (key, last fired bucket) pair, sorted by key.
    pub fn snapshot(&self) -> Vec<(AlertKey, i64)> {
        self.last_fired
            .lock()
            .iter()
            .map(|(key, time)| (key.clone(), *time))
            .sorted()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.last_fired.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.lock().is_empty()
    }
}
