use super::VolumePoint;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Result of applying a live write to a [`Series`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Write {
    Appended,
    Updated,
    /// Write rejected since the bucket precedes the latest bucket held.
    OutOfOrder { latest: i64 },
}

/// Rolling, time-ordered window of [`VolumePoint`]s for one (exchange, symbol, timeframe).
///
/// Buckets are strictly increasing front to back, and the window never holds more than
/// `capacity` points: the oldest point is evicted first.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Series {
    points: VecDeque<VolumePoint>,
    capacity: usize,
}

impl Series {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(1_024)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&VolumePoint> {
        self.points.back()
    }

    pub fn oldest(&self) -> Option<&VolumePoint> {
        self.points.front()
    }

    pub fn points(&self) -> impl Iterator<Item = &VolumePoint> {
        self.points.iter()
    }

    /// Append a new latest bucket, or overwrite the volume of the latest bucket if `time`
    /// equals it.
    pub fn write(&mut self, time: i64, volume: Decimal) -> Write {
        match self.points.back_mut() {
            Some(latest) if latest.time == time => {
                latest.volume = volume;
                Write::Updated
            }
            Some(latest) if latest.time > time => Write::OutOfOrder {
                latest: latest.time,
            },
            _ => {
                self.points.push_back(VolumePoint::new(time, volume));
                self.enforce_capacity();
                Write::Appended
            }
        }
    }

    /// Remove every point strictly older than `floor`, returning the number removed.
    pub fn prune(&mut self, floor: i64) -> usize {
        let mut removed = 0;
        while self.points.front().is_some_and(|point| point.time < floor) {
            self.points.pop_front();
            removed += 1;
        }
        removed
    }

    fn enforce_capacity(&mut self) {
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }
}
