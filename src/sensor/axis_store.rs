//! Axis State Store - fixed set of per-axis records
//!
//! Holds calibration, estimator state and the latest raw/smoothed values for
//! each of the [`AXIS_COUNT`] axes. The store is pure composition: the
//! acquisition loop owns all mutation logic, the reporter only copies
//! snapshots out of it.
//!
//! Shared between threads as [`SharedAxisStore`], a tokio `RwLock` behind an
//! `Arc`. Writers hold the lock for the duration of one record update, readers
//! for the duration of one snapshot copy, so a reader can never see a raw value
//! and a smoothed value that came from different events.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::calibration::AxisCalibration;
use super::kalman::KalmanEstimator;

/// Number of axes tracked for the lifetime of the run
pub const AXIS_COUNT: usize = 3;

/// Store handle shared between the acquisition loop and the reporter
pub type SharedAxisStore = Arc<RwLock<AxisStore>>;

/// Validated axis position in `[0, AXIS_COUNT)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxisIndex(usize);

impl AxisIndex {
    /// Derives the axis from an event code relative to `base_code`.
    ///
    /// Returns `None` for codes below the base or at/after `base_code + AXIS_COUNT`.
    pub fn from_code(code: u16, base_code: u16) -> Option<Self> {
        let offset = i32::from(code) - i32::from(base_code);
        if (0..AXIS_COUNT as i32).contains(&offset) {
            Some(Self(offset as usize))
        } else {
            None
        }
    }

    pub fn new(index: usize) -> Option<Self> {
        (index < AXIS_COUNT).then_some(Self(index))
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn all() -> impl Iterator<Item = AxisIndex> {
        (0..AXIS_COUNT).map(AxisIndex)
    }
}

/// Per-axis state: constants, estimator and latest values
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisRecord {
    pub calibration: AxisCalibration,
    pub filter: KalmanEstimator,
    pub raw_value: f32,
    pub smoothed_value: f32,
}

impl AxisRecord {
    pub fn new(calibration: AxisCalibration, filter: KalmanEstimator) -> Self {
        Self {
            calibration,
            filter,
            raw_value: 0.0,
            smoothed_value: 0.0,
        }
    }
}

/// Raw and smoothed value of one axis, copied out at a single instant
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisReading {
    /// Event code this axis listens to
    pub code: u16,
    pub raw: f32,
    pub smoothed: f32,
}

/// Consistent copy of all axes
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisSnapshot {
    pub readings: [AxisReading; AXIS_COUNT],
    /// Number of admitted events folded into the store when the copy was taken
    pub sequence: u64,
}

/// Fixed-size collection of axis records
#[derive(Clone, Debug, PartialEq)]
pub struct AxisStore {
    base_code: u16,
    records: [AxisRecord; AXIS_COUNT],
    sequence: u64,
}

impl AxisStore {
    pub fn new(base_code: u16, records: [AxisRecord; AXIS_COUNT]) -> Self {
        Self {
            base_code,
            records,
            sequence: 0,
        }
    }

    pub fn into_shared(self) -> SharedAxisStore {
        Arc::new(RwLock::new(self))
    }

    pub fn base_code(&self) -> u16 {
        self.base_code
    }

    pub fn record(&self, index: AxisIndex) -> &AxisRecord {
        &self.records[index.get()]
    }

    pub fn record_mut(&mut self, index: AxisIndex) -> &mut AxisRecord {
        &mut self.records[index.get()]
    }

    pub fn records(&self) -> &[AxisRecord; AXIS_COUNT] {
        &self.records
    }

    /// Bumps the update counter; called once per admitted event.
    pub fn mark_updated(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn snapshot(&self) -> AxisSnapshot {
        let mut readings = [AxisReading::default(); AXIS_COUNT];
        for (index, (reading, record)) in readings.iter_mut().zip(&self.records).enumerate() {
            *reading = AxisReading {
                code: self.base_code.wrapping_add(index as u16),
                raw: record.raw_value,
                smoothed: record.smoothed_value,
            };
        }
        AxisSnapshot {
            readings,
            sequence: self.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AxisStore {
        let record = AxisRecord::new(
            AxisCalibration::default(),
            KalmanEstimator::new(0.0, 1.0, 0.1, 0.5),
        );
        AxisStore::new(3, [record; AXIS_COUNT])
    }

    #[test]
    fn codes_map_relative_to_base() {
        assert_eq!(AxisIndex::from_code(3, 3), AxisIndex::new(0));
        assert_eq!(AxisIndex::from_code(4, 3), AxisIndex::new(1));
        assert_eq!(AxisIndex::from_code(5, 3), AxisIndex::new(2));
    }

    #[test]
    fn codes_outside_window_are_rejected() {
        assert_eq!(AxisIndex::from_code(0, 3), None);
        assert_eq!(AxisIndex::from_code(2, 3), None);
        assert_eq!(AxisIndex::from_code(6, 3), None);
        assert_eq!(AxisIndex::from_code(u16::MAX, 3), None);
        assert_eq!(AxisIndex::from_code(0, u16::MAX), None);
        assert_eq!(AxisIndex::new(AXIS_COUNT), None);
    }

    #[test]
    fn snapshot_labels_axes_by_code() {
        let mut store = store();
        let axis = AxisIndex::new(1).unwrap();
        store.record_mut(axis).raw_value = 4.0;
        store.record_mut(axis).smoothed_value = 2.0;
        store.mark_updated();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.readings.map(|r| r.code), [3, 4, 5]);
        assert_eq!(snapshot.readings[1].raw, 4.0);
        assert_eq!(snapshot.readings[1].smoothed, 2.0);
        assert_eq!(
            snapshot.readings[0],
            AxisReading {
                code: 3,
                raw: 0.0,
                smoothed: 0.0
            }
        );
    }

    #[test]
    fn all_indices_cover_every_axis() {
        let indices: Vec<usize> = AxisIndex::all().map(AxisIndex::get).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
