//! Calibration Transform - raw integer samples to physical values
//!
//! Each axis carries a fixed offset and a pair of scale factors. The offset is
//! applied first; the sign of the corrected sample then selects which factor is
//! used, so sensors with asymmetric response around their zero point can be
//! linearised per half-range.

/// Per-axis calibration constants
///
/// Fixed at startup from the static configuration and never changed for the
/// lifetime of the run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisCalibration {
    /// Added to every raw sample before scaling
    pub offset: i32,
    /// Factor for corrected samples `>= 0`
    pub scale_positive: f32,
    /// Factor for corrected samples `< 0`
    pub scale_negative: f32,
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self {
            offset: 0,
            scale_positive: 1.0,
            scale_negative: 1.0,
        }
    }
}

impl AxisCalibration {
    pub fn new(offset: i32, scale_positive: f32, scale_negative: f32) -> Self {
        Self {
            offset,
            scale_positive,
            scale_negative,
        }
    }

    /// Maps a raw sample to a calibrated value.
    ///
    /// A corrected value of exactly zero takes the positive branch. The sum is
    /// formed in `i64` so extreme offsets cannot overflow.
    pub fn apply(&self, value: i32) -> f32 {
        let corrected = i64::from(value) + i64::from(self.offset);
        let scale = if corrected >= 0 {
            self.scale_positive
        } else {
            self.scale_negative
        };
        corrected as f32 * scale
    }
}
