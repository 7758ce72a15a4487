//! Scalar Kalman Estimator
//!
//! One-dimensional, constant-parameter Kalman recursion with an implicit
//! identity state transition and unit observation. Used to smooth each
//! calibrated axis independently.

/// Recursive estimator state for a single axis
///
/// # Preconditions
///
/// `uncertainty`, `process_noise` and `measurement_noise` must be non-negative,
/// and `measurement_noise` should be strictly positive. With both
/// `uncertainty` and `measurement_noise` at zero the gain is `0 / 0`; this is
/// not checked at runtime.
///
/// With `process_noise > 0` and `measurement_noise > 0` the uncertainty
/// converges to the fixed point `u*` of `u = (1 - u / (u + r)) * u + q` and
/// stays finite and positive for any sequence of finite measurements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KalmanEstimator {
    estimate: f32,
    uncertainty: f32,
    process_noise: f32,
    measurement_noise: f32,
}

impl KalmanEstimator {
    pub fn new(
        initial_estimate: f32,
        initial_uncertainty: f32,
        process_noise: f32,
        measurement_noise: f32,
    ) -> Self {
        Self {
            estimate: initial_estimate,
            uncertainty: initial_uncertainty,
            process_noise,
            measurement_noise,
        }
    }

    /// Folds a new measurement into the estimate and returns the smoothed value.
    pub fn update(&mut self, measurement: f32) -> f32 {
        let gain = self.uncertainty / (self.uncertainty + self.measurement_noise);
        self.estimate += gain * (measurement - self.estimate);
        self.uncertainty = (1.0 - gain) * self.uncertainty + self.process_noise;
        self.estimate
    }

    pub fn estimate(&self) -> f32 {
        self.estimate
    }

    pub fn uncertainty(&self) -> f32 {
        self.uncertainty
    }

    /// Steady-state uncertainty for the configured noise pair.
    ///
    /// Positive root of `u^2 - q*u - q*r = 0`.
    pub fn steady_state_uncertainty(&self) -> f32 {
        let q = self.process_noise;
        let r = self.measurement_noise;
        (q + (q * q + 4.0 * q * r).sqrt()) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f32 = 1e-3;

    #[test]
    fn single_update_matches_worked_example() {
        let mut kf = KalmanEstimator::new(0.0, 1.0, 0.1, 0.5);
        let estimate = kf.update(10.0);

        assert!((estimate - 6.6667).abs() < EPS, "estimate was {}", estimate);
        assert!((kf.estimate() - estimate).abs() < f32::EPSILON);
        assert!(
            (kf.uncertainty() - 0.4333).abs() < EPS,
            "uncertainty was {}",
            kf.uncertainty()
        );
    }

    #[test]
    fn constant_input_converges_monotonically() {
        let mut kf = KalmanEstimator::new(0.0, 1.0, 0.1, 0.5);
        let target = 42.0;
        let mut last_distance = (target - kf.estimate()).abs();

        for _ in 0..200 {
            kf.update(target);
            let distance = (target - kf.estimate()).abs();
            assert!(distance <= last_distance);
            last_distance = distance;
        }

        assert!(last_distance < EPS);
        assert!((kf.uncertainty() - kf.steady_state_uncertainty()).abs() < EPS);
    }

    #[test]
    fn uncertainty_approaches_fixed_point_from_above_and_below() {
        for initial in [0.001, 100.0] {
            let mut kf = KalmanEstimator::new(0.0, initial, 0.1, 0.5);
            for _ in 0..100 {
                kf.update(1.0);
            }
            assert!((kf.uncertainty() - kf.steady_state_uncertainty()).abs() < EPS);
        }
    }

    #[test]
    fn zero_process_noise_keeps_shrinking_uncertainty() {
        let mut kf = KalmanEstimator::new(0.0, 1.0, 0.0, 0.5);
        let mut previous = kf.uncertainty();
        for _ in 0..50 {
            kf.update(3.0);
            assert!(kf.uncertainty() < previous);
            assert!(kf.uncertainty() > 0.0);
            previous = kf.uncertainty();
        }
    }

    proptest! {
        #[test]
        fn uncertainty_stays_positive_and_bounded(
            q in 1e-4f32..10.0,
            r in 1e-4f32..10.0,
            initial in 1e-4f32..100.0,
            measurements in proptest::collection::vec(-1e6f32..1e6, 1..256),
        ) {
            let mut kf = KalmanEstimator::new(0.0, initial, q, r);
            let bound = initial.max(kf.steady_state_uncertainty()) + q;

            for m in measurements {
                let estimate = kf.update(m);
                prop_assert!(estimate.is_finite());
                prop_assert!(kf.uncertainty() > 0.0);
                prop_assert!(kf.uncertainty().is_finite());
                prop_assert!(kf.uncertainty() <= bound * 1.001);
            }
        }
    }
}
