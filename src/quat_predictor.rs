//! Quaternion smoothing with constant-velocity extrapolation.
//!
//! Every raw sample goes through four independent 1€ filters (one per
//! component), is re-normalized, and is compared with the previous smoothed
//! sample to estimate angular velocity. The output is the smoothed
//! orientation rotated forward by that velocity over the prediction horizon.

use crate::one_euro::{OneEuroFilter, OneEuroParams};
use crate::quat::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Below this `sin(θ/2)` the frame-to-frame rotation has no usable axis.
const AXIS_EPSILON: f64 = 1e-6;

/// Tuning for a [`QuatPredictor`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuatPredictorOptions {
    pub min_cutoff: f64,
    pub beta: f64,
    pub d_cutoff: f64,
    /// How far ahead to extrapolate, in seconds.
    pub prediction_horizon: f64,
}

impl Default for QuatPredictorOptions {
    fn default() -> Self {
        let filter = OneEuroParams::default();
        Self {
            min_cutoff: filter.min_cutoff,
            beta: filter.beta,
            d_cutoff: filter.d_cutoff,
            prediction_horizon: 0.045,
        }
    }
}

impl QuatPredictorOptions {
    fn filter_params(&self) -> OneEuroParams {
        OneEuroParams {
            min_cutoff: self.min_cutoff,
            beta: self.beta,
            d_cutoff: self.d_cutoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuatPredictor {
    filters: [OneEuroFilter; 4],
    previous: Option<(Quat, f64)>,
    prediction_horizon: f64,
}

impl Default for QuatPredictor {
    fn default() -> Self {
        Self::new(QuatPredictorOptions::default())
    }
}

impl QuatPredictor {
    pub fn new(options: QuatPredictorOptions) -> Self {
        let params = options.filter_params();
        Self {
            filters: std::array::from_fn(|_| OneEuroFilter::new(params)),
            previous: None,
            prediction_horizon: options.prediction_horizon,
        }
    }

    pub fn prediction_horizon(&self) -> f64 {
        self.prediction_horizon
    }

    pub fn set_prediction_horizon(&mut self, tau: f64) {
        self.prediction_horizon = tau;
    }

    /// Feeds one raw sample taken at `timestamp` seconds and returns the
    /// smoothed, extrapolated orientation. The first sample is returned
    /// smoothed only.
    pub fn update(&mut self, raw: Quat, timestamp: f64) -> Quat {
        let [fx, fy, fz, fw] = &mut self.filters;
        let smoothed = Quat::new(
            fx.filter(raw.x, timestamp),
            fy.filter(raw.y, timestamp),
            fz.filter(raw.z, timestamp),
            fw.filter(raw.w, timestamp),
        )
        .normalize();

        let Some((prev_smoothed, prev_time)) = self.previous else {
            self.previous = Some((smoothed, timestamp));
            return smoothed;
        };

        let dt = timestamp - prev_time;
        if !(dt > 0.0) {
            return smoothed;
        }

        let omega = angular_velocity(smoothed, prev_smoothed, dt);
        let predicted = extrapolate(smoothed, omega, self.prediction_horizon);

        self.previous = Some((smoothed, timestamp));
        predicted
    }

    /// Drops the sample history and resets all four component filters.
    pub fn reset(&mut self) {
        self.previous = None;
        self.filters.iter_mut().for_each(OneEuroFilter::reset);
    }
}

/// Angular velocity (rad/s) that carries `previous` onto `current` in `dt`.
fn angular_velocity(current: Quat, previous: Quat, dt: f64) -> Vec3 {
    let delta = (current * previous.conjugate()).shortest_path();

    let half_angle = delta.w.clamp(-1.0, 1.0).acos();
    let sin_half = half_angle.sin();
    if sin_half <= AXIS_EPSILON {
        return [0.0; 3];
    }

    let speed = 2.0 * half_angle / dt;
    [
        delta.x / sin_half * speed,
        delta.y / sin_half * speed,
        delta.z / sin_half * speed,
    ]
}

/// Rotates `current` by `omega · tau`, applied in the world frame.
fn extrapolate(current: Quat, omega: Vec3, tau: f64) -> Quat {
    match Quat::from_angular_velocity(omega, tau) {
        Some(step) => (step * current).normalize(),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 30.0;

    fn yaw_quat(deg: f64) -> Quat {
        let half = deg.to_radians() / 2.0;
        Quat::new(0.0, half.sin(), 0.0, half.cos())
    }

    fn yaw_deg(q: Quat) -> f64 {
        (2.0 * q.y.atan2(q.w)).to_degrees()
    }

    #[test]
    fn identity_in_identity_out() {
        let mut predictor = QuatPredictor::default();
        let mut result = Quat::IDENTITY;
        for i in 0..30 {
            result = predictor.update(Quat::IDENTITY, i as f64 * DT);
        }
        assert!(result.x.abs() < 1e-3);
        assert!(result.y.abs() < 1e-3);
        assert!(result.z.abs() < 1e-3);
        assert!((result.w - 1.0).abs() < 1e-3);
    }

    #[test]
    fn output_is_unit_length() {
        let mut predictor = QuatPredictor::default();
        let angles = [0.0, 5.0, 10.0, 15.0, 20.0, 30.0, 15.0, 5.0];
        for (i, &deg) in angles.iter().enumerate() {
            let result = predictor.update(yaw_quat(deg), i as f64 * DT);
            assert!((result.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn steady_yaw_ramp_is_extrapolated_forward() {
        let mut predictor = QuatPredictor::default();
        let mut last = Quat::IDENTITY;
        for i in 0..20 {
            last = predictor.update(yaw_quat(i as f64 * 2.0), i as f64 * DT);
        }
        assert!(yaw_deg(last) > 0.5 * 38.0);
    }

    #[test]
    fn repeated_timestamp_returns_smoothed_without_prediction() {
        let mut predictor = QuatPredictor::default();
        predictor.update(yaw_quat(0.0), 0.0);
        let first = predictor.update(yaw_quat(4.0), DT);
        let repeat = predictor.update(yaw_quat(8.0), DT);
        assert!((repeat.norm() - 1.0).abs() < 1e-9);
        // the repeated frame is not extrapolated, so it sits behind the
        // extrapolated output of the previous frame
        assert!(yaw_deg(repeat) <= yaw_deg(first));
    }

    #[test]
    fn reset_forgets_history() {
        let mut predictor = QuatPredictor::default();
        for i in 0..10 {
            predictor.update(yaw_quat(i as f64 * 3.0), i as f64 * DT);
        }
        predictor.reset();
        let q = yaw_quat(70.0);
        let first = predictor.update(q, 100.0);
        assert!((first.y - q.y).abs() < 1e-12);
        assert!((first.w - q.w).abs() < 1e-12);
    }
}
