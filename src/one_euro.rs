//! The 1€ filter: a first-order low-pass whose cutoff rises with the
//! estimated speed of the signal. Slow, jittery input is smoothed heavily,
//! fast motion passes through with little lag.
//!
//! See <https://gery.casiez.net/1euro/>.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Frame period assumed when seeding the derivative filter.
const SEED_PERIOD: f64 = 1.0 / 30.0;

/// Tuning for a [`OneEuroFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneEuroParams {
    /// Cutoff at rest, in Hz. Lower means smoother when still.
    pub min_cutoff: f64,
    /// How fast the cutoff grows with speed. Higher means less lag in motion.
    pub beta: f64,
    /// Cutoff for the derivative estimate, in Hz.
    pub d_cutoff: f64,
}

impl Default for OneEuroParams {
    fn default() -> Self {
        Self {
            min_cutoff: 1.0,
            beta: 0.007,
            d_cutoff: 1.0,
        }
    }
}

/// Exponential smoothing with a caller-supplied factor.
#[derive(Debug, Clone, Default)]
pub struct LowPassFilter {
    y: f64,
    s: f64,
    initialized: bool,
}

impl LowPassFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first value after construction or [`reset`](Self::reset) passes
    /// through unchanged regardless of `alpha`.
    pub fn filter(&mut self, value: f64, alpha: f64) -> f64 {
        if self.initialized {
            self.s = alpha * value + (1.0 - alpha) * self.s;
        } else {
            self.s = value;
            self.initialized = true;
        }
        self.y = self.s;
        self.y
    }

    pub fn last_value(&self) -> f64 {
        self.y
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

/// A speed-adaptive low-pass filter for one scalar channel.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    params: OneEuroParams,
    x_filter: LowPassFilter,
    dx_filter: LowPassFilter,
    last_time: f64,
    initialized: bool,
}

impl Default for OneEuroFilter {
    fn default() -> Self {
        Self::new(OneEuroParams::default())
    }
}

impl OneEuroFilter {
    pub fn new(params: OneEuroParams) -> Self {
        Self {
            params,
            x_filter: LowPassFilter::new(),
            dx_filter: LowPassFilter::new(),
            last_time: 0.0,
            initialized: false,
        }
    }

    pub fn params(&self) -> OneEuroParams {
        self.params
    }

    /// `alpha = 1 / (1 + τ/dt)` with `τ = 1 / (2π·cutoff)`.
    fn alpha(cutoff: f64, dt: f64) -> f64 {
        let tau = 1.0 / (2.0 * PI * cutoff);
        1.0 / (1.0 + tau / dt)
    }

    /// Filters `value` sampled at `timestamp` seconds.
    ///
    /// The first call returns `value` as is. A timestamp that does not
    /// advance past the previous one returns the previous output and leaves
    /// the filter untouched.
    pub fn filter(&mut self, value: f64, timestamp: f64) -> f64 {
        if !self.initialized {
            self.initialized = true;
            self.last_time = timestamp;
            self.dx_filter
                .filter(0.0, Self::alpha(self.params.d_cutoff, SEED_PERIOD));
            return self.x_filter.filter(value, 1.0);
        }

        let dt = timestamp - self.last_time;
        if !(dt > 0.0) {
            return self.x_filter.last_value();
        }
        self.last_time = timestamp;

        let dx = (value - self.x_filter.last_value()) / dt;
        let edx = self
            .dx_filter
            .filter(dx, Self::alpha(self.params.d_cutoff, dt));

        let cutoff = self.params.min_cutoff + self.params.beta * edx.abs();
        self.x_filter.filter(value, Self::alpha(cutoff, dt))
    }

    /// Forgets the signal history. Tuning is kept.
    pub fn reset(&mut self) {
        self.initialized = false;
        self.x_filter.reset();
        self.dx_filter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 30.0;

    fn filter_with(beta: f64) -> OneEuroFilter {
        OneEuroFilter::new(OneEuroParams {
            min_cutoff: 1.0,
            beta,
            d_cutoff: 1.0,
        })
    }

    #[test]
    fn first_call_passes_through() {
        let mut filter = filter_with(0.007);
        assert_eq!(filter.filter(5.0, 0.0), 5.0);
    }

    #[test]
    fn near_static_noise_is_smoothed() {
        let mut filter = filter_with(0.007);
        filter.filter(1.0, 0.0);
        filter.filter(1.02, DT);
        filter.filter(0.98, DT * 2.0);
        filter.filter(1.01, DT * 3.0);
        filter.filter(0.99, DT * 4.0);
        let result = filter.filter(1.03, DT * 5.0);

        assert!((result - 1.0).abs() < 0.1);
        assert!((result - 1.03).abs() > 0.005);
        assert!((result - 1.0).abs() < (result - 1.03).abs());
    }

    #[test]
    fn fast_ramp_tracks_closely() {
        let mut filter = filter_with(1.0);
        filter.filter(0.0, 0.0);
        filter.filter(10.0, DT);
        filter.filter(20.0, DT * 2.0);
        filter.filter(30.0, DT * 3.0);
        let result = filter.filter(40.0, DT * 4.0);

        assert!(result > 40.0 * 0.85);
    }

    #[test]
    fn step_response_is_monotonic_without_overshoot() {
        let mut filter = filter_with(0.007);
        filter.filter(0.0, 0.0);
        let outputs: Vec<f64> = (1..=20).map(|i| filter.filter(10.0, DT * i as f64)).collect();

        for pair in outputs.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-9);
        }
        assert!(outputs.iter().all(|&y| y <= 10.0));
        assert!(outputs[outputs.len() - 1] > 5.0);
    }

    #[test]
    fn higher_velocity_means_less_smoothing() {
        let mut slow = filter_with(0.5);
        let mut fast = filter_with(0.5);

        slow.filter(0.0, 0.0);
        let slow_ratio = slow.filter(0.1, DT) / 0.1;

        fast.filter(0.0, 0.0);
        let fast_ratio = fast.filter(10.0, DT) / 10.0;

        assert!(fast_ratio > slow_ratio);
    }

    #[test]
    fn stale_timestamp_returns_last_output() {
        let mut filter = filter_with(0.007);
        filter.filter(0.0, 0.0);
        let last = filter.filter(1.0, DT);
        assert_eq!(filter.filter(50.0, DT), last);
        assert_eq!(filter.filter(50.0, 0.0), last);
    }

    #[test]
    fn reset_reseeds_but_keeps_tuning() {
        let mut filter = filter_with(0.3);
        filter.filter(0.0, 0.0);
        filter.filter(4.0, DT);
        filter.reset();
        assert_eq!(filter.filter(7.5, 10.0), 7.5);
        assert_eq!(filter.params().beta, 0.3);
    }
}
