//! Error-State Kalman Filter for 3DOF head orientation.
//!
//! The nominal state is an orientation quaternion `q` and an angular
//! velocity `ω`. Uncertainty is tracked on a 6-dimensional error state
//! `[δθ, δω]` living in the tangent space around `q`, which avoids the
//! singular covariance a 4-parameter quaternion state would have.
//!
//! Each frame runs [`Eskf::predict`] then [`Eskf::correct`]; the correction
//! injects the estimated error into the nominal state and zeroes it again.
//! Orientation errors are global (left-multiplied onto `q`), so `ω` is a
//! world-frame angular velocity and every rotation built from it is
//! left-multiplied as well.
//!
//! References: J. Solà, "Quaternion kinematics for the error-state Kalman
//! filter" (2017).

use crate::linalg::{
    mat3_inverse, mat6_add, mat6_identity, mat6_mul, mat6_symmetrize, mat6_transpose,
    mat6x3_mul_mat3, Mat3, Mat6, Mat6x3,
};
use crate::quat::{Quat, Vec3};
use log::warn;
use serde::{Deserialize, Serialize};

const INITIAL_ORIENTATION_VARIANCE: f64 = 0.1;
const INITIAL_OMEGA_VARIANCE: f64 = 1.0;

/// Noise model and look-ahead of an [`Eskf`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EskfOptions {
    /// Process noise driving the orientation error (rad/s/√Hz).
    pub sigma_gyro: f64,
    /// Process noise driving the angular velocity error (rad/s²/√Hz).
    pub sigma_accel: f64,
    /// Measurement noise of the orientation observation (rad).
    pub sigma_meas: f64,
    /// Default forward prediction horizon (s).
    pub prediction_horizon: f64,
}

impl Default for EskfOptions {
    fn default() -> Self {
        Self {
            sigma_gyro: 0.5,
            sigma_accel: 5.0,
            sigma_meas: 0.05,
            prediction_horizon: 0.045,
        }
    }
}

/// Runtime tuning. Absent fields leave the current value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningParams {
    /// Prediction horizon in seconds.
    pub tau: Option<f64>,
    /// Measurement noise covariance scalar, `R = r_scalar · I₃`.
    pub r_scalar: Option<f64>,
    /// Orientation process noise scalar, `Q_θ = q_scalar · dt · I₃`.
    pub q_scalar: Option<f64>,
}

/// The nominal (best estimate) state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NominalState {
    pub q: Quat,
    pub omega: Vec3,
}

#[derive(Debug, Clone)]
pub struct Eskf {
    q: Quat,
    omega: Vec3,
    // [δθx, δθy, δθz, δωx, δωy, δωz]
    dx: [f64; 6],
    p: Mat6,
    options: EskfOptions,
}

impl Default for Eskf {
    fn default() -> Self {
        Self::new(EskfOptions::default())
    }
}

fn initial_covariance() -> Mat6 {
    let mut p = [0.0; 36];
    for i in 0..3 {
        p[i * 6 + i] = INITIAL_ORIENTATION_VARIANCE;
        p[(i + 3) * 6 + (i + 3)] = INITIAL_OMEGA_VARIANCE;
    }
    p
}

impl Eskf {
    pub fn new(options: EskfOptions) -> Self {
        Self {
            q: Quat::IDENTITY,
            omega: [0.0; 3],
            dx: [0.0; 6],
            p: initial_covariance(),
            options,
        }
    }

    pub fn options(&self) -> EskfOptions {
        self.options
    }

    /// Advances the nominal state by `dt` seconds and grows the covariance
    /// by the process noise. Non-positive `dt` is ignored.
    pub fn predict(&mut self, dt: f64) {
        if !(dt > 0.0) {
            return;
        }

        if let Some(step) = Quat::from_angular_velocity(self.omega, dt) {
            self.q = (step * self.q).normalize();
        }

        // Fd = | I - [ω]×·dt   I·dt |
        //      |     0          I   |
        let mut fd = mat6_identity();
        let [wx, wy, wz] = [self.omega[0] * dt, self.omega[1] * dt, self.omega[2] * dt];
        fd[1] = wz;
        fd[2] = -wy;
        fd[6] = -wz;
        fd[8] = wx;
        fd[12] = wy;
        fd[13] = -wx;
        fd[3] = dt;
        fd[6 + 4] = dt;
        fd[12 + 5] = dt;

        let q_theta = self.options.sigma_gyro * self.options.sigma_gyro * dt;
        let q_omega = self.options.sigma_accel * self.options.sigma_accel * dt;
        let mut noise = [0.0; 36];
        for i in 0..3 {
            noise[i * 6 + i] = q_theta;
            noise[(i + 3) * 6 + (i + 3)] = q_omega;
        }

        let fpf = mat6_mul(&mat6_mul(&fd, &self.p), &mat6_transpose(&fd));
        self.p = mat6_add(&fpf, &noise);
        mat6_symmetrize(&mut self.p);
    }

    /// Fuses a measured orientation. The observation is direct,
    /// `H = [I₃ | 0₃]`, with the residual taken as a small rotation vector
    /// `δz = 2·vec(q_meas ⊗ q⁻¹)`.
    pub fn correct(&mut self, q_meas: Quat) {
        let q_err = (q_meas * self.q.conjugate()).shortest_path();
        let dz = [2.0 * q_err.x, 2.0 * q_err.y, 2.0 * q_err.z];

        // S = P_θθ + R
        let r = self.options.sigma_meas * self.options.sigma_meas;
        let mut s: Mat3 = [0.0; 9];
        for i in 0..3 {
            for j in 0..3 {
                s[i * 3 + j] = self.p[i * 6 + j];
            }
            s[i * 3 + i] += r;
        }

        // K = P·Hᵀ·S⁻¹, and P·Hᵀ is the first three columns of P
        let mut pht: Mat6x3 = [0.0; 18];
        for i in 0..6 {
            for j in 0..3 {
                pht[i * 3 + j] = self.p[i * 6 + j];
            }
        }
        let k = mat6x3_mul_mat3(&pht, &mat3_inverse(&s));

        for i in 0..6 {
            self.dx[i] = k[i * 3] * dz[0] + k[i * 3 + 1] * dz[1] + k[i * 3 + 2] * dz[2];
        }

        // P = (I - K·H)·P, where K·H is K padded with three zero columns
        let mut i_kh = mat6_identity();
        for i in 0..6 {
            for j in 0..3 {
                i_kh[i * 6 + j] -= k[i * 3 + j];
            }
        }
        self.p = mat6_mul(&i_kh, &self.p);
        mat6_symmetrize(&mut self.p);

        self.inject();
    }

    /// Moves the error state into the nominal state and zeroes it.
    fn inject(&mut self) {
        if let Some(delta) = Quat::from_rotation_vector([self.dx[0], self.dx[1], self.dx[2]]) {
            self.q = (delta * self.q).normalize();
        }
        for i in 0..3 {
            self.omega[i] += self.dx[i + 3];
        }
        self.dx = [0.0; 6];
    }

    pub fn nominal_state(&self) -> NominalState {
        NominalState {
            q: self.q,
            omega: self.omega,
        }
    }

    /// Between public calls this is always zero.
    pub fn error_state(&self) -> [f64; 6] {
        self.dx
    }

    pub fn covariance(&self) -> &Mat6 {
        &self.p
    }

    /// Orientation extrapolated by the configured prediction horizon.
    pub fn predicted(&self) -> Quat {
        self.predicted_at(self.options.prediction_horizon)
    }

    /// Orientation extrapolated `tau` seconds ahead at the current angular
    /// velocity. Does not change the filter.
    pub fn predicted_at(&self, tau: f64) -> Quat {
        match Quat::from_angular_velocity(self.omega, tau) {
            Some(step) => (step * self.q).normalize(),
            None => self.q,
        }
    }

    /// Applies runtime tuning. Noise and transition matrices are rebuilt on
    /// every call, so this is safe between any two frames. Values that would
    /// make the filter non-finite are rejected.
    pub fn set_params(&mut self, params: &TuningParams) {
        if let Some(tau) = params.tau {
            if tau.is_finite() && tau >= 0.0 {
                self.options.prediction_horizon = tau;
            } else {
                warn!("Ignoring prediction horizon {tau}");
            }
        }
        if let Some(r) = params.r_scalar {
            if r.is_finite() && r >= 0.0 {
                self.options.sigma_meas = r.sqrt();
            } else {
                warn!("Ignoring measurement noise scalar {r}");
            }
        }
        if let Some(q) = params.q_scalar {
            if q.is_finite() && q >= 0.0 {
                self.options.sigma_gyro = q.sqrt();
            } else {
                warn!("Ignoring process noise scalar {q}");
            }
        }
    }

    /// Back to identity orientation, zero velocity, initial covariance.
    /// Tuning is kept.
    pub fn reset(&mut self) {
        self.q = Quat::IDENTITY;
        self.omega = [0.0; 3];
        self.dx = [0.0; 6];
        self.p = initial_covariance();
    }
}
