//! Quaternion and small-vector math shared by the filters, the estimator and
//! the transport. Quaternions are stored as `(x, y, z, w)` and multiplied
//! with the Hamilton convention.

use std::ops::{Mul, Neg};

/// Angular velocities and rotation vectors, in rad/s or rad.
pub type Vec3 = [f64; 3];

/// Below this length a quaternion is considered degenerate and normalizes
/// to the identity.
const NORM_EPSILON: f64 = 1e-10;

/// Below this speed (rad/s) an angular velocity is treated as no rotation.
pub const SPEED_EPSILON: f64 = 1e-10;

/// Below this angle (rad) a rotation vector is treated as zero.
const ROTATION_VECTOR_EPSILON: f64 = 1e-12;

/// A rotation quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// No rotation.
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Euclidean length of the 4-vector.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Scales to unit length. A near-zero quaternion becomes the identity.
    pub fn normalize(self) -> Self {
        let len = self.norm();
        if !(len >= NORM_EPSILON) {
            return Self::IDENTITY;
        }
        Self::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    pub fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Flips the sign of all four components when the scalar part is
    /// negative, so the quaternion describes the shorter of the two arcs.
    pub fn shortest_path(self) -> Self {
        if self.w < 0.0 {
            -self
        } else {
            self
        }
    }

    /// Rotation of `angle` radians about the unit `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let half = angle / 2.0;
        let s = half.sin();
        Self::new(axis[0] * s, axis[1] * s, axis[2] * s, half.cos())
    }

    /// Rotation accumulated by spinning at `omega` (rad/s) for `dt` seconds.
    /// Returns `None` when the angular speed is too small to define an axis.
    pub fn from_angular_velocity(omega: Vec3, dt: f64) -> Option<Self> {
        let speed = vec_norm(omega);
        if speed <= SPEED_EPSILON {
            return None;
        }
        let axis = [omega[0] / speed, omega[1] / speed, omega[2] / speed];
        Some(Self::from_axis_angle(axis, speed * dt))
    }

    /// Rotation described by a rotation vector `theta` (axis times angle),
    /// using the `sin(θ/2)/θ` scaling. Returns `None` for a vector too short
    /// to normalize.
    pub fn from_rotation_vector(theta: Vec3) -> Option<Self> {
        let angle = vec_norm(theta);
        if angle <= ROTATION_VECTOR_EPSILON {
            return None;
        }
        let half = angle / 2.0;
        let sinc = half.sin() / angle;
        Some(Self::new(
            theta[0] * sinc,
            theta[1] * sinc,
            theta[2] * sinc,
            half.cos(),
        ))
    }

    /// Extracts the rotation from a row-major 3×3 rotation matrix and
    /// normalizes it.
    pub fn from_rotation_matrix(m: &[f64; 9]) -> Self {
        let (m00, m01, m02) = (m[0], m[1], m[2]);
        let (m10, m11, m12) = (m[3], m[4], m[5]);
        let (m20, m21, m22) = (m[6], m[7], m[8]);
        let trace = m00 + m11 + m22;

        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Self::new((m21 - m12) / s, (m02 - m20) / s, (m10 - m01) / s, 0.25 * s)
        } else if m00 > m11 && m00 > m22 {
            let s = (1.0 + m00 - m11 - m22).sqrt() * 2.0;
            Self::new(0.25 * s, (m01 + m10) / s, (m02 + m20) / s, (m21 - m12) / s)
        } else if m11 > m22 {
            let s = (1.0 + m11 - m00 - m22).sqrt() * 2.0;
            Self::new((m01 + m10) / s, 0.25 * s, (m12 + m21) / s, (m02 - m20) / s)
        } else {
            let s = (1.0 + m22 - m00 - m11).sqrt() * 2.0;
            Self::new((m02 + m20) / s, (m12 + m21) / s, 0.25 * s, (m10 - m01) / s)
        };

        q.normalize()
    }

    /// Row-major 3×3 rotation matrix of a unit quaternion.
    pub fn to_rotation_matrix(&self) -> [f64; 9] {
        let Quat { x, y, z, w } = *self;
        [
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
            2.0 * (x * y + w * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z - w * x),
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            1.0 - 2.0 * (x * x + y * y),
        ]
    }

    /// The `[x, y, z, w]` single precision layout used by the shared
    /// transport.
    pub fn to_f32_array(&self) -> [f32; 4] {
        [self.x as f32, self.y as f32, self.z as f32, self.w as f32]
    }

    pub fn from_f32_array(q: [f32; 4]) -> Self {
        Self::new(q[0] as f64, q[1] as f64, q[2] as f64, q[3] as f64)
    }
}

/// Hamilton product `self ⊗ rhs`.
impl Mul for Quat {
    type Output = Quat;

    fn mul(self, b: Quat) -> Quat {
        let a = self;
        Quat::new(
            a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
            a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
        )
    }
}

impl Neg for Quat {
    type Output = Quat;

    fn neg(self) -> Quat {
        Quat::new(-self.x, -self.y, -self.z, -self.w)
    }
}

pub fn vec_norm(v: Vec3) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: Quat, b: Quat) -> bool {
        (a.x - b.x).abs() < 1e-9
            && (a.y - b.y).abs() < 1e-9
            && (a.z - b.z).abs() < 1e-9
            && (a.w - b.w).abs() < 1e-9
    }

    #[test]
    fn zero_quaternion_normalizes_to_identity() {
        assert_eq!(Quat::new(0.0, 0.0, 0.0, 0.0).normalize(), Quat::IDENTITY);
        assert_eq!(Quat::new(f64::NAN, 0.0, 0.0, 1.0).normalize(), Quat::IDENTITY);
    }

    #[test]
    fn hamilton_product_composes_rotations() {
        let quarter = Quat::from_axis_angle([0.0, 1.0, 0.0], FRAC_PI_2);
        let half = Quat::from_axis_angle([0.0, 1.0, 0.0], 2.0 * FRAC_PI_2);
        assert!(close(quarter * quarter, half));
        assert!(close(quarter * quarter.conjugate(), Quat::IDENTITY));
    }

    #[test]
    fn shortest_path_flips_negative_scalar() {
        let q = Quat::new(0.1, 0.2, 0.3, -0.9).shortest_path();
        assert!(q.w > 0.0);
        assert_eq!(q.x, -0.1);
    }

    #[test]
    fn still_angular_velocity_has_no_rotation() {
        assert!(Quat::from_angular_velocity([0.0, 0.0, 0.0], 1.0).is_none());
        assert!(Quat::from_rotation_vector([1e-14, 0.0, 0.0]).is_none());
    }

    #[test]
    fn rotation_vector_matches_axis_angle() {
        let a = Quat::from_rotation_vector([0.0, 0.0, 0.5]).unwrap();
        let b = Quat::from_axis_angle([0.0, 0.0, 1.0], 0.5);
        assert!(close(a, b));
    }

    #[test]
    fn matrix_round_trip() {
        let q = Quat::new(0.2, -0.4, 0.1, 0.8).normalize();
        let back = Quat::from_rotation_matrix(&q.to_rotation_matrix());
        assert!(close(q, back));

        // exercises the non-positive trace branches
        let flip = Quat::from_axis_angle([1.0, 0.0, 0.0], 3.0);
        assert!(close(flip, Quat::from_rotation_matrix(&flip.to_rotation_matrix())));
        let flip = Quat::from_axis_angle([0.0, 0.0, 1.0], 3.0);
        assert!(close(flip, Quat::from_rotation_matrix(&flip.to_rotation_matrix())));
    }
}
