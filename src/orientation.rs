//! Euler decomposition of head orientation and the derivation of the
//! orientation handed to the audio renderer.
//!
//! Axes follow the tracker: x right, y up, z toward the viewer. Angles are
//! decomposed in YXZ order, so yaw (about y) is applied outermost, then
//! pitch (about x), then roll (about z).

use crate::quat::Quat;

/// Beyond this `|sin(pitch)|` yaw and roll are no longer separable.
const GIMBAL_LIMIT: f64 = 0.999_999_9;

/// Intrinsic YXZ Euler angles, in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Euler {
    /// Rotation about x.
    pub pitch: f64,
    /// Rotation about y.
    pub yaw: f64,
    /// Rotation about z.
    pub roll: f64,
}

impl Euler {
    pub fn new(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self { pitch, yaw, roll }
    }

    pub fn from_degrees(pitch: f64, yaw: f64, roll: f64) -> Self {
        Self::new(pitch.to_radians(), yaw.to_radians(), roll.to_radians())
    }

    /// Decomposes a unit quaternion. At the poles roll is folded into yaw.
    pub fn from_quat(q: Quat) -> Self {
        let m = q.to_rotation_matrix();
        let (m11, m13) = (m[0], m[2]);
        let (m21, m22, m23) = (m[3], m[4], m[5]);
        let (m31, m33) = (m[6], m[8]);

        let pitch = (-m23.clamp(-1.0, 1.0)).asin();
        if m23.abs() < GIMBAL_LIMIT {
            Self::new(pitch, m13.atan2(m33), m21.atan2(m22))
        } else {
            Self::new(pitch, (-m31).atan2(m11), 0.0)
        }
    }

    pub fn to_quat(&self) -> Quat {
        let (s1, c1) = (self.pitch / 2.0).sin_cos();
        let (s2, c2) = (self.yaw / 2.0).sin_cos();
        let (s3, c3) = (self.roll / 2.0).sin_cos();

        Quat::new(
            s1 * c2 * c3 + c1 * s2 * s3,
            c1 * s2 * c3 - s1 * c2 * s3,
            c1 * c2 * s3 - s1 * s2 * c3,
            c1 * c2 * c3 + s1 * s2 * s3,
        )
    }
}

/// The orientation the audio renderer should follow for a given tracked or
/// UI orientation.
///
/// The source is taken apart into YXZ Euler angles and rebuilt. No axis is
/// altered at the moment, so the result is the same rotation as `source`;
/// selective inversion of an axis belongs between the two steps.
pub fn calculate_audio_orientation(source: Quat) -> Quat {
    let euler = Euler::from_quat(source.normalize());
    euler.to_quat()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same_rotation(a: Quat, b: Quat) -> bool {
        let dot = a.x * b.x + a.y * b.y + a.z * b.z + a.w * b.w;
        (dot.abs() - 1.0).abs() < 1e-9
    }

    #[test]
    fn pure_yaw_decomposes_to_yaw() {
        let q = Euler::from_degrees(0.0, 45.0, 0.0).to_quat();
        let euler = Euler::from_quat(q);
        assert!((euler.yaw.to_degrees() - 45.0).abs() < 1e-9);
        assert!(euler.pitch.abs() < 1e-9);
        assert!(euler.roll.abs() < 1e-9);
    }

    #[test]
    fn mixed_rotation_round_trips() {
        let source = Euler::from_degrees(10.0, -30.0, 5.0);
        let back = Euler::from_quat(source.to_quat());
        assert!((back.pitch - source.pitch).abs() < 1e-9);
        assert!((back.yaw - source.yaw).abs() < 1e-9);
        assert!((back.roll - source.roll).abs() < 1e-9);
    }

    #[test]
    fn yaw_is_outermost() {
        let yaw = Euler::from_degrees(0.0, 30.0, 0.0).to_quat();
        let pitch = Euler::from_degrees(20.0, 0.0, 0.0).to_quat();
        let combined = Euler::from_degrees(20.0, 30.0, 0.0).to_quat();
        assert!(same_rotation(yaw * pitch, combined));
    }

    #[test]
    fn audio_orientation_preserves_the_rotation() {
        for (p, y, r) in [(0.0, 30.0, 0.0), (10.0, -30.0, 5.0), (-40.0, 170.0, -20.0)] {
            let source = Euler::from_degrees(p, y, r).to_quat();
            let audio = calculate_audio_orientation(source);
            assert!(same_rotation(source, audio));
            assert!((audio.norm() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn audio_orientation_keeps_yaw_sign() {
        let source = Euler::from_degrees(0.0, 45.0, 0.0).to_quat();
        let audio = Euler::from_quat(calculate_audio_orientation(source));
        assert!((audio.yaw.to_degrees() - 45.0).abs() < 1e-6);
    }

    #[test]
    fn gimbal_pole_is_still_the_same_rotation() {
        let source = Euler::from_degrees(90.0, 25.0, 10.0).to_quat();
        let audio = calculate_audio_orientation(source);
        assert!(same_rotation(source, audio));
    }
}
