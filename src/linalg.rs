//! Fixed-size matrix helpers for the error-state filter. Matrices are flat
//! row-major arrays, so nothing here allocates.

/// Row-major 3×3 matrix.
pub type Mat3 = [f64; 9];

/// Row-major 6×6 matrix.
pub type Mat6 = [f64; 36];

/// Row-major 6×3 matrix.
pub type Mat6x3 = [f64; 18];

/// Determinants smaller than this make [`mat3_inverse`] give up.
const SINGULAR_DET: f64 = 1e-20;

pub const MAT3_IDENTITY: Mat3 = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

pub fn mat6_identity() -> Mat6 {
    let mut m = [0.0; 36];
    for i in 0..6 {
        m[i * 6 + i] = 1.0;
    }
    m
}

pub fn mat6_mul(a: &Mat6, b: &Mat6) -> Mat6 {
    let mut c = [0.0; 36];
    for i in 0..6 {
        for j in 0..6 {
            c[i * 6 + j] = (0..6).map(|k| a[i * 6 + k] * b[k * 6 + j]).sum();
        }
    }
    c
}

pub fn mat6_transpose(a: &Mat6) -> Mat6 {
    let mut t = [0.0; 36];
    for i in 0..6 {
        for j in 0..6 {
            t[j * 6 + i] = a[i * 6 + j];
        }
    }
    t
}

pub fn mat6_add(a: &Mat6, b: &Mat6) -> Mat6 {
    let mut c = [0.0; 36];
    for (i, c) in c.iter_mut().enumerate() {
        *c = a[i] + b[i];
    }
    c
}

/// Replaces `m` with `(m + mᵀ) / 2`, removing the asymmetry that rounding
/// accumulates in a covariance matrix.
pub fn mat6_symmetrize(m: &mut Mat6) {
    for i in 0..6 {
        for j in (i + 1)..6 {
            let mean = 0.5 * (m[i * 6 + j] + m[j * 6 + i]);
            m[i * 6 + j] = mean;
            m[j * 6 + i] = mean;
        }
    }
}

/// Closed-form adjugate inverse. A singular matrix yields the identity.
pub fn mat3_inverse(m: &Mat3) -> Mat3 {
    let [a, b, c, d, e, f, g, h, k] = *m;

    let det = a * (e * k - f * h) - b * (d * k - f * g) + c * (d * h - e * g);
    if !(det.abs() >= SINGULAR_DET) {
        return MAT3_IDENTITY;
    }
    let inv_det = 1.0 / det;

    [
        (e * k - f * h) * inv_det,
        (c * h - b * k) * inv_det,
        (b * f - c * e) * inv_det,
        (f * g - d * k) * inv_det,
        (a * k - c * g) * inv_det,
        (c * d - a * f) * inv_det,
        (d * h - e * g) * inv_det,
        (b * g - a * h) * inv_det,
        (a * e - b * d) * inv_det,
    ]
}

/// `(6×3) · (3×3) → 6×3`
pub fn mat6x3_mul_mat3(a: &Mat6x3, b: &Mat3) -> Mat6x3 {
    let mut c = [0.0; 18];
    for i in 0..6 {
        for j in 0..3 {
            c[i * 3 + j] = (0..3).map(|k| a[i * 3 + k] * b[k * 3 + j]).sum();
        }
    }
    c
}
