//! Mathematical primitives for rigid-body motion in 3D.
//!
//! The SO(3) exponential/logarithm and rotation-angle extraction used by
//! the registration and optimization layers.

use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// Skew-symmetric (cross-product) matrix of a vector.
///
/// `skew(v) * w == v.cross(&w)` for all `w`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// SO(3) exponential map (Rodrigues' formula).
///
/// Maps an axis-angle vector to a rotation matrix. Falls back to the
/// second-order Taylor expansion below `1e-8` rad where the closed form
/// loses precision.
pub fn exp_so3(w: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = w.norm_squared();
    let wx = skew(w);
    if theta2 < 1e-16 {
        return Matrix3::identity() + wx + wx * wx * 0.5;
    }
    let theta = theta2.sqrt();
    Matrix3::identity() + wx * (theta.sin() / theta)
        + wx * wx * ((1.0 - theta.cos()) / theta2)
}

/// SO(3) logarithm map.
///
/// Returns the axis-angle vector of a rotation matrix. The input is
/// assumed orthonormal; the angle is extracted from the trace and the
/// axis from the antisymmetric part, with a separate branch for angles
/// near π where the antisymmetric part vanishes.
pub fn log_so3(r: &Matrix3<f64>) -> Vector3<f64> {
    let angle = rotation_angle_of(r);
    if angle < 1e-10 {
        // First order: R ≈ I + [w]ₓ
        return Vector3::new(
            (r[(2, 1)] - r[(1, 2)]) * 0.5,
            (r[(0, 2)] - r[(2, 0)]) * 0.5,
            (r[(1, 0)] - r[(0, 1)]) * 0.5,
        );
    }
    if (PI - angle).abs() < 1e-6 {
        // Near π the axis comes out of the symmetric part instead.
        let mut axis = Vector3::new(
            (r[(0, 0)] + 1.0).max(0.0).sqrt(),
            (r[(1, 1)] + 1.0).max(0.0).sqrt(),
            (r[(2, 2)] + 1.0).max(0.0).sqrt(),
        ) / std::f64::consts::SQRT_2;
        // Fix signs using the off-diagonal sums
        if r[(1, 0)] + r[(0, 1)] < 0.0 {
            axis.y = -axis.y;
        }
        if r[(2, 0)] + r[(0, 2)] < 0.0 {
            axis.z = -axis.z;
        }
        if axis.norm_squared() > 0.0 {
            axis.normalize_mut();
        }
        return axis * angle;
    }
    let factor = angle / (2.0 * angle.sin());
    Vector3::new(
        (r[(2, 1)] - r[(1, 2)]) * factor,
        (r[(0, 2)] - r[(2, 0)]) * factor,
        (r[(1, 0)] - r[(0, 1)]) * factor,
    )
}

/// Absolute rotation angle of a rotation matrix, in [0, π].
///
/// Uses the trace formula with clamping so slightly drifted matrices do
/// not produce NaN.
#[inline]
pub fn rotation_angle_of(r: &Matrix3<f64>) -> f64 {
    (((r.trace() - 1.0) * 0.5).clamp(-1.0, 1.0)).acos()
}
