//! Rigid 3D transforms and their uncertainty.

use crate::core::math::{rotation_angle_of, skew};
use nalgebra::{Matrix3, Matrix6, Vector3};
use serde::{Deserialize, Serialize};

/// 6×6 covariance over the se(3) tangent space.
///
/// Ordering: translation (x, y, z) first, then rotation (x, y, z).
pub type Covariance = Matrix6<f64>;

/// A rigid transform in 3D: rotation followed by translation.
///
/// The rotation part is stored as a full matrix so that products of noisy
/// operands can be detected and re-orthogonalized with
/// [`Transform::orthogonalized`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Rotation matrix (world-from-body).
    pub rotation: Matrix3<f64>,
    /// Translation in meters.
    pub translation: Vector3<f64>,
}

impl Transform {
    /// Create a transform from a rotation matrix and a translation.
    #[inline]
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Identity transform.
    #[inline]
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Pure translation.
    #[inline]
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::new(x, y, z),
        }
    }

    /// Compose two transforms: `self ∘ other`.
    ///
    /// Applies `other` in the frame of `self`.
    #[inline]
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Inverse transform.
    #[inline]
    pub fn inverse(&self) -> Transform {
        let rt = self.rotation.transpose();
        Transform {
            rotation: rt,
            translation: -(rt * self.translation),
        }
    }

    /// Euclidean norm of the translation part.
    #[inline]
    pub fn translation_norm(&self) -> f64 {
        self.translation.norm()
    }

    /// Absolute angle of the rotation part, in [0, π].
    #[inline]
    pub fn rotation_angle(&self) -> f64 {
        rotation_angle_of(&self.rotation)
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Whether every entry of the transform is finite.
    pub fn is_finite(&self) -> bool {
        self.rotation.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }

    /// Return a copy whose rotation part is pulled back onto SO(3).
    ///
    /// Treats the rotation rows as three vectors x, y, z: the shared error
    /// `x·y` is split evenly between x and y, z is rebuilt as `x′ × y′`,
    /// and each row is rescaled by the first-order inverse square root
    /// `0.5·(3 − v·v)`. Cheap and accurate for the small drift that
    /// accumulates from composing noisy estimates; not a substitute for a
    /// polar decomposition on badly corrupted input.
    pub fn orthogonalized(&self) -> Transform {
        let x = self.rotation.row(0).transpose();
        let y = self.rotation.row(1).transpose();
        let error = x.dot(&y);

        let x_ort = x - y * (error / 2.0);
        let y_ort = y - x * (error / 2.0);
        let z_ort = x_ort.cross(&y_ort);

        let x_scale = 0.5 * (3.0 - x_ort.dot(&x_ort));
        let y_scale = 0.5 * (3.0 - y_ort.dot(&y_ort));
        let z_scale = 0.5 * (3.0 - z_ort.dot(&z_ort));

        let mut rotation = Matrix3::zeros();
        rotation.row_mut(0).copy_from(&(x_ort * x_scale).transpose());
        rotation.row_mut(1).copy_from(&(y_ort * y_scale).transpose());
        rotation.row_mut(2).copy_from(&(z_ort * z_scale).transpose());

        Transform {
            rotation,
            translation: self.translation,
        }
    }

    /// Maximum absolute entry of `RᵀR − I`, a measure of rotation drift.
    pub fn orthonormality_error(&self) -> f64 {
        (self.rotation.transpose() * self.rotation - Matrix3::identity())
            .abs()
            .max()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// A relative transform together with its se(3) covariance.
///
/// Produced by sensor registration and consumed as a graph constraint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformWithCovariance {
    /// Relative pose observation (target expressed in source frame).
    pub transform: Transform,
    /// Uncertainty of the observation.
    pub covariance: Covariance,
}

impl TransformWithCovariance {
    /// Wrap a transform with identity covariance.
    pub fn from_transform(transform: Transform) -> Self {
        Self {
            transform,
            covariance: Covariance::identity(),
        }
    }
}
