//! Point cloud types.

use crate::core::types::Transform;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A 3D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3D {
    /// X coordinate in meters
    pub x: f64,
    /// Y coordinate in meters
    pub y: f64,
    /// Z coordinate in meters
    pub z: f64,
}

impl Point3D {
    /// Create a new point.
    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point3D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point3D) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// View as a nalgebra vector.
    #[inline]
    pub fn coords(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    /// Build from a nalgebra vector.
    #[inline]
    pub fn from_coords(v: &Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// An unordered set of 3D points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud3D {
    /// The points of the cloud.
    pub points: Vec<Point3D>,
}

impl PointCloud3D {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cloud from a point vector.
    pub fn from_points(points: Vec<Point3D>) -> Self {
        Self { points }
    }

    /// Append a point.
    #[inline]
    pub fn push(&mut self, p: Point3D) {
        self.points.push(p);
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the cloud has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate over the points.
    pub fn iter(&self) -> std::slice::Iter<'_, Point3D> {
        self.points.iter()
    }

    /// Return a copy with every point moved by `tf`.
    pub fn transformed(&self, tf: &Transform) -> PointCloud3D {
        PointCloud3D {
            points: self
                .points
                .iter()
                .map(|p| Point3D::from_coords(&tf.transform_point(&p.coords())))
                .collect(),
        }
    }

    /// Append all points of `other`.
    pub fn merge(&mut self, other: &PointCloud3D) {
        self.points.extend_from_slice(&other.points);
    }
}
