//! Voxel-grid downsampling for point clouds.
//!
//! Reduces point count while preserving cloud structure: space is divided
//! into cubic leaves and each occupied leaf is replaced by the centroid of
//! its points. Registration cost scales with point count, so both clouds
//! are filtered before alignment.

use crate::core::types::{Point3D, PointCloud3D};
use log::warn;
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// Voxel-grid downsampler.
#[derive(Debug, Clone, Copy)]
pub struct VoxelFilter {
    /// Cubic leaf edge length in meters.
    leaf_size: f64,
}

impl VoxelFilter {
    /// Create a filter with the given leaf size.
    pub fn new(leaf_size: f64) -> Self {
        Self { leaf_size }
    }

    /// The configured leaf size.
    pub fn leaf_size(&self) -> f64 {
        self.leaf_size
    }

    /// Downsample a cloud to one centroid per occupied leaf.
    ///
    /// A non-positive leaf size disables filtering and returns the input
    /// unchanged.
    pub fn apply(&self, cloud: &PointCloud3D) -> PointCloud3D {
        if self.leaf_size <= 0.0 {
            warn!("voxel filter leaf size {} is not positive, skipping", self.leaf_size);
            return cloud.clone();
        }
        if cloud.is_empty() {
            return PointCloud3D::new();
        }

        // BTreeMap keeps the output order independent of hash seeds.
        let mut leaves: BTreeMap<(i64, i64, i64), (Vector3<f64>, usize)> = BTreeMap::new();
        let inv = 1.0 / self.leaf_size;

        for p in cloud.iter() {
            let key = (
                (p.x * inv).floor() as i64,
                (p.y * inv).floor() as i64,
                (p.z * inv).floor() as i64,
            );
            let entry = leaves.entry(key).or_insert((Vector3::zeros(), 0));
            entry.0 += p.coords();
            entry.1 += 1;
        }

        let points = leaves
            .values()
            .map(|(sum, count)| Point3D::from_coords(&(sum / *count as f64)))
            .collect();
        PointCloud3D::from_points(points)
    }
}
