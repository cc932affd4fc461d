//! Generalized ICP for 3D point clouds.
//!
//! Plane-to-plane registration in the style of Segal et al.:
//!
//! ```text
//! Input: source cloud S, target cloud T
//! Output: transform aligning S to T
//!
//! 1. Estimate a planar covariance for every point from its k nearest
//!    neighbors.
//! 2. For each outer iteration:
//!    a. Find nearest-neighbor correspondences under the current transform
//!    b. Minimize the Mahalanobis point cost with an inner Gauss-Newton
//!    c. Stop when the transform increment falls below the epsilons
//! 3. Report the final transform and fitness (mean squared residual)
//! ```
//!
//! Nearest-neighbor queries run on a k-d tree over the target cloud.

use crate::core::math::{exp_so3, rotation_angle_of, skew};
use crate::core::types::{PointCloud3D, Transform};
use kiddo::float::kdtree::KdTree as FloatKdTree;
use kiddo::SquaredEuclidean;

/// K-d tree bucket capacity large enough to hold clouds with many points
/// sharing the same coordinate on one axis (the default kiddo bucket size
/// of 32 is too small for such clouds and panics on insert).
type KdTree = FloatKdTree<f64, u64, 3, 256, u32>;
use nalgebra::{Matrix3, Matrix6, SymmetricEigen, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Fewer surviving correspondences than this fail the alignment.
const MIN_CORRESPONDENCES: usize = 6;

/// Eigenvalue assigned to the surface-normal direction of each planar
/// covariance.
const PLANE_EPSILON: f64 = 1e-3;

/// Configuration for generalized ICP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GicpConfig {
    /// Correspondences farther apart than this are rejected (meters).
    pub max_correspondence_distance: f64,

    /// Maximum number of outer correspondence iterations.
    pub maximum_iterations: u32,

    /// Translation increment below which the alignment is converged
    /// (meters).
    pub transformation_epsilon: f64,

    /// Change in mean squared residual below which the alignment is
    /// converged.
    pub euclidean_fitness_epsilon: f64,

    /// Number of neighbors used to estimate each point's planar
    /// covariance.
    pub correspondence_randomness: usize,

    /// Maximum Gauss-Newton steps per correspondence set.
    pub maximum_optimizer_iterations: u32,

    /// Rotation increment below which the alignment is converged
    /// (radians).
    pub rotation_epsilon: f64,

    /// Alignments with a fitness above this are discarded by callers.
    pub max_fitness_score: f64,
}

impl Default for GicpConfig {
    fn default() -> Self {
        Self {
            max_correspondence_distance: 2.5,
            maximum_iterations: 50,
            transformation_epsilon: 1e-5,
            euclidean_fitness_epsilon: 1e-5,
            correspondence_randomness: 20,
            maximum_optimizer_iterations: 20,
            rotation_epsilon: 2e-3,
            max_fitness_score: 2.0,
        }
    }
}

/// Result of a cloud alignment.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Transform mapping the source cloud into the target frame.
    pub transform: Transform,

    /// Whether the alignment converged.
    pub converged: bool,

    /// Mean squared correspondence distance under the final transform.
    pub fitness: f64,

    /// Number of outer iterations performed.
    pub iterations: u32,
}

impl RegistrationResult {
    fn failed() -> Self {
        Self {
            transform: Transform::identity(),
            converged: false,
            fitness: f64::MAX,
            iterations: 0,
        }
    }
}

/// Generalized-ICP cloud matcher.
#[derive(Debug, Clone)]
pub struct GicpMatcher {
    config: GicpConfig,
}

impl GicpMatcher {
    /// Create a matcher with the given configuration.
    pub fn new(config: GicpConfig) -> Self {
        Self { config }
    }

    /// The current configuration.
    pub fn config(&self) -> &GicpConfig {
        &self.config
    }

    /// Build a k-d tree over a cloud.
    fn build_tree(cloud: &PointCloud3D) -> KdTree {
        let mut tree: KdTree = KdTree::new();
        for (i, p) in cloud.iter().enumerate() {
            tree.add(&[p.x, p.y, p.z], i as u64);
        }
        tree
    }

    /// Estimate a regularized covariance for every point.
    ///
    /// The sample covariance of the k nearest neighbors is re-shaped to
    /// the plane model: unit variance along the surface, [`PLANE_EPSILON`]
    /// along the normal. Clouds too small for a stable estimate fall back
    /// to isotropic covariances, turning the cost point-to-point.
    fn plane_covariances(&self, cloud: &PointCloud3D, tree: &KdTree) -> Vec<Matrix3<f64>> {
        let k = self.config.correspondence_randomness.min(cloud.len());
        if k < 3 {
            return vec![Matrix3::identity(); cloud.len()];
        }

        cloud
            .iter()
            .map(|p| {
                let neighbors = tree.nearest_n::<SquaredEuclidean>(&[p.x, p.y, p.z], k);

                let mut mean = Vector3::zeros();
                for n in &neighbors {
                    mean += cloud.points[n.item as usize].coords();
                }
                mean /= neighbors.len() as f64;

                let mut cov = Matrix3::zeros();
                for n in &neighbors {
                    let d = cloud.points[n.item as usize].coords() - mean;
                    cov += d * d.transpose();
                }
                cov /= neighbors.len() as f64;

                // Replace the eigenvalues with the plane model, keeping the
                // eigenbasis.
                let eigen = SymmetricEigen::new(cov);
                let mut normal_idx = 0;
                for i in 1..3 {
                    if eigen.eigenvalues[i] < eigen.eigenvalues[normal_idx] {
                        normal_idx = i;
                    }
                }
                let mut shaped = Matrix3::zeros();
                for i in 0..3 {
                    let v = eigen.eigenvectors.column(i);
                    let lambda = if i == normal_idx { PLANE_EPSILON } else { 1.0 };
                    shaped += v * v.transpose() * lambda;
                }
                shaped
            })
            .collect()
    }

    /// Correspondences (source index, target index, squared distance)
    /// under `tf`.
    fn find_correspondences(
        &self,
        source: &PointCloud3D,
        target_tree: &KdTree,
        tf: &Transform,
    ) -> Vec<(usize, usize, f64)> {
        let max_dist_sq = self.config.max_correspondence_distance.powi(2);
        let mut correspondences = Vec::with_capacity(source.len());

        for (i, p) in source.iter().enumerate() {
            let q = tf.transform_point(&p.coords());
            let nearest = target_tree.nearest_one::<SquaredEuclidean>(&[q.x, q.y, q.z]);
            if nearest.distance <= max_dist_sq {
                correspondences.push((i, nearest.item as usize, nearest.distance));
            }
        }
        correspondences
    }

    /// Gauss-Newton refinement of `tf` over a fixed correspondence set.
    ///
    /// Minimizes `Σ rᵀ M r` with `r = q − T(p)` and
    /// `M = (C_q + R C_p Rᵀ)⁻¹`. Returns `None` when the normal equations
    /// cannot be solved.
    fn optimize_step(
        &self,
        source: &PointCloud3D,
        target: &PointCloud3D,
        source_covs: &[Matrix3<f64>],
        target_covs: &[Matrix3<f64>],
        correspondences: &[(usize, usize, f64)],
        mut tf: Transform,
    ) -> Option<Transform> {
        for _ in 0..self.config.maximum_optimizer_iterations.max(1) {
            let mut h = Matrix6::<f64>::zeros();
            let mut g = Vector6::<f64>::zeros();

            for &(si, ti, _) in correspondences {
                let p = source.points[si].coords();
                let q = target.points[ti].coords();
                let r = q - tf.transform_point(&p);

                let m = (target_covs[ti]
                    + tf.rotation * source_covs[si] * tf.rotation.transpose())
                .try_inverse()
                .unwrap_or_else(Matrix3::identity);

                // J = ∂r/∂(δt, δw) for the update t += δt, R ← R·exp(δw)
                let mut j = nalgebra::Matrix3x6::<f64>::zeros();
                j.fixed_view_mut::<3, 3>(0, 0)
                    .copy_from(&(-Matrix3::identity()));
                j.fixed_view_mut::<3, 3>(0, 3)
                    .copy_from(&(tf.rotation * skew(&p)));

                h += j.transpose() * m * j;
                g += j.transpose() * m * r;
            }

            // Tiny damping keeps the factorization alive on degenerate
            // geometry.
            for i in 0..6 {
                h[(i, i)] += 1e-9;
            }

            let delta = h.cholesky()?.solve(&(-g));
            if !delta.iter().all(|v| v.is_finite()) {
                return None;
            }

            let dt = Vector3::new(delta[0], delta[1], delta[2]);
            let dw = Vector3::new(delta[3], delta[4], delta[5]);
            tf.translation += dt;
            tf.rotation *= exp_so3(&dw);

            if dt.norm() < self.config.transformation_epsilon
                && dw.norm() < self.config.rotation_epsilon
            {
                break;
            }
        }
        Some(tf)
    }

    /// Align `source` onto `target`, starting from the identity.
    pub fn align(&self, source: &PointCloud3D, target: &PointCloud3D) -> RegistrationResult {
        if source.len() < MIN_CORRESPONDENCES || target.len() < MIN_CORRESPONDENCES {
            return RegistrationResult::failed();
        }

        let source_tree = Self::build_tree(source);
        let target_tree = Self::build_tree(target);
        let source_covs = self.plane_covariances(source, &source_tree);
        let target_covs = self.plane_covariances(target, &target_tree);

        let mut tf = Transform::identity();
        let mut converged = false;
        let mut iterations = 0;
        let mut last_fitness = f64::MAX;

        for iter in 0..self.config.maximum_iterations {
            iterations = iter + 1;

            let correspondences = self.find_correspondences(source, &target_tree, &tf);
            if correspondences.len() < MIN_CORRESPONDENCES {
                return RegistrationResult {
                    transform: tf,
                    converged: false,
                    fitness: f64::MAX,
                    iterations,
                };
            }

            let fitness = correspondences.iter().map(|c| c.2).sum::<f64>()
                / correspondences.len() as f64;

            let previous = tf;
            tf = match self.optimize_step(
                source,
                target,
                &source_covs,
                &target_covs,
                &correspondences,
                tf,
            ) {
                Some(tf) => tf,
                None => {
                    return RegistrationResult {
                        transform: previous,
                        converged: false,
                        fitness,
                        iterations,
                    }
                }
            };

            let step = previous.inverse().compose(&tf);
            if step.translation_norm() < self.config.transformation_epsilon
                && rotation_angle_of(&step.rotation) < self.config.rotation_epsilon
            {
                converged = true;
                break;
            }
            if (last_fitness - fitness).abs() < self.config.euclidean_fitness_epsilon {
                converged = true;
                break;
            }
            last_fitness = fitness;
        }

        // Fitness under the final transform.
        let final_correspondences = self.find_correspondences(source, &target_tree, &tf);
        let fitness = if final_correspondences.is_empty() {
            f64::MAX
        } else {
            final_correspondences.iter().map(|c| c.2).sum::<f64>()
                / final_correspondences.len() as f64
        };

        RegistrationResult {
            transform: tf,
            converged,
            fitness,
            iterations,
        }
    }
}
