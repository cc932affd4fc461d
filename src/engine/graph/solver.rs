//! Graph optimization back-end.
//!
//! The mapper feeds nodes and constraints to a [`Solver`] as the graph
//! grows and periodically asks it to recompute all poses. The bundled
//! [`GaussNewtonSolver`] minimizes
//!
//! ```text
//! F(x) = Σ e(xᵢ, xⱼ, zᵢⱼ)ᵀ · Ωᵢⱼ · e(xᵢ, xⱼ, zᵢⱼ)
//! ```
//!
//! over SE(3), where `e` is the tangent-space error between the predicted
//! and measured relative pose and `Ω` is the information matrix (inverse
//! covariance). Iterations solve the damped normal equations
//! `(H + λI)·Δx = −b`; an external back-end can be substituted through the
//! same trait.

use crate::core::math::{exp_so3, log_so3};
use crate::core::types::{Covariance, Transform};
use crate::engine::graph::VertexId;
use log::{debug, error, warn};
use nalgebra::{DMatrix, DVector, Matrix6, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Optimization back-end contract.
///
/// Exactly one node is expected to be marked fixed; it anchors the gauge
/// freedom of the problem.
pub trait Solver {
    /// Register a node with its initial pose.
    fn add_node(&mut self, id: VertexId, pose: Transform);

    /// Register a relative-pose constraint between two nodes.
    fn add_constraint(
        &mut self,
        source: VertexId,
        target: VertexId,
        transform: &Transform,
        covariance: &Covariance,
    );

    /// Hold the given node constant during optimization.
    fn set_fixed(&mut self, id: VertexId);

    /// Run the optimization to completion. Returns `false` on numerical
    /// failure, in which case node estimates keep their pre-call values.
    fn compute(&mut self) -> bool;

    /// Post-optimization poses of every node that moved.
    fn corrections(&self) -> Vec<(VertexId, Transform)>;
}

/// Configuration for [`GaussNewtonSolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum number of iterations.
    pub max_iterations: u32,

    /// Convergence threshold for the relative error change.
    pub convergence_threshold: f64,

    /// Initial Levenberg-Marquardt damping factor.
    pub damping_factor: f64,

    /// Minimum absolute error improvement to continue.
    pub min_improvement: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_threshold: 1e-6,
            damping_factor: 1e-3,
            min_improvement: 1e-9,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: VertexId,
    pose: Transform,
    fixed: bool,
}

#[derive(Debug, Clone)]
struct Constraint {
    source: VertexId,
    target: VertexId,
    measurement: Transform,
    information: Matrix6<f64>,
}

/// Dense Levenberg-Marquardt solver over SE(3).
#[derive(Debug, Default)]
pub struct GaussNewtonSolver {
    config: SolverConfig,
    nodes: Vec<Node>,
    index: HashMap<VertexId, usize>,
    constraints: Vec<Constraint>,
}

/// Tangent-space error of one constraint:
/// `e = vec(z⁻¹ ∘ (xᵢ⁻¹ ∘ xⱼ))`.
fn residual(xi: &Transform, xj: &Transform, z: &Transform) -> Vector6<f64> {
    let t_err = z.inverse().compose(&xi.inverse().compose(xj));
    let mut e = Vector6::zeros();
    e.fixed_rows_mut::<3>(0).copy_from(&t_err.translation);
    e.fixed_rows_mut::<3>(3).copy_from(&log_so3(&t_err.rotation));
    e
}

/// Right-compose a pose with a basis perturbation of magnitude `h` in
/// tangent dimension `d` (0-2 translation, 3-5 rotation).
fn perturbed(pose: &Transform, d: usize, h: f64) -> Transform {
    let mut dt = Vector3::zeros();
    let mut dw = Vector3::zeros();
    if d < 3 {
        dt[d] = h;
    } else {
        dw[d - 3] = h;
    }
    pose.compose(&Transform::new(exp_so3(&dw), dt))
}

impl GaussNewtonSolver {
    /// Create a solver with the given configuration.
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            constraints: Vec::new(),
        }
    }

    /// Current estimate of a node's pose.
    pub fn node_estimate(&self, id: VertexId) -> Option<Transform> {
        self.index.get(&id).map(|&i| self.nodes[i].pose)
    }

    /// Total weighted squared error over all constraints at the current
    /// estimates.
    pub fn chi_squared(&self) -> f64 {
        self.error_of(&self.nodes.iter().map(|n| n.pose).collect::<Vec<_>>())
            .unwrap_or(f64::INFINITY)
    }

    /// Weighted squared error for a candidate pose set; `None` when a
    /// constraint references an unknown node.
    fn error_of(&self, poses: &[Transform]) -> Option<f64> {
        let mut total = 0.0;
        for c in &self.constraints {
            let i = *self.index.get(&c.source)?;
            let j = *self.index.get(&c.target)?;
            let e = residual(&poses[i], &poses[j], &c.measurement);
            total += (e.transpose() * c.information * e)[(0, 0)];
        }
        Some(total)
    }

    /// Numeric Jacobian of one constraint's residual with respect to the
    /// tangent perturbation of `xi` (when `of_source`) or `xj`.
    fn numeric_jacobian(
        xi: &Transform,
        xj: &Transform,
        z: &Transform,
        of_source: bool,
    ) -> Matrix6<f64> {
        const H: f64 = 1e-6;
        let mut jac = Matrix6::zeros();
        for d in 0..6 {
            let (plus, minus) = if of_source {
                (
                    residual(&perturbed(xi, d, H), xj, z),
                    residual(&perturbed(xi, d, -H), xj, z),
                )
            } else {
                (
                    residual(xi, &perturbed(xj, d, H), z),
                    residual(xi, &perturbed(xj, d, -H), z),
                )
            };
            jac.set_column(d, &((plus - minus) / (2.0 * H)));
        }
        jac
    }

    fn add_block(h: &mut DMatrix<f64>, row: usize, col: usize, block: &Matrix6<f64>) {
        for r in 0..6 {
            for c in 0..6 {
                h[(row + r, col + c)] += block[(r, c)];
            }
        }
    }

    fn add_segment(b: &mut DVector<f64>, row: usize, seg: &Vector6<f64>) {
        for r in 0..6 {
            b[row + r] += seg[r];
        }
    }
}

impl Solver for GaussNewtonSolver {
    fn add_node(&mut self, id: VertexId, pose: Transform) {
        if self.index.contains_key(&id) {
            warn!("solver already knows node {}, ignoring", id);
            return;
        }
        self.index.insert(id, self.nodes.len());
        self.nodes.push(Node {
            id,
            pose,
            fixed: false,
        });
    }

    fn add_constraint(
        &mut self,
        source: VertexId,
        target: VertexId,
        transform: &Transform,
        covariance: &Covariance,
    ) {
        let information = covariance.try_inverse().unwrap_or_else(|| {
            warn!(
                "singular covariance on constraint {} -> {}, using identity information",
                source, target
            );
            Matrix6::identity()
        });
        self.constraints.push(Constraint {
            source,
            target,
            measurement: *transform,
            information,
        });
    }

    fn set_fixed(&mut self, id: VertexId) {
        match self.index.get(&id) {
            Some(&i) => self.nodes[i].fixed = true,
            None => error!("cannot fix unknown node {}", id),
        }
    }

    fn compute(&mut self) -> bool {
        if self.constraints.is_empty() {
            return true;
        }
        for c in &self.constraints {
            if !self.index.contains_key(&c.source) || !self.index.contains_key(&c.target) {
                error!(
                    "constraint {} -> {} references an unknown node",
                    c.source, c.target
                );
                return false;
            }
        }

        let n = self.nodes.len();
        let dim = n * 6;
        let mut working: Vec<Transform> = self.nodes.iter().map(|node| node.pose).collect();
        let mut current_error = match self.error_of(&working) {
            Some(e) if e.is_finite() => e,
            _ => return false,
        };
        let initial_error = current_error;
        let mut lambda = self.config.damping_factor;

        for _ in 0..self.config.max_iterations {
            let mut h = DMatrix::<f64>::zeros(dim, dim);
            let mut b = DVector::<f64>::zeros(dim);

            for c in &self.constraints {
                let i = self.index[&c.source];
                let j = self.index[&c.target];
                let e = residual(&working[i], &working[j], &c.measurement);
                let ji = Self::numeric_jacobian(&working[i], &working[j], &c.measurement, true);
                let jj = Self::numeric_jacobian(&working[i], &working[j], &c.measurement, false);

                let wi = ji.transpose() * c.information;
                let wj = jj.transpose() * c.information;
                Self::add_block(&mut h, i * 6, i * 6, &(wi * ji));
                Self::add_block(&mut h, i * 6, j * 6, &(wi * jj));
                Self::add_block(&mut h, j * 6, i * 6, &(wj * ji));
                Self::add_block(&mut h, j * 6, j * 6, &(wj * jj));
                Self::add_segment(&mut b, i * 6, &(wi * e));
                Self::add_segment(&mut b, j * 6, &(wj * e));
            }

            // Clamp fixed nodes: identity rows, zero gradient.
            for (k, node) in self.nodes.iter().enumerate() {
                if !node.fixed {
                    continue;
                }
                for d in 0..6 {
                    let r = k * 6 + d;
                    for c in 0..dim {
                        h[(r, c)] = 0.0;
                        h[(c, r)] = 0.0;
                    }
                    h[(r, r)] = 1.0;
                    b[r] = 0.0;
                }
            }

            for d in 0..dim {
                h[(d, d)] += lambda;
            }

            let delta = match h.cholesky() {
                Some(chol) => chol.solve(&(-&b)),
                None => {
                    error!("normal equations are not positive definite");
                    return false;
                }
            };
            if !delta.iter().all(|v| v.is_finite()) {
                return false;
            }

            let candidate: Vec<Transform> = working
                .iter()
                .enumerate()
                .map(|(k, pose)| {
                    if self.nodes[k].fixed {
                        return *pose;
                    }
                    let dt = Vector3::new(delta[k * 6], delta[k * 6 + 1], delta[k * 6 + 2]);
                    let dw = Vector3::new(delta[k * 6 + 3], delta[k * 6 + 4], delta[k * 6 + 5]);
                    pose.compose(&Transform::new(exp_so3(&dw), dt))
                        .orthogonalized()
                })
                .collect();

            let new_error = match self.error_of(&candidate) {
                Some(e) if e.is_finite() => e,
                _ => return false,
            };

            if new_error <= current_error {
                let improvement = current_error - new_error;
                working = candidate;
                current_error = new_error;
                lambda = (lambda * 0.5).max(1e-12);
                if improvement < self.config.min_improvement
                    || improvement <= self.config.convergence_threshold * current_error.max(1e-12)
                {
                    break;
                }
            } else {
                // Step rejected: damp harder and retry from the same
                // estimates.
                lambda *= 10.0;
                if lambda > 1e8 {
                    break;
                }
            }
        }

        debug!(
            "graph optimization: error {:.6} -> {:.6} over {} nodes / {} constraints",
            initial_error,
            current_error,
            n,
            self.constraints.len()
        );
        for (node, pose) in self.nodes.iter_mut().zip(working) {
            node.pose = pose;
        }
        true
    }

    fn corrections(&self) -> Vec<(VertexId, Transform)> {
        self.nodes
            .iter()
            .filter(|node| !node.fixed)
            .map(|node| (node.id, node.pose))
            .collect()
    }
}
