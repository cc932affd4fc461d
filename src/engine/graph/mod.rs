//! Pose graph, spatial index and optimization back-end.

pub mod dot;
mod neighbor_index;
mod pose_graph;
mod solver;

pub use neighbor_index::NeighborIndex;
pub use pose_graph::{
    EdgeLabel, EdgeObject, PoseGraph, VertexId, VertexObject, ODOMETRY_SENSOR,
};
pub use solver::{GaussNewtonSolver, Solver, SolverConfig};
