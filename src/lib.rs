//! AkashaSLAM - incremental 3D pose-graph SLAM
//!
//! # Architecture
//!
//! The crate is organized into 4 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (mapper, pose graph, solver, index)          │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │              (cloud registration)                   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Sensor processing
//! │       (sensor contract, odometry, filtering)        │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Data flow
//!
//! Timestamped measurements enter the [`GraphMapper`]. For each reading the
//! mapper consults the odometry source for the motion since the last
//! vertex, gates readings that barely moved, registers the measurement
//! against its predecessor through the owning [`Sensor`], and searches the
//! [`NeighborIndex`] for revisited places to close loops against. Vertices
//! and constraints are mirrored into the attached [`Solver`];
//! [`GraphMapper::optimize`] pulls the corrected poses back into the graph.
//!
//! # Example
//!
//! ```no_run
//! use akasha_slam::{
//!     GaussNewtonSolver, GraphMapper, GraphMapperConfig, PointCloudSensor,
//!     PointCloudSensorConfig, SolverConfig,
//! };
//! use std::sync::Arc;
//!
//! let mut mapper = GraphMapper::new(GraphMapperConfig::default());
//! mapper.register_sensor(Arc::new(PointCloudSensor::new(
//!     "velodyne",
//!     PointCloudSensorConfig::default(),
//! )));
//! mapper.set_solver(Box::new(GaussNewtonSolver::new(SolverConfig::default())));
//!
//! // feed measurements with mapper.add_reading(...), then:
//! mapper.optimize();
//! mapper.write_graph_to_file("trajectory").unwrap();
//! ```

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Sensor processing (depends on core)
// ============================================================================
pub mod sensors;

// ============================================================================
// Layer 3: Algorithms (depends on core)
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 4: SLAM engine (depends on all layers)
// ============================================================================
pub mod engine;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::math;
pub use crate::core::types::{
    Covariance, Measurement, MeasurementRef, Point3D, PointCloud3D, PointCloudMeasurement,
    Transform, TransformWithCovariance,
};

// Sensors
pub use sensors::{
    Odometry, OdometryBuffer, OdometryError, PointCloudSensor, PointCloudSensorConfig,
    Registration, Sensor, SensorError,
};
pub use sensors::preprocessing::VoxelFilter;

// Algorithms - Matching
pub use algorithms::matching::{GicpConfig, GicpMatcher, RegistrationResult};

// Engine
pub use engine::graph::{
    EdgeLabel, EdgeObject, GaussNewtonSolver, NeighborIndex, PoseGraph, Solver, SolverConfig,
    VertexId, VertexObject, ODOMETRY_SENSOR,
};
pub use engine::{GraphMapper, GraphMapperConfig};
