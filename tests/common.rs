//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use akasha_slam::core::types::next_measurement_id;
use akasha_slam::{
    Covariance, EdgeObject, Measurement, MeasurementRef, PoseGraph, Registration, Sensor,
    SensorError, Transform, TransformWithCovariance,
};
use std::any::Any;
use std::sync::Arc;

/// A measurement that remembers where it was really taken.
///
/// `true_pose` is the ground-truth world pose of the robot at capture
/// time; `drifted_pose` is the pose the (imperfect) onboard estimation
/// believes, used to fabricate realistic sequential registration drift.
pub struct PosedMeasurement {
    id: u64,
    timestamp_us: u64,
    robot_name: String,
    sensor_name: String,
    /// Position in the trajectory, for telling sequential pairs apart.
    pub step: usize,
    pub true_pose: Transform,
    pub drifted_pose: Transform,
}

impl PosedMeasurement {
    pub fn new(
        timestamp_us: u64,
        sensor_name: &str,
        step: usize,
        true_pose: Transform,
        drifted_pose: Transform,
    ) -> MeasurementRef {
        Arc::new(Self {
            id: next_measurement_id(),
            timestamp_us,
            robot_name: "robot".to_string(),
            sensor_name: sensor_name.to_string(),
            step,
            true_pose,
            drifted_pose,
        })
    }
}

impl Measurement for PosedMeasurement {
    fn unique_id(&self) -> u64 {
        self.id
    }

    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    fn robot_name(&self) -> &str {
        &self.robot_name
    }

    fn sensor_name(&self) -> &str {
        &self.sensor_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scripted registration backed by the poses stored in the measurements.
///
/// Sequential pairs (adjacent steps) answer with the relative transform of
/// the *drifted* poses, mimicking a scan matcher that confirms odometry
/// drift. Loop-closure pairs answer with the *true* relative transform, as
/// a place-recognizing matcher would, but only when the places really lie
/// within `recognition_range`.
pub struct GroundTruthSensor {
    name: String,
    recognition_range: f64,
}

impl GroundTruthSensor {
    pub fn new(name: &str, recognition_range: f64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            recognition_range,
        })
    }

    fn posed<'m>(&self, m: &'m dyn Measurement) -> Result<&'m PosedMeasurement, SensorError> {
        m.as_any()
            .downcast_ref::<PosedMeasurement>()
            .ok_or_else(|| SensorError::BadMeasurementType {
                sensor: m.sensor_name().to_string(),
                expected: "posed test measurement",
            })
    }
}

impl Sensor for GroundTruthSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate_transform(
        &self,
        source: &dyn Measurement,
        target: &dyn Measurement,
        _guess: &Transform,
    ) -> Result<Registration, SensorError> {
        let source = self.posed(source)?;
        let target = self.posed(target)?;

        let sequential = source.step.abs_diff(target.step) == 1;
        if sequential {
            let relative = source
                .drifted_pose
                .inverse()
                .compose(&target.drifted_pose);
            return Ok(Registration::Match(TransformWithCovariance::from_transform(
                relative,
            )));
        }

        let separation =
            (source.true_pose.translation - target.true_pose.translation).norm();
        if separation > self.recognition_range {
            return Ok(Registration::NoMatch);
        }
        let relative = source.true_pose.inverse().compose(&target.true_pose);
        Ok(Registration::Match(TransformWithCovariance::from_transform(
            relative,
        )))
    }
}

/// Translation part of an edge's residual under the current vertex poses.
pub fn edge_translation_residual(graph: &PoseGraph, edge: &EdgeObject) -> f64 {
    let source = graph.vertex(edge.source).expect("edge source");
    let target = graph.vertex(edge.target).expect("edge target");
    let predicted = source
        .corrected_pose
        .inverse()
        .compose(&target.corrected_pose);
    edge.transform
        .inverse()
        .compose(&predicted)
        .translation_norm()
}

/// Sum of squared translation residuals over all edges.
pub fn total_translation_residual(graph: &PoseGraph) -> f64 {
    graph
        .edges()
        .iter()
        .map(|e| edge_translation_residual(graph, e).powi(2))
        .sum()
}

/// Identity covariance, spelled once.
pub fn identity_covariance() -> Covariance {
    Covariance::identity()
}
