//! Sensor layer: the registration contract and concrete sensors.
//!
//! A sensor turns two of its own measurements into a relative-pose
//! constraint. The mapper looks sensors up by name and never inspects the
//! payload itself.

pub mod odometry;
mod point_cloud;
pub mod preprocessing;

pub use odometry::{Odometry, OdometryBuffer, OdometryError};
pub use point_cloud::{PointCloudSensor, PointCloudSensorConfig};

use crate::core::types::{Measurement, Transform, TransformWithCovariance};
use thiserror::Error;

/// Fatal sensor failures.
///
/// Registration that merely fails to find a match is not an error; it is
/// reported as [`Registration::NoMatch`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// A measurement handed to a sensor does not carry its payload type.
    #[error("measurement from sensor '{sensor}' does not carry a {expected} payload")]
    BadMeasurementType {
        /// Sensor name recorded in the offending measurement.
        sensor: String,
        /// Payload type the sensor expected.
        expected: &'static str,
    },
}

/// Outcome of a pairwise registration attempt.
#[derive(Debug, Clone)]
pub enum Registration {
    /// Registration succeeded with the given constraint.
    Match(TransformWithCovariance),
    /// No reliable estimate could be produced.
    NoMatch,
}

impl Registration {
    /// Whether this outcome is a match.
    pub fn is_match(&self) -> bool {
        matches!(self, Registration::Match(_))
    }
}

/// A sensor that can register pairs of its own measurements.
pub trait Sensor: Send + Sync {
    /// Stable registry key.
    fn name(&self) -> &str;

    /// Estimate the pose of `target` in the frame of `source`.
    ///
    /// `guess` is the expected relative transform (target in source
    /// frame) used to seed the registration. Fails with
    /// [`SensorError::BadMeasurementType`] when either measurement does
    /// not carry this sensor's payload type.
    fn calculate_transform(
        &self,
        source: &dyn Measurement,
        target: &dyn Measurement,
        guess: &Transform,
    ) -> Result<Registration, SensorError>;
}
