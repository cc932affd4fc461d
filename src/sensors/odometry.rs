//! Odometry lookup.
//!
//! The mapper asks an [`Odometry`] source for the robot pose at a
//! measurement's timestamp. The bundled [`OdometryBuffer`] interpolates
//! between buffered samples; integration against live wheel/IMU pipelines
//! happens outside this crate.

use crate::core::types::Transform;
use log::warn;
use nalgebra::{Rotation3, UnitQuaternion};
use thiserror::Error;

/// Odometry lookup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OdometryError {
    /// The requested timestamp lies outside the buffered window.
    #[error("no odometry available for timestamp {timestamp_us} us")]
    OutsideWindow {
        /// The timestamp that could not be answered.
        timestamp_us: u64,
    },
}

/// Source of cumulative robot motion estimates.
pub trait Odometry {
    /// Pose of the robot at the given time, in the odometry frame.
    fn odometric_pose(&self, timestamp_us: u64) -> Result<Transform, OdometryError>;
}

/// One buffered odometry sample.
#[derive(Debug, Clone, Copy)]
struct OdometrySample {
    timestamp_us: u64,
    pose: Transform,
}

/// Time-ordered odometry buffer with pose interpolation.
///
/// Lookups between two samples interpolate linearly in translation and
/// spherically in rotation. Lookups outside the buffered window fail with
/// [`OdometryError::OutsideWindow`].
#[derive(Debug, Default)]
pub struct OdometryBuffer {
    samples: Vec<OdometrySample>,
}

impl OdometryBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample.
    ///
    /// Samples must arrive in timestamp order; out-of-order samples are
    /// dropped with a warning.
    pub fn push(&mut self, timestamp_us: u64, pose: Transform) {
        if let Some(last) = self.samples.last() {
            if timestamp_us < last.timestamp_us {
                warn!(
                    "dropping out-of-order odometry sample at {} us (latest is {} us)",
                    timestamp_us, last.timestamp_us
                );
                return;
            }
        }
        self.samples.push(OdometrySample { timestamp_us, pose });
    }

    fn interpolate(a: &OdometrySample, b: &OdometrySample, timestamp_us: u64) -> Transform {
        if a.timestamp_us == b.timestamp_us {
            return a.pose;
        }
        let t = (timestamp_us - a.timestamp_us) as f64
            / (b.timestamp_us - a.timestamp_us) as f64;

        let translation = a.pose.translation.lerp(&b.pose.translation, t);

        let qa = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
            a.pose.rotation,
        ));
        let qb = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
            b.pose.rotation,
        ));
        let rotation = qa.slerp(&qb, t).to_rotation_matrix().into_inner();

        Transform::new(rotation, translation)
    }
}

impl Odometry for OdometryBuffer {
    fn odometric_pose(&self, timestamp_us: u64) -> Result<Transform, OdometryError> {
        let (first, last) = match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(OdometryError::OutsideWindow { timestamp_us }),
        };
        if timestamp_us < first.timestamp_us || timestamp_us > last.timestamp_us {
            return Err(OdometryError::OutsideWindow { timestamp_us });
        }

        // Index of the first sample at or after the query time.
        let upper = self
            .samples
            .partition_point(|s| s.timestamp_us < timestamp_us);
        if self.samples[upper].timestamp_us == timestamp_us {
            return Ok(self.samples[upper].pose);
        }
        Ok(Self::interpolate(
            &self.samples[upper - 1],
            &self.samples[upper],
            timestamp_us,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::exp_so3;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_empty_buffer_fails() {
        let buffer = OdometryBuffer::new();
        assert_eq!(
            buffer.odometric_pose(100),
            Err(OdometryError::OutsideWindow { timestamp_us: 100 })
        );
    }

    #[test]
    fn test_exact_sample_lookup() {
        let mut buffer = OdometryBuffer::new();
        buffer.push(1000, Transform::from_translation(1.0, 0.0, 0.0));
        buffer.push(2000, Transform::from_translation(2.0, 0.0, 0.0));

        let pose = buffer.odometric_pose(2000).unwrap();
        assert_relative_eq!(pose.translation, Vector3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_translation_interpolation() {
        let mut buffer = OdometryBuffer::new();
        buffer.push(0, Transform::from_translation(0.0, 0.0, 0.0));
        buffer.push(1000, Transform::from_translation(2.0, 4.0, 0.0));

        let pose = buffer.odometric_pose(500).unwrap();
        assert_relative_eq!(pose.translation, Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_rotation_interpolation() {
        let mut buffer = OdometryBuffer::new();
        buffer.push(0, Transform::identity());
        buffer.push(
            1000,
            Transform::new(exp_so3(&Vector3::new(0.0, 0.0, 0.8)), Vector3::zeros()),
        );

        let pose = buffer.odometric_pose(500).unwrap();
        assert_relative_eq!(pose.rotation_angle(), 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_outside_window_rejected() {
        let mut buffer = OdometryBuffer::new();
        buffer.push(1000, Transform::identity());
        buffer.push(2000, Transform::identity());

        assert!(buffer.odometric_pose(999).is_err());
        assert!(buffer.odometric_pose(2001).is_err());
    }

    #[test]
    fn test_out_of_order_sample_dropped() {
        let mut buffer = OdometryBuffer::new();
        buffer.push(1000, Transform::identity());
        buffer.push(500, Transform::from_translation(9.0, 9.0, 9.0));
        assert_eq!(buffer.len(), 1);
    }
}
