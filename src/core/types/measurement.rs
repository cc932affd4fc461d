//! Sensor measurements.
//!
//! A measurement is the raw sensor payload that justifies a vertex in the
//! pose graph. Measurements are shared between the caller and the graph
//! (`Arc`), so a vertex can never outlive its payload.

use crate::core::types::PointCloud3D;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MEASUREMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide measurement id.
///
/// Ids are unique and monotonically increasing for the lifetime of the
/// process.
pub fn next_measurement_id() -> u64 {
    NEXT_MEASUREMENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A timestamped sensor reading.
///
/// Concrete sensors define their own payload types; the mapper only sees
/// this interface and hands the payload back to the originating sensor,
/// which recovers it through [`Measurement::as_any`].
pub trait Measurement: Send + Sync {
    /// Unique id, monotonically assigned at creation.
    fn unique_id(&self) -> u64;

    /// Acquisition time in microseconds since epoch.
    fn timestamp_us(&self) -> u64;

    /// Name of the robot that produced the reading.
    fn robot_name(&self) -> &str;

    /// Name of the sensor that produced the reading.
    fn sensor_name(&self) -> &str;

    /// Downcast hook for concrete sensors.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a measurement.
pub type MeasurementRef = Arc<dyn Measurement>;

/// A point cloud captured by a range sensor.
#[derive(Debug, Clone)]
pub struct PointCloudMeasurement {
    id: u64,
    timestamp_us: u64,
    robot_name: String,
    sensor_name: String,
    cloud: PointCloud3D,
}

impl PointCloudMeasurement {
    /// Create a measurement, allocating its unique id.
    pub fn new(
        timestamp_us: u64,
        robot_name: impl Into<String>,
        sensor_name: impl Into<String>,
        cloud: PointCloud3D,
    ) -> Self {
        Self {
            id: next_measurement_id(),
            timestamp_us,
            robot_name: robot_name.into(),
            sensor_name: sensor_name.into(),
            cloud,
        }
    }

    /// The captured cloud, in the sensor frame.
    pub fn cloud(&self) -> &PointCloud3D {
        &self.cloud
    }
}

impl Measurement for PointCloudMeasurement {
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
