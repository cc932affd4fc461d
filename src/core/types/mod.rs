//! Core data types shared by all layers.

mod cloud;
mod measurement;
mod transform;

pub use cloud::{Point3D, PointCloud3D};
pub use measurement::{
    next_measurement_id, Measurement, MeasurementRef, PointCloudMeasurement,
};
pub use transform::{Covariance, Transform, TransformWithCovariance};
