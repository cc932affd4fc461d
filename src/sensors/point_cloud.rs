//! Point-cloud sensor: registration via generalized ICP.

use crate::algorithms::matching::{GicpConfig, GicpMatcher};
use crate::core::types::{
    Measurement, PointCloud3D, PointCloudMeasurement, Transform, TransformWithCovariance,
};
use crate::sensors::preprocessing::VoxelFilter;
use crate::sensors::{Registration, Sensor, SensorError};
use log::{debug, error};
use serde::{Deserialize, Serialize};

/// Configuration of the point-cloud sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointCloudSensorConfig {
    /// Voxel leaf size used to thin both clouds before registration
    /// (meters).
    pub voxel_leaf_size: f64,

    /// Registration parameters.
    pub gicp: GicpConfig,
}

impl Default for PointCloudSensorConfig {
    fn default() -> Self {
        Self {
            voxel_leaf_size: 2.0,
            gicp: GicpConfig::default(),
        }
    }
}

/// A range sensor producing [`PointCloudMeasurement`]s, registered
/// pairwise with generalized ICP.
pub struct PointCloudSensor {
    name: String,
    config: PointCloudSensorConfig,
    filter: VoxelFilter,
    matcher: GicpMatcher,
}

impl PointCloudSensor {
    /// Create a sensor with the given registry name.
    pub fn new(name: impl Into<String>, config: PointCloudSensorConfig) -> Self {
        let filter = VoxelFilter::new(config.voxel_leaf_size);
        let matcher = GicpMatcher::new(config.gicp.clone());
        Self {
            name: name.into(),
            config,
            filter,
            matcher,
        }
    }

    /// The current configuration.
    pub fn config(&self) -> &PointCloudSensorConfig {
        &self.config
    }

    fn cloud_of<'m>(
        &self,
        m: &'m dyn Measurement,
    ) -> Result<&'m PointCloudMeasurement, SensorError> {
        m.as_any()
            .downcast_ref::<PointCloudMeasurement>()
            .ok_or_else(|| SensorError::BadMeasurementType {
                sensor: m.sensor_name().to_string(),
                expected: "point cloud",
            })
    }

    /// Map of every given measurement, each transformed by its pose,
    /// merged and thinned to `resolution`.
    ///
    /// Callers typically feed the vertices of one sensor:
    ///
    /// ```ignore
    /// let views = mapper
    ///     .graph()
    ///     .vertices_from_sensor(sensor.name())
    ///     .into_iter()
    ///     .map(|v| (v.measurement.as_ref(), v.corrected_pose));
    /// let map = sensor.accumulated_cloud(views, 0.25)?;
    /// ```
    pub fn accumulated_cloud<'a, I>(
        &self,
        views: I,
        resolution: f64,
    ) -> Result<PointCloud3D, SensorError>
    where
        I: IntoIterator<Item = (&'a dyn Measurement, Transform)>,
    {
        let mut accumulated = PointCloud3D::new();
        for (measurement, pose) in views {
            let cloud = self.cloud_of(measurement)?;
            accumulated.merge(&cloud.cloud().transformed(&pose));
        }
        Ok(VoxelFilter::new(resolution).apply(&accumulated))
    }
}

impl Sensor for PointCloudSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn calculate_transform(
        &self,
        source: &dyn Measurement,
        target: &dyn Measurement,
        guess: &Transform,
    ) -> Result<Registration, SensorError> {
        let source_cloud = self.cloud_of(source)?;
        let target_cloud = self.cloud_of(target)?;

        let filtered_source = self.filter.apply(source_cloud.cloud());
        let filtered_target = self.filter.apply(target_cloud.cloud());

        // Seed the alignment by projecting the target cloud through the
        // guess; the matcher then only has to recover the residual error,
        // which left-composes with the guess.
        let shifted_target = filtered_target.transformed(guess);
        let result = self.matcher.align(&shifted_target, &filtered_source);

        if !result.converged {
            debug!(
                "ICP failed after {} iterations (fitness {:.4})",
                result.iterations, result.fitness
            );
            return Ok(Registration::NoMatch);
        }
        if result.fitness > self.config.gicp.max_fitness_score {
            debug!(
                "ICP fitness {:.4} above limit {:.4}, discarding match",
                result.fitness, self.config.gicp.max_fitness_score
            );
            return Ok(Registration::NoMatch);
        }
        if !result.transform.is_finite() {
            error!("ICP produced a non-finite transform, discarding match");
            return Ok(Registration::NoMatch);
        }

        debug!(
            "ICP shift: {:.3} m | guess: {:.3} m",
            result.transform.translation_norm(),
            guess.translation_norm()
        );
        Ok(Registration::Match(TransformWithCovariance::from_transform(
            result.transform.compose(guess),
        )))
    }
}
