//! End-to-end pipeline with the real point-cloud sensor: voxel filtering,
//! generalized ICP, sequential edges and loop closure on synthetic scans.

use akasha_slam::{
    EdgeLabel, GicpConfig, GraphMapper, GraphMapperConfig, Measurement, Point3D, PointCloud3D,
    PointCloudMeasurement, PointCloudSensor, PointCloudSensorConfig, Transform,
};
use nalgebra::Vector3;
use std::sync::Arc;

/// Static scene: three orthogonal wall patches meeting in a corner.
fn scene() -> PointCloud3D {
    let mut cloud = PointCloud3D::new();
    let n = 11;
    for i in 0..n {
        for j in 0..n {
            let a = i as f64 * 0.1;
            let b = j as f64 * 0.1;
            cloud.push(Point3D::new(a, b, 0.0));
            cloud.push(Point3D::new(a, 0.0, b));
            cloud.push(Point3D::new(0.0, a, b));
        }
    }
    cloud
}

/// What the sensor sees from `pose`: the scene in the sensor frame.
fn scan_from(pose: &Transform, timestamp_us: u64) -> Arc<PointCloudMeasurement> {
    Arc::new(PointCloudMeasurement::new(
        timestamp_us,
        "robot",
        "velodyne",
        scene().transformed(&pose.inverse()),
    ))
}

fn sensor() -> Arc<PointCloudSensor> {
    Arc::new(PointCloudSensor::new(
        "velodyne",
        PointCloudSensorConfig {
            voxel_leaf_size: 0.05,
            gicp: GicpConfig {
                max_correspondence_distance: 0.5,
                max_fitness_score: 0.1,
                ..Default::default()
            },
        },
    ))
}

fn mapper() -> GraphMapper {
    let mut mapper = GraphMapper::new(GraphMapperConfig {
        // Accept arbitrarily small motion so the sub-voxel displacements
        // below still produce vertices.
        min_translation: 0.0,
        min_rotation: 0.0,
        ..Default::default()
    });
    mapper.register_sensor(sensor());
    mapper
}

#[test]
fn test_sequential_icp_recovers_small_motion() {
    let mut mapper = mapper();
    let displacement = Vector3::new(0.04, -0.03, 0.02);

    assert!(mapper
        .add_reading(scan_from(&Transform::identity(), 0))
        .unwrap());
    assert!(mapper
        .add_reading(scan_from(
            &Transform::from_translation(displacement.x, displacement.y, displacement.z),
            1000,
        ))
        .unwrap());

    assert_eq!(mapper.graph().num_vertices(), 2);
    let seq = mapper
        .graph()
        .edges()
        .iter()
        .find(|e| e.label == EdgeLabel::Seq)
        .expect("sequential edge");

    let error = (seq.transform.translation - displacement).norm();
    assert!(error < 0.02, "recovered translation off by {}", error);

    let pose_error = (mapper.current_pose().translation - displacement).norm();
    assert!(pose_error < 0.02, "current pose off by {}", pose_error);
}

#[test]
fn test_revisiting_a_place_adds_match_edge() {
    let mut mapper = mapper();
    let pose_b = Transform::from_translation(0.04, -0.03, 0.02);

    assert!(mapper
        .add_reading(scan_from(&Transform::identity(), 0))
        .unwrap());
    assert!(mapper.add_reading(scan_from(&pose_b, 1000)).unwrap());
    // Third scan from the same place again: sequential edge to the second
    // vertex plus a loop closure against the first.
    assert!(mapper.add_reading(scan_from(&pose_b, 2000)).unwrap());

    assert_eq!(mapper.graph().num_vertices(), 3);
    let labels: Vec<EdgeLabel> = mapper.graph().edges().iter().map(|e| e.label).collect();
    assert_eq!(
        labels.iter().filter(|l| **l == EdgeLabel::Seq).count(),
        2,
        "edges: {:?}",
        labels
    );
    assert_eq!(
        labels.iter().filter(|l| **l == EdgeLabel::Match).count(),
        1,
        "edges: {:?}",
        labels
    );

    // The repeated scan barely moves the estimate.
    let second_seq = mapper
        .graph()
        .edges()
        .iter()
        .filter(|e| e.label == EdgeLabel::Seq)
        .nth(1)
        .expect("second sequential edge");
    assert!(second_seq.transform.translation_norm() < 5e-3);
}

#[test]
fn test_accumulated_cloud_covers_all_vertices() {
    let mut mapper = mapper();
    let sensor = sensor();

    assert!(mapper
        .add_reading(scan_from(&Transform::identity(), 0))
        .unwrap());
    assert!(mapper
        .add_reading(scan_from(&Transform::from_translation(0.04, 0.0, 0.0), 1000))
        .unwrap());

    let views = mapper
        .graph()
        .vertices_from_sensor("velodyne")
        .into_iter()
        .map(|v| (v.measurement.as_ref() as &dyn Measurement, v.corrected_pose))
        .collect::<Vec<_>>();
    let map = sensor.accumulated_cloud(views, 0.05).unwrap();

    assert!(!map.is_empty());
    // Two overlapping scans thinned at scene resolution stay close to the
    // size of one scan, far below the raw concatenation.
    assert!(map.len() <= 2 * scene().len());
    assert!(map.len() >= scene().len() / 2);
}
