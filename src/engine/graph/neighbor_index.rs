//! Spatial index over vertex positions.
//!
//! Loop-closure search needs all prior vertices within a radius of the
//! current position. The index is a k-d tree over the translation parts of
//! the `corrected_pose`s of one sensor's vertices. It is rebuilt before
//! every query round and discarded afterwards; building is cheap compared
//! to a single registration attempt, and an incrementally maintained tree
//! would go stale every time the solver rewrites the poses.

use crate::engine::graph::{PoseGraph, VertexId};
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector3;

/// Disposable k-d index over the vertices of one sensor.
pub struct NeighborIndex {
    tree: KdTree<f64, 3>,
    vertex_ids: Vec<VertexId>,
}

impl NeighborIndex {
    /// Build an index over all vertices produced by the named sensor.
    pub fn build(graph: &PoseGraph, sensor: &str) -> Self {
        let vertices = graph.vertices_from_sensor(sensor);
        let mut tree: KdTree<f64, 3> = KdTree::new();
        let mut vertex_ids = Vec::with_capacity(vertices.len());

        for (row, vertex) in vertices.iter().enumerate() {
            let t = vertex.corrected_pose.translation;
            tree.add(&[t.x, t.y, t.z], row as u64);
            vertex_ids.push(vertex.id);
        }

        Self { tree, vertex_ids }
    }

    /// Number of indexed vertices.
    pub fn len(&self) -> usize {
        self.vertex_ids.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.vertex_ids.is_empty()
    }

    /// Ids of all indexed vertices within `radius` of `point`, nearest
    /// first.
    pub fn radius_search(&self, point: &Vector3<f64>, radius: f64) -> Vec<VertexId> {
        self.tree
            .within::<SquaredEuclidean>(&[point.x, point.y, point.z], radius * radius)
            .into_iter()
            .map(|n| self.vertex_ids[n.item as usize])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PointCloud3D, PointCloudMeasurement, Transform};
    use std::sync::Arc;

    fn add_vertex(graph: &mut PoseGraph, sensor: &str, x: f64, y: f64) -> VertexId {
        let m = Arc::new(PointCloudMeasurement::new(0, "robot", sensor, PointCloud3D::new()));
        graph.add_vertex("v", m, Transform::from_translation(x, y, 0.0))
    }

    #[test]
    fn test_radius_search_finds_nearby_vertices() {
        let mut graph = PoseGraph::new();
        let near = add_vertex(&mut graph, "lidar", 0.5, 0.0);
        let far = add_vertex(&mut graph, "lidar", 10.0, 0.0);
        let origin = add_vertex(&mut graph, "lidar", 0.0, 0.0);

        let index = NeighborIndex::build(&graph, "lidar");
        assert_eq!(index.len(), 3);

        let found = index.radius_search(&Vector3::zeros(), 1.0);
        assert!(found.contains(&near));
        assert!(found.contains(&origin));
        assert!(!found.contains(&far));
    }

    #[test]
    fn test_index_is_sensor_scoped() {
        let mut graph = PoseGraph::new();
        add_vertex(&mut graph, "lidar", 0.0, 0.0);
        let sonar = add_vertex(&mut graph, "sonar", 0.1, 0.0);

        let index = NeighborIndex::build(&graph, "lidar");
        assert_eq!(index.len(), 1);
        let found = index.radius_search(&Vector3::zeros(), 1.0);
        assert!(!found.contains(&sonar));
    }

    #[test]
    fn test_empty_sensor_yields_empty_index() {
        let graph = PoseGraph::new();
        let index = NeighborIndex::build(&graph, "lidar");
        assert!(index.is_empty());
        assert!(index.radius_search(&Vector3::zeros(), 5.0).is_empty());
    }

    #[test]
    fn test_results_are_sorted_by_distance() {
        let mut graph = PoseGraph::new();
        let far = add_vertex(&mut graph, "lidar", 1.5, 0.0);
        let near = add_vertex(&mut graph, "lidar", 0.5, 0.0);

        let index = NeighborIndex::build(&graph, "lidar");
        let found = index.radius_search(&Vector3::zeros(), 2.0);
        assert_eq!(found, vec![near, far]);
    }
}
