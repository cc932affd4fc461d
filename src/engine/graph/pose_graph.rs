//! Pose graph data structure.
//!
//! The trajectory is a directed multigraph: vertices are robot poses at
//! measurement instants, edges are relative-pose constraints between them.
//! Vertices and edges are never removed; edges refer to their endpoints by
//! id, so the graph is a flat arena without reference cycles.

use crate::core::types::{Covariance, MeasurementRef, Transform};
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable, graph-scoped vertex identifier.
pub type VertexId = u64;

/// Reserved sensor name for edges derived from odometry rather than a
/// registered sensor.
pub const ODOMETRY_SENSOR: &str = "Odometry";

/// Kind of constraint an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeLabel {
    /// Relative motion integrated from odometry.
    Odom,
    /// Sequential sensor registration against the previous vertex.
    Seq,
    /// Loop-closure registration against a revisited vertex.
    Match,
}

impl EdgeLabel {
    /// Label string used in logs and graph dumps.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeLabel::Odom => "odom",
            EdgeLabel::Seq => "seq",
            EdgeLabel::Match => "match",
        }
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A robot pose at one instant, justified by a measurement.
#[derive(Clone)]
pub struct VertexObject {
    /// Graph-scoped id, assigned on insertion.
    pub id: VertexId,
    /// Human label, typically `<robot>:<sensor>`.
    pub name: String,
    /// The measurement that justified this vertex.
    pub measurement: MeasurementRef,
    /// Current best estimate of the pose in the world frame; overwritten
    /// by the solver on each optimization.
    pub corrected_pose: Transform,
}

impl fmt::Debug for VertexObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexObject")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("measurement_id", &self.measurement.unique_id())
            .field("corrected_pose", &self.corrected_pose)
            .finish()
    }
}

/// A directed constraint between two vertices.
#[derive(Debug, Clone)]
pub struct EdgeObject {
    /// Source vertex id.
    pub source: VertexId,
    /// Target vertex id.
    pub target: VertexId,
    /// Pose of the target expressed in the source frame.
    pub transform: Transform,
    /// Uncertainty of the observation.
    pub covariance: Covariance,
    /// Name of the sensor that produced the edge, or
    /// [`ODOMETRY_SENSOR`].
    pub sensor: String,
    /// Kind of constraint.
    pub label: EdgeLabel,
}

impl EdgeObject {
    /// Create an edge.
    pub fn new(
        source: VertexId,
        target: VertexId,
        transform: Transform,
        covariance: Covariance,
        sensor: impl Into<String>,
        label: EdgeLabel,
    ) -> Self {
        Self {
            source,
            target,
            transform,
            covariance,
            sensor: sensor.into(),
            label,
        }
    }

    /// Whether the edge touches the given vertex.
    pub fn touches(&self, id: VertexId) -> bool {
        self.source == id || self.target == id
    }
}

/// Directed multigraph of pose vertices and constraint edges.
#[derive(Debug, Default)]
pub struct PoseGraph {
    vertices: Vec<VertexObject>,
    edges: Vec<EdgeObject>,
    index: HashMap<VertexId, usize>,
    next_vertex_id: VertexId,
}

impl PoseGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vertex and return its assigned id.
    ///
    /// Ids are monotonically increasing and stable for the lifetime of
    /// the graph.
    pub fn add_vertex(
        &mut self,
        name: impl Into<String>,
        measurement: MeasurementRef,
        corrected_pose: Transform,
    ) -> VertexId {
        let id = self.next_vertex_id;
        self.next_vertex_id += 1;
        self.index.insert(id, self.vertices.len());
        self.vertices.push(VertexObject {
            id,
            name: name.into(),
            measurement,
            corrected_pose,
        });
        id
    }

    /// Insert an edge.
    ///
    /// Both endpoints must already exist; an edge with a missing endpoint
    /// is dropped with an error log and `false` is returned.
    pub fn add_edge(&mut self, edge: EdgeObject) -> bool {
        if !self.index.contains_key(&edge.source) || !self.index.contains_key(&edge.target) {
            error!(
                "rejecting edge {} -> {}: endpoint not in graph",
                edge.source, edge.target
            );
            return false;
        }
        self.edges.push(edge);
        true
    }

    /// Look up a vertex by id.
    pub fn vertex(&self, id: VertexId) -> Option<&VertexObject> {
        self.index.get(&id).map(|&i| &self.vertices[i])
    }

    /// Look up a vertex mutably by id.
    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut VertexObject> {
        match self.index.get(&id) {
            Some(&i) => Some(&mut self.vertices[i]),
            None => None,
        }
    }

    /// All vertices, in insertion order.
    pub fn vertices(&self) -> &[VertexObject] {
        &self.vertices
    }

    /// All edges, in insertion order.
    pub fn edges(&self) -> &[EdgeObject] {
        &self.edges
    }

    /// Edges incident to a vertex, in insertion order.
    pub fn edges_for_vertex(&self, id: VertexId) -> impl Iterator<Item = &EdgeObject> {
        self.edges.iter().filter(move |e| e.touches(id))
    }

    /// Vertices whose measurement came from the named sensor.
    pub fn vertices_from_sensor(&self, sensor: &str) -> Vec<&VertexObject> {
        self.vertices
            .iter()
            .filter(|v| v.measurement.sensor_name() == sensor)
            .collect()
    }

    /// Edges produced by the named sensor.
    pub fn edges_from_sensor(&self, sensor: &str) -> Vec<&EdgeObject> {
        self.edges.iter().filter(|e| e.sensor == sensor).collect()
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Whether the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PointCloud3D, PointCloudMeasurement};
    use std::sync::Arc;

    fn measurement(sensor: &str) -> MeasurementRef {
        Arc::new(PointCloudMeasurement::new(0, "robot", sensor, PointCloud3D::new()))
    }

    #[test]
    fn test_vertex_ids_distinct_and_monotonic() {
        let mut graph = PoseGraph::new();
        let a = graph.add_vertex("a", measurement("lidar"), Transform::identity());
        let b = graph.add_vertex("b", measurement("lidar"), Transform::identity());
        let c = graph.add_vertex("c", measurement("lidar"), Transform::identity());
        assert!(a < b && b < c);
        assert_eq!(graph.num_vertices(), 3);
        assert_eq!(graph.vertex(b).unwrap().name, "b");
    }

    #[test]
    fn test_edge_requires_existing_endpoints() {
        let mut graph = PoseGraph::new();
        let a = graph.add_vertex("a", measurement("lidar"), Transform::identity());

        let bad = EdgeObject::new(
            a,
            99,
            Transform::identity(),
            Covariance::identity(),
            "lidar",
            EdgeLabel::Seq,
        );
        assert!(!graph.add_edge(bad));
        assert_eq!(graph.num_edges(), 0);

        let b = graph.add_vertex("b", measurement("lidar"), Transform::identity());
        let good = EdgeObject::new(
            a,
            b,
            Transform::from_translation(1.0, 0.0, 0.0),
            Covariance::identity(),
            "lidar",
            EdgeLabel::Seq,
        );
        assert!(graph.add_edge(good));
        assert_eq!(graph.num_edges(), 1);
    }

    #[test]
    fn test_vertices_from_sensor_filters() {
        let mut graph = PoseGraph::new();
        graph.add_vertex("a", measurement("lidar"), Transform::identity());
        graph.add_vertex("b", measurement("sonar"), Transform::identity());
        graph.add_vertex("c", measurement("lidar"), Transform::identity());

        assert_eq!(graph.vertices_from_sensor("lidar").len(), 2);
        assert_eq!(graph.vertices_from_sensor("sonar").len(), 1);
        assert_eq!(graph.vertices_from_sensor("radar").len(), 0);
    }

    #[test]
    fn test_edges_from_sensor_filters() {
        let mut graph = PoseGraph::new();
        let a = graph.add_vertex("a", measurement("lidar"), Transform::identity());
        let b = graph.add_vertex("b", measurement("lidar"), Transform::identity());

        graph.add_edge(EdgeObject::new(
            a,
            b,
            Transform::identity(),
            Covariance::identity(),
            "lidar",
            EdgeLabel::Seq,
        ));
        graph.add_edge(EdgeObject::new(
            a,
            b,
            Transform::identity(),
            Covariance::identity(),
            ODOMETRY_SENSOR,
            EdgeLabel::Odom,
        ));

        assert_eq!(graph.edges_from_sensor("lidar").len(), 1);
        assert_eq!(graph.edges_from_sensor(ODOMETRY_SENSOR).len(), 1);
    }

    #[test]
    fn test_edges_for_vertex() {
        let mut graph = PoseGraph::new();
        let a = graph.add_vertex("a", measurement("lidar"), Transform::identity());
        let b = graph.add_vertex("b", measurement("lidar"), Transform::identity());
        let c = graph.add_vertex("c", measurement("lidar"), Transform::identity());

        for (s, t) in [(a, b), (b, c), (a, c)] {
            graph.add_edge(EdgeObject::new(
                s,
                t,
                Transform::identity(),
                Covariance::identity(),
                "lidar",
                EdgeLabel::Seq,
            ));
        }

        assert_eq!(graph.edges_for_vertex(a).count(), 2);
        assert_eq!(graph.edges_for_vertex(b).count(), 2);
        assert_eq!(graph.edges_for_vertex(c).count(), 2);
    }
}
