//! Graphviz dump of the pose graph.
//!
//! Purely diagnostic: one node per vertex, one arrow per constraint,
//! labelled with the producing sensor, the edge kind and the length of the
//! relative translation.

use crate::engine::graph::PoseGraph;
use std::io::{self, Write};
use std::path::Path;

/// Write the graph as a Graphviz digraph.
pub fn write_dot<W: Write>(graph: &PoseGraph, out: &mut W) -> io::Result<()> {
    writeln!(out, "digraph pose_graph {{")?;
    for v in graph.vertices() {
        writeln!(out, "    v{} [label=\"{}: {}\"];", v.id, v.id, v.name)?;
    }
    for e in graph.edges() {
        writeln!(
            out,
            "    v{} -> v{} [label=\"{}:{} |t|={:.2}\"];",
            e.source,
            e.target,
            e.sensor,
            e.label,
            e.transform.translation_norm()
        )?;
    }
    writeln!(out, "}}")
}

/// Write the graph to a `.dot` file at `path`.
pub fn write_dot_file<P: AsRef<Path>>(graph: &PoseGraph, path: P) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_dot(graph, &mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Covariance, PointCloud3D, PointCloudMeasurement, Transform};
    use crate::engine::graph::{EdgeLabel, EdgeObject};
    use std::sync::Arc;

    #[test]
    fn test_dot_output_lists_vertices_and_edges() {
        let mut graph = PoseGraph::new();
        let m = Arc::new(PointCloudMeasurement::new(0, "robot", "lidar", PointCloud3D::new()));
        let a = graph.add_vertex("robot:lidar", m.clone(), Transform::identity());
        let b = graph.add_vertex(
            "robot:lidar",
            m,
            Transform::from_translation(1.0, 0.0, 0.0),
        );
        graph.add_edge(EdgeObject::new(
            a,
            b,
            Transform::from_translation(1.0, 0.0, 0.0),
            Covariance::identity(),
            "lidar",
            EdgeLabel::Seq,
        ));

        let mut buffer = Vec::new();
        write_dot(&graph, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.starts_with("digraph pose_graph {"));
        assert!(text.contains("v0 [label=\"0: robot:lidar\"];"));
        assert!(text.contains("v0 -> v1 [label=\"lidar:seq |t|=1.00\"];"));
        assert!(text.trim_end().ends_with('}'));
    }
}
