//! Incremental pose-graph mapper.
//!
//! [`GraphMapper`] is the synchronous state machine at the heart of the
//! engine: it ingests timestamped measurements in order, decides when the
//! robot has moved far enough to warrant a new vertex, connects vertices
//! with odometry, sequential-registration and loop-closure constraints,
//! and hands the growing graph to the optimization back-end.
//!
//! All operations run in the caller's thread; a single mapper instance
//! must not be shared across threads without external serialization.

use crate::core::types::{Covariance, MeasurementRef, Transform};
use crate::engine::graph::{
    dot, EdgeLabel, EdgeObject, NeighborIndex, PoseGraph, Solver, VertexId, VertexObject,
    ODOMETRY_SENSOR,
};
use crate::sensors::{Odometry, Registration, Sensor, SensorError};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Configuration of the mapper's decision procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMapperConfig {
    /// Loop-closure candidate search radius (meters).
    pub neighbor_radius: f64,

    /// Minimum translation between consecutive vertices (meters).
    ///
    /// A reading is rejected when both this and `min_rotation` are
    /// undershot.
    pub min_translation: f64,

    /// Minimum rotation between consecutive vertices (radians).
    pub min_rotation: f64,

    /// Whether to create a vertex and an `"odom"` edge from the odometry
    /// delta even before sensor registration runs.
    pub add_odometry_edges: bool,

    /// Maximum number of loop-closure edges added per reading.
    pub max_neighbor_links: usize,
}

impl Default for GraphMapperConfig {
    fn default() -> Self {
        Self {
            neighbor_radius: 1.0,
            min_translation: 0.5,
            min_rotation: 0.1,
            add_odometry_edges: false,
            max_neighbor_links: 5,
        }
    }
}

/// Incremental 3D pose-graph SLAM engine.
pub struct GraphMapper {
    config: GraphMapperConfig,
    graph: PoseGraph,
    sensors: HashMap<String, Arc<dyn Sensor>>,
    solver: Option<Box<dyn Solver>>,
    odometry: Option<Box<dyn Odometry>>,

    /// Best running estimate of the robot pose in the world frame.
    current_pose: Transform,
    /// Most recently added vertex.
    last_vertex: Option<VertexId>,
    /// The gauge anchor, fixed in the solver.
    first_vertex: Option<VertexId>,
    /// Odometric pose recorded when `last_vertex` was created.
    last_odometric_pose: Transform,
    /// Measurement unique id -> vertex id.
    measurement_index: HashMap<u64, VertexId>,
}

impl GraphMapper {
    /// Create a mapper with the given configuration.
    pub fn new(config: GraphMapperConfig) -> Self {
        Self {
            config,
            graph: PoseGraph::new(),
            sensors: HashMap::new(),
            solver: None,
            odometry: None,
            current_pose: Transform::identity(),
            last_vertex: None,
            first_vertex: None,
            last_odometric_pose: Transform::identity(),
            measurement_index: HashMap::new(),
        }
    }

    /// Register a sensor under its name.
    ///
    /// A second sensor with an already-registered name is rejected with an
    /// error log; the existing sensor stays in place.
    pub fn register_sensor(&mut self, sensor: Arc<dyn Sensor>) {
        let name = sensor.name().to_string();
        if self.sensors.contains_key(&name) {
            error!("sensor with name '{}' already exists", name);
            return;
        }
        self.sensors.insert(name, sensor);
    }

    /// Attach the optimization back-end.
    pub fn set_solver(&mut self, solver: Box<dyn Solver>) {
        self.solver = Some(solver);
    }

    /// Attach an odometry source.
    pub fn set_odometry(&mut self, odometry: Box<dyn Odometry>) {
        self.odometry = Some(odometry);
    }

    /// The current best pose estimate in the world frame.
    pub fn current_pose(&self) -> Transform {
        self.current_pose
    }

    /// The pose graph built so far.
    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    /// Id of the most recently added vertex.
    pub fn last_vertex(&self) -> Option<VertexId> {
        self.last_vertex
    }

    /// Id of the anchor vertex.
    pub fn first_vertex(&self) -> Option<VertexId> {
        self.first_vertex
    }

    /// Ingest a measurement.
    ///
    /// Returns `Ok(true)` when a vertex was added, `Ok(false)` when the
    /// reading was rejected (unknown sensor, unavailable odometry,
    /// insufficient motion, or failed registration without an odometry
    /// edge). Rejection leaves the graph untouched. Readings must arrive
    /// in timestamp order.
    pub fn add_reading(&mut self, measurement: MeasurementRef) -> Result<bool, SensorError> {
        let sensor = match self.sensors.get(measurement.sensor_name()) {
            Some(s) => Arc::clone(s),
            None => {
                error!(
                    "sensor '{}' has not been registered",
                    measurement.sensor_name()
                );
                return Ok(false);
            }
        };
        debug!("add reading from sensor '{}'", measurement.sensor_name());

        if self.measurement_index.contains_key(&measurement.unique_id()) {
            warn!(
                "measurement {} was already added, ignoring duplicate",
                measurement.unique_id()
            );
            return Ok(false);
        }

        let mut odometric_pose = Transform::identity();
        if let Some(odometry) = &self.odometry {
            odometric_pose = match odometry.odometric_pose(measurement.timestamp_us()) {
                Ok(pose) => pose,
                Err(e) => {
                    error!("could not get odometry data: {}", e);
                    return Ok(false);
                }
            };
        }

        // First reading: anchor the trajectory at the current pose.
        let Some(last_id) = self.last_vertex else {
            let id = self.insert_vertex(&measurement, self.current_pose);
            self.last_vertex = Some(id);
            self.last_odometric_pose = odometric_pose;
            info!("added first vertex to the graph");
            return Ok(true);
        };

        let last_pose = self.vertex_ref(last_id).corrected_pose;
        let mut new_vertex: Option<VertexId> = None;

        if self.odometry.is_some() {
            let odom_delta = self
                .last_odometric_pose
                .inverse()
                .compose(&odometric_pose)
                .orthogonalized();
            self.current_pose = last_pose.compose(&odom_delta);
            if !self.check_min_distance(&odom_delta) {
                return Ok(false);
            }

            if self.config.add_odometry_edges {
                let id = self.insert_vertex(&measurement, self.current_pose.orthogonalized());
                self.insert_edge(
                    last_id,
                    id,
                    odom_delta,
                    Covariance::identity(),
                    ODOMETRY_SENSOR,
                    EdgeLabel::Odom,
                );
                new_vertex = Some(id);
            }
        }

        // Register against the previous measurement.
        let last_measurement = Arc::clone(&self.vertex_ref(last_id).measurement);
        let guess = last_pose.inverse().compose(&self.current_pose);
        match sensor.calculate_transform(last_measurement.as_ref(), measurement.as_ref(), &guess)?
        {
            Registration::Match(twc) => {
                self.current_pose = last_pose.compose(&twc.transform).orthogonalized();
                let id = match new_vertex {
                    Some(id) => id,
                    None => {
                        if !self.check_min_distance(&twc.transform) {
                            return Ok(false);
                        }
                        let id = self.insert_vertex(&measurement, self.current_pose);
                        new_vertex = Some(id);
                        id
                    }
                };
                self.insert_edge(
                    last_id,
                    id,
                    twc.transform,
                    twc.covariance,
                    sensor.name(),
                    EdgeLabel::Seq,
                );
            }
            Registration::NoMatch => {
                if new_vertex.is_none() {
                    warn!("measurement could not be matched and no odometry was available");
                    return Ok(false);
                }
            }
        }

        let Some(new_id) = new_vertex else {
            return Ok(false);
        };

        // Link against revisited places nearby.
        self.link_to_neighbors(new_id, sensor.as_ref())?;

        self.last_vertex = Some(new_id);
        self.last_odometric_pose = odometric_pose;
        Ok(true)
    }

    /// Add a measurement whose pose is known externally.
    ///
    /// The vertex is added unconditionally at `pose` and only the
    /// loop-closure step runs; `current_pose` and the sequential chain are
    /// untouched. Used for bootstrapping and contributions from other
    /// robots.
    pub fn add_external_reading(
        &mut self,
        measurement: MeasurementRef,
        pose: Transform,
    ) -> Result<VertexId, SensorError> {
        let id = self.insert_vertex(&measurement, pose);
        debug!(
            "add external reading from {}:{}",
            measurement.robot_name(),
            measurement.sensor_name()
        );
        if let Some(sensor) = self.sensors.get(measurement.sensor_name()).map(Arc::clone) {
            self.link_to_neighbors(id, sensor.as_ref())?;
        }
        Ok(id)
    }

    /// Run the optimization back-end and apply its corrections.
    ///
    /// Returns `false` without a solver or when the solver reports a
    /// numerical failure; vertex poses keep their pre-call values in that
    /// case.
    pub fn optimize(&mut self) -> bool {
        let Some(solver) = &mut self.solver else {
            error!("a solver must be set before optimize() is called");
            return false;
        };
        if !solver.compute() {
            return false;
        }

        let corrections = solver.corrections();
        for (id, pose) in corrections {
            match self.graph.vertex_mut(id) {
                Some(vertex) => vertex.corrected_pose = pose,
                None => warn!("solver corrected unknown vertex {}", id),
            }
        }

        if let Some(last_id) = self.last_vertex {
            self.current_pose = self.vertex_ref(last_id).corrected_pose;
        }
        true
    }

    /// Write the graph to `<name>.dot`.
    pub fn write_graph_to_file(&self, name: &str) -> std::io::Result<()> {
        let file = format!("{}.dot", name);
        info!("writing graph to file '{}'", file);
        dot::write_dot_file(&self.graph, &file)
    }

    /// Whether a relative motion is large enough for a new vertex.
    ///
    /// Rejects only when translation and rotation both undershoot their
    /// thresholds.
    fn check_min_distance(&self, t: &Transform) -> bool {
        let translation = t.translation_norm();
        let rotation = t.rotation_angle();
        debug!("translation: {:.4} / rotation: {:.4}", translation, rotation);
        !(translation < self.config.min_translation && rotation < self.config.min_rotation)
    }

    /// Look up a vertex the mapper created itself.
    ///
    /// Ids handed out by `insert_vertex` are never removed, so the lookup
    /// cannot fail.
    fn vertex_ref(&self, id: VertexId) -> &VertexObject {
        self.graph.vertex(id).expect("mapper vertex is in the graph")
    }

    fn insert_vertex(&mut self, measurement: &MeasurementRef, pose: Transform) -> VertexId {
        let name = format!(
            "{}:{}",
            measurement.robot_name(),
            measurement.sensor_name()
        );
        let id = self.graph.add_vertex(name, Arc::clone(measurement), pose);
        self.measurement_index.insert(measurement.unique_id(), id);
        info!(
            "created vertex {} (from {}:{})",
            id,
            measurement.robot_name(),
            measurement.sensor_name()
        );

        if let Some(solver) = &mut self.solver {
            solver.add_node(id, pose);
        }
        if self.first_vertex.is_none() {
            self.first_vertex = Some(id);
            if let Some(solver) = &mut self.solver {
                solver.set_fixed(id);
            }
        }
        id
    }

    fn insert_edge(
        &mut self,
        source: VertexId,
        target: VertexId,
        transform: Transform,
        covariance: Covariance,
        sensor: &str,
        label: EdgeLabel,
    ) {
        if !self.graph.add_edge(EdgeObject::new(
            source, target, transform, covariance, sensor, label,
        )) {
            return;
        }
        info!(
            "created '{}' edge from vertex {} to vertex {} (from {})",
            label, source, target, sensor
        );
        if let Some(solver) = &mut self.solver {
            solver.add_constraint(source, target, &transform, &covariance);
        }
    }

    /// Try to close loops between `vertex_id` and prior vertices of the
    /// same sensor within the neighbor radius.
    ///
    /// Vertices already connected to `vertex_id` by an edge from this
    /// sensor are skipped; at most `max_neighbor_links` match edges are
    /// added.
    fn link_to_neighbors(
        &mut self,
        vertex_id: VertexId,
        sensor: &dyn Sensor,
    ) -> Result<usize, SensorError> {
        let mut excluded: HashSet<VertexId> = HashSet::new();
        excluded.insert(vertex_id);
        for edge in self.graph.edges_for_vertex(vertex_id) {
            if edge.sensor == sensor.name() {
                excluded.insert(if edge.source == vertex_id {
                    edge.target
                } else {
                    edge.source
                });
            } else {
                warn!(
                    "ignoring edge from '{}' while linking neighbors",
                    edge.sensor
                );
            }
        }

        let index = NeighborIndex::build(&self.graph, sensor.name());
        let vertex_pose = self.vertex_ref(vertex_id).corrected_pose;
        let vertex_measurement = Arc::clone(&self.vertex_ref(vertex_id).measurement);
        let neighbors = index.radius_search(&vertex_pose.translation, self.config.neighbor_radius);
        debug!("neighbor search found {} vertices nearby", neighbors.len());

        let mut added = 0;
        for neighbor_id in neighbors {
            if added >= self.config.max_neighbor_links {
                break;
            }
            if excluded.contains(&neighbor_id) {
                continue;
            }

            let neighbor = self.vertex_ref(neighbor_id);
            let neighbor_pose = neighbor.corrected_pose;
            let neighbor_measurement = Arc::clone(&neighbor.measurement);

            let guess = neighbor_pose.inverse().compose(&vertex_pose);
            match sensor.calculate_transform(
                neighbor_measurement.as_ref(),
                vertex_measurement.as_ref(),
                &guess,
            )? {
                Registration::Match(twc) => {
                    self.insert_edge(
                        neighbor_id,
                        vertex_id,
                        twc.transform,
                        twc.covariance,
                        sensor.name(),
                        EdgeLabel::Match,
                    );
                    added += 1;
                }
                Registration::NoMatch => continue,
            }
        }
        Ok(added)
    }
}
