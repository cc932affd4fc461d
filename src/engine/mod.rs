//! Engine layer: the pose graph and the mapper that grows it.

pub mod graph;
mod mapper;

pub use mapper::{GraphMapper, GraphMapperConfig};
