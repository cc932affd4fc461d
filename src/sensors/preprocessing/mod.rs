//! Measurement preprocessing.

mod voxel_filter;

pub use voxel_filter::VoxelFilter;
