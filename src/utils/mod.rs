//! Utility functions for trajectory reconstruction

pub mod threshold;
pub mod vector;

pub use threshold::{electrode_threshold, nonzero_percentile, ELECTRODE_PERCENTILE};
pub use vector::{distance, next_point, Point3};
