//! DEETO-Core: SEEG electrode contact localization
//!
//! This crate reconstructs the contact positions of stereo-EEG depth
//! electrodes from a post-implant CT volume and planned entry/target points.
//!
//! # Modules
//! - `region`: Cubic voxel regions and bounds
//! - `volume`: CT volume with index/physical transforms and region statistics
//! - `trajectory`: Head, tail and contact search along the electrode shaft
//! - `electrode_model`: Electrode model table (JSON)
//! - `fiducials`: Pairing of planning fiducials into entry/target points
//! - `batch`: Reconstruction of every electrode of an implant
//! - `utils`: Thresholds and 3-vector helpers
//! - `nifti_io`: NIfTI reading and writing

// Core modules
pub mod error;
pub mod region;
pub mod volume;
pub mod trajectory;

// Planning inputs
pub mod electrode_model;
pub mod fiducials;
pub mod batch;

pub mod utils;

// I/O modules
pub mod nifti_io;

pub use error::{BatchError, ModelError, NiftiError, TrajectoryError, TrajectoryResult, VolumeError};
pub use trajectory::{
    ContactEstimate, ElectrodeGeometry, Endpoints, HeadEstimate, SearchParams, TailEstimate,
    TrajectoryConstructor,
};
pub use volume::Volume;
