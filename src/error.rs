//! Error types for volume loading and electrode reconstruction

use crate::region::VoxelIndex;

/// Result type for trajectory reconstruction
pub type TrajectoryResult<T> = Result<T, TrajectoryError>;

/// Errors raised while reading or writing NIfTI volumes
#[derive(Debug, thiserror::Error)]
pub enum NiftiError {
    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read NIfTI: {message} ({header_info})")]
    Decode { message: String, header_info: String },

    #[error("Expected at least 3D volume, got {0}D")]
    NotVolumetric(usize),

    #[error("Encoding failed: {0}")]
    Encode(#[from] std::io::Error),
}

/// Errors raised while building a [`crate::volume::Volume`]
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("Data length {actual} does not match dimensions {dims:?} ({expected} voxels)")]
    DimensionMismatch {
        dims: (usize, usize, usize),
        expected: usize,
        actual: usize,
    },

    #[error("Affine transform is singular (determinant {0})")]
    SingularAffine(f64),

    #[error("Volume contains no non-zero voxels, cannot derive a threshold")]
    NoNonZeroVoxels,
}

/// Errors raised by the trajectory search
#[derive(Debug, thiserror::Error)]
pub enum TrajectoryError {
    #[error("Must provide either head or entry and either target or tail")]
    InvalidEndpointSpecification,

    #[error("Cannot find head point")]
    HeadNotFound,

    #[error("Cannot find tail point")]
    TailNotFound,

    /// Centroid search exhausted its region sizes; callers fall back or fail.
    #[error("No intensity mass around voxel {0:?}")]
    DegenerateRegion(VoxelIndex),

    #[error("Head and tail coincide, trajectory axis is undefined")]
    CoincidentEndpoints,

    #[error("Electrode geometry is invalid: {0}")]
    InvalidGeometry(String),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Nifti(#[from] NiftiError),
}

/// Errors raised while loading an electrode model table
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to read model table '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed model table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model '{name}': {reason}")]
    InvalidModel { name: String, reason: String },

    #[error("Model table is empty")]
    Empty,

    #[error("Unknown electrode model '{0}'")]
    Unknown(String),
}

/// Failure of one electrode inside a batch run
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
}
