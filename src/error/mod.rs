//! Error sets for lattice construction, field integration, coordinate mapping,
//! synchronization, event generation and configuration.
//!
//! Setup errors ([`LatticeError`], [`SpatialError`], [`ModulationError`],
//! [`ConfigError`]) are raised before any integration begins, transport errors
//! ([`SyncError`]) are fatal to a run, numerical instability is never an error.

use crate::field::VoxelId;
use crate::lattice::GridIndex;


/// Error set for potential lattice construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LatticeError {
    /// Grid spacing or bounding box cannot produce a lattice
    #[error("invalid lattice geometry: {0}")]
    InvalidGeometry(String),
    /// A requested physical coordinate is not a lattice node
    #[error("coordinate ({x}, {y}, {z}) is not a node of the lattice")]
    CoordinateNotInLattice { x: f64, y: f64, z: f64 },
    /// A requested grid index lies outside the lattice
    #[error("grid index {0:?} is outside the lattice")]
    IndexNotInLattice(GridIndex),
}

/// Error set for potential field errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    /// Voxel id does not exist in the field
    #[error("voxel {voxel} does not exist (field has {len} voxels)")]
    VoxelNotFound { voxel: VoxelId, len: usize },
    /// Coefficients and neighbor links can only change before the first step
    #[error("field parameters are locked once integration has started")]
    ParametersLocked,
    /// A coefficient or rate was negative or not finite
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    /// Production schedule breakpoints are malformed
    #[error("invalid production schedule: {0}")]
    InvalidSchedule(String),
    /// Requested integration interval runs backwards or is not finite
    #[error("cannot integrate from {from} to {to}")]
    InvalidInterval { from: f64, to: f64 },
}

/// Error set for potential coordinate mapping errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpatialError {
    /// Position contains NaN or infinite components
    #[error("position ({x}, {y}, {z}) is not finite")]
    NonFiniteCoordinate { x: f64, y: f64, z: f64 },
}

/// Error set for potential synchronization errors, every variant is fatal to a run
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Broadcast or barrier primitive could not complete
    #[error("exchange transport unavailable: {0}")]
    TransportUnavailable(String),
    /// Received snapshot does not match the local lattice
    #[error("snapshot has {received} values, expected {expected}")]
    SnapshotMismatch { expected: usize, received: usize },
    /// Snapshot bytes could not be decoded
    #[error("snapshot could not be decoded: {0}")]
    Decode(String),
    /// Snapshot bytes could not be encoded
    #[error("snapshot could not be encoded: {0}")]
    Encode(String),
    /// Only the authority process may hold the mutable field
    #[error("rank {rank} is not the authority rank {authority}")]
    NotAuthority { rank: usize, authority: usize },
    /// Authority rank does not exist in the communicator
    #[error("authority rank {authority} is outside a group of {size}")]
    InvalidAuthority { authority: usize, size: usize },
    /// Synchronization window is not a positive duration
    #[error("synchronization window must be positive, got {0}")]
    InvalidWindow(f64),
    /// Stop time is not finite or lies before the start of the run
    #[error("stop time must be finite and not before the start, got {0}")]
    InvalidStopTime(f64),
    /// Synapse binding refers to a voxel outside the snapshot
    #[error("binding refers to voxel {voxel} but the snapshot has {len} voxels")]
    VoxelOutOfRange { voxel: VoxelId, len: usize },
    /// Synapse handle does not resolve to a mechanism on this process
    #[error("synapse handle (cell {cell}, connection {connection}) not found")]
    TargetNotFound { cell: usize, connection: usize },
    /// Field integration failed during the advancing phase
    #[error(transparent)]
    Field(#[from] FieldError),
    /// Event generation failed during the updating phase
    #[error(transparent)]
    Modulation(#[from] ModulationError),
}

/// Error set for potential event generation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModulationError {
    /// Dose-response parameters are not usable
    #[error("invalid dose-response parameter {name}: {value}")]
    InvalidDoseResponse { name: &'static str, value: f64 },
    /// Too many targets on one rank for the seed layout
    #[error("target index {index} exceeds the per-rank seed stride {stride}")]
    SeedStrideExceeded { index: usize, stride: u64 },
    /// Poisson distribution could not be built for the given mean
    #[error("cannot draw events with mean {0}")]
    InvalidEventMean(f64),
    /// Event source index does not belong to the driver
    #[error("event source {index} not found, the driver has {len} sources")]
    SourceNotFound { index: usize, len: usize },
}

/// Error set for potential configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field of the configuration failed validation
    #[error("invalid configuration value {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
    /// Configuration file could not be read
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration file could not be parsed
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A set of errors that may occur when using the library
#[derive(Debug, thiserror::Error)]
pub enum NoDiffusionError {
    /// Errors related to lattice construction
    #[error(transparent)]
    LatticeRelatedError(#[from] LatticeError),
    /// Errors related to the voxel field
    #[error(transparent)]
    FieldRelatedError(#[from] FieldError),
    /// Errors related to coordinate mapping
    #[error(transparent)]
    SpatialRelatedError(#[from] SpatialError),
    /// Errors related to field synchronization
    #[error(transparent)]
    SyncRelatedError(#[from] SyncError),
    /// Errors related to stochastic event generation
    #[error(transparent)]
    ModulationRelatedError(#[from] ModulationError),
    /// Errors related to configuration
    #[error(transparent)]
    ConfigRelatedError(#[from] ConfigError),
}
