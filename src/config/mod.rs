//! Run configuration loaded from JSON, every field falls back to the reference
//! scenario (110 µm cube at 11 µm spacing, 1 ms synchronization windows).

use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::{ConfigError, FieldError, LatticeError};
use crate::field::VoxelField;
use crate::lattice::{GridGeometry, LatticeWiring, Position};
use crate::modulation::DoseResponse;
use crate::spatial::{Interpolation, SpatialIndexMapper};


/// Parameters of a coupled field and network run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Grid spacing (µm)
    pub spacing: f64,
    /// Edge lengths of the simulated box (µm)
    pub box_size: Position,
    /// Position of the first lattice node (µm)
    pub origin: Position,
    /// Physical diffusion constant (µm²/ms)
    pub diffusion: f64,
    /// Decay half-life (ms)
    pub half_life: f64,
    /// Field integration step (ms)
    pub dt: f64,
    /// Synchronization window (ms)
    pub sync_window: f64,
    /// Simulated duration (ms)
    pub duration: f64,
    /// Field to event rate mapping
    pub dose_response: DoseResponse,
    /// Base seed of the event streams
    pub seed: u64,
    /// Rank that owns the field
    pub authority: usize,
    /// Number of processes of the run
    pub ranks: usize,
    /// Sampling of the field at synapse positions
    pub interpolation: Interpolation,
    /// Weight of every injected event
    pub event_weight: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            spacing: 11.,
            box_size: (110., 110., 110.),
            origin: (0., 0., 0.),
            diffusion: 3.3,
            half_life: 1000.,
            dt: 0.05,
            sync_window: 1.,
            duration: 1000.,
            dose_response: DoseResponse::default(),
            seed: 54321,
            authority: 0,
            ranks: 1,
            interpolation: Interpolation::Nearest,
            event_weight: 1.,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0. {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { name, reason: format!("must be positive, got {}", value) })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0. {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { name, reason: format!("must not be negative, got {}", value) })
    }
}

impl RunConfig {
    /// Parses a configuration from JSON and validates it, missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    /// Reads a JSON configuration file and validates it
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;

        RunConfig::from_json_str(&json)
    }

    /// Checks every value before anything is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("spacing", self.spacing)?;
        positive("dt", self.dt)?;
        positive("sync_window", self.sync_window)?;
        positive("duration", self.duration)?;
        positive("half_life", self.half_life)?;
        non_negative("diffusion", self.diffusion)?;
        non_negative("event_weight", self.event_weight)?;
        non_negative("dose_response.baseline", self.dose_response.baseline)?;
        non_negative("dose_response.max_increase", self.dose_response.max_increase)?;
        positive("dose_response.half_saturation", self.dose_response.half_saturation)?;

        for (name, value) in [
            ("box_size.x", self.box_size.0), ("box_size.y", self.box_size.1), ("box_size.z", self.box_size.2),
        ] {
            non_negative(name, value)?;
        }

        if self.sync_window < self.dt {
            return Err(ConfigError::InvalidValue {
                name: "sync_window",
                reason: format!("window {} is shorter than the step {}", self.sync_window, self.dt),
            });
        }
        if self.ranks == 0 {
            return Err(ConfigError::InvalidValue { name: "ranks", reason: String::from("at least one rank is required") });
        }
        if self.authority >= self.ranks {
            return Err(ConfigError::InvalidValue {
                name: "authority",
                reason: format!("rank {} does not exist in a run of {}", self.authority, self.ranks),
            });
        }

        Ok(())
    }

    /// Lattice geometry covering the configured box
    pub fn geometry(&self) -> Result<GridGeometry, LatticeError> {
        GridGeometry::from_bounding_box(self.box_size, self.spacing, self.origin)
    }

    /// Wired field over `wiring` with the configured uniform physics and step
    pub fn build_field(&self, wiring: &LatticeWiring) -> Result<VoxelField, FieldError> {
        let mut field = wiring.build_field(self.dt)?;
        wiring.assign_uniform_physics(&mut field, self.diffusion, self.half_life)?;

        Ok(field)
    }

    /// Mapper over `geometry` using the configured interpolation
    pub fn mapper(&self, geometry: GridGeometry) -> SpatialIndexMapper {
        SpatialIndexMapper::new(geometry, self.interpolation)
    }
}
