//! # NO Diffusion
//!
//! `no_diffusion` simulates a diffusing, decaying chemical field (nitric oxide) on a
//! regular 3-D voxel lattice and couples it to a spiking network whose cells are
//! spread across several processes. One process owns the field, integrates it with
//! an explicit Euler scheme and broadcasts a snapshot at every synchronization window.
//! Every process then pushes the local field value into its bound synapses and turns
//! it into Poisson distributed synaptic events through a saturating dose-response.
//!
//! Each voxel integrates
//!
//! `dC_i/dt = Σ_d D_i,d (C_n(i,d) - C_i) - λ_i C_i + F_i(t)`
//!
//! where boundary faces link a voxel to itself and are therefore reflecting.
//!
//! ## Example Code
//!
//! ### Pulse at the center of a small cube
//!
//! ```rust
//! use no_diffusion::error::NoDiffusionError;
//! use no_diffusion::field::ProductionSchedule;
//! use no_diffusion::lattice::{GridGeometry, LatticeWiring};
//!
//! fn main() -> Result<(), NoDiffusionError> {
//!     let geometry = GridGeometry::from_bounding_box((44., 44., 44.), 11., (0., 0., 0.))?;
//!     let wiring = LatticeWiring::build(geometry);
//!
//!     let mut field = wiring.build_field(0.05)?;
//!     wiring.assign_uniform_physics(&mut field, 3.3, 1000.)?;
//!
//!     let center = wiring.center_voxel()?;
//!     field.set_production(
//!         center,
//!         ProductionSchedule::piecewise_linear(vec![0., 5., 5.], vec![2., 2., 0.])?,
//!     )?;
//!
//!     field.integrate(0., 50.)?;
//!
//!     let corner = wiring.voxel_at((0, 0, 0))?;
//!     assert!(field.concentration(center) > field.concentration(corner));
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Synchronized run on a single process
//!
//! ```rust
//! use no_diffusion::config::RunConfig;
//! use no_diffusion::error::NoDiffusionError;
//! use no_diffusion::lattice::LatticeWiring;
//! use no_diffusion::modulation::StochasticModulationDriver;
//! use no_diffusion::synapse::{
//!     CellRecord, Connection, LocalPopulation, ModulatedExp2Synapse, SynapseTargets, TargetSelector,
//! };
//! use no_diffusion::sync::{FieldSynchronizer, SingleProcess};
//!
//! fn main() -> Result<(), NoDiffusionError> {
//!     let config = RunConfig { box_size: (22., 22., 22.), duration: 10., ..RunConfig::default() };
//!     config.validate()?;
//!
//!     let wiring = LatticeWiring::build(config.geometry()?);
//!     let mut field = config.build_field(&wiring)?;
//!     field.set_initial_concentration(wiring.center_voxel()?, 240.)?;
//!
//!     let mut network = LocalPopulation {
//!         cells: vec![CellRecord {
//!             id: 0,
//!             population: String::from("TC"),
//!             position: (11., 11., 11.),
//!             connections: vec![Connection {
//!                 mechanisms: vec![String::from("GABAA_NO")],
//!                 presynaptic_population: Some(String::from("IRE")),
//!                 mechanism: Some(ModulatedExp2Synapse::default()),
//!             }],
//!         }],
//!     };
//!
//!     let mapper = config.mapper(*wiring.geometry());
//!     let targets = SynapseTargets::collect(
//!         &mut network, &TargetSelector::with_mechanisms(["GABAA_NO"]), &mapper,
//!     )?;
//!     let mut driver = StochasticModulationDriver::new(config.dose_response, config.seed, 0, &targets)?;
//!
//!     let mut synchronizer = FieldSynchronizer::authority(
//!         SingleProcess, config.authority, field, config.sync_window, config.duration,
//!     )?;
//!     let summary = synchronizer.run(&mut network, &targets, &mut driver)?;
//!
//!     assert_eq!(summary.windows, 10);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod field;
pub mod history;
pub mod lattice;
pub mod modulation;
pub mod source;
pub mod spatial;
pub mod synapse;
pub mod sync;
