//! The voxel concentration field and its explicit integrator.
//!
//! Each voxel `i` integrates
//!
//! `dC_i/dt = Σ_d D_i,d (C_n(i,d) - C_i) - λ_i C_i + F_i(t)`
//!
//! over the six directions `d`, where `n(i, d)` is the neighbor link of `i` in
//! direction `d`. A link that points back at `i` contributes nothing, which is how
//! lattice faces become reflecting. Rates are in 1/ms, concentrations in nM,
//! production in nM/ms.
//!
//! Integration is forward Euler at a fixed step `dt`. Lattice rates come from
//! physical constants as `D = D_phys / spacing^2`, so fine grids or fast diffusion
//! need a small `dt`, the step is only stable while `dt < 1 / max_i(Σ_d D_i,d + λ_i)`
//! (see [`VoxelField::max_stable_dt`]). Exceeding it is logged and left to the caller,
//! concentrations are never clamped.

use rayon::prelude::*;
use tracing::{trace, warn};
use crate::error::FieldError;
use crate::history::FieldHistory;
use crate::lattice::{Direction, GridIndex};
use crate::source::SpikeDrivenSource;

mod schedule;
pub use schedule::ProductionSchedule;


/// Flat voxel id in canonical order (`x` fastest, then `y`, then `z`)
pub type VoxelId = usize;

/// Exchange rates of a voxel towards each of its six neighbors (1/ms)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiffusionCoefficients {
    pub x_pos: f64,
    pub x_neg: f64,
    pub y_pos: f64,
    pub y_neg: f64,
    pub z_pos: f64,
    pub z_neg: f64,
}

impl DiffusionCoefficients {
    /// Same rate in every direction
    pub fn uniform(value: f64) -> Self {
        DiffusionCoefficients {
            x_pos: value,
            x_neg: value,
            y_pos: value,
            y_neg: value,
            z_pos: value,
            z_neg: value,
        }
    }

    /// Rate towards the neighbor in the given direction
    pub fn get(&self, direction: Direction) -> f64 {
        match direction {
            Direction::XPos => self.x_pos,
            Direction::XNeg => self.x_neg,
            Direction::YPos => self.y_pos,
            Direction::YNeg => self.y_neg,
            Direction::ZPos => self.z_pos,
            Direction::ZNeg => self.z_neg,
        }
    }

    /// Sets the rate towards the neighbor in the given direction
    pub fn set(&mut self, direction: Direction, value: f64) {
        match direction {
            Direction::XPos => self.x_pos = value,
            Direction::XNeg => self.x_neg = value,
            Direction::YPos => self.y_pos = value,
            Direction::YNeg => self.y_neg = value,
            Direction::ZPos => self.z_pos = value,
            Direction::ZNeg => self.z_neg = value,
        }
    }

    /// Sum of all six rates
    pub fn total(&self) -> f64 {
        self.x_pos + self.x_neg + self.y_pos + self.y_neg + self.z_pos + self.z_neg
    }

    fn is_valid(&self) -> bool {
        Direction::ALL.iter().all(|direction| {
            let value = self.get(*direction);
            value.is_finite() && value >= 0.
        })
    }
}

/// Regular 3-D lattice of concentrations stored as an arena indexed by [`VoxelId`]
/// with an explicit neighbor table
///
/// A new field has zero concentration everywhere and every neighbor link pointing at
/// the voxel itself, [`crate::lattice::LatticeWiring::build_field`] creates a wired
/// field, [`VoxelField::link`] rewires individual faces. Coefficients and links are
/// fixed once integration starts, production schedules can change at any time.
#[derive(Debug, Clone)]
pub struct VoxelField {
    dims: GridIndex,
    dt: f64,
    time: f64,
    started: bool,
    concentration: Vec<f64>,
    initial: Vec<f64>,
    neighbors: Vec<[VoxelId; 6]>,
    coefficients: Vec<DiffusionCoefficients>,
    decay: Vec<f64>,
    production: Vec<ProductionSchedule>,
    /// Spike driven production added on top of the schedules
    pub spike_source: SpikeDrivenSource,
    production_buffer: Vec<f64>,
    derivative: Vec<f64>,
}

impl VoxelField {
    /// Allocates `nx * ny * nz` isolated voxels with zero concentration, zero rates
    /// and integration step `dt` (ms)
    pub fn new(dims: GridIndex, dt: f64) -> Result<Self, FieldError> {
        if !(dt.is_finite() && dt > 0.) {
            return Err(FieldError::InvalidParameter { name: "dt", value: dt });
        }

        let len = dims.0 * dims.1 * dims.2;

        Ok(VoxelField {
            dims,
            dt,
            time: 0.,
            started: false,
            concentration: vec![0.; len],
            initial: vec![0.; len],
            neighbors: (0..len).map(|i| [i; 6]).collect(),
            coefficients: vec![DiffusionCoefficients::default(); len],
            decay: vec![0.; len],
            production: vec![ProductionSchedule::default(); len],
            spike_source: SpikeDrivenSource::default(),
            production_buffer: vec![0.; len],
            derivative: vec![0.; len],
        })
    }

    /// Number of voxels
    pub fn len(&self) -> usize {
        self.concentration.len()
    }

    /// Whether the field has no voxels
    pub fn is_empty(&self) -> bool {
        self.concentration.is_empty()
    }

    /// Lattice dimensions `(nx, ny, nz)`
    pub fn dims(&self) -> GridIndex {
        self.dims
    }

    /// Integration step (ms)
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Time the field has been integrated to (ms)
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Whether integration has started and parameters are locked
    pub fn is_started(&self) -> bool {
        self.started
    }

    fn check_voxel(&self, voxel: VoxelId) -> Result<(), FieldError> {
        if voxel >= self.len() {
            return Err(FieldError::VoxelNotFound { voxel, len: self.len() });
        }

        Ok(())
    }

    fn check_unlocked(&self) -> Result<(), FieldError> {
        if self.started {
            return Err(FieldError::ParametersLocked);
        }

        Ok(())
    }

    /// Points the `direction` face of `voxel` at `neighbor`, linking a voxel to
    /// itself makes that face reflecting
    pub fn link(&mut self, voxel: VoxelId, direction: Direction, neighbor: VoxelId) -> Result<(), FieldError> {
        self.check_unlocked()?;
        self.check_voxel(voxel)?;
        self.check_voxel(neighbor)?;

        self.neighbors[voxel][direction.slot()] = neighbor;

        Ok(())
    }

    /// Neighbor link of a voxel in a direction
    pub fn neighbor(&self, voxel: VoxelId, direction: Direction) -> Option<VoxelId> {
        self.neighbors.get(voxel).map(|links| links[direction.slot()])
    }

    /// Neighbor table indexed by voxel id
    pub fn neighbors(&self) -> &[[VoxelId; 6]] {
        &self.neighbors
    }

    /// Sets the six diffusion rates and the decay constant of a voxel, only allowed
    /// before the first integration step
    pub fn set_coefficients(
        &mut self,
        voxel: VoxelId,
        coefficients: DiffusionCoefficients,
        decay: f64,
    ) -> Result<(), FieldError> {
        self.check_unlocked()?;
        self.check_voxel(voxel)?;

        if !coefficients.is_valid() {
            return Err(FieldError::InvalidParameter { name: "diffusion", value: coefficients.total() });
        }
        if !(decay.is_finite() && decay >= 0.) {
            return Err(FieldError::InvalidParameter { name: "decay", value: decay });
        }

        self.coefficients[voxel] = coefficients;
        self.decay[voxel] = decay;

        Ok(())
    }

    /// Diffusion rates of a voxel
    pub fn coefficients(&self, voxel: VoxelId) -> Option<&DiffusionCoefficients> {
        self.coefficients.get(voxel)
    }

    /// Decay constant of a voxel (1/ms)
    pub fn decay(&self, voxel: VoxelId) -> Option<f64> {
        self.decay.get(voxel).copied()
    }

    /// Installs the production term of a voxel
    pub fn set_production(&mut self, voxel: VoxelId, schedule: ProductionSchedule) -> Result<(), FieldError> {
        self.check_voxel(voxel)?;

        self.production[voxel] = schedule;

        Ok(())
    }

    /// Production schedule of a voxel
    pub fn production(&self, voxel: VoxelId) -> Option<&ProductionSchedule> {
        self.production.get(voxel)
    }

    /// Sets the concentration a voxel starts from (nM), also restored by [`VoxelField::reset`]
    pub fn set_initial_concentration(&mut self, voxel: VoxelId, value: f64) -> Result<(), FieldError> {
        self.check_unlocked()?;
        self.check_voxel(voxel)?;

        if !value.is_finite() {
            return Err(FieldError::InvalidParameter { name: "initial_concentration", value });
        }

        self.initial[voxel] = value;
        self.concentration[voxel] = value;

        Ok(())
    }

    /// Concentration of a voxel (nM)
    pub fn concentration(&self, voxel: VoxelId) -> Option<f64> {
        self.concentration.get(voxel).copied()
    }

    /// Every concentration in canonical order
    pub fn concentrations(&self) -> &[f64] {
        &self.concentration
    }

    /// Sum of all concentrations
    pub fn total_amount(&self) -> f64 {
        self.concentration.iter().sum()
    }

    /// Largest step for which forward Euler stays bounded, `1 / max_i(Σ D_i + λ_i)`,
    /// infinite when all rates are zero
    pub fn max_stable_dt(&self) -> f64 {
        let max_rate = self.coefficients.iter()
            .zip(self.decay.iter())
            .map(|(coefficients, decay)| coefficients.total() + decay)
            .fold(0., f64::max);

        if max_rate > 0. {
            1. / max_rate
        } else {
            f64::INFINITY
        }
    }

    /// Whether the configured step satisfies the stability bound
    pub fn is_stable(&self) -> bool {
        self.dt < self.max_stable_dt()
    }

    /// Restores initial concentrations, rewinds time to zero, unlocks parameters and
    /// drops pending spike production
    pub fn reset(&mut self) {
        self.concentration.copy_from_slice(&self.initial);
        self.time = 0.;
        self.started = false;
        self.spike_source.clear();
    }

    fn step(&mut self, h: f64) {
        let t = self.time;

        for (value, schedule) in self.production_buffer.iter_mut().zip(self.production.iter()) {
            *value = schedule.rate_at(t);
        }
        self.spike_source.accumulate(t, &mut self.production_buffer);

        let VoxelField {
            concentration, neighbors, coefficients, decay, production_buffer, derivative, ..
        } = self;
        let state: &[f64] = concentration;
        let neighbors: &[[VoxelId; 6]] = neighbors;
        let coefficients: &[DiffusionCoefficients] = coefficients;
        let decay: &[f64] = decay;
        let production_buffer: &[f64] = production_buffer;

        derivative.par_iter_mut()
            .enumerate()
            .for_each(|(i, change)| {
                let c = state[i];
                let links = &neighbors[i];
                let rates = &coefficients[i];

                let exchange: f64 = Direction::ALL.iter()
                    .map(|direction| rates.get(*direction) * (state[links[direction.slot()]] - c))
                    .sum();

                *change = exchange - decay[i] * c + production_buffer[i];
            });

        concentration.par_iter_mut()
            .zip(derivative.par_iter())
            .for_each(|(c, change)| *c += h * change);

        self.time = t + h;
    }

    fn integrate_observed<F: FnMut(f64, &[f64])>(&mut self, from: f64, to: f64, mut observe: F) -> Result<(), FieldError> {
        if !(from.is_finite() && to.is_finite()) || to < from {
            return Err(FieldError::InvalidInterval { from, to });
        }

        if !self.started && !self.is_stable() {
            warn!(
                dt = self.dt, max_stable_dt = self.max_stable_dt(),
                "integration step exceeds the explicit stability bound, concentrations may diverge"
            );
        }
        self.started = true;

        let steps = ((to - from) / self.dt - 1e-9).ceil().max(0.) as usize;

        trace!(from, to, steps, "integrating field");

        for k in 0..steps {
            let start = from + k as f64 * self.dt;
            let end = if k + 1 == steps { to } else { from + (k + 1) as f64 * self.dt };

            self.time = start;
            self.step(end - start);

            observe(self.time, &self.concentration);
        }

        self.time = to;

        Ok(())
    }

    /// Advances every voxel from `from` to `to` (ms) in steps of `dt`, the final step
    /// is shortened to land exactly on `to`
    pub fn integrate(&mut self, from: f64, to: f64) -> Result<(), FieldError> {
        self.integrate_observed(from, to, |_, _| {})
    }

    /// Advances the field from its current time to `to` (ms)
    pub fn advance_to(&mut self, to: f64) -> Result<(), FieldError> {
        self.integrate(self.time, to)
    }

    /// Same as [`VoxelField::integrate`] while handing the state after every step to
    /// `history`
    pub fn integrate_with_history<H: FieldHistory>(
        &mut self,
        from: f64,
        to: f64,
        history: &mut H,
    ) -> Result<(), FieldError> {
        self.integrate_observed(from, to, |t, state| history.update(t, state))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_field_is_isolated() {
        let field = VoxelField::new((2, 2, 1), 0.1).unwrap();

        for voxel in 0..field.len() {
            for direction in Direction::ALL {
                assert_eq!(field.neighbor(voxel, direction), Some(voxel));
            }
        }
        assert_eq!(field.total_amount(), 0.);
    }

    #[test]
    fn test_parameters_lock_after_start() {
        let mut field = VoxelField::new((1, 1, 1), 0.1).unwrap();
        field.set_coefficients(0, DiffusionCoefficients::uniform(0.), 0.1).unwrap();
        field.integrate(0., 1.).unwrap();

        assert_eq!(
            field.set_coefficients(0, DiffusionCoefficients::uniform(0.), 0.2),
            Err(FieldError::ParametersLocked),
        );
        assert_eq!(field.link(0, Direction::XPos, 0), Err(FieldError::ParametersLocked));
        assert!(field.set_production(0, ProductionSchedule::Constant(1.)).is_ok());

        field.reset();
        assert!(field.set_coefficients(0, DiffusionCoefficients::uniform(0.), 0.2).is_ok());
    }

    #[test]
    fn test_integration_lands_on_end_time() {
        let mut field = VoxelField::new((1, 1, 1), 0.3).unwrap();
        field.set_production(0, ProductionSchedule::Constant(1.)).unwrap();
        field.integrate(0., 1.).unwrap();

        assert_eq!(field.time(), 1.);
        assert!((field.concentration(0).unwrap() - 1.).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(VoxelField::new((1, 1, 1), 0.).is_err());

        let mut field = VoxelField::new((2, 1, 1), 0.1).unwrap();
        assert!(field.set_coefficients(0, DiffusionCoefficients::uniform(-1.), 0.).is_err());
        assert!(field.set_coefficients(0, DiffusionCoefficients::uniform(1.), f64::NAN).is_err());
        assert!(field.link(0, Direction::XPos, 2).is_err());
        assert!(field.integrate(1., 0.).is_err());
    }

    #[test]
    fn test_stability_bound() {
        let mut field = VoxelField::new((1, 1, 1), 0.5).unwrap();
        assert!(field.is_stable());

        field.set_coefficients(0, DiffusionCoefficients::uniform(1.), 1.).unwrap();
        assert!((field.max_stable_dt() - 1. / 7.).abs() < 1e-12);
        assert!(!field.is_stable());
    }
}
