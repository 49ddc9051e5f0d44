//! Conversion of the local field into Poisson distributed synaptic events.
//!
//! Every bound synapse owns an [`EventSource`] with a private random stream seeded
//! from the run's base seed, the process rank and the synapse's index on that rank.
//! Once per synchronization window the field value at the synapse is turned into a
//! rate by a saturating [`DoseResponse`], an event count is drawn from a Poisson
//! distribution with mean `rate * window`, and each event gets a uniform offset
//! inside the window.

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{ModulationError, SyncError};
use crate::spatial::VoxelBinding;
use crate::synapse::{EventInjector, LocalNetwork, SynapseHandle, SynapseTargets};


/// Seed offset between consecutive ranks, also the largest number of event sources
/// a single rank may own
pub const RANK_SEED_STRIDE: u64 = 100_000;

/// Seed of the stream of the `index`-th source on `rank`,
/// `base + rank * RANK_SEED_STRIDE + index` (wrapping)
pub fn stream_seed(base: u64, rank: usize, index: usize) -> Result<u64, ModulationError> {
    if index as u64 >= RANK_SEED_STRIDE {
        return Err(ModulationError::SeedStrideExceeded { index, stride: RANK_SEED_STRIDE });
    }

    Ok(base
        .wrapping_add((rank as u64).wrapping_mul(RANK_SEED_STRIDE))
        .wrapping_add(index as u64))
}

/// Saturating map from field concentration (nM) to event rate (Hz),
/// `max(0, baseline + max_increase * value / (half_saturation + value))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoseResponse {
    /// Rate at zero field, `R0` (Hz)
    pub baseline: f64,
    /// Additional rate approached at saturating field, `RMAX` (Hz)
    pub max_increase: f64,
    /// Field value giving half of `max_increase`, `K` (nM)
    pub half_saturation: f64,
}

impl Default for DoseResponse {
    fn default() -> Self {
        DoseResponse {
            baseline: 1.,
            max_increase: 10.,
            half_saturation: 100.,
        }
    }
}

impl DoseResponse {
    /// Errors unless rates are finite and non-negative and the half-saturation is positive
    pub fn validate(&self) -> Result<(), ModulationError> {
        let checks = [
            ("baseline", self.baseline, self.baseline >= 0.),
            ("max_increase", self.max_increase, self.max_increase >= 0.),
            ("half_saturation", self.half_saturation, self.half_saturation > 0.),
        ];

        for (name, value, ok) in checks {
            if !value.is_finite() || !ok {
                return Err(ModulationError::InvalidDoseResponse { name, value });
            }
        }

        Ok(())
    }

    /// Event rate (Hz) at a field value (nM)
    pub fn rate_from_field(&self, value: f64) -> f64 {
        let rate = self.baseline + self.max_increase * (value / (self.half_saturation + value));

        // NaN from a pathological negative field maps to no events
        if rate.is_nan() {
            0.
        } else {
            rate.max(0.)
        }
    }
}

/// Deterministic event generator bound to one synapse
#[derive(Debug, Clone)]
pub struct EventSource {
    /// Synapse receiving the events
    pub handle: SynapseHandle,
    /// Voxels the source reads its field value from
    pub binding: VoxelBinding,
    /// Index of the source on its rank
    pub index: usize,
    seed: u64,
    rng: StdRng,
}

impl EventSource {
    /// Creates a source with the stream of the `index`-th source on `rank`
    pub fn new(
        handle: SynapseHandle,
        binding: VoxelBinding,
        seed_base: u64,
        rank: usize,
        index: usize,
    ) -> Result<Self, ModulationError> {
        let seed = stream_seed(seed_base, rank, index)?;

        Ok(EventSource { handle, binding, index, seed, rng: StdRng::seed_from_u64(seed) })
    }

    /// Seed of the source's stream
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draws the events of the window `[window_start, window_start + window_length)`
    /// (ms) for a field value, returns absolute event times in draw order
    pub fn draw_events(
        &mut self,
        dose_response: &DoseResponse,
        window_start: f64,
        window_length: f64,
        field_value: f64,
    ) -> Result<Vec<f64>, ModulationError> {
        let mean = dose_response.rate_from_field(field_value) * window_length * 1e-3;

        if !mean.is_finite() || mean < 0. {
            return Err(ModulationError::InvalidEventMean(mean));
        }
        if mean == 0. {
            return Ok(Vec::new());
        }

        let poisson = Poisson::new(mean).map_err(|_| ModulationError::InvalidEventMean(mean))?;
        let n = poisson.sample(&mut self.rng) as usize;

        Ok(
            (0..n).map(|_| window_start + self.rng.gen::<f64>() * window_length)
                .collect()
        )
    }
}

/// Event sources of every bound synapse on this rank
#[derive(Debug, Clone)]
pub struct StochasticModulationDriver {
    /// Field to rate mapping shared by every source
    pub dose_response: DoseResponse,
    sources: Vec<EventSource>,
    events_scheduled: usize,
}

impl StochasticModulationDriver {
    /// Creates one source per target, indexed in target order
    pub fn new(
        dose_response: DoseResponse,
        seed_base: u64,
        rank: usize,
        targets: &SynapseTargets,
    ) -> Result<Self, ModulationError> {
        dose_response.validate()?;

        let sources = targets.targets()
            .iter()
            .enumerate()
            .map(|(index, target)| {
                EventSource::new(target.handle, target.binding.clone(), seed_base, rank, index)
            })
            .collect::<Result<Vec<EventSource>, ModulationError>>()?;

        Ok(StochasticModulationDriver { dose_response, sources, events_scheduled: 0 })
    }

    /// Event sources in index order
    pub fn sources(&self) -> &[EventSource] {
        &self.sources
    }

    /// Total number of events injected so far
    pub fn events_scheduled(&self) -> usize {
        self.events_scheduled
    }

    /// Draws the events of one source for a window given its field value and injects
    /// them, returns the injected times
    pub fn schedule_events<E: EventInjector + ?Sized>(
        &mut self,
        source: usize,
        injector: &mut E,
        window_start: f64,
        window_length: f64,
        field_value: f64,
    ) -> Result<Vec<f64>, ModulationError> {
        let dose_response = self.dose_response;
        let len = self.sources.len();
        let event_source = self.sources.get_mut(source)
            .ok_or(ModulationError::SourceNotFound { index: source, len })?;

        let times = event_source.draw_events(&dose_response, window_start, window_length, field_value)?;

        for time in times.iter() {
            injector.inject_event(*time);
        }
        self.events_scheduled += times.len();

        Ok(times)
    }

    /// Draws and injects the events of every source for the window starting at
    /// `window_start`, field values are read from `values` (canonical order),
    /// returns the number of injected events
    pub fn schedule_window<N: LocalNetwork>(
        &mut self,
        values: &[f64],
        window_start: f64,
        window_length: f64,
        network: &mut N,
    ) -> Result<usize, SyncError> {
        let mut injected = 0;

        for source in 0..self.sources.len() {
            let (handle, field_value) = {
                let event_source = &self.sources[source];
                let value = event_source.binding.sample(values).ok_or(SyncError::VoxelOutOfRange {
                    voxel: event_source.binding.max_voxel(),
                    len: values.len(),
                })?;

                (event_source.handle, value)
            };

            let mechanism = network.mechanism_mut(handle)
                .ok_or(SyncError::TargetNotFound { cell: handle.cell, connection: handle.connection })?;

            injected += self.schedule_events(source, mechanism, window_start, window_length, field_value)?
                .len();
        }

        debug!(window_start, window_length, injected, "scheduled modulation events");

        Ok(injected)
    }
}
