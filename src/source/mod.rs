//! Activity-dependent production, spikes of cells add alpha shaped pulses of
//! production to the voxel holding their soma.

use serde::{Deserialize, Serialize};
use crate::field::VoxelId;


/// Alpha function kernel `amplitude * a * exp(1 - a)` with `a = (t - t_spike) / tau`,
/// peaks at `amplitude` one `tau` after the spike and is cut off at `a = cutoff`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlphaKernel {
    /// Time constant (ms)
    pub tau: f64,
    /// Peak production rate (nM/ms)
    pub amplitude: f64,
    /// Kernel length in units of `tau`
    pub cutoff: f64,
}

impl Default for AlphaKernel {
    fn default() -> Self {
        AlphaKernel {
            tau: 15.,
            amplitude: 5e-5,
            cutoff: 10.,
        }
    }
}

impl AlphaKernel {
    /// Production contributed at `elapsed` ms after a spike, zero outside `[0, cutoff)`
    pub fn value(&self, elapsed: f64) -> f64 {
        let a = elapsed / self.tau;

        if (0. ..self.cutoff).contains(&a) {
            self.amplitude * a * (1. - a).exp()
        } else {
            0.
        }
    }

    /// Whether a spike at `elapsed` ms in the past no longer contributes
    pub fn is_expired(&self, elapsed: f64) -> bool {
        elapsed / self.tau >= self.cutoff
    }
}

/// Tracks spikes that still produce into their voxel
#[derive(Debug, Clone, Default)]
pub struct SpikeDrivenSource {
    /// Pulse shape applied to every spike
    pub kernel: AlphaKernel,
    active: Vec<(VoxelId, f64)>,
}

impl SpikeDrivenSource {
    /// Creates an empty source with the given kernel
    pub fn new(kernel: AlphaKernel) -> Self {
        SpikeDrivenSource { kernel, active: Vec::new() }
    }

    /// Registers a spike at time `t` (ms) of a cell whose soma lies in `voxel`
    pub fn record_spike(&mut self, voxel: VoxelId, t: f64) {
        self.active.push((voxel, t));
    }

    /// Spikes still contributing production
    pub fn active_spikes(&self) -> &[(VoxelId, f64)] {
        &self.active
    }

    /// Whether no spike is contributing
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Drops every pending spike
    pub fn clear(&mut self) {
        self.active.clear();
    }

    /// Adds the production of every active spike at time `t` into `production`
    /// (indexed by voxel id) and forgets spikes whose pulse has ended
    pub fn accumulate(&mut self, t: f64, production: &mut [f64]) {
        let kernel = self.kernel;

        self.active.retain(|(_, spike_time)| !kernel.is_expired(t - spike_time));

        for (voxel, spike_time) in self.active.iter() {
            if let Some(value) = production.get_mut(*voxel) {
                *value += kernel.value(t - spike_time);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_alpha_peak_at_tau() {
        let kernel = AlphaKernel { tau: 10., amplitude: 2., cutoff: 10. };

        assert!((kernel.value(10.) - 2.).abs() < 1e-12);
        assert!(kernel.value(5.) < 2.);
        assert!(kernel.value(20.) < 2.);
        assert_eq!(kernel.value(-1.), 0.);
        assert_eq!(kernel.value(100.), 0.);
    }

    #[test]
    fn test_expired_spikes_are_pruned() {
        let mut source = SpikeDrivenSource::new(AlphaKernel { tau: 1., amplitude: 1., cutoff: 10. });
        source.record_spike(0, 0.);
        source.record_spike(1, 5.);

        let mut production = vec![0.; 2];
        source.accumulate(12., &mut production);

        assert_eq!(source.active_spikes().len(), 1);
        assert_eq!(production[0], 0.);
        assert!(production[1] > 0.);
    }
}
