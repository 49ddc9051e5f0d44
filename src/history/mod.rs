//! Recording of field state over time and the analyses run on the recordings,
//! time to peak concentration by distance and peak concentration relative to the
//! global peak.

use crate::field::VoxelId;


/// Handles history of a voxel field
pub trait FieldHistory {
    /// Stores the state of the field at time `t` (ms), `state` is in canonical order
    fn update(&mut self, t: f64, state: &[f64]);
    /// Resets history
    fn reset(&mut self);
}

/// Stores concentration traces of selected voxels, sampled every `record_every` steps
#[derive(Debug, Clone)]
pub struct VoxelTraceHistory {
    /// Voxels being recorded
    pub voxels: Vec<VoxelId>,
    /// Sample times (ms)
    pub times: Vec<f64>,
    /// One trace per recorded voxel, aligned with `times`
    pub traces: Vec<Vec<f64>>,
    /// Number of integration steps between samples
    pub record_every: usize,
    counter: usize,
}

impl Default for VoxelTraceHistory {
    fn default() -> Self {
        VoxelTraceHistory {
            voxels: Vec::new(),
            times: Vec::new(),
            traces: Vec::new(),
            record_every: 1,
            counter: 0,
        }
    }
}

impl VoxelTraceHistory {
    /// Records the given voxels at every step
    pub fn new(voxels: Vec<VoxelId>) -> Self {
        let traces = vec![Vec::new(); voxels.len()];

        VoxelTraceHistory { voxels, traces, ..VoxelTraceHistory::default() }
    }

    /// Records the given voxels every `record_every` steps
    pub fn every(voxels: Vec<VoxelId>, record_every: usize) -> Self {
        VoxelTraceHistory { record_every: record_every.max(1), ..VoxelTraceHistory::new(voxels) }
    }

    /// Trace of a recorded voxel
    pub fn trace(&self, voxel: VoxelId) -> Option<&[f64]> {
        self.voxels.iter()
            .position(|i| *i == voxel)
            .map(|position| self.traces[position].as_slice())
    }

    /// Time and value of the largest recorded concentration of a voxel, the earliest
    /// sample wins ties
    pub fn peak(&self, voxel: VoxelId) -> Option<(f64, f64)> {
        let trace = self.trace(voxel)?;

        trace.iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, value)| match best {
                Some((_, best_value)) if *value <= best_value => best,
                _ => Some((i, *value)),
            })
            .map(|(i, value)| (self.times[i], value))
    }

    /// Time of the largest recorded concentration of a voxel (ms)
    pub fn peak_time(&self, voxel: VoxelId) -> Option<f64> {
        self.peak(voxel).map(|(t, _)| t)
    }

    /// Peak of every recorded voxel divided by the largest peak across voxels
    pub fn normalized_peaks(&self) -> Vec<f64> {
        let peaks = self.voxels.iter()
            .map(|voxel| self.peak(*voxel).map(|(_, value)| value).unwrap_or(0.))
            .collect::<Vec<f64>>();
        let global = peaks.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        if global > 0. {
            peaks.iter().map(|i| i / global).collect()
        } else {
            vec![0.; peaks.len()]
        }
    }
}

impl FieldHistory for VoxelTraceHistory {
    fn update(&mut self, t: f64, state: &[f64]) {
        self.counter += 1;
        if self.counter % self.record_every != 0 {
            return;
        }

        self.times.push(t);
        for (trace, voxel) in self.traces.iter_mut().zip(self.voxels.iter()) {
            trace.push(state.get(*voxel).copied().unwrap_or(f64::NAN));
        }
    }

    fn reset(&mut self) {
        self.times.clear();
        self.traces.iter_mut().for_each(|i| i.clear());
        self.counter = 0;
    }
}

/// Stores the total amount (sum of all concentrations) after every step
#[derive(Debug, Clone, Default)]
pub struct TotalAmountHistory {
    /// Sample times (ms)
    pub times: Vec<f64>,
    /// Total amount at each sample
    pub history: Vec<f64>,
}

impl TotalAmountHistory {
    /// Largest absolute deviation from the first recorded total
    pub fn max_drift(&self) -> f64 {
        match self.history.first() {
            Some(first) => self.history.iter().map(|i| (i - first).abs()).fold(0., f64::max),
            None => 0.,
        }
    }
}

impl FieldHistory for TotalAmountHistory {
    fn update(&mut self, t: f64, state: &[f64]) {
        self.times.push(t);
        self.history.push(state.iter().sum());
    }

    fn reset(&mut self) {
        self.times.clear();
        self.history.clear();
    }
}
