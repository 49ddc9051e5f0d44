//! Interfaces to the already-built network, the field-aware synaptic mechanisms,
//! and the selection of synapses that get bound to voxels.
//!
//! The network is consumed as a list of local cells, each with a position and its
//! incoming connections. A connection's mechanism is addressed by a
//! [`SynapseHandle`] (cell slot, connection slot) so bindings never hold references
//! into the network.

use std::collections::{BinaryHeap, HashSet};
use std::cmp::Ordering;
use serde::{Deserialize, Serialize};
use crate::error::{SpatialError, SyncError};
use crate::field::VoxelId;
use crate::lattice::Position;
use crate::spatial::{SpatialIndexMapper, VoxelBinding};


/// Mechanism that reads a local field value (nM)
pub trait FieldModulated {
    /// Overwrites the local field value
    fn set_local_field(&mut self, value: f64);
    /// Gets the local field value
    fn get_local_field(&self) -> f64;
}

/// Mechanism that accepts programmatic events without a presynaptic source
pub trait EventInjector {
    /// Schedules an event to be delivered at `time` (ms), times may arrive in any order
    fn inject_event(&mut self, time: f64);
}

/// Postsynaptic point process that can be bound to the field
pub trait Mechanism: FieldModulated + EventInjector + Send {
    /// Integrates the mechanism up to `time` (ms)
    fn advance_to(&mut self, _time: f64) {}
    /// Sets how strongly the local field scales event amplitude, mechanisms without
    /// amplitude modulation ignore it
    fn set_amplitude_gain(&mut self, _gain: f64) {}
}

/// Incoming connection of a local cell
#[derive(Debug, Clone)]
pub struct Connection<M> {
    /// Labels of the synaptic mechanisms on the connection
    pub mechanisms: Vec<String>,
    /// Population of the presynaptic cell when known
    pub presynaptic_population: Option<String>,
    /// Instantiated mechanism, `None` when the connection has no point process
    pub mechanism: Option<M>,
}

/// Cell owned by this process
#[derive(Debug, Clone)]
pub struct CellRecord<M> {
    /// Stable global identifier
    pub id: usize,
    /// Population label
    pub population: String,
    /// Soma position (µm)
    pub position: Position,
    /// Incoming connections
    pub connections: Vec<Connection<M>>,
}

/// Address of a mechanism inside a [`LocalNetwork`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SynapseHandle {
    /// Slot of the cell in the local cell list
    pub cell: usize,
    /// Slot of the connection in the cell's connection list
    pub connection: usize,
}

/// Partition of the network owned by one process
pub trait LocalNetwork {
    /// Mechanism type of the bound synapses
    type M: Mechanism;
    /// Local cells
    fn cells(&self) -> &[CellRecord<Self::M>];
    /// Mechanism behind a handle
    fn mechanism_mut(&mut self, handle: SynapseHandle) -> Option<&mut Self::M>;
    /// Integrates the local network (cells and mechanisms) up to `time` (ms)
    fn advance_to(&mut self, time: f64);
}

/// Plain list of local cells implementing [`LocalNetwork`], advancing the network
/// advances every mechanism
#[derive(Debug, Clone)]
pub struct LocalPopulation<M: Mechanism> {
    /// Local cells
    pub cells: Vec<CellRecord<M>>,
}

impl<M: Mechanism> Default for LocalPopulation<M> {
    fn default() -> Self {
        LocalPopulation { cells: Vec::new() }
    }
}

impl<M: Mechanism> LocalNetwork for LocalPopulation<M> {
    type M = M;

    fn cells(&self) -> &[CellRecord<M>] {
        &self.cells
    }

    fn mechanism_mut(&mut self, handle: SynapseHandle) -> Option<&mut M> {
        self.cells.get_mut(handle.cell)?
            .connections.get_mut(handle.connection)?
            .mechanism.as_mut()
    }

    fn advance_to(&mut self, time: f64) {
        self.cells.iter_mut()
            .flat_map(|cell| cell.connections.iter_mut())
            .filter_map(|connection| connection.mechanism.as_mut())
            .for_each(|mechanism| mechanism.advance_to(time));
    }
}

/// Chooses which connections are bound to the field, an empty population set
/// accepts every population
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSelector {
    /// Mechanism labels to bind
    pub mechanisms: HashSet<String>,
    /// Accepted postsynaptic populations
    pub postsynaptic_populations: HashSet<String>,
    /// Accepted presynaptic populations
    pub presynaptic_populations: HashSet<String>,
    /// Zeroes the amplitude gain of every bound mechanism so the field acts only
    /// through event frequency
    pub neutralize_amplitude: bool,
}

impl Default for TargetSelector {
    fn default() -> Self {
        TargetSelector {
            mechanisms: HashSet::new(),
            postsynaptic_populations: HashSet::new(),
            presynaptic_populations: HashSet::new(),
            neutralize_amplitude: true,
        }
    }
}

impl TargetSelector {
    /// Selects connections carrying any of the given mechanism labels
    pub fn with_mechanisms<I: IntoIterator<Item = S>, S: Into<String>>(mechanisms: I) -> Self {
        TargetSelector {
            mechanisms: mechanisms.into_iter().map(Into::into).collect(),
            ..TargetSelector::default()
        }
    }

    fn accepts_cell<M>(&self, cell: &CellRecord<M>) -> bool {
        self.postsynaptic_populations.is_empty() || self.postsynaptic_populations.contains(&cell.population)
    }

    fn accepts_connection<M>(&self, connection: &Connection<M>) -> bool {
        let mechanism_matches = connection.mechanisms.iter().any(|i| self.mechanisms.contains(i));
        let presynaptic_matches = self.presynaptic_populations.is_empty() || connection.presynaptic_population
            .as_ref()
            .is_some_and(|i| self.presynaptic_populations.contains(i));

        mechanism_matches && presynaptic_matches && connection.mechanism.is_some()
    }
}

/// A bound synapse, the mechanism behind `handle` reads the field at `binding`
#[derive(Debug, Clone, PartialEq)]
pub struct SynapseTarget {
    /// Identifier of the postsynaptic cell
    pub cell_id: usize,
    /// Position the binding was computed from (soma of the postsynaptic cell)
    pub position: Position,
    /// Voxels read by the synapse, fixed for the run
    pub binding: VoxelBinding,
    /// Address of the mechanism
    pub handle: SynapseHandle,
}

/// Every bound synapse of the local network
#[derive(Debug, Clone, Default)]
pub struct SynapseTargets {
    targets: Vec<SynapseTarget>,
}

impl SynapseTargets {
    /// Binds every selected connection of the local network, synapses are anchored
    /// at the soma of their postsynaptic cell
    ///
    /// When the selector asks for it the amplitude gain of every bound mechanism is
    /// set to zero
    pub fn collect<N: LocalNetwork>(
        network: &mut N,
        selector: &TargetSelector,
        mapper: &SpatialIndexMapper,
    ) -> Result<Self, SpatialError> {
        let mut targets = Vec::new();

        for (cell_slot, cell) in network.cells().iter().enumerate() {
            if !selector.accepts_cell(cell) {
                continue;
            }

            let binding = mapper.bind(cell.position)?;

            for (connection_slot, connection) in cell.connections.iter().enumerate() {
                if !selector.accepts_connection(connection) {
                    continue;
                }

                targets.push(SynapseTarget {
                    cell_id: cell.id,
                    position: cell.position,
                    binding: binding.clone(),
                    handle: SynapseHandle { cell: cell_slot, connection: connection_slot },
                });
            }
        }

        if selector.neutralize_amplitude {
            for target in targets.iter() {
                if let Some(mechanism) = network.mechanism_mut(target.handle) {
                    mechanism.set_amplitude_gain(0.);
                }
            }
        }

        Ok(SynapseTargets { targets })
    }

    /// Wraps an explicit list of targets
    pub fn from_targets(targets: Vec<SynapseTarget>) -> Self {
        SynapseTargets { targets }
    }

    /// Bound synapses in binding order
    pub fn targets(&self) -> &[SynapseTarget] {
        &self.targets
    }

    /// Number of bound synapses
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no synapse is bound
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Errors if a binding reads outside a field of `len` voxels
    pub fn validate(&self, len: usize) -> Result<(), SyncError> {
        match self.targets.iter().map(|target| target.binding.max_voxel()).find(|voxel| *voxel >= len) {
            Some(voxel) => Err(SyncError::VoxelOutOfRange { voxel, len }),
            None => Ok(()),
        }
    }

    /// Pushes the field value at every binding into its mechanism
    pub fn apply<N: LocalNetwork>(&self, values: &[f64], network: &mut N) -> Result<(), SyncError> {
        for target in self.targets.iter() {
            let value = target.binding.sample(values)
                .ok_or(SyncError::VoxelOutOfRange { voxel: target.binding.max_voxel(), len: values.len() })?;
            let mechanism = network.mechanism_mut(target.handle)
                .ok_or(SyncError::TargetNotFound { cell: target.handle.cell, connection: target.handle.connection })?;

            mechanism.set_local_field(value);
        }

        Ok(())
    }

    /// Voxels read by the targets (primary voxel of each binding)
    pub fn voxels(&self) -> Vec<VoxelId> {
        self.targets.iter().map(|target| target.binding.primary_voxel()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingEvent(f64);

impl Eq for PendingEvent {}

impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// reversed so the heap pops the earliest event first
impl Ord for PendingEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.total_cmp(&self.0)
    }
}

/// GABAergic double exponential synapse whose amplitude is scaled by the local
/// nitric oxide concentration
///
/// Conductance is `gmax_base * (1 + alpha * NO / (k + NO)) * (B - A)` (µS) where `A`
/// and `B` decay with `tau1` and `tau2` and jump by the normalized event weight on
/// every event, setting `alpha` to `0.` removes amplitude modulation so the field only
/// acts through event frequency
#[derive(Debug, Clone)]
pub struct ModulatedExp2Synapse {
    /// Rise time constant (ms)
    pub tau1: f64,
    /// Decay time constant (ms)
    pub tau2: f64,
    /// Reversal potential (mV)
    pub e: f64,
    /// Conductance of a unit event without modulation (µS)
    pub gmax_base: f64,
    /// Modulation gain
    pub alpha: f64,
    /// Half-saturation concentration of the modulation (nM)
    pub k: f64,
    /// Weight of every injected event
    pub weight: f64,
    /// Integration step (ms)
    pub dt: f64,
    /// Local nitric oxide concentration (nM)
    pub no_local: f64,
    /// Rise state
    pub a: f64,
    /// Decay state
    pub b: f64,
    /// Time the synapse has been integrated to (ms)
    pub time: f64,
    /// Number of delivered events
    pub delivered: usize,
    pending: BinaryHeap<PendingEvent>,
}

impl Default for ModulatedExp2Synapse {
    fn default() -> Self {
        ModulatedExp2Synapse {
            tau1: 0.07,
            tau2: 18.2,
            e: -80.,
            gmax_base: 1e-3,
            alpha: 2e-3,
            k: 100.,
            weight: 1.,
            dt: 0.05,
            no_local: 0.,
            a: 0.,
            b: 0.,
            time: 0.,
            delivered: 0,
            pending: BinaryHeap::new(),
        }
    }
}

impl ModulatedExp2Synapse {
    /// Synapse with default kinetics, every event has `weight` and the state is
    /// integrated with step `dt` (ms)
    pub fn new(weight: f64, dt: f64) -> Self {
        ModulatedExp2Synapse { weight, dt, ..ModulatedExp2Synapse::default() }
    }

    // peak normalization so a unit event reaches a peak of 1 in (B - A)
    fn factor(&self) -> f64 {
        let tau1 = self.tau1.min(self.tau2 * 0.9999);
        let tau2 = self.tau2;
        let tp = (tau1 * tau2) / (tau2 - tau1) * (tau2 / tau1).ln();

        1. / (-(-tp / tau1).exp() + (-tp / tau2).exp())
    }

    /// Amplitude scale from the local field, `1 + alpha * NO / (k + NO)`
    pub fn modulation(&self) -> f64 {
        1. + self.alpha * self.no_local / (self.k + self.no_local)
    }

    /// Current conductance (µS)
    pub fn conductance(&self) -> f64 {
        self.gmax_base * self.modulation() * (self.b - self.a)
    }

    /// Synaptic current at membrane potential `v` (nA)
    pub fn current(&self, v: f64) -> f64 {
        self.conductance() * (v - self.e)
    }

    /// Number of events waiting for delivery
    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    fn deliver_until(&mut self, time: f64) {
        let factor = self.factor();

        while let Some(PendingEvent(event_time)) = self.pending.peek().copied() {
            if event_time > time {
                break;
            }

            self.pending.pop();
            self.a += self.weight * factor;
            self.b += self.weight * factor;
            self.delivered += 1;
        }
    }
}

impl FieldModulated for ModulatedExp2Synapse {
    fn set_local_field(&mut self, value: f64) {
        self.no_local = value;
    }

    fn get_local_field(&self) -> f64 {
        self.no_local
    }
}

impl EventInjector for ModulatedExp2Synapse {
    fn inject_event(&mut self, time: f64) {
        self.pending.push(PendingEvent(time));
    }
}

impl Mechanism for ModulatedExp2Synapse {
    fn advance_to(&mut self, time: f64) {
        while self.time < time - 1e-12 {
            let h = self.dt.min(time - self.time);

            self.deliver_until(self.time);
            self.a *= (-h / self.tau1).exp();
            self.b *= (-h / self.tau2).exp();
            self.time += h;
        }

        self.time = self.time.max(time);
        self.deliver_until(self.time);
    }

    fn set_amplitude_gain(&mut self, gain: f64) {
        self.alpha = gain;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lattice::GridGeometry;
    use crate::spatial::Interpolation;

    fn connection(label: &str, pre: &str) -> Connection<ModulatedExp2Synapse> {
        Connection {
            mechanisms: vec![label.to_string()],
            presynaptic_population: Some(pre.to_string()),
            mechanism: Some(ModulatedExp2Synapse::default()),
        }
    }

    #[test]
    fn test_selection_filters() {
        let mut network = LocalPopulation {
            cells: vec![
                CellRecord {
                    id: 7,
                    population: String::from("TC"),
                    position: (12., 0., 0.),
                    connections: vec![connection("GABAA_NO", "IRE"), connection("AMPA", "IRE"), connection("GABAA_NO", "TC")],
                },
                CellRecord {
                    id: 8,
                    population: String::from("IRE"),
                    position: (0., 0., 0.),
                    connections: vec![connection("GABAA_NO", "IRE")],
                },
            ],
        };
        let selector = TargetSelector {
            mechanisms: HashSet::from([String::from("GABAA_NO")]),
            postsynaptic_populations: HashSet::from([String::from("TC")]),
            presynaptic_populations: HashSet::from([String::from("IRE")]),
            neutralize_amplitude: false,
        };
        let mapper = SpatialIndexMapper::new(GridGeometry::new((3, 1, 1), 11., (0., 0., 0.)).unwrap(), Interpolation::Nearest);

        let targets = SynapseTargets::collect(&mut network, &selector, &mapper).unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets.targets()[0].cell_id, 7);
        assert_eq!(targets.targets()[0].handle, SynapseHandle { cell: 0, connection: 0 });
        assert_eq!(targets.voxels(), vec![1]);
        assert!(targets.validate(3).is_ok());
        assert!(targets.validate(1).is_err());
    }

    #[test]
    fn test_bound_synapses_lose_amplitude_gain() {
        let cells = || vec![CellRecord {
            id: 3,
            population: String::from("TC"),
            position: (0., 0., 0.),
            connections: vec![connection("GABAA_NO", "IRE"), connection("AMPA", "IRE")],
        }];
        let mapper = SpatialIndexMapper::new(GridGeometry::new((1, 1, 1), 11., (0., 0., 0.)).unwrap(), Interpolation::Nearest);
        let alphas = |network: &LocalPopulation<ModulatedExp2Synapse>| {
            network.cells[0].connections.iter()
                .map(|connection| connection.mechanism.as_ref().map_or(f64::NAN, |synapse| synapse.alpha))
                .collect::<Vec<f64>>()
        };

        let mut network = LocalPopulation { cells: cells() };
        let selector = TargetSelector::with_mechanisms(["GABAA_NO"]);
        assert!(selector.neutralize_amplitude);

        let targets = SynapseTargets::collect(&mut network, &selector, &mapper).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(alphas(&network), vec![0., 2e-3]);

        let mut untouched = LocalPopulation { cells: cells() };
        let selector = TargetSelector { neutralize_amplitude: false, ..selector };
        SynapseTargets::collect(&mut untouched, &selector, &mapper).unwrap();
        assert_eq!(alphas(&untouched), vec![2e-3, 2e-3]);
    }

    #[test]
    fn test_selector_defaults_from_json() {
        let selector: TargetSelector = serde_json::from_str(r#"{"mechanisms": ["GABAA_NO"]}"#).unwrap();

        assert!(selector.neutralize_amplitude);
        assert!(selector.mechanisms.contains("GABAA_NO"));
        assert!(selector.presynaptic_populations.is_empty());
    }

    #[test]
    fn test_out_of_order_events_are_delivered() {
        let mut synapse = ModulatedExp2Synapse { alpha: 0., ..ModulatedExp2Synapse::default() };
        synapse.inject_event(3.);
        synapse.inject_event(1.);
        synapse.inject_event(10.);

        synapse.advance_to(5.);
        assert_eq!(synapse.delivered, 2);
        assert_eq!(synapse.pending_events(), 1);
        assert!(synapse.conductance() > 0.);

        synapse.advance_to(20.);
        assert_eq!(synapse.delivered, 3);
    }

    #[test]
    fn test_weighted_events_scale_conductance() {
        let mut unit = ModulatedExp2Synapse::new(1., 0.05);
        let mut double = ModulatedExp2Synapse::new(2., 0.05);
        assert_eq!(double.alpha, ModulatedExp2Synapse::default().alpha);

        for synapse in [&mut unit, &mut double] {
            synapse.inject_event(0.);
            synapse.advance_to(5.);
        }

        assert!((double.conductance() - 2. * unit.conductance()).abs() < 1e-15);
    }

    #[test]
    fn test_modulation_saturates() {
        let mut synapse = ModulatedExp2Synapse { alpha: 1., k: 100., ..ModulatedExp2Synapse::default() };

        assert_eq!(synapse.modulation(), 1.);
        synapse.set_local_field(100.);
        assert_eq!(synapse.modulation(), 1.5);
        synapse.set_local_field(1e12);
        assert!(synapse.modulation() < 2.);
    }
}
