//! Window-based coupling of the field to a network distributed over several processes.
//!
//! Exactly one process, the authority, owns the [`VoxelField`]. Every window of the
//! run follows the same order on every process:
//!
//! 1. advance the local network and (on the authority) the field to the window end
//! 2. broadcast a [`FieldSnapshot`] of the field from the authority and wait at a barrier
//! 3. push the snapshot values into every bound synapse
//! 4. draw the modulation events of the next window from the same snapshot
//!
//! Before the first window a snapshot of the initial field is exchanged so window `0`
//! is drawn from the state at time zero. Window `k` covers
//! `[k * window, min((k + 1) * window, stop_time))`.
//!
//! Every transport failure is fatal to the run, there is no partial recovery.

use bincode::{Decode, Encode};
use ndarray::{Array2, ArrayView3, Axis};
use tracing::{debug, info};
use crate::error::SyncError;
use crate::field::{VoxelField, VoxelId};
use crate::history::VoxelTraceHistory;
use crate::lattice::GridIndex;
use crate::modulation::StochasticModulationDriver;
use crate::synapse::{LocalNetwork, SynapseTargets};

mod transport;
pub use transport::{ChannelCommunicator, Communicator, SingleProcess};


#[derive(Encode, Decode)]
struct SnapshotFrame {
    time: f64,
    dims: [u64; 3],
    values: Vec<f64>,
}

/// Read-only copy of every concentration at one instant, in canonical voxel order
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSnapshot {
    /// Time of the snapshot (ms)
    pub time: f64,
    dims: GridIndex,
    values: Vec<f64>,
}

impl FieldSnapshot {
    /// Copies the current state of a field
    pub fn from_field(field: &VoxelField) -> Self {
        FieldSnapshot { time: field.time(), dims: field.dims(), values: field.concentrations().to_vec() }
    }

    /// Creates a snapshot from explicit values, errors if their number does not match `dims`
    pub fn new(time: f64, dims: GridIndex, values: Vec<f64>) -> Result<Self, SyncError> {
        let expected = dims.0 * dims.1 * dims.2;
        if values.len() != expected {
            return Err(SyncError::SnapshotMismatch { expected, received: values.len() });
        }

        Ok(FieldSnapshot { time, dims, values })
    }

    /// Lattice dimensions `(nx, ny, nz)`
    pub fn dims(&self) -> GridIndex {
        self.dims
    }

    /// Concentrations in canonical order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Concentration of a voxel
    pub fn get(&self, voxel: VoxelId) -> Option<f64> {
        self.values.get(voxel).copied()
    }

    /// Number of voxels
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot has no voxels
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Three dimensional view indexed `[z, y, x]`
    pub fn as_array(&self) -> Result<ArrayView3<f64>, SyncError> {
        let (nx, ny, nz) = self.dims;

        ArrayView3::from_shape((nz, ny, nx), &self.values)
            .map_err(|_| SyncError::SnapshotMismatch { expected: nx * ny * nz, received: self.values.len() })
    }

    /// Plane at height `iz` indexed `[y, x]`
    pub fn plane_z(&self, iz: usize) -> Option<Array2<f64>> {
        if iz >= self.dims.2 {
            return None;
        }

        self.as_array().ok().map(|array| array.index_axis(Axis(0), iz).to_owned())
    }

    /// Encodes the snapshot, values are carried bit for bit
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        let frame = SnapshotFrame {
            time: self.time,
            dims: [self.dims.0 as u64, self.dims.1 as u64, self.dims.2 as u64],
            values: self.values.clone(),
        };

        bincode::encode_to_vec(&frame, bincode::config::standard())
            .map_err(|e| SyncError::Encode(e.to_string()))
    }

    /// Decodes a snapshot produced by [`FieldSnapshot::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        let (frame, _): (SnapshotFrame, usize) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        let dims = (frame.dims[0] as usize, frame.dims[1] as usize, frame.dims[2] as usize);

        FieldSnapshot::new(frame.time, dims, frame.values)
    }
}

/// Stage of the synchronization cycle a process is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// Between windows
    #[default]
    Idle,
    /// Integrating the network and field to the window end
    Advancing,
    /// Inside the collective snapshot exchange
    Exchanging,
    /// Pushing snapshot values into synapses and drawing events
    Updating,
}

/// Outcome of a completed run on one process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Number of windows advanced
    pub windows: usize,
    /// Number of modulation events injected on this process
    pub events: usize,
    /// Time the run ended at (ms)
    pub final_time: f64,
}

/// Drives the advance, exchange, update cycle on one process
///
/// Every process of a group must create a synchronizer with the same authority, window
/// and stop time and call the same methods in the same order, otherwise the collective
/// exchange stalls.
#[derive(Debug)]
pub struct FieldSynchronizer<C: Communicator> {
    communicator: C,
    authority: usize,
    field: Option<VoxelField>,
    history: Option<VoxelTraceHistory>,
    dims: GridIndex,
    window: f64,
    start_time: f64,
    stop_time: f64,
    time: f64,
    phase: SyncPhase,
    windows: usize,
    cached: Option<FieldSnapshot>,
}

impl<C: Communicator> FieldSynchronizer<C> {
    fn with_parts(
        communicator: C,
        authority: usize,
        field: Option<VoxelField>,
        dims: GridIndex,
        window: f64,
        stop_time: f64,
    ) -> Result<Self, SyncError> {
        let (rank, size) = (communicator.rank(), communicator.size());

        if authority >= size {
            return Err(SyncError::InvalidAuthority { authority, size });
        }
        if field.is_some() != (rank == authority) {
            return Err(SyncError::NotAuthority { rank, authority });
        }
        if !(window.is_finite() && window > 0.) {
            return Err(SyncError::InvalidWindow(window));
        }

        let time = field.as_ref().map_or(0., |field| field.time());
        if !(stop_time.is_finite() && stop_time >= time) {
            return Err(SyncError::InvalidStopTime(stop_time));
        }

        Ok(FieldSynchronizer {
            communicator,
            authority,
            field,
            history: None,
            dims,
            window,
            start_time: time,
            stop_time,
            time,
            phase: SyncPhase::Idle,
            windows: 0,
            cached: None,
        })
    }

    /// Synchronizer of the authority process, which takes ownership of the field
    pub fn authority(
        communicator: C,
        authority: usize,
        field: VoxelField,
        window: f64,
        stop_time: f64,
    ) -> Result<Self, SyncError> {
        let dims = field.dims();

        FieldSynchronizer::with_parts(communicator, authority, Some(field), dims, window, stop_time)
    }

    /// Synchronizer of a process that only receives snapshots of a field with `dims`
    pub fn follower(
        communicator: C,
        authority: usize,
        dims: GridIndex,
        window: f64,
        stop_time: f64,
    ) -> Result<Self, SyncError> {
        FieldSynchronizer::with_parts(communicator, authority, None, dims, window, stop_time)
    }

    /// Records the given voxels of the field after every integration step, only has
    /// an effect on the authority
    pub fn record_voxels(&mut self, voxels: Vec<VoxelId>, record_every: usize) {
        if self.field.is_some() {
            self.history = Some(VoxelTraceHistory::every(voxels, record_every));
        }
    }

    /// Recorded traces, if recording was requested on the authority
    pub fn history(&self) -> Option<&VoxelTraceHistory> {
        self.history.as_ref()
    }

    /// Whether this process owns the field
    pub fn is_authority(&self) -> bool {
        self.field.is_some()
    }

    /// Rank of this process
    pub fn rank(&self) -> usize {
        self.communicator.rank()
    }

    /// The field, only present on the authority
    pub fn field(&self) -> Option<&VoxelField> {
        self.field.as_ref()
    }

    /// Mutable field, only present on the authority, used to adjust production
    /// schedules or record spikes between windows
    pub fn field_mut(&mut self) -> Option<&mut VoxelField> {
        self.field.as_mut()
    }

    /// Current phase of the cycle
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Time every process has been advanced to (ms)
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Number of windows advanced so far
    pub fn windows(&self) -> usize {
        self.windows
    }

    /// Whether the stop time has been reached
    pub fn is_finished(&self) -> bool {
        self.time >= self.stop_time
    }

    /// Last snapshot received
    pub fn cached_snapshot(&self) -> Option<&FieldSnapshot> {
        self.cached.as_ref()
    }

    /// Length of the window starting at the current time, shortened at the stop time
    pub fn next_window_length(&self) -> f64 {
        (self.window_end() - self.time).max(0.)
    }

    // end of the current window, `start + (k + 1) * window` capped at the stop time,
    // snapped to it when only rounding error is left
    fn window_end(&self) -> f64 {
        if self.is_finished() {
            return self.stop_time;
        }

        let end = self.start_time + (self.windows + 1) as f64 * self.window;
        if end >= self.stop_time - self.window * 1e-9 {
            self.stop_time
        } else {
            end
        }
    }

    /// Broadcasts a snapshot of the current field from the authority and waits for
    /// every process, returns the snapshot on every process
    pub fn exchange(&mut self) -> Result<FieldSnapshot, SyncError> {
        self.phase = SyncPhase::Exchanging;

        let payload = match self.field.as_ref() {
            Some(field) => Some(FieldSnapshot::from_field(field).to_bytes()?),
            None => None,
        };

        let bytes = self.communicator.broadcast(self.authority, payload)?;
        let received = FieldSnapshot::from_bytes(&bytes).and_then(|snapshot| {
            let expected = self.dims.0 * self.dims.1 * self.dims.2;
            if snapshot.dims() != self.dims {
                return Err(SyncError::SnapshotMismatch { expected, received: snapshot.len() });
            }

            Ok(snapshot)
        });

        // every rank reaches the barrier before a bad frame is reported
        self.communicator.barrier()?;
        let snapshot = received?;

        debug!(rank = self.communicator.rank(), time = snapshot.time, "exchanged field snapshot");

        self.cached = Some(snapshot.clone());
        self.phase = SyncPhase::Idle;

        Ok(snapshot)
    }

    /// Advances the network and the field by one window then exchanges the field
    pub fn advance_and_sync<N: LocalNetwork>(&mut self, network: &mut N) -> Result<FieldSnapshot, SyncError> {
        let next = self.window_end();
        self.phase = SyncPhase::Advancing;

        network.advance_to(next);
        if let Some(field) = self.field.as_mut() {
            match self.history.as_mut() {
                Some(history) => field.integrate_with_history(field.time(), next, history)?,
                None => field.advance_to(next)?,
            }
        }

        self.time = next;
        self.windows += 1;

        self.exchange()
    }

    // pushes snapshot values into synapses and draws the window starting now
    fn update<N: LocalNetwork>(
        &mut self,
        snapshot: &FieldSnapshot,
        network: &mut N,
        targets: &SynapseTargets,
        driver: &mut StochasticModulationDriver,
    ) -> Result<usize, SyncError> {
        self.phase = SyncPhase::Updating;

        targets.apply(snapshot.values(), network)?;

        let window_length = self.next_window_length();
        let injected = if window_length > 0. {
            driver.schedule_window(snapshot.values(), self.time, window_length, network)?
        } else {
            0
        };

        self.phase = SyncPhase::Idle;

        Ok(injected)
    }

    /// Runs every window until the stop time
    pub fn run<N: LocalNetwork>(
        &mut self,
        network: &mut N,
        targets: &SynapseTargets,
        driver: &mut StochasticModulationDriver,
    ) -> Result<RunSummary, SyncError> {
        targets.validate(self.dims.0 * self.dims.1 * self.dims.2)?;

        info!(
            rank = self.communicator.rank(), authority = self.authority, targets = targets.len(),
            window = self.window, stop_time = self.stop_time,
            "starting synchronized run"
        );

        let mut events = 0;

        let snapshot = self.exchange()?;
        events += self.update(&snapshot, network, targets, driver)?;

        while !self.is_finished() {
            let snapshot = self.advance_and_sync(network)?;
            events += self.update(&snapshot, network, targets, driver)?;
        }

        let summary = RunSummary { windows: self.windows, events, final_time: self.time };

        info!(
            rank = self.communicator.rank(), windows = summary.windows, events = summary.events,
            final_time = summary.final_time,
            "finished synchronized run"
        );

        Ok(summary)
    }
}
