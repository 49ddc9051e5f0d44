use std::{env, thread};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use no_diffusion::{
    config::RunConfig,
    error::{NoDiffusionError, SyncError},
    field::{ProductionSchedule, VoxelField, VoxelId},
    lattice::{GridGeometry, LatticeWiring},
    modulation::StochasticModulationDriver,
    synapse::{CellRecord, Connection, LocalPopulation, ModulatedExp2Synapse, SynapseTargets, TargetSelector},
    sync::{ChannelCommunicator, Communicator, FieldSynchronizer, RunSummary},
};


const MECHANISM: &str = "GABAA_NO";
const CELLS_PER_AXIS_STEP: usize = 2;

// peak of each recorded voxel by distance from the center
type Profile = Vec<(f64, f64, f64)>;

// cells placed along the x axis through the center, dealt round robin over ranks
fn local_cells(config: &RunConfig, geometry: &GridGeometry, rank: usize) -> LocalPopulation<ModulatedExp2Synapse> {
    let (cx, cy, cz) = geometry.center_index();
    let (_, y, z) = geometry.position_of((cx, cy, cz));

    let cells = (0..geometry.dims.0 * CELLS_PER_AXIS_STEP)
        .filter(|id| id % config.ranks == rank)
        .map(|id| {
            let x = geometry.origin.0 + id as f64 * geometry.spacing / CELLS_PER_AXIS_STEP as f64;
            let synapse = ModulatedExp2Synapse::new(config.event_weight, config.dt);

            CellRecord {
                id,
                population: String::from("TC"),
                position: (x, y, z),
                connections: vec![Connection {
                    mechanisms: vec![String::from(MECHANISM)],
                    presynaptic_population: Some(String::from("IRE")),
                    mechanism: Some(synapse),
                }],
            }
        })
        .collect();

    LocalPopulation { cells }
}

fn build_field(config: &RunConfig, wiring: &LatticeWiring) -> Result<VoxelField, NoDiffusionError> {
    let mut field = config.build_field(wiring)?;
    let center = wiring.center_voxel()?;

    field.set_initial_concentration(center, 240.)?;
    field.set_production(
        center,
        ProductionSchedule::piecewise_linear(vec![0., 100., 200.], vec![0., 5., 0.])?,
    )?;

    if !field.is_stable() {
        warn!(dt = config.dt, max_stable_dt = field.max_stable_dt(), "configured step is unstable");
    }

    Ok(field)
}

fn run_rank(
    config: &RunConfig,
    geometry: GridGeometry,
    communicator: ChannelCommunicator,
    field: Option<VoxelField>,
    recorded: Vec<VoxelId>,
) -> Result<(RunSummary, Option<Profile>), NoDiffusionError> {
    let rank = communicator.rank();
    let mut network = local_cells(config, &geometry, rank);
    let targets = SynapseTargets::collect(
        &mut network, &TargetSelector::with_mechanisms([MECHANISM]), &config.mapper(geometry),
    )?;
    let mut driver = StochasticModulationDriver::new(config.dose_response, config.seed, rank, &targets)?;

    let mut synchronizer = match field {
        Some(field) => {
            let mut synchronizer = FieldSynchronizer::authority(
                communicator, config.authority, field, config.sync_window, config.duration,
            )?;
            synchronizer.record_voxels(recorded, 1);

            synchronizer
        },
        None => FieldSynchronizer::follower(
            communicator, config.authority, geometry.dims, config.sync_window, config.duration,
        )?,
    };

    let summary = synchronizer.run(&mut network, &targets, &mut driver)?;

    let profile = synchronizer.history().map(|history| {
        let center = history.voxels.first().copied().unwrap_or(0);
        let center_x = geometry.grid_index(center).map_or(0, |index| index.0);
        let normalized = history.normalized_peaks();

        history.voxels.iter()
            .zip(normalized)
            .map(|(voxel, relative)| {
                let ix = geometry.grid_index(*voxel).map_or(center_x, |index| index.0);
                let distance = (ix - center_x) as f64 * geometry.spacing;

                (distance, history.peak_time(*voxel).unwrap_or(0.), relative)
            })
            .collect()
    });

    Ok((summary, profile))
}

fn main() -> Result<(), NoDiffusionError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => RunConfig::from_path(path)?,
        None => {
            info!("no configuration given, using the reference scenario");
            let config = RunConfig::default();
            config.validate()?;

            config
        }
    };

    let wiring = LatticeWiring::build(config.geometry()?);
    let geometry = *wiring.geometry();
    let field = build_field(&config, &wiring)?;

    let (cx, cy, cz) = geometry.center_index();
    let recorded = (cx..geometry.dims.0)
        .map(|ix| wiring.voxel_at((ix, cy, cz)))
        .collect::<Result<Vec<VoxelId>, _>>()?;

    let mut field = Some(field);
    let handles = ChannelCommunicator::group(config.ranks)
        .into_iter()
        .map(|communicator| {
            let rank_field = if communicator.rank() == config.authority { field.take() } else { None };
            let config = config.clone();
            let recorded = recorded.clone();

            thread::spawn(move || run_rank(&config, geometry, communicator, rank_field, recorded))
        })
        .collect::<Vec<_>>();

    let mut events = 0;
    for (rank, handle) in handles.into_iter().enumerate() {
        let (summary, profile) = handle.join()
            .map_err(|_| SyncError::TransportUnavailable(format!("rank {} panicked", rank)))??;

        events += summary.events;

        if let Some(profile) = profile {
            for (distance, peak_time, relative) in profile {
                info!(distance, peak_time, relative, "peak concentration by distance");
            }
        }
    }

    info!(ranks = config.ranks, events, duration = config.duration, "run complete");

    Ok(())
}
