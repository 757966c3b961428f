//! Orchestration Layer
//!
//! This crate turns a JSON configuration into a running smoke simulation:
//! - Configuration loading and validation
//! - Solver construction, with optional shader overrides from disk
//! - Simulation runner with lifecycle management
//! - Density snapshot export

#![warn(missing_docs)]

pub mod config;
pub mod runner;
pub mod snapshot;

pub use config::SimulationConfig;
pub use runner::{BoxedKernel, RunnerOptions, RunnerState, SimulationRunner};
pub use snapshot::{write_density_snapshot, SnapshotMeta};

use solver::{FluidSolver, GpuContext, KernelSources, SolverError};
use std::path::Path;

/// Build a solver for `config`, resolving `shader_dir` against `config_dir`.
pub fn create_solver(config: &SimulationConfig, config_dir: &Path) -> Result<FluidSolver, SolverError> {
    let sources = match config.shader_dir_in(config_dir) {
        Some(dir) => KernelSources::from_dir(&dir)?,
        None => KernelSources::embedded(),
    };

    let context = GpuContext::new()?;
    FluidSolver::new(context, config.grid_size, config.params, &sources)
}

/// Runner options taken from `config`
pub fn runner_options(config: &SimulationConfig) -> RunnerOptions {
    RunnerOptions {
        max_frames: config.max_frames,
        frame_dt: config.frame_dt,
        diagnostics_interval: config.diagnostics_interval,
    }
}

/// Create a complete simulation from a configuration file
///
/// Loads and validates the configuration, acquires a GPU device, compiles
/// the kernels and allocates the grid, then wraps the solver in a
/// `SimulationRunner` that has not been started yet.
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let (config, runner) = create_simulation("configs/smoke-plume-64.json")?;
/// runner.start();
/// let solver = runner.join()?;
/// println!("{}: {} frames", config.name, solver.frame_count());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_simulation(
    config_path: &str,
) -> Result<(SimulationConfig, SimulationRunner), Box<dyn std::error::Error>> {
    tracing::info!("Creating simulation from config: {}", config_path);

    let config = SimulationConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    let config_dir = Path::new(config_path)
        .parent()
        .unwrap_or_else(|| Path::new("."));

    let solver = create_solver(&config, config_dir)?;
    let runner = SimulationRunner::new(Box::new(solver), runner_options(&config));
    tracing::info!("Simulation ready to start");
    Ok((config, runner))
}
