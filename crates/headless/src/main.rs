//! Headless runner
//!
//! Runs one configured smoke simulation to completion without a window and
//! writes the final density volume when the config names a snapshot path.
//!
//! Usage: `headless [CONFIG]`, falling back to `$PLUME_CONFIG` and then
//! `configs/smoke-plume-64.json`.

use std::path::Path;
use std::process::ExitCode;

use orchestrator::{create_simulation, write_density_snapshot};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "configs/smoke-plume-64.json";

fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PLUME_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
}

fn run(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (config, runner) = create_simulation(config_path)?;
    if config.max_frames.is_none() {
        tracing::warn!("No max_frames set; the simulation runs until the process is killed");
    }

    runner.start();
    let kernel = runner.join()?;

    // A step error ends the loop early
    let frames = kernel.frame_count();
    if let Some(max_frames) = config.max_frames {
        if frames < max_frames {
            return Err(format!("Simulation stopped at frame {} of {}", frames, max_frames).into());
        }
    }

    let diag = kernel.diagnostics()?;
    tracing::info!(
        "Final state after {} frames: density={:.4}, max_speed={:.4}, div_l2={:.3e}",
        frames,
        diag.total_density,
        diag.max_speed,
        diag.divergence_l2,
    );

    let config_dir = Path::new(config_path).parent().unwrap_or_else(|| Path::new("."));
    if let Some(path) = config.snapshot_path_in(config_dir) {
        let density = kernel.read_density()?;
        write_density_snapshot(&path, kernel.grid_dims(), frames, &density)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "headless=info,orchestrator=info,solver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = config_path();
    tracing::info!("Starting headless smoke simulation: {}", config_path);

    match run(&config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_fails_before_gpu_setup() {
        let err = run("configs/does-not-exist.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"), "{err}");
    }
}
