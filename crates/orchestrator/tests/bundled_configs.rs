//! The configs shipped in `configs/` must load and validate.

use std::path::{Path, PathBuf};

use orchestrator::{runner_options, SimulationConfig};

fn configs_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs")
}

#[test]
fn every_bundled_config_validates() {
    let mut seen = 0;
    for entry in std::fs::read_dir(configs_dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let config = SimulationConfig::load(path.to_str().unwrap())
            .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        assert!(config.max_frames.is_some(), "{} runs forever", path.display());
        seen += 1;
    }
    assert!(seen >= 2);
}

#[test]
fn small_plume_overrides_only_radius() {
    let path = configs_dir().join("smoke-plume-16.json");
    let config = SimulationConfig::load(path.to_str().unwrap()).unwrap();
    assert_eq!(config.grid_size, 16);
    assert_eq!(config.params.impulse_radius, 0.08);
    assert_eq!(config.params.buoyancy, 1.0);

    let options = runner_options(&config);
    assert_eq!(options.max_frames, Some(120));
    assert_eq!(options.diagnostics_interval, 20);
    assert!((options.frame_dt - 1.0 / 60.0).abs() < 1e-9);
}

#[test]
fn snapshot_path_is_relative_to_config() {
    let dir = configs_dir();
    let config = SimulationConfig::load(dir.join("smoke-plume-64.json").to_str().unwrap()).unwrap();
    let path = config.snapshot_path_in(&dir).unwrap();
    assert!(path.starts_with(&dir));
    assert_eq!(path.file_name().unwrap(), "smoke-plume-64.raw");
}
