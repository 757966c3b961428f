//! Configuration parsing and validation for smoke simulations

use serde::{Deserialize, Serialize};
use solver::SimulationParams;
use std::fs;
use std::path::{Path, PathBuf};

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    pub name: String,
    /// Grid width `W`; the domain is `W x 2W x W` cells
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    /// Physical constants of the smoke model
    #[serde(default)]
    pub params: SimulationParams,
    /// Stop after this many frames (runs until stopped when absent)
    pub max_frames: Option<u64>,
    /// Frame interval handed to the solver (it advances by a fixed step regardless)
    #[serde(default = "default_frame_dt")]
    pub frame_dt: f32,
    /// Frames between diagnostics readbacks; 0 disables them
    #[serde(default = "default_diagnostics_interval")]
    pub diagnostics_interval: u64,
    /// Directory of `<kernel>.wgsl` overrides, relative to the config file
    #[serde(default)]
    pub shader_dir: Option<String>,
    /// Where to write the final density volume, relative to the config file
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

// Default values
fn default_grid_size() -> u32 {
    64
}

fn default_frame_dt() -> f32 {
    1.0 / 60.0
}

fn default_diagnostics_interval() -> u64 {
    100
}

/// Largest accepted grid width; `512 x 1024 x 512` vec4 cells already
/// exceed most devices' storage binding limits.
pub const MAX_GRID_SIZE: u32 = 512;

impl SimulationConfig {
    /// Configuration with every default and the given name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            grid_size: default_grid_size(),
            params: SimulationParams::default(),
            max_frames: None,
            frame_dt: default_frame_dt(),
            diagnostics_interval: default_diagnostics_interval(),
            shader_dir: None,
            snapshot_path: None,
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration JSON
    pub fn from_json(contents: &str) -> Result<Self, String> {
        let config: SimulationConfig = serde_json::from_str(contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Simulation name must not be empty".to_string());
        }

        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            return Err(format!(
                "grid_size must be in range 1..={}, got {}",
                MAX_GRID_SIZE, self.grid_size
            ));
        }

        if let Some(max_frames) = self.max_frames {
            if max_frames == 0 {
                return Err("max_frames must be at least 1".to_string());
            }
        }

        if !self.frame_dt.is_finite() || self.frame_dt <= 0.0 {
            return Err("frame_dt must be positive".to_string());
        }

        self.params.validate().map_err(|e| e.to_string())?;

        Ok(())
    }

    /// Resolve `shader_dir` against the directory holding the config file
    pub fn shader_dir_in(&self, config_dir: &Path) -> Option<PathBuf> {
        self.shader_dir.as_ref().map(|p| config_dir.join(p))
    }

    /// Resolve `snapshot_path` against the directory holding the config file
    pub fn snapshot_path_in(&self, config_dir: &Path) -> Option<PathBuf> {
        self.snapshot_path.as_ref().map(|p| config_dir.join(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = SimulationConfig::from_json(r#"{ "name": "plume" }"#).unwrap();
        assert_eq!(config.grid_size, 64);
        assert_eq!(config.max_frames, None);
        assert_eq!(config.params, SimulationParams::default());
        assert_eq!(config.diagnostics_interval, 100);
        assert!(config.shader_dir.is_none());
    }

    #[test]
    fn test_partial_params_merge_with_defaults() {
        let json = r#"{
            "name": "strong-buoyancy",
            "grid_size": 32,
            "max_frames": 200,
            "params": { "buoyancy": 4.0, "vorticity_strength": 0.5 }
        }"#;
        let config = SimulationConfig::from_json(json).unwrap();
        assert_eq!(config.grid_size, 32);
        assert_eq!(config.max_frames, Some(200));
        assert_eq!(config.params.buoyancy, 4.0);
        assert_eq!(config.params.vorticity_strength, 0.5);
        assert_eq!(config.params.weight, 0.0125);
    }

    #[test]
    fn test_validation_grid_size() {
        let mut config = SimulationConfig::named("test");
        config.grid_size = 0;
        assert!(config.validate().is_err());

        config.grid_size = MAX_GRID_SIZE + 1;
        assert!(config.validate().is_err());

        config.grid_size = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_max_frames_and_params() {
        let mut config = SimulationConfig::named("test");
        config.max_frames = Some(0);
        assert!(config.validate().is_err());

        config.max_frames = Some(10);
        config.params.density_dissipation = -0.5;
        let err = config.validate().unwrap_err();
        assert!(err.contains("density_dissipation"), "{err}");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(SimulationConfig::from_json(r#"{ "name": "  " }"#).is_err());
        assert!(SimulationConfig::from_json(r#"{ "grid_size": 8 }"#).is_err());
    }

    #[test]
    fn test_paths_resolve_against_config_dir() {
        let mut config = SimulationConfig::named("test");
        config.snapshot_path = Some("out/density.raw".into());
        let resolved = config.snapshot_path_in(Path::new("configs")).unwrap();
        assert_eq!(resolved, Path::new("configs/out/density.raw"));
        assert!(config.shader_dir_in(Path::new("configs")).is_none());
    }
}
