//! Simulation parameters and the uniform blocks uploaded to each kernel.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::SolverError;
use crate::grid::GridDims;

/// Timestep used by every stage. The `dt` passed to `step` is ignored.
pub const FIXED_TIME_STEP: f32 = 0.1;

/// Pressure relaxation sweeps per frame.
pub const JACOBI_ITERATIONS: u32 = 10;

/// Tunable physical constants of the smoke model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Impulse radius as a fraction of `W + H + D`.
    pub impulse_radius: f32,
    /// Density added at the impulse centre per unit time.
    pub density_amount: f32,
    /// Temperature added at the impulse centre per unit time.
    pub temperature_amount: f32,
    /// Amount subtracted from advected scalar magnitudes every frame.
    pub decay: f32,
    pub velocity_dissipation: f32,
    pub density_dissipation: f32,
    pub temperature_dissipation: f32,
    /// Temperature above which smoke becomes buoyant.
    pub ambient_temperature: f32,
    /// Upward force per unit of excess temperature.
    pub buoyancy: f32,
    /// Downward force per unit of density.
    pub weight: f32,
    /// Scale of the vorticity confinement force.
    pub vorticity_strength: f32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            impulse_radius: 0.04,
            density_amount: 1.0,
            temperature_amount: 1.0,
            decay: 0.0,
            velocity_dissipation: 0.995,
            density_dissipation: 0.995,
            temperature_dissipation: 0.995,
            ambient_temperature: 0.995,
            buoyancy: 1.0,
            weight: 0.0125,
            vorticity_strength: 1.0,
        }
    }
}

impl SimulationParams {
    /// Reject values the kernels cannot handle (non-finite, negative
    /// radius or decay, dissipation outside `[0, 1]`).
    pub fn validate(&self) -> Result<(), SolverError> {
        let named = [
            ("impulse_radius", self.impulse_radius),
            ("density_amount", self.density_amount),
            ("temperature_amount", self.temperature_amount),
            ("decay", self.decay),
            ("velocity_dissipation", self.velocity_dissipation),
            ("density_dissipation", self.density_dissipation),
            ("temperature_dissipation", self.temperature_dissipation),
            ("ambient_temperature", self.ambient_temperature),
            ("buoyancy", self.buoyancy),
            ("weight", self.weight),
            ("vorticity_strength", self.vorticity_strength),
        ];
        if let Some((name, _)) = named.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SolverError::InvalidParams(format!("{name} must be finite")));
        }
        if self.impulse_radius <= 0.0 {
            return Err(SolverError::InvalidParams(
                "impulse_radius must be positive".into(),
            ));
        }
        if self.decay < 0.0 {
            return Err(SolverError::InvalidParams("decay must be >= 0".into()));
        }
        for (name, value) in [
            ("velocity_dissipation", self.velocity_dissipation),
            ("density_dissipation", self.density_dissipation),
            ("temperature_dissipation", self.temperature_dissipation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SolverError::InvalidParams(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Uniform blocks (must match the structs declared in shaders/*.wgsl)
// ---------------------------------------------------------------------------

/// Grid extents only. Used by kernels with no tunable constants.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GridUniforms {
    /// `(W, H, D, 0)`.
    pub dims: [u32; 4],
}

impl GridUniforms {
    pub fn new(dims: GridDims) -> Self {
        Self { dims: dims.as_uniform() }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct AdvectionUniforms {
    pub dims: [u32; 4],
    pub dissipation: f32,
    pub dt: f32,
    pub decay: f32,
    /// 1.0 traces backwards along the velocity; -1.0 forwards.
    pub forward: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ImpulseUniforms {
    pub dims: [u32; 4],
    pub source_x: f32,
    pub source_y: f32,
    pub source_z: f32,
    /// Radius in cells.
    pub radius: f32,
    pub amount: f32,
    pub dt: f32,
    pub _pad0: f32,
    pub _pad1: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct BuoyancyUniforms {
    pub dims: [u32; 4],
    pub ambient_temperature: f32,
    pub buoyancy: f32,
    pub dt: f32,
    pub weight: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ConfinementUniforms {
    pub dims: [u32; 4],
    pub dt: f32,
    pub strength: f32,
    pub _pad0: f32,
    pub _pad1: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_smoke_preset() {
        let p = SimulationParams::default();
        assert_eq!(p.impulse_radius, 0.04);
        assert_eq!(p.density_dissipation, 0.995);
        assert_eq!(p.ambient_temperature, 0.995);
        assert_eq!(p.weight, 0.0125);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let p: SimulationParams =
            serde_json::from_str(r#"{ "buoyancy": 2.5, "decay": 0.01 }"#).unwrap();
        assert_eq!(p.buoyancy, 2.5);
        assert_eq!(p.decay, 0.01);
        assert_eq!(p.vorticity_strength, 1.0);
        assert_eq!(p.velocity_dissipation, 0.995);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let p = SimulationParams { impulse_radius: 0.0, ..Default::default() };
        assert!(matches!(p.validate(), Err(SolverError::InvalidParams(_))));

        let p = SimulationParams { density_dissipation: 1.5, ..Default::default() };
        assert!(p.validate().is_err());

        let p = SimulationParams { buoyancy: f32::NAN, ..Default::default() };
        let msg = p.validate().unwrap_err().to_string();
        assert!(msg.contains("buoyancy"), "{msg}");

        let p = SimulationParams { decay: -0.1, ..Default::default() };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_uniform_blocks_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<GridUniforms>(), 16);
        assert_eq!(std::mem::size_of::<AdvectionUniforms>(), 32);
        assert_eq!(std::mem::size_of::<ImpulseUniforms>(), 48);
        assert_eq!(std::mem::size_of::<BuoyancyUniforms>(), 32);
        assert_eq!(std::mem::size_of::<ConfinementUniforms>(), 32);
    }
}
