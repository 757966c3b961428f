//! Stage library: how each simulation stage binds fields and which field it
//! swaps afterwards.

use super::dispatch::{Dispatcher, KernelId};
use super::fields::{DoubleField, FieldKind, FieldStore};
use crate::error::SolverError;
use crate::params::{
    AdvectionUniforms, BuoyancyUniforms, ConfinementUniforms, GridUniforms, ImpulseUniforms,
    SimulationParams, FIXED_TIME_STEP, JACOBI_ITERATIONS,
};

/// Field carried along the velocity by an advection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advected {
    Temperature,
    Density,
    Velocity,
}

/// Field receiving a source impulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpulseTarget {
    Density,
    Temperature,
}

/// A unit of work that can be recorded on its own with
/// [`super::FluidSolver::run_stage`].
///
/// Boundary conditions are deliberately absent: they run once at
/// construction and never again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Advect(Advected),
    Buoyancy,
    Impulse(ImpulseTarget),
    Vorticity,
    Confinement,
    Divergence,
    /// The full pressure solve: [`JACOBI_ITERATIONS`] sweeps.
    Jacobi,
    /// A single pressure sweep.
    JacobiSweep,
    Projection,
}

/// Order of stages within one frame.
pub const FRAME_SCHEDULE: [Stage; 11] = [
    Stage::Advect(Advected::Temperature),
    Stage::Advect(Advected::Density),
    Stage::Advect(Advected::Velocity),
    Stage::Buoyancy,
    Stage::Impulse(ImpulseTarget::Density),
    Stage::Impulse(ImpulseTarget::Temperature),
    Stage::Vorticity,
    Stage::Confinement,
    Stage::Divergence,
    Stage::Jacobi,
    Stage::Projection,
];

impl Stage {
    pub fn kernel(self) -> KernelId {
        match self {
            Stage::Advect(Advected::Velocity) => KernelId::AdvectVector,
            Stage::Advect(_) => KernelId::AdvectScalar,
            Stage::Buoyancy => KernelId::Buoyancy,
            Stage::Impulse(_) => KernelId::Impulse,
            Stage::Vorticity => KernelId::Vorticity,
            Stage::Confinement => KernelId::Confinement,
            Stage::Divergence => KernelId::Divergence,
            Stage::Jacobi | Stage::JacobiSweep => KernelId::Jacobi,
            Stage::Projection => KernelId::Projection,
        }
    }

    /// Field whose READ/WRITE roles flip after the stage's dispatch.
    pub fn swap_target(self) -> Option<DoubleField> {
        match self {
            Stage::Advect(Advected::Temperature) | Stage::Impulse(ImpulseTarget::Temperature) => {
                Some(DoubleField::Temperature)
            }
            Stage::Advect(Advected::Density) | Stage::Impulse(ImpulseTarget::Density) => {
                Some(DoubleField::Density)
            }
            Stage::Advect(Advected::Velocity)
            | Stage::Buoyancy
            | Stage::Confinement
            | Stage::Projection => Some(DoubleField::Velocity),
            Stage::Jacobi | Stage::JacobiSweep => Some(DoubleField::Pressure),
            Stage::Vorticity | Stage::Divergence => None,
        }
    }

    /// Number of kernel dispatches the stage records.
    pub fn dispatch_count(self) -> u32 {
        match self {
            Stage::Jacobi => JACOBI_ITERATIONS,
            _ => 1,
        }
    }
}

/// Field store operation needed while recording a schedule.
pub(crate) trait SwapFields {
    fn swap_field(&mut self, field: DoubleField);
}

impl SwapFields for FieldStore {
    fn swap_field(&mut self, field: DoubleField) {
        self.swap(field);
    }
}

/// Run `encode` for every dispatch of `stages`, swapping fields as each one
/// is recorded.
///
/// On failure the swaps already applied are undone in reverse order, so the
/// READ slots still name the data of the last submitted command buffer.
pub(crate) fn record_stages<S: SwapFields>(
    fields: &mut S,
    stages: &[Stage],
    mut encode: impl FnMut(&S, Stage) -> Result<(), SolverError>,
) -> Result<(), SolverError> {
    let mut applied = Vec::new();
    for &stage in stages {
        for _ in 0..stage.dispatch_count() {
            if let Err(e) = encode(fields, stage) {
                for field in applied.into_iter().rev() {
                    fields.swap_field(field);
                }
                return Err(e);
            }
            if let Some(field) = stage.swap_target() {
                fields.swap_field(field);
                applied.push(field);
            }
        }
    }
    Ok(())
}

/// Record `stages` into `encoder`. On error nothing should be submitted.
pub(crate) fn encode_stages(
    dispatcher: &Dispatcher<'_>,
    encoder: &mut wgpu::CommandEncoder,
    fields: &mut FieldStore,
    params: &SimulationParams,
    stages: &[Stage],
) -> Result<(), SolverError> {
    record_stages(fields, stages, |fields, stage| {
        encode_once(dispatcher, encoder, fields, params, stage)
    })
}

fn encode_once(
    dispatcher: &Dispatcher<'_>,
    encoder: &mut wgpu::CommandEncoder,
    fields: &FieldStore,
    params: &SimulationParams,
    stage: Stage,
) -> Result<(), SolverError> {
    let dims = fields.dims();
    let dt = FIXED_TIME_STEP;
    let mask = fields.current(FieldKind::BoundaryMask);
    let velocity = fields.read(DoubleField::Velocity);
    let kernel = stage.kernel();

    match stage {
        Stage::Advect(advected) => {
            let (field, dissipation) = match advected {
                Advected::Temperature => (DoubleField::Temperature, params.temperature_dissipation),
                Advected::Density => (DoubleField::Density, params.density_dissipation),
                Advected::Velocity => (DoubleField::Velocity, params.velocity_dissipation),
            };
            let uniforms = AdvectionUniforms {
                dims: dims.as_uniform(),
                dissipation,
                dt,
                decay: params.decay,
                forward: 1.0,
            };
            if advected == Advected::Velocity {
                dispatcher.dispatch(encoder, kernel, &uniforms, &[velocity, mask], &[fields.write(field)], dims)
            } else {
                dispatcher.dispatch(
                    encoder,
                    kernel,
                    &uniforms,
                    &[velocity, mask, fields.read(field)],
                    &[fields.write(field)],
                    dims,
                )
            }
        }
        Stage::Buoyancy => {
            let uniforms = BuoyancyUniforms {
                dims: dims.as_uniform(),
                ambient_temperature: params.ambient_temperature,
                buoyancy: params.buoyancy,
                dt,
                weight: params.weight,
            };
            dispatcher.dispatch(
                encoder,
                kernel,
                &uniforms,
                &[
                    velocity,
                    fields.read(DoubleField::Temperature),
                    fields.read(DoubleField::Density),
                ],
                &[fields.write(DoubleField::Velocity)],
                dims,
            )
        }
        Stage::Impulse(target) => {
            let (field, amount) = match target {
                ImpulseTarget::Density => (DoubleField::Density, params.density_amount),
                ImpulseTarget::Temperature => (DoubleField::Temperature, params.temperature_amount),
            };
            let [source_x, source_y, source_z] = dims.impulse_source();
            let uniforms = ImpulseUniforms {
                dims: dims.as_uniform(),
                source_x,
                source_y,
                source_z,
                radius: dims.impulse_radius_cells(params.impulse_radius),
                amount,
                dt,
                _pad0: 0.0,
                _pad1: 0.0,
            };
            dispatcher.dispatch(
                encoder,
                kernel,
                &uniforms,
                &[fields.read(field)],
                &[fields.write(field)],
                dims,
            )
        }
        Stage::Vorticity => dispatcher.dispatch(
            encoder,
            kernel,
            &GridUniforms::new(dims),
            &[velocity],
            &[fields.current(FieldKind::Vorticity)],
            dims,
        ),
        Stage::Confinement => {
            let uniforms = ConfinementUniforms {
                dims: dims.as_uniform(),
                dt,
                strength: params.vorticity_strength,
                _pad0: 0.0,
                _pad1: 0.0,
            };
            dispatcher.dispatch(
                encoder,
                kernel,
                &uniforms,
                &[velocity, fields.current(FieldKind::Vorticity), mask],
                &[fields.write(DoubleField::Velocity)],
                dims,
            )
        }
        Stage::Divergence => dispatcher.dispatch(
            encoder,
            kernel,
            &GridUniforms::new(dims),
            &[velocity, mask],
            &[fields.current(FieldKind::Divergence)],
            dims,
        ),
        Stage::Jacobi | Stage::JacobiSweep => dispatcher.dispatch(
            encoder,
            kernel,
            &GridUniforms::new(dims),
            &[
                fields.read(DoubleField::Pressure),
                fields.current(FieldKind::Divergence),
                mask,
            ],
            &[fields.write(DoubleField::Pressure)],
            dims,
        ),
        Stage::Projection => dispatcher.dispatch(
            encoder,
            kernel,
            &GridUniforms::new(dims),
            &[velocity, fields.read(DoubleField::Pressure), mask],
            &[fields.write(DoubleField::Velocity)],
            dims,
        ),
    }
}

/// Record the one-time boundary mask initialization.
pub(crate) fn encode_boundary_conditions(
    dispatcher: &Dispatcher<'_>,
    encoder: &mut wgpu::CommandEncoder,
    fields: &FieldStore,
) -> Result<(), SolverError> {
    let dims = fields.dims();
    dispatcher.dispatch(
        encoder,
        KernelId::BoundaryConditions,
        &GridUniforms::new(dims),
        &[],
        &[fields.current(FieldKind::BoundaryMask)],
        dims,
    )
}
