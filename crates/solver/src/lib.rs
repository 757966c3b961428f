//! Grid-based smoke solver on the GPU
//!
//! This crate advances a 3-D velocity, density and temperature field entirely
//! in wgpu compute kernels: semi-Lagrangian advection, buoyancy, vorticity
//! confinement and a Jacobi pressure projection. The current density buffer
//! is exposed for an external volume renderer.
//!
//! # Modules
//! - [`grid`] -- `GridDims` and the `(W, 2W, W)` domain layout.
//! - [`params`] -- `SimulationParams` and the per-kernel uniform blocks.
//! - [`gpu`] -- Field store, kernel dispatcher, stage library and `FluidSolver`.
//! - [`diagnostics`] -- CPU-side summaries of read-back fields.
//! - [`error`] -- `SolverError`.

#![warn(missing_docs)]

pub mod diagnostics;
pub mod error;
pub mod grid;

#[allow(missing_docs)]
pub mod gpu;
#[allow(missing_docs)]
pub mod params;

pub use diagnostics::FieldDiagnostics;
pub use error::SolverError;
pub use gpu::dispatch::{KernelId, KernelSources};
pub use gpu::fields::{DoubleField, FieldKind};
pub use gpu::{gpu_available, FieldData, FluidSolver, GpuContext, Stage, FRAME_SCHEDULE};
pub use grid::GridDims;
pub use params::{SimulationParams, FIXED_TIME_STEP, JACOBI_ITERATIONS};

// ---------------------------------------------------------------------------
// SimulationKernel trait
// ---------------------------------------------------------------------------

/// A simulation the orchestrator can drive frame by frame.
///
/// `FluidSolver` is the production implementation; tests substitute light
/// CPU stand-ins.
pub trait SimulationKernel {
    /// Advance one frame. Implementations may ignore `dt`.
    fn step(&mut self, dt: f32) -> Result<(), SolverError>;

    /// Frames completed so far.
    fn frame_count(&self) -> u64;

    /// Extents of the simulated grid.
    fn grid_dims(&self) -> GridDims;

    /// Copy of the current density field, `x` varying fastest.
    fn read_density(&self) -> Result<Vec<f32>, SolverError>;

    /// Summary measurements of the current state.
    fn diagnostics(&self) -> Result<FieldDiagnostics, SolverError>;
}
