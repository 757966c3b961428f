//! Error type for solver initialization and per-frame operations.

use thiserror::Error;

/// Everything that can go wrong while creating or driving a [`crate::FluidSolver`].
///
/// Initialization failures are fatal: there is no degraded mode, so callers
/// log the error and abort startup.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Grid size was zero or too large to address.
    #[error("invalid grid size: {0}")]
    InvalidGridSize(String),

    /// A simulation parameter is out of range.
    #[error("invalid simulation parameters: {0}")]
    InvalidParams(String),

    /// No GPU adapter could be found.
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    /// The adapter refused to create a device.
    #[error("failed to create device: {0}")]
    DeviceRequest(String),

    /// Kernel source could not be read.
    #[error("failed to load kernel source {path}: {source}")]
    ShaderSource {
        /// File that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A kernel failed validation or pipeline creation.
    #[error("kernel `{kernel}` failed to compile: {message}")]
    ShaderCompile {
        /// Kernel name.
        kernel: &'static str,
        /// Validation message reported by wgpu.
        message: String,
    },

    /// Buffer allocation was rejected by the device.
    #[error("field allocation failed: {0}")]
    Allocation(String),

    /// A dispatch was issued with an invalid binding set.
    #[error("invalid binding for `{kernel}`: {message}")]
    Binding {
        /// Kernel being dispatched.
        kernel: &'static str,
        /// What was wrong with the bindings.
        message: String,
    },

    /// Mapping a staging buffer for readback failed.
    #[error("readback failed: {0}")]
    Readback(String),

    /// The solver was used after `shutdown()`.
    #[error("solver has been shut down")]
    ShutDown,
}
