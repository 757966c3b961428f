//! GPU smoke solver built on wgpu compute shaders.
//!
//! `FluidSolver` implements `SimulationKernel`. All field data lives on the
//! GPU; CPU copies are made only by the explicit `read_*` calls.
//!
//! # Frame structure
//! A frame records every stage of [`FRAME_SCHEDULE`] into one command
//! encoder and submits it once:
//! 1. Advect temperature, density, then velocity
//! 2. Buoyancy
//! 3. Density and temperature impulses at the source
//! 4. Vorticity and confinement
//! 5. Divergence, 10 Jacobi pressure sweeps, projection
//!
//! Each dispatch gets its own compute pass, so wgpu orders the write of one
//! stage before the reads of the next.

pub mod dispatch;
pub mod fields;
pub mod stages;

use crate::diagnostics::{self, FieldDiagnostics};
use crate::error::SolverError;
use crate::grid::{GridDims, WORKGROUP_EDGE};
use crate::params::SimulationParams;
use crate::SimulationKernel;

use dispatch::{Dispatcher, KernelLibrary, KernelSources};
use fields::{CellFormat, FieldKind, FieldStore};
pub use stages::{Advected, ImpulseTarget, Stage, FRAME_SCHEDULE};

/// Device and queue the solver submits to.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Create a headless device on the highest-performance adapter.
    pub fn new() -> Result<Self, SolverError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(SolverError::NoAdapter)?;

        let info = adapter.get_info();
        tracing::info!("GPU adapter: {:?} ({:?})", info.name, info.backend);

        let required_limits = required_limits(&adapter.limits())?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("smoke_solver_device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| SolverError::DeviceRequest(e.to_string()))?;

        Ok(Self { device, queue })
    }

    /// Use a device owned by a host application (e.g. a renderer).
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

/// Device limits the solver requests from an adapter offering `adapter`.
///
/// Every kernel runs `8 x 8 x 8` invocations per workgroup, above the
/// 256 allowed by `wgpu::Limits::default()`. Large grids also need more
/// than the default 128 MiB storage binding, so the adapter's buffer
/// limits are taken as-is.
pub fn required_limits(adapter: &wgpu::Limits) -> Result<wgpu::Limits, SolverError> {
    let invocations = WORKGROUP_EDGE.pow(3);
    let sizes = [
        adapter.max_compute_workgroup_size_x,
        adapter.max_compute_workgroup_size_y,
        adapter.max_compute_workgroup_size_z,
    ];
    if adapter.max_compute_invocations_per_workgroup < invocations
        || sizes.iter().any(|&s| s < WORKGROUP_EDGE)
    {
        return Err(SolverError::DeviceRequest(format!(
            "adapter supports {} invocations per workgroup (sizes {:?}), kernels need {} ({}x{}x{})",
            adapter.max_compute_invocations_per_workgroup,
            sizes,
            invocations,
            WORKGROUP_EDGE,
            WORKGROUP_EDGE,
            WORKGROUP_EDGE,
        )));
    }

    let defaults = wgpu::Limits::default();
    Ok(wgpu::Limits {
        max_storage_buffer_binding_size: adapter.max_storage_buffer_binding_size,
        max_buffer_size: adapter.max_buffer_size,
        max_compute_invocations_per_workgroup: invocations,
        max_compute_workgroup_size_x: defaults.max_compute_workgroup_size_x.max(WORKGROUP_EDGE),
        max_compute_workgroup_size_y: defaults.max_compute_workgroup_size_y.max(WORKGROUP_EDGE),
        max_compute_workgroup_size_z: defaults.max_compute_workgroup_size_z.max(WORKGROUP_EDGE),
        ..defaults
    })
}

/// Check whether any GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

/// Contents of one field copied back to the CPU.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Scalar(Vec<f32>),
    Vector(Vec<[f32; 4]>),
    Mask(Vec<i32>),
}

/// Grid smoke solver: owns the field store and kernel library and records
/// frames.
pub struct FluidSolver {
    device: wgpu::Device,
    queue: wgpu::Queue,
    dims: GridDims,
    params: SimulationParams,
    kernels: KernelLibrary,
    // `None` once shut down.
    fields: Option<FieldStore>,
    frame: u64,
}

impl FluidSolver {
    /// Compile kernels, allocate every field for a `(W, 2W, W)` grid and
    /// write the boundary mask.
    ///
    /// Any failure is returned as-is; there is no partially working solver.
    pub fn new(
        context: GpuContext,
        grid_size: u32,
        params: SimulationParams,
        sources: &KernelSources,
    ) -> Result<Self, SolverError> {
        let GpuContext { device, queue } = context;
        let dims = GridDims::from_size(grid_size)?;
        params.validate()?;

        let kernels = KernelLibrary::compile(&device, sources)?;
        let fields = FieldStore::allocate(&device, dims)?;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("boundary_conditions"),
        });
        stages::encode_boundary_conditions(&Dispatcher::new(&device, &kernels), &mut encoder, &fields)?;
        queue.submit(std::iter::once(encoder.finish()));

        tracing::info!("Smoke solver ready: grid {}, {} cells", dims, dims.cell_count());

        Ok(Self {
            device,
            queue,
            dims,
            params,
            kernels,
            fields: Some(fields),
            frame: 0,
        })
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Replace the parameters used from the next recorded stage onwards.
    pub fn set_params(&mut self, params: SimulationParams) -> Result<(), SolverError> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn fields(&self) -> Result<&FieldStore, SolverError> {
        self.fields.as_ref().ok_or(SolverError::ShutDown)
    }

    /// Zero every field except the boundary mask, without reallocating.
    pub fn clear(&mut self) -> Result<(), SolverError> {
        let fields = self.fields()?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear"),
        });
        for field in fields.clearable_buffers() {
            encoder.clear_buffer(&field.buffer, 0, None);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        tracing::debug!("Cleared fields at frame {}", self.frame);
        Ok(())
    }

    /// Record and submit one stage, including its swap.
    pub fn run_stage(&mut self, stage: Stage) -> Result<(), SolverError> {
        let fields = self.fields.as_mut().ok_or(SolverError::ShutDown)?;
        let dispatcher = Dispatcher::new(&self.device, &self.kernels);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("stage"),
        });
        stages::encode_stages(&dispatcher, &mut encoder, fields, &self.params, &[stage])?;
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Advance one frame. `_dt` is ignored: every stage uses
    /// [`crate::FIXED_TIME_STEP`].
    ///
    /// Does not wait for the GPU.
    pub fn step(&mut self, _dt: f32) -> Result<(), SolverError> {
        let fields = self.fields.as_mut().ok_or(SolverError::ShutDown)?;
        let dispatcher = Dispatcher::new(&self.device, &self.kernels);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame"),
        });
        stages::encode_stages(&dispatcher, &mut encoder, fields, &self.params, &FRAME_SCHEDULE)?;
        self.queue.submit(std::iter::once(encoder.finish()));
        self.frame += 1;
        Ok(())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Block until all submitted work has finished on the GPU.
    pub fn sync(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Current density (READ slot), bindable as a read-only storage buffer
    /// by a renderer sharing this device.
    pub fn density_buffer(&self) -> Result<&wgpu::Buffer, SolverError> {
        Ok(&self.fields()?.current(FieldKind::Density).buffer)
    }

    pub fn read_density(&self) -> Result<Vec<f32>, SolverError> {
        self.read_scalar(FieldKind::Density)
    }

    pub fn read_scalar(&self, kind: FieldKind) -> Result<Vec<f32>, SolverError> {
        self.fields()?.read_scalar(&self.device, &self.queue, kind)
    }

    pub fn read_vector(&self, kind: FieldKind) -> Result<Vec<[f32; 4]>, SolverError> {
        self.fields()?.read_vector(&self.device, &self.queue, kind)
    }

    pub fn read_mask(&self) -> Result<Vec<i32>, SolverError> {
        self.fields()?.read_mask(&self.device, &self.queue)
    }

    /// Copy the current contents of any field back to the CPU.
    pub fn read_field(&self, kind: FieldKind) -> Result<FieldData, SolverError> {
        Ok(match kind.format() {
            CellFormat::Scalar => FieldData::Scalar(self.read_scalar(kind)?),
            CellFormat::Vector => FieldData::Vector(self.read_vector(kind)?),
            CellFormat::Mask => FieldData::Mask(self.read_mask()?),
        })
    }

    /// Overwrite the current contents of a field. The boundary mask cannot
    /// be uploaded.
    pub fn upload_field<T: bytemuck::Pod>(&self, kind: FieldKind, data: &[T]) -> Result<(), SolverError> {
        if kind == FieldKind::BoundaryMask {
            return Err(SolverError::Binding {
                kernel: "upload",
                message: "boundary mask is read-only after initialization".into(),
            });
        }
        self.fields()?.upload(&self.queue, kind, data)
    }

    /// Density total, peak speed and divergence norm of the current state.
    pub fn diagnostics(&self) -> Result<FieldDiagnostics, SolverError> {
        let density = self.read_density()?;
        let velocity = self.read_vector(FieldKind::Velocity)?;
        let divergence = self.read_scalar(FieldKind::Divergence)?;
        Ok(FieldDiagnostics {
            total_density: diagnostics::total(&density),
            max_speed: diagnostics::max_magnitude(&velocity),
            divergence_l2: diagnostics::l2_norm(&divergence),
        })
    }

    /// Release every field buffer. Later calls return
    /// [`SolverError::ShutDown`]; calling `shutdown` again is a no-op.
    pub fn shutdown(&mut self) {
        if let Some(mut fields) = self.fields.take() {
            fields.release();
            tracing::info!("Smoke solver shut down after {} frames", self.frame);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.fields.is_none()
    }
}

impl SimulationKernel for FluidSolver {
    fn step(&mut self, dt: f32) -> Result<(), SolverError> {
        FluidSolver::step(self, dt)
    }

    fn frame_count(&self) -> u64 {
        self.frame
    }

    fn grid_dims(&self) -> GridDims {
        self.dims
    }

    fn read_density(&self) -> Result<Vec<f32>, SolverError> {
        FluidSolver::read_density(self)
    }

    fn diagnostics(&self) -> Result<FieldDiagnostics, SolverError> {
        FluidSolver::diagnostics(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_limits_cover_workgroup() {
        let adapter = wgpu::Limits {
            max_compute_invocations_per_workgroup: 1024,
            max_storage_buffer_binding_size: 1 << 30,
            max_buffer_size: 1 << 32,
            ..wgpu::Limits::default()
        };
        let limits = required_limits(&adapter).unwrap();
        assert!(limits.max_compute_invocations_per_workgroup >= WORKGROUP_EDGE.pow(3));
        assert!(limits.max_compute_workgroup_size_x >= WORKGROUP_EDGE);
        assert!(limits.max_compute_workgroup_size_y >= WORKGROUP_EDGE);
        assert!(limits.max_compute_workgroup_size_z >= WORKGROUP_EDGE);
        assert_eq!(limits.max_storage_buffer_binding_size, 1 << 30);
        assert_eq!(limits.max_buffer_size, 1 << 32);
        // Never ask for more than the adapter offers.
        assert!(limits.check_limits(&adapter));
    }

    #[test]
    fn test_default_limits_are_too_small_for_kernels() {
        assert!(wgpu::Limits::default().max_compute_invocations_per_workgroup < WORKGROUP_EDGE.pow(3));
    }

    #[test]
    fn test_required_limits_reject_small_adapter() {
        let adapter = wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            ..wgpu::Limits::default()
        };
        let err = required_limits(&adapter).unwrap_err();
        assert!(matches!(err, SolverError::DeviceRequest(ref m) if m.contains("512")), "{err}");
    }
}
