//! Kernel library and the generic dispatcher.
//!
//! Every kernel follows one binding convention: `@group(0) @binding(0)` is a
//! uniform block, the next bindings are the read-only storage inputs in the
//! order listed by [`KernelId::reads`], then the read-write outputs in the
//! order listed by [`KernelId::writes`]. All kernels use
//! `@workgroup_size(8, 8, 8)` and guard against out-of-grid invocations.

use std::borrow::Cow;
use std::path::Path;

use wgpu::util::DeviceExt;

use super::fields::{CellFormat, FieldKind, GridBuffer, SlotKey};
use crate::error::SolverError;
use crate::grid::GridDims;
use crate::params::{
    AdvectionUniforms, BuoyancyUniforms, ConfinementUniforms, GridUniforms, ImpulseUniforms,
};

use CellFormat::{Mask, Scalar, Vector};

/// The compute kernels of the stage library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    BoundaryConditions,
    AdvectScalar,
    AdvectVector,
    Buoyancy,
    Impulse,
    Vorticity,
    Confinement,
    Divergence,
    Jacobi,
    Projection,
}

impl KernelId {
    pub const ALL: [KernelId; 10] = [
        KernelId::BoundaryConditions,
        KernelId::AdvectScalar,
        KernelId::AdvectVector,
        KernelId::Buoyancy,
        KernelId::Impulse,
        KernelId::Vorticity,
        KernelId::Confinement,
        KernelId::Divergence,
        KernelId::Jacobi,
        KernelId::Projection,
    ];

    /// Kernel name. Also the WGSL file stem and the entry point.
    pub fn name(self) -> &'static str {
        match self {
            KernelId::BoundaryConditions => "boundary_conditions",
            KernelId::AdvectScalar => "advect_scalar",
            KernelId::AdvectVector => "advect_vector",
            KernelId::Buoyancy => "buoyancy",
            KernelId::Impulse => "impulse",
            KernelId::Vorticity => "vorticity",
            KernelId::Confinement => "confinement",
            KernelId::Divergence => "divergence",
            KernelId::Jacobi => "jacobi",
            KernelId::Projection => "projection",
        }
    }

    pub fn entry_point(self) -> &'static str {
        self.name()
    }

    /// Cell formats of the read-only inputs, in binding order.
    pub fn reads(self) -> &'static [CellFormat] {
        match self {
            KernelId::BoundaryConditions => &[],
            // velocity, boundary, source
            KernelId::AdvectScalar => &[Vector, Mask, Scalar],
            // velocity, boundary
            KernelId::AdvectVector => &[Vector, Mask],
            // velocity, temperature, density
            KernelId::Buoyancy => &[Vector, Scalar, Scalar],
            KernelId::Impulse => &[Scalar],
            KernelId::Vorticity => &[Vector],
            // velocity, vorticity, boundary
            KernelId::Confinement => &[Vector, Vector, Mask],
            // velocity, boundary
            KernelId::Divergence => &[Vector, Mask],
            // pressure, divergence, boundary
            KernelId::Jacobi => &[Scalar, Scalar, Mask],
            // velocity, pressure, boundary
            KernelId::Projection => &[Vector, Scalar, Mask],
        }
    }

    /// Cell formats of the read-write outputs, in binding order.
    pub fn writes(self) -> &'static [CellFormat] {
        match self {
            KernelId::BoundaryConditions => &[Mask],
            KernelId::AdvectScalar | KernelId::Impulse | KernelId::Divergence | KernelId::Jacobi => {
                &[Scalar]
            }
            KernelId::AdvectVector
            | KernelId::Buoyancy
            | KernelId::Vorticity
            | KernelId::Confinement
            | KernelId::Projection => &[Vector],
        }
    }

    /// Size of the uniform block the kernel declares.
    pub fn uniform_size(self) -> usize {
        match self {
            KernelId::AdvectScalar | KernelId::AdvectVector => {
                std::mem::size_of::<AdvectionUniforms>()
            }
            KernelId::Buoyancy => std::mem::size_of::<BuoyancyUniforms>(),
            KernelId::Impulse => std::mem::size_of::<ImpulseUniforms>(),
            KernelId::Confinement => std::mem::size_of::<ConfinementUniforms>(),
            KernelId::BoundaryConditions
            | KernelId::Vorticity
            | KernelId::Divergence
            | KernelId::Jacobi
            | KernelId::Projection => std::mem::size_of::<GridUniforms>(),
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Kernel sources
// ---------------------------------------------------------------------------

/// WGSL source text for every kernel.
#[derive(Debug, Clone)]
pub struct KernelSources {
    sources: Vec<Cow<'static, str>>,
}

impl KernelSources {
    /// Kernels compiled into the binary.
    pub fn embedded() -> Self {
        let sources = KernelId::ALL
            .iter()
            .map(|&k| Cow::Borrowed(embedded_source(k)))
            .collect();
        Self { sources }
    }

    /// Load `<kernel>.wgsl` for every kernel from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, SolverError> {
        let dir = dir.as_ref();
        let mut sources = Vec::with_capacity(KernelId::ALL.len());
        for kernel in KernelId::ALL {
            let path = dir.join(format!("{}.wgsl", kernel.name()));
            let text = std::fs::read_to_string(&path).map_err(|source| SolverError::ShaderSource {
                path: path.display().to_string(),
                source,
            })?;
            sources.push(Cow::Owned(text));
        }
        tracing::info!("Loaded {} kernels from {}", sources.len(), dir.display());
        Ok(Self { sources })
    }

    pub fn get(&self, kernel: KernelId) -> &str {
        &self.sources[kernel.slot()]
    }
}

fn embedded_source(kernel: KernelId) -> &'static str {
    match kernel {
        KernelId::BoundaryConditions => include_str!("shaders/boundary_conditions.wgsl"),
        KernelId::AdvectScalar => include_str!("shaders/advect_scalar.wgsl"),
        KernelId::AdvectVector => include_str!("shaders/advect_vector.wgsl"),
        KernelId::Buoyancy => include_str!("shaders/buoyancy.wgsl"),
        KernelId::Impulse => include_str!("shaders/impulse.wgsl"),
        KernelId::Vorticity => include_str!("shaders/vorticity.wgsl"),
        KernelId::Confinement => include_str!("shaders/confinement.wgsl"),
        KernelId::Divergence => include_str!("shaders/divergence.wgsl"),
        KernelId::Jacobi => include_str!("shaders/jacobi.wgsl"),
        KernelId::Projection => include_str!("shaders/projection.wgsl"),
    }
}

// ---------------------------------------------------------------------------
// Kernel library
// ---------------------------------------------------------------------------

struct CompiledKernel {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// Every kernel compiled into a compute pipeline.
pub struct KernelLibrary {
    kernels: Vec<CompiledKernel>,
}

impl KernelLibrary {
    /// Compile all kernels. The first failure aborts with
    /// [`SolverError::ShaderCompile`].
    pub fn compile(device: &wgpu::Device, sources: &KernelSources) -> Result<Self, SolverError> {
        let mut kernels = Vec::with_capacity(KernelId::ALL.len());
        for kernel in KernelId::ALL {
            kernels.push(compile_one(device, kernel, sources.get(kernel))?);
        }
        tracing::info!("Compiled {} compute kernels", kernels.len());
        Ok(Self { kernels })
    }

    fn get(&self, kernel: KernelId) -> &CompiledKernel {
        &self.kernels[kernel.slot()]
    }
}

fn compile_one(
    device: &wgpu::Device,
    kernel: KernelId,
    source: &str,
) -> Result<CompiledKernel, SolverError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kernel.name()),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let n_reads = kernel.reads().len() as u32;
    let mut entries = vec![bgl_uniform(0)];
    entries.extend((1..=n_reads).map(bgl_storage_ro));
    entries.extend((0..kernel.writes().len() as u32).map(|i| bgl_storage_rw(1 + n_reads + i)));

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(kernel.name()),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(kernel.name()),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.name()),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some(kernel.entry_point()),
        compilation_options: Default::default(),
        cache: None,
    });

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        tracing::error!("Kernel {} failed to compile: {}", kernel.name(), err);
        return Err(SolverError::ShaderCompile {
            kernel: kernel.name(),
            message: err.to_string(),
        });
    }
    Ok(CompiledKernel { layout, pipeline })
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Validate a binding set against the kernel's declared layout.
///
/// Rejects wrong arity or formats, a slot that is both read and written, a
/// slot written twice, and any write to the boundary mask from a kernel
/// other than [`KernelId::BoundaryConditions`].
pub fn check_bindings(kernel: KernelId, reads: &[SlotKey], writes: &[SlotKey]) -> Result<(), SolverError> {
    let fail = |message: String| SolverError::Binding { kernel: kernel.name(), message };

    if reads.len() != kernel.reads().len() {
        return Err(fail(format!(
            "expected {} reads, got {}",
            kernel.reads().len(),
            reads.len()
        )));
    }
    if writes.len() != kernel.writes().len() {
        return Err(fail(format!(
            "expected {} writes, got {}",
            kernel.writes().len(),
            writes.len()
        )));
    }
    let declared = kernel.reads().iter().chain(kernel.writes());
    for (i, (key, &format)) in reads.iter().chain(writes).zip(declared).enumerate() {
        if key.field.format() != format {
            return Err(fail(format!(
                "binding {} expects {:?} cells, {} holds {:?}",
                i + 1,
                format,
                key.field.label(),
                key.field.format()
            )));
        }
    }
    for (i, w) in writes.iter().enumerate() {
        if reads.contains(w) {
            return Err(fail(format!(
                "{} slot {} is bound for both read and write",
                w.field.label(),
                w.slot
            )));
        }
        if writes[..i].contains(w) {
            return Err(fail(format!("{} slot {} is written twice", w.field.label(), w.slot)));
        }
        if w.field == FieldKind::BoundaryMask && kernel != KernelId::BoundaryConditions {
            return Err(fail("boundary mask is read-only after initialization".into()));
        }
    }
    Ok(())
}

/// Records kernel invocations into a command encoder.
pub struct Dispatcher<'a> {
    device: &'a wgpu::Device,
    kernels: &'a KernelLibrary,
}

impl<'a> Dispatcher<'a> {
    pub fn new(device: &'a wgpu::Device, kernels: &'a KernelLibrary) -> Self {
        Self { device, kernels }
    }

    /// Bind `reads` and `writes`, upload `uniforms`, and run `kernel` over
    /// every cell of `dims` in its own compute pass.
    ///
    /// The pass ends before this returns, so no binding outlives the call.
    pub fn dispatch<U: bytemuck::Pod>(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        kernel: KernelId,
        uniforms: &U,
        reads: &[&GridBuffer],
        writes: &[&GridBuffer],
        dims: GridDims,
    ) -> Result<(), SolverError> {
        let read_keys: Vec<SlotKey> = reads.iter().map(|b| b.key).collect();
        let write_keys: Vec<SlotKey> = writes.iter().map(|b| b.key).collect();
        check_bindings(kernel, &read_keys, &write_keys)?;
        if std::mem::size_of::<U>() != kernel.uniform_size() {
            return Err(SolverError::Binding {
                kernel: kernel.name(),
                message: format!(
                    "uniform block is {} bytes, kernel declares {}",
                    std::mem::size_of::<U>(),
                    kernel.uniform_size()
                ),
            });
        }

        let compiled = self.kernels.get(kernel);
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(kernel.name()),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries = Vec::with_capacity(1 + reads.len() + writes.len());
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        });
        for (i, field) in reads.iter().chain(writes).enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + i as u32,
                resource: field.buffer.as_entire_binding(),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name()),
            layout: &compiled.layout,
            entries: &entries,
        });

        let [wx, wy, wz] = dims.workgroups();
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(wx, wy, wz);
        }
        tracing::trace!(
            "dispatch {} reads={:?} writes={:?} workgroups={}x{}x{}",
            kernel.name(),
            read_keys,
            write_keys,
            wx,
            wy,
            wz
        );
        Ok(())
    }
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(field: FieldKind, slot: u8) -> SlotKey {
        SlotKey { field, slot }
    }

    #[test]
    fn test_valid_projection_binding() {
        let reads = [
            key(FieldKind::Velocity, 0),
            key(FieldKind::Pressure, 1),
            key(FieldKind::BoundaryMask, 0),
        ];
        let writes = [key(FieldKind::Velocity, 1)];
        assert!(check_bindings(KernelId::Projection, &reads, &writes).is_ok());
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let reads = [key(FieldKind::Velocity, 0)];
        let writes = [key(FieldKind::Velocity, 1)];
        let err = check_bindings(KernelId::Projection, &reads, &writes).unwrap_err();
        assert!(err.to_string().contains("expected 3 reads"), "{err}");
    }

    #[test]
    fn test_read_write_alias_rejected() {
        let reads = [key(FieldKind::Density, 0)];
        let writes = [key(FieldKind::Density, 0)];
        let err = check_bindings(KernelId::Impulse, &reads, &writes).unwrap_err();
        assert!(matches!(err, SolverError::Binding { kernel: "impulse", .. }));
    }

    #[test]
    fn test_format_mismatch_rejected() {
        // Velocity bound where the advected scalar belongs.
        let reads = [
            key(FieldKind::Velocity, 0),
            key(FieldKind::BoundaryMask, 0),
            key(FieldKind::Velocity, 0),
        ];
        let writes = [key(FieldKind::Density, 1)];
        assert!(check_bindings(KernelId::AdvectScalar, &reads, &writes).is_err());
    }

    #[test]
    fn test_mask_write_only_from_boundary_conditions() {
        let writes = [key(FieldKind::BoundaryMask, 0)];
        assert!(check_bindings(KernelId::BoundaryConditions, &[], &writes).is_ok());

        // Jacobi's single output is scalar, so a mask write fails either on
        // format or on the read-only rule; both are binding errors.
        let reads = [
            key(FieldKind::Pressure, 0),
            key(FieldKind::Divergence, 0),
            key(FieldKind::BoundaryMask, 0),
        ];
        assert!(check_bindings(KernelId::Jacobi, &reads, &writes).is_err());
    }

    #[test]
    fn test_layouts_cover_every_kernel() {
        for kernel in KernelId::ALL {
            assert!(!kernel.writes().is_empty(), "{} writes nothing", kernel.name());
            assert_eq!(kernel.uniform_size() % 16, 0);
            assert_eq!(KernelId::ALL[kernel.slot()], kernel);
        }
    }

    #[test]
    fn test_embedded_sources_declare_entry_points() {
        let sources = KernelSources::embedded();
        for kernel in KernelId::ALL {
            let src = sources.get(kernel);
            assert!(
                src.contains(&format!("fn {}(", kernel.entry_point())),
                "{} missing entry point",
                kernel.name()
            );
            assert!(src.contains("@workgroup_size(8, 8, 8)"));
        }
    }

    #[test]
    fn test_from_dir_reports_missing_file() {
        let dir = std::env::temp_dir().join("solver_missing_kernels_dir");
        let err = KernelSources::from_dir(&dir).unwrap_err();
        assert!(matches!(err, SolverError::ShaderSource { .. }));
    }
}
