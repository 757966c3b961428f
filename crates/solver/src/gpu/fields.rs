//! Field store: every grid buffer the solver owns.
//!
//! Velocity, density, temperature, pressure and scratch are double-buffered.
//! Divergence, vorticity and the boundary mask are single buffers. All of
//! them are storage buffers with one cell per element, `x` varying fastest.

use crate::error::SolverError;
use crate::grid::GridDims;

/// Every field the solver keeps on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Velocity,
    Density,
    Temperature,
    Pressure,
    Divergence,
    Vorticity,
    BoundaryMask,
    Scratch,
}

impl FieldKind {
    pub const ALL: [FieldKind; 8] = [
        FieldKind::Velocity,
        FieldKind::Density,
        FieldKind::Temperature,
        FieldKind::Pressure,
        FieldKind::Divergence,
        FieldKind::Vorticity,
        FieldKind::BoundaryMask,
        FieldKind::Scratch,
    ];

    /// Element type of one cell, fixed for the lifetime of the store.
    pub fn format(self) -> CellFormat {
        match self {
            FieldKind::Velocity | FieldKind::Vorticity | FieldKind::Scratch => CellFormat::Vector,
            FieldKind::Density
            | FieldKind::Temperature
            | FieldKind::Pressure
            | FieldKind::Divergence => CellFormat::Scalar,
            FieldKind::BoundaryMask => CellFormat::Mask,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FieldKind::Velocity => "velocity",
            FieldKind::Density => "density",
            FieldKind::Temperature => "temperature",
            FieldKind::Pressure => "pressure",
            FieldKind::Divergence => "divergence",
            FieldKind::Vorticity => "vorticity",
            FieldKind::BoundaryMask => "boundary_mask",
            FieldKind::Scratch => "scratch",
        }
    }

    /// The double-buffered handle for this field, if it has one.
    pub fn double(self) -> Option<DoubleField> {
        match self {
            FieldKind::Velocity => Some(DoubleField::Velocity),
            FieldKind::Density => Some(DoubleField::Density),
            FieldKind::Temperature => Some(DoubleField::Temperature),
            FieldKind::Pressure => Some(DoubleField::Pressure),
            FieldKind::Scratch => Some(DoubleField::Scratch),
            FieldKind::Divergence | FieldKind::Vorticity | FieldKind::BoundaryMask => None,
        }
    }
}

/// Fields that have a READ and a WRITE slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoubleField {
    Velocity,
    Density,
    Temperature,
    Pressure,
    Scratch,
}

impl DoubleField {
    pub const ALL: [DoubleField; 5] = [
        DoubleField::Velocity,
        DoubleField::Density,
        DoubleField::Temperature,
        DoubleField::Pressure,
        DoubleField::Scratch,
    ];

    pub fn kind(self) -> FieldKind {
        match self {
            DoubleField::Velocity => FieldKind::Velocity,
            DoubleField::Density => FieldKind::Density,
            DoubleField::Temperature => FieldKind::Temperature,
            DoubleField::Pressure => FieldKind::Pressure,
            DoubleField::Scratch => FieldKind::Scratch,
        }
    }
}

/// Per-cell element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFormat {
    /// `f32`
    Scalar,
    /// `vec4<f32>`, xyz used
    Vector,
    /// `i32`, 1 = solid
    Mask,
}

impl CellFormat {
    pub fn bytes_per_cell(self) -> u64 {
        match self {
            CellFormat::Scalar | CellFormat::Mask => 4,
            CellFormat::Vector => 16,
        }
    }
}

/// Identity of one physical buffer: which field, and which of its slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub field: FieldKind,
    pub slot: u8,
}

/// One storage buffer holding a whole field.
#[derive(Debug)]
pub struct GridBuffer {
    pub key: SlotKey,
    pub format: CellFormat,
    pub buffer: wgpu::Buffer,
    pub cells: usize,
}

impl GridBuffer {
    fn new(device: &wgpu::Device, dims: GridDims, field: FieldKind, slot: u8) -> Self {
        let format = field.format();
        let cells = dims.cell_count();
        let label = format!("{}_{}", field.label(), slot);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&label),
            size: cells as u64 * format.bytes_per_cell(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { key: SlotKey { field, slot }, format, buffer, cells }
    }

    pub fn size_bytes(&self) -> u64 {
        self.cells as u64 * self.format.bytes_per_cell()
    }
}

/// Two slots and the index of the one currently read.
///
/// `swap` flips the index and never touches the slots themselves.
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    read: usize,
}

impl<T> DoubleBuffer<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { slots: [first, second], read: 0 }
    }

    pub fn read(&self) -> &T {
        &self.slots[self.read]
    }

    pub fn write(&self) -> &T {
        &self.slots[1 - self.read]
    }

    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}

/// Owner of every field buffer of one solver.
pub struct FieldStore {
    dims: GridDims,
    velocity: DoubleBuffer<GridBuffer>,
    density: DoubleBuffer<GridBuffer>,
    temperature: DoubleBuffer<GridBuffer>,
    pressure: DoubleBuffer<GridBuffer>,
    scratch: DoubleBuffer<GridBuffer>,
    divergence: GridBuffer,
    vorticity: GridBuffer,
    boundary: GridBuffer,
    released: bool,
}

impl FieldStore {
    /// Create every field at `dims`.
    ///
    /// Buffer creation runs inside out-of-memory and validation error scopes;
    /// a captured error is returned as [`SolverError::Allocation`] and the
    /// buffers created so far are dropped with the partially built store.
    pub fn allocate(device: &wgpu::Device, dims: GridDims) -> Result<Self, SolverError> {
        if dims.cell_count() == 0 {
            return Err(SolverError::InvalidGridSize(format!("{dims} has no cells")));
        }

        let largest = dims.cell_count() as u64 * CellFormat::Vector.bytes_per_cell();
        let limits = device.limits();
        let max_binding = limits.max_storage_buffer_binding_size as u64;
        if largest > max_binding || largest > limits.max_buffer_size {
            return Err(SolverError::Allocation(format!(
                "{dims} needs {largest} byte buffers, device allows {}",
                max_binding.min(limits.max_buffer_size)
            )));
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let double = |field| {
            DoubleBuffer::new(
                GridBuffer::new(device, dims, field, 0),
                GridBuffer::new(device, dims, field, 1),
            )
        };
        let store = Self {
            dims,
            velocity: double(FieldKind::Velocity),
            density: double(FieldKind::Density),
            temperature: double(FieldKind::Temperature),
            pressure: double(FieldKind::Pressure),
            scratch: double(FieldKind::Scratch),
            divergence: GridBuffer::new(device, dims, FieldKind::Divergence, 0),
            vorticity: GridBuffer::new(device, dims, FieldKind::Vorticity, 0),
            boundary: GridBuffer::new(device, dims, FieldKind::BoundaryMask, 0),
            released: false,
        };

        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(err) = oom.or(validation) {
            return Err(SolverError::Allocation(err.to_string()));
        }

        tracing::info!(
            "Allocated fields at {} ({:.1} MiB)",
            dims,
            store.total_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(store)
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    fn double_ref(&self, field: DoubleField) -> &DoubleBuffer<GridBuffer> {
        match field {
            DoubleField::Velocity => &self.velocity,
            DoubleField::Density => &self.density,
            DoubleField::Temperature => &self.temperature,
            DoubleField::Pressure => &self.pressure,
            DoubleField::Scratch => &self.scratch,
        }
    }

    pub fn read(&self, field: DoubleField) -> &GridBuffer {
        self.double_ref(field).read()
    }

    pub fn write(&self, field: DoubleField) -> &GridBuffer {
        self.double_ref(field).write()
    }

    /// Exchange the READ and WRITE roles of `field`.
    pub fn swap(&mut self, field: DoubleField) {
        match field {
            DoubleField::Velocity => self.velocity.swap(),
            DoubleField::Density => self.density.swap(),
            DoubleField::Temperature => self.temperature.swap(),
            DoubleField::Pressure => self.pressure.swap(),
            DoubleField::Scratch => self.scratch.swap(),
        }
    }

    /// READ slot of a double-buffered field, or the single buffer otherwise.
    pub fn current(&self, kind: FieldKind) -> &GridBuffer {
        match kind {
            FieldKind::Velocity => self.velocity.read(),
            FieldKind::Density => self.density.read(),
            FieldKind::Temperature => self.temperature.read(),
            FieldKind::Pressure => self.pressure.read(),
            FieldKind::Scratch => self.scratch.read(),
            FieldKind::Divergence => &self.divergence,
            FieldKind::Vorticity => &self.vorticity,
            FieldKind::BoundaryMask => &self.boundary,
        }
    }

    /// Every buffer, each exactly once.
    pub fn all_buffers(&self) -> Vec<&GridBuffer> {
        let mut out: Vec<&GridBuffer> = DoubleField::ALL
            .iter()
            .flat_map(|&f| self.double_ref(f).slots().iter())
            .collect();
        out.extend([&self.divergence, &self.vorticity, &self.boundary]);
        out
    }

    /// Every buffer zeroed by a clear: all but the boundary mask.
    pub fn clearable_buffers(&self) -> impl Iterator<Item = &GridBuffer> {
        self.all_buffers()
            .into_iter()
            .filter(|b| b.key.field != FieldKind::BoundaryMask)
    }

    pub fn total_bytes(&self) -> u64 {
        self.all_buffers().iter().map(|b| b.size_bytes()).sum()
    }

    /// Destroy every buffer now instead of waiting for drop. Safe to call twice.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        for buffer in self.all_buffers() {
            buffer.buffer.destroy();
        }
        self.released = true;
        tracing::debug!("Released fields at {}", self.dims);
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Overwrite the READ slot (or single buffer) of `kind` with `data`.
    pub fn upload<T: bytemuck::Pod>(
        &self,
        queue: &wgpu::Queue,
        kind: FieldKind,
        data: &[T],
    ) -> Result<(), SolverError> {
        let target = self.current(kind);
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as u64 != target.size_bytes() {
            return Err(SolverError::InvalidGridSize(format!(
                "upload to {} expects {} bytes, got {}",
                kind.label(),
                target.size_bytes(),
                bytes.len()
            )));
        }
        queue.write_buffer(&target.buffer, 0, bytes);
        Ok(())
    }

    pub fn read_scalar(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kind: FieldKind,
    ) -> Result<Vec<f32>, SolverError> {
        self.read_as(device, queue, kind, CellFormat::Scalar)
    }

    pub fn read_vector(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kind: FieldKind,
    ) -> Result<Vec<[f32; 4]>, SolverError> {
        self.read_as(device, queue, kind, CellFormat::Vector)
    }

    pub fn read_mask(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<i32>, SolverError> {
        self.read_as(device, queue, FieldKind::BoundaryMask, CellFormat::Mask)
    }

    fn read_as<T: bytemuck::Pod>(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kind: FieldKind,
        expected: CellFormat,
    ) -> Result<Vec<T>, SolverError> {
        if kind.format() != expected {
            return Err(SolverError::Readback(format!(
                "{} holds {:?} cells, requested {:?}",
                kind.label(),
                kind.format(),
                expected
            )));
        }
        let source = self.current(kind);
        read_buffer(device, queue, &source.buffer, source.size_bytes())
    }
}

/// Copy `size` bytes of `source` into a staging buffer and block until mapped.
pub(crate) fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<T>, SolverError> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        // Receiver outlives the poll below.
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| SolverError::Readback(e.to_string()))?
        .map_err(|e| SolverError::Readback(e.to_string()))?;

    let data = slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_is_self_inverse() {
        let mut buf = DoubleBuffer::new("a", "b");
        assert_eq!((*buf.read(), *buf.write()), ("a", "b"));
        buf.swap();
        assert_eq!((*buf.read(), *buf.write()), ("b", "a"));
        buf.swap();
        assert_eq!((*buf.read(), *buf.write()), ("a", "b"));
    }

    #[test]
    fn test_swap_leaves_slots_in_place() {
        let mut buf = DoubleBuffer::new(1, 2);
        buf.swap();
        assert_eq!(buf.slots(), &[1, 2]);
    }

    #[test]
    fn test_formats() {
        assert_eq!(FieldKind::Velocity.format(), CellFormat::Vector);
        assert_eq!(FieldKind::Pressure.format(), CellFormat::Scalar);
        assert_eq!(FieldKind::BoundaryMask.format(), CellFormat::Mask);
        assert_eq!(CellFormat::Vector.bytes_per_cell(), 16);
        assert_eq!(CellFormat::Mask.bytes_per_cell(), 4);
    }

    #[test]
    fn test_double_fields_roundtrip_kind() {
        for field in DoubleField::ALL {
            assert_eq!(field.kind().double(), Some(field));
        }
        let singles = FieldKind::ALL.iter().filter(|k| k.double().is_none()).count();
        assert_eq!(singles, 3);
    }
}
