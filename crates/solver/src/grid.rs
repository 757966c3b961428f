//! Grid extents shared by every field of a simulation.

use crate::error::SolverError;

/// Edge length of a compute workgroup. Every kernel is declared with
/// `@workgroup_size(8, 8, 8)`.
pub const WORKGROUP_EDGE: u32 = 8;

/// Cell counts along each axis of the simulation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDims {
    /// Cells along x.
    pub width: u32,
    /// Cells along y (up).
    pub height: u32,
    /// Cells along z.
    pub depth: u32,
}

impl GridDims {
    /// Build the `(W, 2W, W)` domain used by the solver for a configured size `W`.
    ///
    /// The domain is twice as tall as it is wide so a plume has room to rise.
    pub fn from_size(size: u32) -> Result<Self, SolverError> {
        if size == 0 {
            return Err(SolverError::InvalidGridSize(
                "grid size must be a positive integer".into(),
            ));
        }
        let height = size
            .checked_mul(2)
            .ok_or_else(|| SolverError::InvalidGridSize(format!("grid size {size} overflows")))?;
        Self::new(size, height, size)
    }

    /// Build arbitrary extents. All three must be positive.
    pub fn new(width: u32, height: u32, depth: u32) -> Result<Self, SolverError> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(SolverError::InvalidGridSize(format!(
                "grid dimensions must be positive, got {width}x{height}x{depth}"
            )));
        }
        let dims = Self { width, height, depth };
        if u32::try_from(dims.cell_count_u64()).is_err() {
            return Err(SolverError::InvalidGridSize(format!(
                "{width}x{height}x{depth} exceeds the addressable cell count"
            )));
        }
        Ok(dims)
    }

    fn cell_count_u64(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.cell_count_u64() as usize
    }

    /// Linear index of cell `(x, y, z)`; x varies fastest.
    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        x as usize
            + y as usize * self.width as usize
            + z as usize * self.width as usize * self.height as usize
    }

    /// Inverse of [`GridDims::index`].
    #[inline]
    pub fn coords(&self, index: usize) -> [u32; 3] {
        let w = self.width as usize;
        let slab = w * self.height as usize;
        [
            (index % w) as u32,
            ((index % slab) / w) as u32,
            (index / slab) as u32,
        ]
    }

    /// True for cells on the outer shell of the domain.
    pub fn is_border(&self, x: u32, y: u32, z: u32) -> bool {
        x == 0
            || y == 0
            || z == 0
            || x == self.width - 1
            || y == self.height - 1
            || z == self.depth - 1
    }

    /// Workgroups to launch per axis: `ceil(dims / 8)`.
    pub fn workgroups(&self) -> [u32; 3] {
        [
            self.width.div_ceil(WORKGROUP_EDGE),
            self.height.div_ceil(WORKGROUP_EDGE),
            self.depth.div_ceil(WORKGROUP_EDGE),
        ]
    }

    /// Extents as the `vec4<u32>` header every uniform block starts with.
    pub fn as_uniform(&self) -> [u32; 4] {
        [self.width, self.height, self.depth, 0]
    }

    /// Position of the smoke source: horizontally centred, a tenth of the way up.
    pub fn impulse_source(&self) -> [f32; 3] {
        [
            0.5 * self.width as f32,
            0.1 * self.height as f32,
            0.5 * self.depth as f32,
        ]
    }

    /// Impulse radius in cells for a radius expressed as a fraction of `W + H + D`.
    pub fn impulse_radius_cells(&self, fraction: f32) -> f32 {
        fraction * (self.width + self.height + self.depth) as f32
    }
}

impl std::fmt::Display for GridDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}
