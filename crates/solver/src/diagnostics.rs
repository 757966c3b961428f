//! CPU-side measurements over read-back fields.
//!
//! Nothing here advances the simulation; these functions summarise field
//! contents for logging, snapshots and tests.

use crate::grid::GridDims;

/// Summary of the solver state after a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldDiagnostics {
    /// Sum of density over all cells.
    pub total_density: f64,
    /// Largest velocity magnitude.
    pub max_speed: f32,
    /// L2 norm of the divergence field from the last divergence pass.
    pub divergence_l2: f64,
}

/// Sum of a scalar field, accumulated in f64.
pub fn total(values: &[f32]) -> f64 {
    values.iter().map(|&v| v as f64).sum()
}

/// Euclidean norm of a scalar field.
pub fn l2_norm(values: &[f32]) -> f64 {
    values.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt()
}

/// Largest `|xyz|` among vec4 cells.
pub fn max_magnitude(cells: &[[f32; 4]]) -> f32 {
    cells
        .iter()
        .map(|c| (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt())
        .fold(0.0, f32::max)
}

/// Value-weighted mean y coordinate of a scalar field, or `None` if the
/// field sums to zero.
pub fn centroid_y(dims: GridDims, values: &[f32]) -> Option<f64> {
    let mut weight = 0.0f64;
    let mut moment = 0.0f64;
    for (i, &v) in values.iter().enumerate() {
        let [_, y, _] = dims.coords(i);
        weight += v as f64;
        moment += v as f64 * y as f64;
    }
    (weight.abs() > f64::EPSILON).then(|| moment / weight)
}

/// L2 norm of `∇²p - div` over fluid cells.
///
/// Matches the pressure stencil: a neighbour that is solid, or lies
/// outside the grid, contributes the centre pressure, so its term vanishes.
pub fn poisson_residual(dims: GridDims, pressure: &[f32], divergence: &[f32], mask: &[i32]) -> f64 {
    let n = dims.cell_count();
    debug_assert!(pressure.len() >= n && divergence.len() >= n && mask.len() >= n);

    let mut sum_sq = 0.0f64;
    for z in 0..dims.depth {
        for y in 0..dims.height {
            for x in 0..dims.width {
                let c = dims.index(x, y, z);
                if mask[c] != 0 {
                    continue;
                }
                let pc = pressure[c] as f64;
                let mut lap = 0.0f64;
                for (nx, ny, nz) in neighbours(dims, x, y, z) {
                    let n_idx = dims.index(nx, ny, nz);
                    if n_idx != c && mask[n_idx] == 0 {
                        lap += pressure[n_idx] as f64 - pc;
                    }
                }
                let r = lap - divergence[c] as f64;
                sum_sq += r * r;
            }
        }
    }
    sum_sq.sqrt()
}

fn neighbours(dims: GridDims, x: u32, y: u32, z: u32) -> [(u32, u32, u32); 6] {
    [
        (x.saturating_sub(1), y, z),
        ((x + 1).min(dims.width - 1), y, z),
        (x, y.saturating_sub(1), z),
        (x, (y + 1).min(dims.height - 1), z),
        (x, y, z.saturating_sub(1)),
        (x, y, (z + 1).min(dims.depth - 1)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn border_mask(dims: GridDims) -> Vec<i32> {
        (0..dims.cell_count())
            .map(|i| {
                let [x, y, z] = dims.coords(i);
                dims.is_border(x, y, z) as i32
            })
            .collect()
    }

    #[test]
    fn test_total_and_norm() {
        assert_eq!(total(&[1.0, 2.0, -0.5]), 2.5);
        assert!((l2_norm(&[3.0, 4.0]) - 5.0).abs() < 1e-12);
        assert_eq!(l2_norm(&[]), 0.0);
    }

    #[test]
    fn test_max_magnitude_ignores_w() {
        let cells = [[0.0, 3.0, 4.0, 100.0], [1.0, 0.0, 0.0, 0.0]];
        assert_eq!(max_magnitude(&cells), 5.0);
        assert_eq!(max_magnitude(&[]), 0.0);
    }

    #[test]
    fn test_centroid() {
        let dims = GridDims::new(1, 4, 1).unwrap();
        assert_eq!(centroid_y(dims, &[0.0, 1.0, 0.0, 1.0]), Some(2.0));
        assert_eq!(centroid_y(dims, &[0.0; 4]), None);
    }

    #[test]
    fn test_residual_of_zero_problem_is_zero() {
        let dims = GridDims::from_size(4).unwrap();
        let n = dims.cell_count();
        let mask = border_mask(dims);
        assert_eq!(poisson_residual(dims, &vec![0.0; n], &vec![0.0; n], &mask), 0.0);
    }

    #[test]
    fn test_residual_constant_pressure_leaves_divergence() {
        // A uniform pressure has zero Laplacian, so the residual is |div|.
        let dims = GridDims::from_size(4).unwrap();
        let n = dims.cell_count();
        let mask = border_mask(dims);
        let mut div = vec![0.0; n];
        div[dims.index(1, 2, 1)] = 3.0;
        div[dims.index(2, 5, 2)] = -4.0;
        let r = poisson_residual(dims, &vec![7.0; n], &div, &mask);
        assert!((r - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_residual_skips_solid_neighbours() {
        let dims = GridDims::new(3, 3, 3).unwrap();
        let n = dims.cell_count();
        let mask = border_mask(dims);
        // Only the centre is fluid; every neighbour is solid, so pressure
        // there cannot matter.
        let mut p = vec![0.0; n];
        for (i, v) in p.iter_mut().enumerate() {
            *v = i as f32;
        }
        let r = poisson_residual(dims, &p, &vec![0.0; n], &mask);
        assert_eq!(r, 0.0);
    }
}
