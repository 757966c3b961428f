//! Frame throughput benchmark
//!
//! Measures frames/second of the full schedule for several grid sizes.
//!
//! Run with: cargo bench -p solver --bench step_throughput

use std::time::Instant;

use solver::{gpu_available, FluidSolver, GpuContext, KernelSources, SimulationParams};

const WARMUP_FRAMES: usize = 5;
const TIMED_FRAMES: usize = 100;

fn benchmark(size: u32) -> Option<f64> {
    let context = match GpuContext::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("  W={size}: {e}");
            return None;
        }
    };
    let mut solver = match FluidSolver::new(
        context,
        size,
        SimulationParams::default(),
        &KernelSources::embedded(),
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("  W={size}: {e}");
            return None;
        }
    };

    for _ in 0..WARMUP_FRAMES {
        solver.step(0.1).ok()?;
    }
    solver.sync();

    let start = Instant::now();
    for _ in 0..TIMED_FRAMES {
        solver.step(0.1).ok()?;
    }
    solver.sync();
    let elapsed = start.elapsed().as_secs_f64();
    Some(TIMED_FRAMES as f64 / elapsed)
}

fn main() {
    if !gpu_available() {
        eprintln!("No GPU adapter available, skipping benchmark");
        return;
    }

    println!("=== Smoke solver frame throughput ===");
    println!("{:>6} {:>14} {:>12} {:>12}", "W", "grid", "frames/s", "ms/frame");
    for size in [16u32, 32, 64, 96] {
        let dims = format!("{}x{}x{}", size, 2 * size, size);
        match benchmark(size) {
            Some(fps) => println!("{:>6} {:>14} {:>12.1} {:>12.3}", size, dims, fps, 1000.0 / fps),
            None => println!("{:>6} {:>14} {:>12} {:>12}", size, dims, "failed", "-"),
        }
    }
}
