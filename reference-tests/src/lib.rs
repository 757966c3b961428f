//! Reference test framework for smoke simulation validation
//!
//! Each reference test loads a scenario config, runs the full frame
//! schedule on the GPU for a fixed number of frames, reads the fields back
//! and validates them against physical expectations.


use orchestrator::config::SimulationConfig;
use orchestrator::create_solver;
use solver::diagnostics::centroid_y;
use solver::{FieldDiagnostics, FieldKind, FluidSolver, GridDims, SolverError};
use std::path::Path;

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Every field value must be finite
    pub finite_fields: bool,
    /// Velocity on boundary cells
    pub wall_velocity: Option<WallVelocityCheck>,
    /// Density at the impulse source
    pub source_density: Option<SourceDensityCheck>,
    /// Upward motion of the density centroid
    pub plume_rise: Option<PlumeRiseCheck>,
}

/// Check that boundary cells carry no velocity
#[derive(Debug, Clone)]
pub struct WallVelocityCheck {
    /// Largest allowed speed on a boundary cell
    pub max_speed: f32,
}

/// Check that the source cell holds smoke
#[derive(Debug, Clone)]
pub struct SourceDensityCheck {
    /// Smallest allowed density at the source cell
    pub min_density: f32,
}

/// Check that smoke has risen above the source
#[derive(Debug, Clone)]
pub struct PlumeRiseCheck {
    /// Required height of the density centroid above the source, in cells
    pub min_rise: f64,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Diagnostics of the final state
    pub diagnostics: FieldDiagnostics,
    /// Grid the test ran on
    pub dims: GridDims,
    /// Number of frames executed
    pub frames: u64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Error message if failed
    pub message: Option<String>,
}

impl CheckResult {
    fn pass(name: &str, message: String) -> Self {
        Self { name: name.to_string(), passed: true, message: Some(message) }
    }

    fn fail(name: &str, message: String) -> Self {
        Self { name: name.to_string(), passed: false, message: Some(message) }
    }
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Number of frames to run
    pub frames: u64,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

/// Final field contents needed by the checks
struct FinalState {
    dims: GridDims,
    density: Vec<f32>,
    temperature: Vec<f32>,
    pressure: Vec<f32>,
    velocity: Vec<[f32; 4]>,
    mask: Vec<i32>,
}

impl FinalState {
    fn read(solver: &FluidSolver) -> Result<Self, String> {
        let err = |e: SolverError| e.to_string();
        Ok(Self {
            dims: solver.dims(),
            density: solver.read_density().map_err(err)?,
            temperature: solver.read_scalar(FieldKind::Temperature).map_err(err)?,
            pressure: solver.read_scalar(FieldKind::Pressure).map_err(err)?,
            velocity: solver.read_vector(FieldKind::Velocity).map_err(err)?,
            mask: solver.read_mask().map_err(err)?,
        })
    }
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> Result<TestResult, String> {
        tracing::info!("Running reference test: {}", self.name);

        let config = SimulationConfig::load(&self.config_path)?;
        let config_dir = Path::new(&self.config_path)
            .parent()
            .ok_or("Invalid config path")?;
        let mut solver = create_solver(&config, config_dir).map_err(|e| e.to_string())?;

        tracing::info!("Running {} frames on grid {}...", self.frames, solver.dims());
        for frame in 0..self.frames {
            solver.step(config.frame_dt).map_err(|e| e.to_string())?;

            // Log progress every 25% of frames
            if (frame + 1) % (self.frames / 4).max(1) == 0 {
                tracing::info!("Progress: frame {}/{}", frame + 1, self.frames);
            }
        }

        let diagnostics = solver.diagnostics().map_err(|e| e.to_string())?;
        let state = FinalState::read(&solver)?;
        solver.shutdown();

        let mut checks = Vec::new();

        if self.expected.finite_fields {
            checks.push(validate_finite(&state));
        }

        if let Some(ref check) = self.expected.wall_velocity {
            checks.push(validate_wall_velocity(&state, check));
        }

        if let Some(ref check) = self.expected.source_density {
            checks.push(validate_source_density(&state, check));
        }

        if let Some(ref check) = self.expected.plume_rise {
            checks.push(validate_plume_rise(&state, check));
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            diagnostics,
            dims: state.dims,
            frames: self.frames,
        })
    }
}

/// Validate that no field holds NaN or infinity
fn validate_finite(state: &FinalState) -> CheckResult {
    let scalars = [
        ("density", &state.density),
        ("temperature", &state.temperature),
        ("pressure", &state.pressure),
    ];
    for (name, values) in scalars {
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return CheckResult::fail(
                "Finite Fields",
                format!("{} is {} at cell {:?}", name, values[i], state.dims.coords(i)),
            );
        }
    }
    if let Some(i) = state.velocity.iter().position(|v| v.iter().any(|c| !c.is_finite())) {
        return CheckResult::fail(
            "Finite Fields",
            format!("velocity is {:?} at cell {:?}", state.velocity[i], state.dims.coords(i)),
        );
    }
    CheckResult::pass("Finite Fields", format!("{} cells", state.dims.cell_count()))
}

/// Validate that boundary cells are at rest
fn validate_wall_velocity(state: &FinalState, check: &WallVelocityCheck) -> CheckResult {
    let mut walls = 0usize;
    let mut worst = 0.0f32;
    for (v, &m) in state.velocity.iter().zip(&state.mask) {
        if m != 0 {
            walls += 1;
            worst = worst.max((v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt());
        }
    }

    if walls == 0 {
        return CheckResult::fail("Wall Velocity", "No boundary cells in mask".to_string());
    }
    if worst <= check.max_speed {
        CheckResult::pass("Wall Velocity", format!("{} wall cells, max speed {:.3e}", walls, worst))
    } else {
        CheckResult::fail(
            "Wall Velocity",
            format!("max speed {:.3e} on walls (limit: {:.3e})", worst, check.max_speed),
        )
    }
}

/// Validate that smoke is present at the source
fn validate_source_density(state: &FinalState, check: &SourceDensityCheck) -> CheckResult {
    let [sx, sy, sz] = state.dims.impulse_source();
    let idx = state.dims.index(sx as u32, sy as u32, sz as u32);
    let value = state.density[idx];
    if value >= check.min_density {
        CheckResult::pass("Source Density", format!("{:.4} at source", value))
    } else {
        CheckResult::fail(
            "Source Density",
            format!("{:.4} at source (minimum: {:.4})", value, check.min_density),
        )
    }
}

/// Validate that the density centroid sits above the source
fn validate_plume_rise(state: &FinalState, check: &PlumeRiseCheck) -> CheckResult {
    let source_y = state.dims.impulse_source()[1] as f64;
    let Some(centroid) = centroid_y(state.dims, &state.density) else {
        return CheckResult::fail("Plume Rise", "Density field is empty".to_string());
    };

    let rise = centroid - source_y;
    if rise >= check.min_rise {
        CheckResult::pass(
            "Plume Rise",
            format!("centroid y={:.2}, {:.2} cells above source", centroid, rise),
        )
    } else {
        CheckResult::fail(
            "Plume Rise",
            format!("centroid y={:.2}, rise {:.2} cells (required: {:.2})", centroid, rise, check.min_rise),
        )
    }
}

impl TestResult {
    /// Print a human-readable summary
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Grid: {}", self.dims);
        println!("Frames: {}", self.frames);
        println!("\nDiagnostics:");
        println!("  Total density: {:.4}", self.diagnostics.total_density);
        println!("  Max speed: {:.4}", self.diagnostics.max_speed);
        println!("  Divergence L2: {:.3e}", self.diagnostics.divergence_l2);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}

/// Scenarios shipped with the repository, with `configs/` under `root`
pub fn all_tests(root: &Path) -> Vec<ReferenceTest> {
    let config = |name: &str| root.join("configs").join(name).to_string_lossy().to_string();
    vec![
        ReferenceTest {
            name: "Plume Rise".to_string(),
            config_path: config("smoke-plume-16.json"),
            frames: 120,
            expected: ExpectedResult {
                finite_fields: true,
                wall_velocity: Some(WallVelocityCheck { max_speed: 1e-6 }),
                source_density: Some(SourceDensityCheck { min_density: 1e-3 }),
                plume_rise: Some(PlumeRiseCheck { min_rise: 1.0 }),
            },
        },
        ReferenceTest {
            name: "Early Source".to_string(),
            config_path: config("smoke-plume-16.json"),
            frames: 5,
            expected: ExpectedResult {
                finite_fields: true,
                wall_velocity: Some(WallVelocityCheck { max_speed: 1e-6 }),
                source_density: Some(SourceDensityCheck { min_density: 0.1 }),
                plume_rise: None,
            },
        },
    ]
}
