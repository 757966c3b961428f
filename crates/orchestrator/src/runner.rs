//! Simulation runner with lifecycle management
//!
//! This module provides the `SimulationRunner` which advances a solver on a
//! background thread, with start, pause, resume, stop and status tracking.
//! Frames never overlap: the thread records one frame at a time.

use solver::{FieldDiagnostics, SimulationKernel};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Kernel type the runner owns and hands back from [`SimulationRunner::join`]
pub type BoxedKernel = Box<dyn SimulationKernel + Send>;

/// Runner state enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Simulation paused
    Paused,
    /// Simulation finished (reached stopping condition or stopped)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// Stopping and reporting options for the background loop
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Stop after this many frames
    pub max_frames: Option<u64>,
    /// `dt` passed to every `step`
    pub frame_dt: f32,
    /// Frames between diagnostics readbacks; 0 disables them
    pub diagnostics_interval: u64,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_frames: None,
            frame_dt: 1.0 / 60.0,
            diagnostics_interval: 0,
        }
    }
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    frame_count: u64,
    error_message: Option<String>,
    last_diagnostics: Option<FieldDiagnostics>,
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    thread_handle: Option<thread::JoinHandle<BoxedKernel>>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    // A panic on the loop thread leaves the state readable.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulationRunner {
    /// Move `kernel` onto a background thread that waits for [`start`](Self::start).
    pub fn new(kernel: BoxedKernel, options: RunnerOptions) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            frame_count: kernel.frame_count(),
            error_message: None,
            last_diagnostics: None,
        }));

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || {
            let mut kernel = kernel;
            run_simulation_loop(kernel.as_mut(), &shared_clone, options);
            kernel
        });

        Self {
            shared,
            thread_handle: Some(thread_handle),
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state.clone()
    }

    /// Frames completed so far
    pub fn frame_count(&self) -> u64 {
        lock(&self.shared).frame_count
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Diagnostics from the most recent periodic readback
    pub fn last_diagnostics(&self) -> Option<FieldDiagnostics> {
        lock(&self.shared).last_diagnostics
    }

    /// Pause the simulation
    pub fn pause(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Running {
            state.state = RunnerState::Paused;
        }
    }

    /// Resume the simulation
    pub fn resume(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Paused {
            state.state = RunnerState::Running;
        }
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut state = lock(&self.shared);
        if state.state == RunnerState::Created {
            state.state = RunnerState::Running;
        }
    }

    /// Ask the loop to exit after the current frame
    pub fn stop(&self) {
        let mut state = lock(&self.shared);
        if matches!(
            state.state,
            RunnerState::Created | RunnerState::Running | RunnerState::Paused
        ) {
            state.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread and take the kernel back.
    ///
    /// A runner that was never started is stopped first. A running one
    /// without `max_frames` blocks until another handle calls `stop`.
    pub fn join(mut self) -> Result<BoxedKernel, String> {
        {
            let mut state = lock(&self.shared);
            if state.state == RunnerState::Created {
                state.state = RunnerState::Finished;
            }
        }
        let handle = self
            .thread_handle
            .take()
            .ok_or_else(|| "Runner already joined".to_string())?;
        handle.join().map_err(|_| "Thread panicked".to_string())
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Set state to Finished to signal thread to exit
        let mut state = lock(&self.shared);
        if matches!(
            state.state,
            RunnerState::Created | RunnerState::Running | RunnerState::Paused
        ) {
            state.state = RunnerState::Finished;
        }
    }
}

/// Main simulation loop executed in background thread
fn run_simulation_loop(kernel: &mut dyn SimulationKernel, shared: &Mutex<SharedState>, options: RunnerOptions) {
    // Wait for start signal
    loop {
        let state = lock(shared).state.clone();
        match state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return, // Exit if finished or error
        }
    }

    let dims = kernel.grid_dims();
    tracing::info!("Simulation thread started: grid {}", dims);
    let start_wall_time = Instant::now();

    loop {
        let current_state = lock(shared).state.clone();

        match current_state {
            RunnerState::Running => {
                if let Err(e) = kernel.step(options.frame_dt) {
                    tracing::error!("Frame {} failed: {}", kernel.frame_count(), e);
                    let mut guard = lock(shared);
                    guard.state = RunnerState::Error;
                    guard.error_message = Some(e.to_string());
                    break;
                }
                let frame_count = kernel.frame_count();
                lock(shared).frame_count = frame_count;

                if options.diagnostics_interval > 0 && frame_count % options.diagnostics_interval == 0 {
                    match kernel.diagnostics() {
                        Ok(diag) => {
                            let wall_time = start_wall_time.elapsed().as_secs_f64();
                            tracing::debug!(
                                "Frame {}: density={:.4}, max_speed={:.4}, div_l2={:.3e}, wall_time={:.2}s",
                                frame_count,
                                diag.total_density,
                                diag.max_speed,
                                diag.divergence_l2,
                                wall_time,
                            );
                            lock(shared).last_diagnostics = Some(diag);
                        }
                        Err(e) => tracing::warn!("Diagnostics readback failed: {}", e),
                    }
                }

                if let Some(max_frames) = options.max_frames {
                    if frame_count >= max_frames {
                        tracing::info!("Simulation finished: reached max_frames = {}", max_frames);
                        lock(shared).state = RunnerState::Finished;
                        break;
                    }
                }
            }
            RunnerState::Paused => {
                // Wait while paused
                thread::sleep(Duration::from_millis(20));
            }
            RunnerState::Finished | RunnerState::Error | RunnerState::Created => break,
        }
    }

    let wall_time = start_wall_time.elapsed().as_secs_f64();
    let frames = kernel.frame_count();
    tracing::info!(
        "Simulation thread exiting: {} frames in {:.2}s ({:.1} frames/s)",
        frames,
        wall_time,
        if wall_time > 0.0 { frames as f64 / wall_time } else { 0.0 },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use solver::{GridDims, SolverError};

    /// CPU stand-in that counts frames and can be told to fail.
    struct CountingKernel {
        frames: u64,
        fail_at: Option<u64>,
        frame_delay: Duration,
    }

    impl CountingKernel {
        fn new() -> Self {
            Self { frames: 0, fail_at: None, frame_delay: Duration::ZERO }
        }
    }

    impl SimulationKernel for CountingKernel {
        fn step(&mut self, _dt: f32) -> Result<(), SolverError> {
            if Some(self.frames) == self.fail_at {
                return Err(SolverError::Readback("device lost".into()));
            }
            thread::sleep(self.frame_delay);
            self.frames += 1;
            Ok(())
        }

        fn frame_count(&self) -> u64 {
            self.frames
        }

        fn grid_dims(&self) -> GridDims {
            GridDims::from_size(2).unwrap()
        }

        fn read_density(&self) -> Result<Vec<f32>, SolverError> {
            Ok(vec![self.frames as f32; self.grid_dims().cell_count()])
        }

        fn diagnostics(&self) -> Result<FieldDiagnostics, SolverError> {
            Ok(FieldDiagnostics {
                total_density: self.frames as f64,
                ..Default::default()
            })
        }
    }

    fn options(max_frames: Option<u64>) -> RunnerOptions {
        RunnerOptions { max_frames, diagnostics_interval: 5, ..Default::default() }
    }

    #[test]
    fn test_runner_lifecycle() {
        let mut kernel = CountingKernel::new();
        kernel.frame_delay = Duration::from_millis(2);
        let runner = SimulationRunner::new(Box::new(kernel), options(Some(10)));

        // Initially Created
        assert_eq!(runner.state(), RunnerState::Created);

        runner.start();
        assert_eq!(runner.state(), RunnerState::Running);

        let kernel = runner.join().unwrap();
        assert_eq!(kernel.frame_count(), 10);
        assert_eq!(kernel.read_density().unwrap()[0], 10.0);
    }

    #[test]
    fn test_runner_reports_finished_and_diagnostics() {
        let runner = SimulationRunner::new(Box::new(CountingKernel::new()), options(Some(10)));
        runner.start();
        while runner.state() == RunnerState::Running {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runner.state(), RunnerState::Finished);
        assert_eq!(runner.frame_count(), 10);
        assert_eq!(runner.last_diagnostics().unwrap().total_density, 10.0);
    }

    #[test]
    fn test_runner_pause_resume() {
        let mut kernel = CountingKernel::new();
        kernel.frame_delay = Duration::from_millis(2);
        let runner = SimulationRunner::new(Box::new(kernel), options(Some(100)));

        runner.start();
        thread::sleep(Duration::from_millis(20));

        runner.pause();
        // Wait for pause to take effect
        thread::sleep(Duration::from_millis(50));
        assert_eq!(runner.state(), RunnerState::Paused);

        let frames_paused = runner.frame_count();
        thread::sleep(Duration::from_millis(50));

        // Allow for one frame in flight when pause landed
        let frames_after_pause = runner.frame_count();
        assert!(
            frames_after_pause <= frames_paused + 1,
            "Frames should not advance while paused: before={}, after={}",
            frames_paused,
            frames_after_pause
        );

        runner.resume();
        assert_eq!(runner.state(), RunnerState::Running);

        let kernel = runner.join().unwrap();
        assert_eq!(kernel.frame_count(), 100);
    }

    #[test]
    fn test_runner_error_is_reported() {
        let mut kernel = CountingKernel::new();
        kernel.fail_at = Some(3);
        let runner = SimulationRunner::new(Box::new(kernel), options(None));
        runner.start();
        while runner.state() == RunnerState::Running {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runner.state(), RunnerState::Error);
        assert!(runner.error_message().unwrap().contains("device lost"));
        assert_eq!(runner.frame_count(), 3);
    }

    #[test]
    fn test_unstarted_runner_joins() {
        let runner = SimulationRunner::new(Box::new(CountingKernel::new()), options(None));
        let kernel = runner.join().unwrap();
        assert_eq!(kernel.frame_count(), 0);
    }

    #[test]
    fn test_stop_ends_open_ended_run() {
        let mut kernel = CountingKernel::new();
        kernel.frame_delay = Duration::from_millis(1);
        let runner = SimulationRunner::new(Box::new(kernel), options(None));
        runner.start();
        thread::sleep(Duration::from_millis(20));
        runner.stop();
        assert_eq!(runner.state(), RunnerState::Finished);
        let kernel = runner.join().unwrap();
        assert!(kernel.frame_count() > 0);
    }
}
