// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background driver for a scene.
//!
//! The controller owns the scene behind a mutex and advances it one frame
//! at a time on a worker thread. Pause and stop requests are honoured only
//! between frames. Once the frame budget is reached the worker parks; a
//! reset or a larger budget sets it going again.

use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::scene::{SceneGraph, SceneReport};

/// Notifications published by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationEvent {
    /// The scene was reset
    Reset,
    /// A frame completed; carries the new scene frame number
    FrameFinished(u64),
    /// The frame budget was reached
    SimulationFinished,
}

/// Where the controller is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No worker running
    #[default]
    Idle,
    /// Worker advancing frames
    Running,
    /// Worker parked between frames
    Paused,
    /// Frame budget reached; the worker is parked
    Finished,
}

/// Error when driving a simulation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// `start` while a worker is alive
    #[error("Simulation is already running")]
    AlreadyRunning,

    /// The operation needs an idle controller
    #[error("Simulation is running; stop it first")]
    Busy,

    /// The worker thread could not be created
    #[error("Failed to spawn simulation thread: {0}")]
    Spawn(String),

    /// The worker thread panicked
    #[error("Simulation thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, Default)]
struct Control {
    state: RunState,
    stop: bool,
    total_frames: u64,
}

#[derive(Debug, Default)]
struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    /// Block until running; false once a stop was requested
    fn wait_runnable(&self) -> bool {
        let mut control = self.control.lock();
        while control.state != RunState::Running && !control.stop {
            self.wake.wait(&mut control);
        }
        !control.stop
    }

    fn is_running(&self) -> bool {
        let control = self.control.lock();
        control.state == RunState::Running && !control.stop
    }

    fn set_state(&self, state: RunState) {
        self.control.lock().state = state;
        self.wake.notify_all();
    }
}

/// Runs a scene on a worker thread
pub struct SimulationController {
    scene: Arc<Mutex<SceneGraph>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<SceneReport>>,
    events_tx: Sender<SimulationEvent>,
    events_rx: Option<Receiver<SimulationEvent>>,
}

impl SimulationController {
    /// Take ownership of a scene; the frame budget comes from its config
    pub fn new(scene: SceneGraph) -> Self {
        let shared = Shared::default();
        shared.control.lock().total_frames = scene.config().total_frames;
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            scene: Arc::new(Mutex::new(scene)),
            shared: Arc::new(shared),
            worker: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Event stream; available once
    pub fn take_events(&mut self) -> Option<Receiver<SimulationEvent>> {
        self.events_rx.take()
    }

    /// Shared handle to the scene
    pub fn scene(&self) -> Arc<Mutex<SceneGraph>> {
        Arc::clone(&self.scene)
    }

    /// Run `f` against the scene, between frames
    pub fn with_scene<R>(&self, f: impl FnOnce(&mut SceneGraph) -> R) -> R {
        f(&mut self.scene.lock())
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.shared.control.lock().state
    }

    /// Frames completed by the scene
    pub fn current_frame(&self) -> u64 {
        self.scene.lock().frame_number()
    }

    /// Frame budget; 0 means unbounded
    pub fn total_frames(&self) -> u64 {
        self.shared.control.lock().total_frames
    }

    /// Change the frame budget; a finished worker continues if the new budget allows
    pub fn set_total_frames(&self, frames: u64) {
        let frame = self.current_frame();
        let mut control = self.shared.control.lock();
        control.total_frames = frames;
        if control.state == RunState::Finished && (frames == 0 || frames > frame) {
            self.wake_finished(control);
        }
    }

    /// Whether a worker is attached and still has frames to run
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.state() != RunState::Finished
    }

    /// Reset the scene and notify subscribers; a finished worker starts over
    pub fn reset(&self) -> SceneReport {
        let report = self.scene.lock().reset();
        let _ = self.events_tx.send(SimulationEvent::Reset);
        let control = self.shared.control.lock();
        if control.state == RunState::Finished {
            self.wake_finished(control);
        }
        report
    }

    fn wake_finished(&self, mut control: parking_lot::MutexGuard<'_, Control>) {
        control.state = if self.worker.is_some() { RunState::Running } else { RunState::Idle };
        drop(control);
        self.shared.wake.notify_all();
    }

    /// Advance `frames` frames on the calling thread
    pub fn proceed(&self, frames: u64) -> Result<SceneReport, ControllerError> {
        if self.worker.is_some() {
            return Err(ControllerError::Busy);
        }
        let mut report = SceneReport::default();
        for _ in 0..frames {
            let mut scene = self.scene.lock();
            report.merge(scene.advance(1));
            let _ = self.events_tx.send(SimulationEvent::FrameFinished(scene.frame_number()));
        }
        Ok(report)
    }

    /// Spawn the worker; resets the scene first if it never ran
    pub fn start(&mut self) -> Result<(), ControllerError> {
        if self.worker.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }
        if !self.scene.lock().is_initialized() {
            self.reset();
        }

        {
            let mut control = self.shared.control.lock();
            control.stop = false;
            control.state = RunState::Running;
        }

        let scene = Arc::clone(&self.scene);
        let shared = Arc::clone(&self.shared);
        let events = self.events_tx.clone();
        let worker = std::thread::Builder::new()
            .name("dyno-simulation".into())
            .spawn(move || run(&scene, &shared, &events))
            .map_err(|e| {
                self.shared.set_state(RunState::Idle);
                ControllerError::Spawn(e.to_string())
            })?;

        self.worker = Some(worker);
        tracing::info!(total_frames = self.total_frames(), "Simulation started");
        Ok(())
    }

    /// Park the worker after its current frame
    pub fn pause(&self) -> bool {
        let mut control = self.shared.control.lock();
        if control.state != RunState::Running {
            return false;
        }
        control.state = RunState::Paused;
        tracing::info!("Simulation paused");
        true
    }

    /// Let a paused worker continue
    pub fn resume(&self) -> bool {
        let mut control = self.shared.control.lock();
        if control.state != RunState::Paused {
            return false;
        }
        control.state = RunState::Running;
        drop(control);
        self.shared.wake.notify_all();
        tracing::info!("Simulation resumed");
        true
    }

    /// Stop the worker and collect what it did
    pub fn stop(&mut self) -> Result<SceneReport, ControllerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(SceneReport::default());
        };
        {
            let mut control = self.shared.control.lock();
            control.stop = true;
        }
        self.shared.wake.notify_all();

        let report = worker.join().map_err(|_| ControllerError::WorkerPanicked)?;
        let mut control = self.shared.control.lock();
        if control.state != RunState::Finished {
            control.state = RunState::Idle;
        }
        tracing::info!(frames = report.frames, failures = report.failures.len(), "Simulation stopped");
        Ok(report)
    }

    /// Block until the frame budget is reached, then shut the worker down
    pub fn join(&mut self) -> Result<SceneReport, ControllerError> {
        let Some(worker) = &self.worker else {
            return Ok(SceneReport::default());
        };
        {
            let mut control = self.shared.control.lock();
            while matches!(control.state, RunState::Running | RunState::Paused)
                && !control.stop
                && !worker.is_finished()
            {
                self.shared.wake.wait_for(&mut control, Duration::from_millis(50));
            }
        }
        self.stop()
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            tracing::error!(error = %error, "Simulation worker did not shut down cleanly");
        }
    }
}

impl std::fmt::Debug for SimulationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationController")
            .field("state", &self.state())
            .field("running", &self.worker.is_some())
            .finish()
    }
}

fn run(scene: &Mutex<SceneGraph>, shared: &Shared, events: &Sender<SimulationEvent>) -> SceneReport {
    let mut report = SceneReport::default();
    loop {
        if !shared.wait_runnable() {
            break;
        }

        let mut scene = scene.lock();
        // Paused or stopped while waiting for the scene.
        if !shared.is_running() {
            continue;
        }

        let total = shared.control.lock().total_frames;
        if total != 0 && scene.frame_number() >= total {
            shared.set_state(RunState::Finished);
            let _ = events.send(SimulationEvent::SimulationFinished);
            tracing::info!(frames = scene.frame_number(), "Simulation finished");
            continue;
        }

        report.merge(scene.advance(1));
        let _ = events.send(SimulationEvent::FrameFinished(scene.frame_number()));
    }
    report
}
