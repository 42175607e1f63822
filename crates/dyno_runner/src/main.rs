// SPDX-License-Identifier: MIT OR Apache-2.0
//! `dyno_runner` - headless driver for simulation scenes
//!
//! Builds one of the built-in scenarios, advances it for a frame budget and
//! draws it with a headless renderer, then prints a run summary.
//!
//! ## Architecture
//!
//! The runner only composes: every node, module and field comes from the
//! scenario modules, and all stepping goes through `dyno_graph`.

mod cli;
mod renderer;
mod report;
mod scenarios;
mod settings;

use anyhow::{bail, Context};
use clap::Parser;
use dyno_graph::render::render_frame;
use dyno_graph::{RenderEngine, SceneGraph, SceneReport, SimulationController, SimulationEvent};
use serde::Serialize;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::Cli;
use renderer::HeadlessRenderer;
use report::{LogRecord, ReportBridge};
use scenarios::Scenario;
use settings::{RenderSettings, RunnerSettings};

const DEFAULT_LOG_FILTER: &str = "dyno_graph=info,dyno_runner=debug";

/// What a run did
#[derive(Debug, Serialize)]
struct RunSummary {
    scenario: Scenario,
    frames: u64,
    elapsed_time: f64,
    module_failures: usize,
    node_errors: usize,
    draws: usize,
    last_draw_points: usize,
    warnings: Vec<LogRecord>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => RunnerSettings::load_or_default(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => RunnerSettings::default(),
    };
    cli.apply(&mut settings);

    // Warnings and errors are also collected for the summary
    let (bridge_layer, records) = ReportBridge::new(tracing::Level::WARN);

    let directives = settings.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(directives))
        .with_context(|| format!("invalid log filter '{directives}'"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(bridge_layer)
        .init();

    tracing::info!("Starting dyno_runner v{}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = &cli.write_settings {
        settings.save(path)?;
        return Ok(());
    }

    let scene = scenarios::build(settings.scenario, settings.scene.clone())
        .with_context(|| format!("building scenario {:?}", settings.scenario))?;

    if cli.describe {
        let info = scene.scene_info();
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            println!("{}", info.render_nodes(true));
            println!("{}", info.render_modules(true));
        }
        return Ok(());
    }

    let mut renderer = HeadlessRenderer::new();
    if settings.render.enabled {
        renderer.initialize()?;
    }

    let (report, frames, elapsed_time) = if settings.threaded {
        let quit = if settings.scene.total_frames == 0 {
            tracing::info!("Unbounded run; enter 'q' to stop");
            spawn_quit_listener()
        } else {
            mpsc::channel().1
        };
        run_threaded(scene, &settings, &mut renderer, &quit)?
    } else {
        run_inline(scene, &settings, &mut renderer)?
    };
    renderer.terminate();

    let summary = RunSummary {
        scenario: settings.scenario,
        frames,
        elapsed_time,
        module_failures: report.failures.len(),
        node_errors: report.node_errors.len(),
        draws: renderer.history().len(),
        last_draw_points: renderer.history().last().map_or(0, |s| s.points),
        warnings: records.try_iter().collect(),
    };
    print_summary(&summary, cli.json)?;

    Ok(())
}

fn draw_due(render: &RenderSettings, frame: u64) -> bool {
    render.enabled && render.every != 0 && frame % render.every == 0
}

fn draw(renderer: &mut HeadlessRenderer, scene: &SceneGraph, render: &RenderSettings) -> anyhow::Result<()> {
    let graphics = render_frame(renderer, scene, render.width, render.height)?;
    for failure in graphics.failures {
        tracing::warn!(module = %failure.module_name, "Graphics module failed: {}", failure.message);
    }
    Ok(())
}

/// Advance on the main thread, drawing between frames
fn run_inline(
    mut scene: SceneGraph,
    settings: &RunnerSettings,
    renderer: &mut HeadlessRenderer,
) -> anyhow::Result<(SceneReport, u64, f64)> {
    let total = settings.scene.total_frames;
    if total == 0 {
        bail!("an inline run needs a frame budget; pass --frames or use --threaded");
    }

    let mut report = scene.reset();
    for _ in 0..total {
        report.merge(scene.advance(1));
        if draw_due(&settings.render, scene.frame_number()) {
            draw(renderer, &scene, &settings.render)?;
        }
    }
    Ok((report, scene.frame_number(), scene.elapsed_time()))
}

/// Watch stdin for a `q` line; EOF alone does not stop the run
fn spawn_quit_listener() -> Receiver<()> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("dyno-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(line.trim(), "q" | "quit") {
                    let _ = tx.send(());
                    break;
                }
            }
        });
    if let Err(error) = spawned {
        tracing::warn!(error = %error, "Cannot watch stdin; the run can only be killed");
    }
    rx
}

/// Advance on a worker thread, drawing as frames finish, until the budget
/// is spent or `quit` fires
fn run_threaded(
    scene: SceneGraph,
    settings: &RunnerSettings,
    renderer: &mut HeadlessRenderer,
    quit: &Receiver<()>,
) -> anyhow::Result<(SceneReport, u64, f64)> {
    let mut controller = SimulationController::new(scene);
    let events = controller
        .take_events()
        .context("controller event stream already taken")?;
    controller.start()?;

    loop {
        if quit.try_recv().is_ok() {
            tracing::info!(frame = controller.current_frame(), "Stop requested");
            break;
        }
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(SimulationEvent::Reset) => tracing::debug!("Scene reset"),
            Ok(SimulationEvent::FrameFinished(frame)) => {
                if draw_due(&settings.render, frame) {
                    controller.with_scene(|scene| draw(renderer, scene, &settings.render))?;
                }
            }
            Ok(SimulationEvent::SimulationFinished) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let report = controller.stop()?;
    let (frames, elapsed) = controller.with_scene(|scene| (scene.frame_number(), scene.elapsed_time()));
    Ok((report, frames, elapsed))
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Scenario:        {:?}", summary.scenario);
    println!("Frames:          {}", summary.frames);
    println!("Simulated time:  {:.3}s", summary.elapsed_time);
    println!("Module failures: {}", summary.module_failures);
    println!("Node errors:     {}", summary.node_errors);
    println!("Draws:           {} ({} points last)", summary.draws, summary.last_draw_points);
    if !summary.warnings.is_empty() {
        println!("Warnings:");
        for record in &summary.warnings {
            println!("  [{}] {}: {}", record.level, record.target, record.message);
        }
    }
    Ok(())
}
