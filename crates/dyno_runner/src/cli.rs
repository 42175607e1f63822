// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command line interface.

use clap::Parser;
use std::path::PathBuf;

use crate::scenarios::Scenario;
use crate::settings::RunnerSettings;

/// Run a simulation scene headlessly
#[derive(Debug, Parser)]
#[command(name = "dyno_runner", version, about)]
pub struct Cli {
    /// RON settings file
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Scenario to build, overriding the settings file
    #[arg(long, value_enum)]
    pub scenario: Option<Scenario>,

    /// Frames to simulate, overriding the settings file; 0 runs until 'q' is entered (threaded only)
    #[arg(short, long)]
    pub frames: Option<u64>,

    /// Seconds per frame, overriding the settings file
    #[arg(long)]
    pub time_step: Option<f64>,

    /// Drive the scene from a worker thread
    #[arg(long)]
    pub threaded: bool,

    /// Skip rendering
    #[arg(long)]
    pub no_render: bool,

    /// Print the scene's nodes and pipelines, then exit
    #[arg(long)]
    pub describe: bool,

    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Write the effective settings to this path, then exit
    #[arg(long, value_name = "PATH")]
    pub write_settings: Option<PathBuf>,
}

impl Cli {
    /// Fold command line overrides into loaded settings
    pub fn apply(&self, settings: &mut RunnerSettings) {
        if let Some(scenario) = self.scenario {
            settings.scenario = scenario;
        }
        if let Some(frames) = self.frames {
            settings.scene.total_frames = frames;
        }
        if let Some(dt) = self.time_step {
            settings.scene.time_step = dt;
        }
        if self.threaded {
            settings.threaded = true;
        }
        if self.no_render {
            settings.render.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "dyno_runner",
            "--scenario",
            "particles",
            "--frames",
            "42",
            "--time-step",
            "0.01",
            "--no-render",
        ]);
        let mut settings = RunnerSettings::default();
        cli.apply(&mut settings);

        assert_eq!(settings.scenario, Scenario::Particles);
        assert_eq!(settings.scene.total_frames, 42);
        assert_eq!(settings.scene.time_step, 0.01);
        assert!(!settings.render.enabled);
        assert!(!settings.threaded);
    }

    #[test]
    fn test_no_overrides_keep_settings() {
        let cli = Cli::parse_from(["dyno_runner"]);
        let mut settings = RunnerSettings::default();
        settings.scenario = Scenario::Grid;
        cli.apply(&mut settings);
        assert_eq!(settings, {
            let mut expected = RunnerSettings::default();
            expected.scenario = Scenario::Grid;
            expected
        });
    }

    #[test]
    fn test_command_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
