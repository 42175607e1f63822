// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in demonstration scenes.

pub mod doubler;
pub mod grid;
pub mod particles;

use dyno_graph::{Field, Module, ModuleBase, ModuleError, SceneConfig, SceneError, SceneGraph};
use serde::{Deserialize, Serialize};

use crate::renderer::PointVertex;

/// Which scene to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum Scenario {
    /// Two nodes: a scalar source wired into a doubler
    #[default]
    Doubler,
    /// Falling particles bouncing on the floor of the domain
    Particles,
    /// A parametric height grid driven by a wave
    Grid,
}

/// Build a scenario's scene
pub fn build(scenario: Scenario, config: SceneConfig) -> Result<SceneGraph, SceneError> {
    let mut scene = SceneGraph::with_config(config);
    match scenario {
        Scenario::Doubler => doubler::populate(&mut scene)?,
        Scenario::Particles => particles::populate(&mut scene)?,
        Scenario::Grid => grid::populate(&mut scene)?,
    }
    tracing::info!(scenario = ?scenario, nodes = scene.node_count(), "Built scenario");
    Ok(scene)
}

/// Graphics module turning positions into colored render points
pub struct PointBuffer {
    base: ModuleBase,
    positions: Field<Vec<[f32; 3]>>,
    color: Field<[f32; 4]>,
    points: Field<Vec<PointVertex>>,
}

impl PointBuffer {
    /// Create the module; wire `positions` and expose `points` afterwards
    pub fn new(color: [f32; 4]) -> Self {
        let mut base = ModuleBase::new("PointBuffer");
        let positions = base.declare_input("Positions", "Point positions");
        let color = base.declare_param("Color", color, "Point color");
        let points = base.declare_output(crate::renderer::RENDER_POINTS, "Packed render points");
        Self {
            base,
            positions,
            color,
            points,
        }
    }

    /// Input receiving positions
    pub fn positions(&self) -> &Field<Vec<[f32; 3]>> {
        &self.positions
    }

    /// Output holding render points
    pub fn points(&self) -> &Field<Vec<PointVertex>> {
        &self.points
    }
}

impl Module for PointBuffer {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let color = self.color.get()?;
        let points = self.positions.with(|positions| {
            positions
                .iter()
                .map(|&position| PointVertex { position, color })
                .collect::<Vec<_>>()
        })?;
        self.points.set(points)?;
        Ok(())
    }
}
