// SPDX-License-Identifier: MIT OR Apache-2.0
//! A parametric grid whose surface ripples over time.
//!
//! Changing `Rows`, `Columns` or `Spacing` rebuilds the rest geometry at once
//! through parameter observers; the wave picks it up on the next frame.

use dyno_graph::{
    Field, FieldError, Module, ModuleBase, ModuleError, Node, NodeCore, NodeError, SceneError, SceneGraph,
};

use super::PointBuffer;

/// Rest positions of a `rows` x `columns` grid centred on the origin
pub fn layout(rows: usize, columns: usize, spacing: f32) -> Vec<[f32; 3]> {
    let offset = |n: usize| n.saturating_sub(1) as f32 * spacing * 0.5;
    let (x0, z0) = (offset(columns), offset(rows));
    (0..rows)
        .flat_map(|r| (0..columns).map(move |c| [c as f32 * spacing - x0, 0.0, r as f32 * spacing - z0]))
        .collect()
}

fn regenerate(
    rows: &Field<usize>,
    columns: &Field<usize>,
    spacing: &Field<f32>,
    vertices: &Field<Vec<[f32; 3]>>,
) -> Result<(), FieldError> {
    vertices.set(layout(rows.get()?, columns.get()?, spacing.get()?))
}

/// A rippling height grid
pub struct HeightGrid {
    core: NodeCore,
    rows: Field<usize>,
    columns: Field<usize>,
    spacing: Field<f32>,
    vertices: Field<Vec<[f32; 3]>>,
    surface: Field<Vec<[f32; 3]>>,
}

impl HeightGrid {
    /// Create a grid of `rows` x `columns` points
    pub fn new(rows: usize, columns: usize, spacing: f32) -> Result<Self, SceneError> {
        let mut core = NodeCore::new("HeightGrid");
        let rows = core.declare_param("Rows", rows, "Points along z");
        let columns = core.declare_param("Columns", columns, "Points along x");
        let spacing = core.declare_param("Spacing", spacing, "Distance between neighbours");
        let vertices = core.declare_state::<Vec<[f32; 3]>>("Vertices", "Rest positions");
        let surface = core.declare_state::<Vec<[f32; 3]>>("Surface", "Displaced positions");
        surface.promote_output()?;

        let weak = (rows.downgrade(), columns.downgrade(), spacing.downgrade(), vertices.downgrade());
        let rebuild = move || {
            let (Some(rows), Some(columns), Some(spacing), Some(vertices)) =
                (weak.0.upgrade(), weak.1.upgrade(), weak.2.upgrade(), weak.3.upgrade())
            else {
                return;
            };
            if let Err(error) = regenerate(&rows, &columns, &spacing, &vertices) {
                tracing::warn!(error = %error, "Failed to rebuild grid");
            }
        };
        rows.attach(rebuild.clone());
        columns.attach(rebuild.clone());
        spacing.attach(rebuild);

        let wave = Wave::new(&surface)?;
        core.state_elapsed_time().connect(&wave.time)?;
        vertices.connect(&wave.rest)?;
        core.animation_pipeline_mut().create_module(wave)?;

        let buffer = PointBuffer::new([0.2, 0.6, 0.9, 1.0]);
        surface.connect(buffer.positions())?;
        core.expose(buffer.points());
        core.graphics_pipeline_mut().create_module(buffer)?;

        Ok(Self {
            core,
            rows,
            columns,
            spacing,
            vertices,
            surface,
        })
    }

    /// `Rows` parameter
    pub fn rows(&self) -> &Field<usize> {
        &self.rows
    }

    /// `Columns` parameter
    pub fn columns(&self) -> &Field<usize> {
        &self.columns
    }

    /// Rest positions
    pub fn vertices(&self) -> &Field<Vec<[f32; 3]>> {
        &self.vertices
    }

    /// Displaced positions
    pub fn surface(&self) -> &Field<Vec<[f32; 3]>> {
        &self.surface
    }
}

impl Node for HeightGrid {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn reset_states(&mut self) -> Result<(), NodeError> {
        regenerate(&self.rows, &self.columns, &self.spacing, &self.vertices)?;
        self.surface.set(self.vertices.get()?)?;
        Ok(())
    }
}

/// Displaces rest positions along y with a travelling sine wave
struct Wave {
    base: ModuleBase,
    time: Field<f64>,
    rest: Field<Vec<[f32; 3]>>,
    amplitude: Field<f32>,
    frequency: Field<f32>,
    wavenumber: Field<f32>,
    surface: Field<Vec<[f32; 3]>>,
}

impl Wave {
    fn new(surface: &Field<Vec<[f32; 3]>>) -> Result<Self, SceneError> {
        let mut base = ModuleBase::new("Wave");
        let time = base.declare_input("ElapsedTime", "Simulated time");
        let rest = base.declare_input("Vertices", "Rest positions");
        let amplitude = base.declare_param("Amplitude", 0.1f32, "Peak displacement");
        let frequency = base.declare_param("Frequency", 0.5f32, "Oscillations per second");
        let wavenumber = base.declare_param("Wavenumber", 6.0f32, "Spatial frequency");
        base.bind_output(surface)?;
        Ok(Self {
            base,
            time,
            rest,
            amplitude,
            frequency,
            wavenumber,
            surface: surface.clone(),
        })
    }
}

impl Module for Wave {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let t = self.time.get()? as f32;
        let amplitude = self.amplitude.get()?;
        let omega = std::f32::consts::TAU * self.frequency.get()?;
        let k = self.wavenumber.get()?;

        let surface = self.rest.with(|rest| {
            rest.iter()
                .map(|&[x, _, z]| [x, amplitude * (omega * t - k * (x + z)).sin(), z])
                .collect::<Vec<_>>()
        })?;
        self.surface.set(surface)?;
        Ok(())
    }
}

/// Add a 32 x 32 grid
pub fn populate(scene: &mut SceneGraph) -> Result<(), SceneError> {
    let [lower, upper] = [scene.config().lower_bound[0], scene.config().upper_bound[0]];
    let spacing = (upper - lower) * 0.9 / 31.0;
    scene.add_node(HeightGrid::new(32, 32, spacing)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_centred() {
        let points = layout(2, 3, 1.0);
        assert_eq!(points.len(), 6);
        assert_eq!(points[0], [-1.0, 0.0, -0.5]);
        assert_eq!(points[5], [1.0, 0.0, 0.5]);
        assert!(layout(0, 4, 1.0).is_empty());
    }

    #[test]
    fn test_param_change_rebuilds_geometry_immediately() {
        let grid = HeightGrid::new(4, 4, 0.1).unwrap();
        grid.rows().set(2).unwrap();
        assert_eq!(grid.vertices().get().unwrap().len(), 8);

        grid.columns().set(5).unwrap();
        assert_eq!(grid.vertices().get().unwrap().len(), 10);
    }

    #[test]
    fn test_wave_follows_rest_geometry() {
        let mut scene = SceneGraph::new();
        let grid = scene.add_node(HeightGrid::new(3, 3, 0.2).unwrap()).unwrap();
        scene.advance(10);

        let surface = grid.read().surface().get().unwrap();
        assert_eq!(surface.len(), 9);
        assert!(surface.iter().all(|p| p[1].abs() <= 0.1 + 1e-6));
        assert!(surface.iter().any(|p| p[1] != 0.0));

        grid.read().rows().set(5).unwrap();
        scene.advance(1);
        assert_eq!(grid.read().surface().get().unwrap().len(), 15);
    }

    #[test]
    fn test_reset_restores_configured_size() {
        let mut scene = SceneGraph::new();
        let grid = scene.add_node(HeightGrid::new(3, 3, 0.2).unwrap()).unwrap();
        scene.advance(2);
        grid.read().rows().set(1).unwrap();
        scene.reset();
        assert_eq!(grid.read().surface().get().unwrap().len(), 3);
    }

    #[test]
    fn test_populate_fits_domain() {
        let mut scene = SceneGraph::new();
        populate(&mut scene).unwrap();
        scene.reset();
        let id = scene.node_ids().next().unwrap();
        let node = scene.node(id).unwrap().read();
        let vertices = node.core().fields().typed::<Vec<[f32; 3]>>("Vertices").unwrap();
        let vertices = vertices.get().unwrap();
        assert_eq!(vertices.len(), 32 * 32);
        assert!(vertices.iter().all(|p| p[0].abs() <= 1.0 && p[2].abs() <= 1.0));
    }
}
