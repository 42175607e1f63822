// SPDX-License-Identifier: MIT OR Apache-2.0
//! Particles falling under gravity and bouncing on the floor of the domain.

use dyno_graph::{
    Field, Module, ModuleBase, ModuleError, Node, NodeCore, NodeError, SceneConfig, SceneError, SceneGraph,
};

use super::PointBuffer;
use crate::renderer::PointVertex;

/// A cloud of point particles
pub struct ParticleSystem {
    core: NodeCore,
    count: Field<usize>,
    spread: Field<f32>,
    height: Field<f32>,
    position: Field<Vec<[f32; 3]>>,
    velocity: Field<Vec<[f32; 3]>>,
}

impl ParticleSystem {
    /// Create a particle system living in `config`'s domain
    pub fn new(config: &SceneConfig, count: usize) -> Result<Self, SceneError> {
        let mut core = NodeCore::new("ParticleSystem");
        let count = core.declare_param("Count", count, "Number of particles");
        let spread = core.declare_param("Spread", 0.5f32, "Horizontal radius of the initial cloud");
        let height = core.declare_param("Height", config.upper_bound[1] * 0.8, "Initial height");
        let position = core.declare_state::<Vec<[f32; 3]>>("Position", "Particle positions");
        let velocity = core.declare_state::<Vec<[f32; 3]>>("Velocity", "Particle velocities");
        position.promote_output()?;

        let control = ManualControl::new(&velocity)?;
        core.state_frame_number().connect(&control.frame)?;
        core.animation_pipeline_mut().create_module(control)?;

        let integrator = GravityIntegrator::new(config.gravity, &position, &velocity)?;
        core.state_time_step().connect(&integrator.time_step)?;
        core.animation_pipeline_mut().create_module(integrator)?;

        let clamp = GroundClamp::new(config.lower_bound[1], &position, &velocity)?;
        core.animation_pipeline_mut().create_module(clamp)?;

        let buffer = PointBuffer::new([0.9, 0.5, 0.1, 1.0]);
        position.connect(buffer.positions())?;
        core.expose(buffer.points());
        core.graphics_pipeline_mut().create_module(buffer)?;

        Ok(Self {
            core,
            count,
            spread,
            height,
            position,
            velocity,
        })
    }

    /// Particle positions
    pub fn position(&self) -> &Field<Vec<[f32; 3]>> {
        &self.position
    }

    /// Particle velocities
    pub fn velocity(&self) -> &Field<Vec<[f32; 3]>> {
        &self.velocity
    }

    /// Render points, once the graphics pipeline ran
    pub fn render_points(&self) -> Option<Field<Vec<PointVertex>>> {
        self.core.fields().typed(crate::renderer::RENDER_POINTS)
    }
}

impl Node for ParticleSystem {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn reset_states(&mut self) -> Result<(), NodeError> {
        let count = self.count.get()?;
        let spread = self.spread.get()?;
        let height = self.height.get()?;

        // Sunflower layout: even coverage without a random source.
        let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
        let positions = (0..count)
            .map(|i| {
                let r = spread * ((i as f32 + 0.5) / count as f32).sqrt();
                let theta = golden * i as f32;
                [r * theta.cos(), height, r * theta.sin()]
            })
            .collect();

        self.position.set(positions)?;
        self.velocity.set(vec![[0.0; 3]; count])?;
        Ok(())
    }
}

/// Explicit Euler step under constant gravity
struct GravityIntegrator {
    base: ModuleBase,
    time_step: Field<f64>,
    gravity: Field<[f32; 3]>,
    position: Field<Vec<[f32; 3]>>,
    velocity: Field<Vec<[f32; 3]>>,
}

impl GravityIntegrator {
    fn new(
        gravity: [f32; 3],
        position: &Field<Vec<[f32; 3]>>,
        velocity: &Field<Vec<[f32; 3]>>,
    ) -> Result<Self, SceneError> {
        let mut base = ModuleBase::new("GravityIntegrator");
        let time_step = base.declare_input("TimeStep", "Frame length");
        let gravity = base.declare_param("Gravity", gravity, "Acceleration");
        base.bind_output(position)?;
        base.bind_output(velocity)?;
        Ok(Self {
            base,
            time_step,
            gravity,
            position: position.clone(),
            velocity: velocity.clone(),
        })
    }
}

impl Module for GravityIntegrator {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let dt = self.time_step.get()? as f32;
        let g = self.gravity.get()?;

        let velocity = self.velocity.modify(|velocity| {
            for v in velocity.iter_mut() {
                for (component, g) in v.iter_mut().zip(g) {
                    *component += g * dt;
                }
            }
            velocity.clone()
        })?;
        self.position.modify(|position| {
            if position.len() != velocity.len() {
                return Err(ModuleError::failed(format!(
                    "{} positions but {} velocities",
                    position.len(),
                    velocity.len()
                )));
            }
            for (p, v) in position.iter_mut().zip(&velocity) {
                for (component, v) in p.iter_mut().zip(v) {
                    *component += v * dt;
                }
            }
            Ok(())
        })??;
        Ok(())
    }
}

/// Keeps particles above the floor, reflecting their fall
struct GroundClamp {
    base: ModuleBase,
    floor: Field<f32>,
    restitution: Field<f32>,
    position: Field<Vec<[f32; 3]>>,
    velocity: Field<Vec<[f32; 3]>>,
}

impl GroundClamp {
    fn new(
        floor: f32,
        position: &Field<Vec<[f32; 3]>>,
        velocity: &Field<Vec<[f32; 3]>>,
    ) -> Result<Self, SceneError> {
        let mut base = ModuleBase::new("GroundClamp");
        let floor = base.declare_param("Floor", floor, "Lowest allowed height");
        let restitution = base.declare_param("Restitution", 0.6f32, "Fraction of speed kept on bounce");
        base.bind_output(position)?;
        base.bind_output(velocity)?;
        Ok(Self {
            base,
            floor,
            restitution,
            position: position.clone(),
            velocity: velocity.clone(),
        })
    }
}

impl Module for GroundClamp {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let floor = self.floor.get()?;
        let restitution = self.restitution.get()?;

        let grounded = self.position.modify(|position| {
            position
                .iter_mut()
                .map(|p| {
                    let below = p[1] < floor;
                    if below {
                        p[1] = floor;
                    }
                    below
                })
                .collect::<Vec<_>>()
        })?;
        if grounded.iter().any(|g| *g) {
            self.velocity.modify(|velocity| {
                for (v, _) in velocity.iter_mut().zip(&grounded).filter(|(_, g)| **g) {
                    if v[1] < 0.0 {
                        v[1] = -v[1] * restitution;
                    }
                }
            })?;
        }
        Ok(())
    }
}

/// Scripted upward kicks every few frames
struct ManualControl {
    base: ModuleBase,
    frame: Field<u64>,
    every: Field<u64>,
    speed: Field<f32>,
    velocity: Field<Vec<[f32; 3]>>,
}

impl ManualControl {
    fn new(velocity: &Field<Vec<[f32; 3]>>) -> Result<Self, SceneError> {
        let mut base = ModuleBase::new("ManualControl");
        let frame = base.declare_input("FrameNumber", "Current frame");
        let every = base.declare_param("KickEvery", 120u64, "Frames between kicks; 0 disables");
        let speed = base.declare_param("KickSpeed", 3.0f32, "Upward speed added by a kick");
        base.bind_output(velocity)?;
        Ok(Self {
            base,
            frame,
            every,
            speed,
            velocity: velocity.clone(),
        })
    }
}

impl Module for ManualControl {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let frame = self.frame.get()?;
        let every = self.every.get()?;
        if every == 0 || frame == 0 || frame % every != 0 {
            return Ok(());
        }

        let speed = self.speed.get()?;
        self.velocity.modify(|velocity| {
            for v in velocity.iter_mut() {
                v[1] += speed;
            }
        })?;
        tracing::debug!(frame, speed, "Kicked particles");
        Ok(())
    }
}

/// Summarises another node's particle cloud
pub struct CentroidProbe {
    core: NodeCore,
    centroid: Field<[f32; 3]>,
    max_height: Field<f32>,
}

impl CentroidProbe {
    /// Create a probe with its `Positions` input unwired
    pub fn new() -> Result<Self, SceneError> {
        let mut core = NodeCore::new("CentroidProbe");
        let input = core.declare_input::<Vec<[f32; 3]>>("Positions", "Positions to summarise");

        let mut base = ModuleBase::new("Centroid");
        let positions = base.declare_input("Positions", "Positions to summarise");
        let centroid = core.expose(&base.declare_output("Centroid", "Mean position"));
        let max_height = core.expose(&base.declare_output("MaxHeight", "Highest particle"));
        input.connect(&positions)?;
        core.animation_pipeline_mut().create_module(Centroid {
            base,
            positions,
            centroid: centroid.clone(),
            max_height: max_height.clone(),
        })?;

        Ok(Self {
            core,
            centroid,
            max_height,
        })
    }

    /// Mean particle position
    pub fn centroid(&self) -> &Field<[f32; 3]> {
        &self.centroid
    }

    /// Highest particle
    pub fn max_height(&self) -> &Field<f32> {
        &self.max_height
    }
}

impl Node for CentroidProbe {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
}

struct Centroid {
    base: ModuleBase,
    positions: Field<Vec<[f32; 3]>>,
    centroid: Field<[f32; 3]>,
    max_height: Field<f32>,
}

impl Module for Centroid {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let (sum, max, n) = self.positions.with(|positions| {
            positions.iter().fold(([0.0f32; 3], f32::MIN, 0usize), |(mut sum, max, n), p| {
                for (total, x) in sum.iter_mut().zip(p) {
                    *total += x;
                }
                (sum, max.max(p[1]), n + 1)
            })
        })?;
        if n == 0 {
            return Err(ModuleError::failed("no particles to summarise"));
        }

        let n = n as f32;
        self.centroid.set([sum[0] / n, sum[1] / n, sum[2] / n])?;
        self.max_height.set(max)?;
        Ok(())
    }
}

/// Add a particle system and a probe watching it
pub fn populate(scene: &mut SceneGraph) -> Result<(), SceneError> {
    let system = ParticleSystem::new(scene.config(), 256)?;
    let system = scene.add_node(system)?;
    let probe = scene.add_node(CentroidProbe::new()?)?;
    let (system, probe) = (system.read().core().id(), probe.read().core().id());
    scene.connect(system, "Position", probe, "Positions")
}
