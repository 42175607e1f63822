// SPDX-License-Identifier: MIT OR Apache-2.0
//! A scalar source feeding a doubler.

use dyno_graph::{
    Field, Module, ModuleBase, ModuleError, Node, NodeCore, NodeError, SceneError, SceneGraph,
};

/// Holds a scalar state, optionally ramped every frame
pub struct ScalarSource {
    core: NodeCore,
    initial: Field<f64>,
    value: Field<f64>,
}

impl ScalarSource {
    /// Create a source starting at `initial` and growing by `step` per frame
    pub fn new(initial: f64, step: f64) -> Result<Self, SceneError> {
        let mut core = NodeCore::new("ScalarSource");
        let initial = core.declare_param("Initial", initial, "Value after reset");
        let value = core.declare_state::<f64>("Value", "Current value");
        value.promote_output()?;

        let mut ramp = ModuleBase::new("Ramp");
        let step = ramp.declare_param("Step", step, "Increment per frame");
        ramp.bind_output(&value)?;
        core.animation_pipeline_mut().create_module(Ramp {
            base: ramp,
            step,
            value: value.clone(),
        })?;

        Ok(Self {
            core,
            initial,
            value,
        })
    }

    /// The promoted value
    pub fn value(&self) -> &Field<f64> {
        &self.value
    }
}

impl Node for ScalarSource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn reset_states(&mut self) -> Result<(), NodeError> {
        self.value.set(self.initial.get()?)?;
        Ok(())
    }
}

struct Ramp {
    base: ModuleBase,
    step: Field<f64>,
    value: Field<f64>,
}

impl Module for Ramp {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let step = self.step.get()?;
        if step != 0.0 {
            self.value.modify(|v| *v += step)?;
        }
        Ok(())
    }
}

/// Multiplies its input by a factor
pub struct Doubler {
    core: NodeCore,
    result: Field<f64>,
}

impl Doubler {
    /// Create a doubler with its `Value` input unwired
    pub fn new() -> Result<Self, SceneError> {
        let mut core = NodeCore::new("Doubler");
        let input = core.declare_input::<f64>("Value", "Value to scale");

        let mut scale = ModuleBase::new("Scale");
        let module_in = scale.declare_input::<f64>("Value", "Value to scale");
        let factor = scale.declare_param("Factor", 2.0, "Multiplier");
        let result = scale.declare_output::<f64>("Result", "Scaled value");
        input.connect(&module_in)?;
        let result = core.expose(&result);
        core.animation_pipeline_mut().create_module(Scale {
            base: scale,
            input: module_in,
            factor,
            output: result.clone(),
        })?;

        Ok(Self { core, result })
    }

    /// The scaled output
    pub fn result(&self) -> &Field<f64> {
        &self.result
    }
}

impl Node for Doubler {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
}

struct Scale {
    base: ModuleBase,
    input: Field<f64>,
    factor: Field<f64>,
    output: Field<f64>,
}

impl Module for Scale {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<(), ModuleError> {
        let value = self.input.get()?;
        self.output.set(value * self.factor.get()?)?;
        Ok(())
    }
}

/// Add a source at 2.0 and a doubler reading it
pub fn populate(scene: &mut SceneGraph) -> Result<(), SceneError> {
    let source = scene.add_node(ScalarSource::new(2.0, 0.0)?)?;
    let doubler = scene.add_node(Doubler::new()?)?;
    let (source, doubler) = (source.read().core().id(), doubler.read().core().id());
    scene.connect(source, "Value", doubler, "Value")
}
