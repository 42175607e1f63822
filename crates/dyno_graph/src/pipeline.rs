// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered module pipelines.
//!
//! Execution order is push order. The pipeline does not sort modules by
//! their field dependencies; arranging them is up to whoever builds the node.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::module::{Module, ModuleFailure, ModuleId, ModuleRef};
use crate::node::NodeId;

/// Unique identifier for a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineId(pub Uuid);

impl PipelineId {
    /// Create a new random pipeline ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which of a node's two pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineKind {
    /// Advances simulation state once per frame
    Animation,
    /// Derives render buffers on the renderer's cadence
    Graphics,
}

/// Error when composing a pipeline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Module already belongs to a pipeline
    #[error("Module '{module}' is already in pipeline {pipeline:?}")]
    AlreadyInPipeline {
        /// Module name
        module: String,
        /// Pipeline holding it
        pipeline: PipelineId,
    },

    /// Module not found in this pipeline
    #[error("Module not found: {0:?}")]
    ModuleNotFound(ModuleId),
}

/// Outcome of one `execute` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Modules whose update succeeded, in execution order
    pub executed: Vec<ModuleId>,
    /// Disabled modules that were skipped
    pub skipped: Vec<ModuleId>,
    /// Modules whose update failed
    pub failures: Vec<ModuleFailure>,
}

impl PipelineReport {
    /// Whether every enabled module succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: PipelineReport) {
        self.executed.extend(other.executed);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }
}

/// An ordered list of modules owned by one node
pub struct Pipeline {
    id: PipelineId,
    kind: PipelineKind,
    node: Option<NodeId>,
    modules: Vec<ModuleRef>,
    executions: u64,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            id: PipelineId::new(),
            kind,
            node: None,
            modules: Vec::new(),
            executions: 0,
        }
    }

    /// Pipeline identity
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Animation or graphics
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Owning node
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub(crate) fn set_node(&mut self, node: Option<NodeId>) {
        self.node = node;
        for module in &self.modules {
            module.lock().base_mut().set_owner(node);
        }
    }

    /// Number of `execute` calls so far
    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Append a module to the execution order
    ///
    /// The module must not be locked by the caller while it is pushed.
    pub fn push_module(&mut self, module: ModuleRef) -> Result<(), PipelineError> {
        {
            let mut guard = module.lock();
            let base = guard.base_mut();
            if let Some(pipeline) = base.pipeline() {
                return Err(PipelineError::AlreadyInPipeline {
                    module: base.name().to_string(),
                    pipeline,
                });
            }
            base.attach_to(self.id, self.node);
            tracing::debug!(module = %base.name(), pipeline = ?self.kind, "Pushed module");
        }
        self.modules.push(module);
        Ok(())
    }

    /// Construct, wrap and append a module in one step
    pub fn create_module<M: Module + 'static>(
        &mut self,
        module: M,
    ) -> Result<Arc<Mutex<M>>, PipelineError> {
        let module = Arc::new(Mutex::new(module));
        self.push_module(module.clone())?;
        Ok(module)
    }

    /// Take a module out of the execution order
    pub fn remove_module(&mut self, id: ModuleId) -> Result<ModuleRef, PipelineError> {
        let index = self
            .position(id)
            .ok_or(PipelineError::ModuleNotFound(id))?;
        let module = self.modules.remove(index);
        module.lock().base_mut().detach();
        Ok(module)
    }

    /// Resume running a module, keeping its wiring
    pub fn enable(&self, id: ModuleId) -> Result<(), PipelineError> {
        self.set_enabled(id, true)
    }

    /// Stop running a module, keeping its wiring
    pub fn disable(&self, id: ModuleId) -> Result<(), PipelineError> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: ModuleId, enabled: bool) -> Result<(), PipelineError> {
        let index = self
            .position(id)
            .ok_or(PipelineError::ModuleNotFound(id))?;
        self.modules[index].lock().base_mut().set_enabled(enabled);
        Ok(())
    }

    fn position(&self, id: ModuleId) -> Option<usize> {
        self.modules.iter().position(|m| m.lock().base().id() == id)
    }

    /// Whether a module is in this pipeline
    pub fn contains(&self, id: ModuleId) -> bool {
        self.position(id).is_some()
    }

    /// Modules in execution order
    pub fn modules(&self) -> impl Iterator<Item = &ModuleRef> {
        self.modules.iter()
    }

    /// Module IDs in execution order
    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules.iter().map(|m| m.lock().base().id()).collect()
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the pipeline has no modules
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Forget failures recorded by earlier frames
    pub fn prime(&self) {
        for module in &self.modules {
            module.lock().base_mut().clear_failure();
        }
    }

    /// Run every enabled module once, in push order
    ///
    /// A failing module is recorded and logged; the remaining modules still run.
    pub fn execute(&mut self, frame: u64) -> PipelineReport {
        let mut report = PipelineReport::default();
        self.executions += 1;

        for module in &self.modules {
            let mut guard = module.lock();
            let id = guard.base().id();

            if !guard.base().is_enabled() {
                report.skipped.push(id);
                continue;
            }

            tracing::trace!(module = %guard.base().name(), pipeline = ?self.kind, frame, "Updating module");
            match guard.update() {
                Ok(()) => {
                    guard.base_mut().record_success();
                    report.executed.push(id);
                }
                Err(error) => {
                    let failure = ModuleFailure {
                        module: id,
                        module_name: guard.base().name().to_string(),
                        node: self.node,
                        frame,
                        message: error.to_string(),
                    };
                    tracing::warn!(
                        node = ?self.node,
                        module = %failure.module_name,
                        frame,
                        error = %error,
                        "Module update failed"
                    );
                    guard.base_mut().record_failure(failure.clone());
                    report.failures.push(failure);
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("kind", &self.kind)
            .field("modules", &self.modules.len())
            .field("executions", &self.executions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{AnyField, Field};
    use crate::module::{ModuleBase, ModuleError};

    /// Appends its tag to a shared log and copies input to output
    struct Recorder {
        base: ModuleBase,
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Recorder {
        fn new(tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                base: ModuleBase::new(tag),
                tag,
                log: Arc::clone(log),
                fail: false,
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Module for Recorder {
        fn base(&self) -> &ModuleBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ModuleBase {
            &mut self.base
        }

        fn update(&mut self) -> Result<(), ModuleError> {
            self.log.lock().push(self.tag);
            if self.fail {
                return Err(ModuleError::failed("malformed input"));
            }
            Ok(())
        }
    }

    struct Forward {
        base: ModuleBase,
        input: Field<i32>,
        output: Field<i32>,
    }

    impl Forward {
        fn new() -> Self {
            let mut base = ModuleBase::new("Forward");
            let input = base.declare_input("In", "");
            let output = base.declare_output("Out", "");
            Self {
                base,
                input,
                output,
            }
        }
    }

    impl Module for Forward {
        fn base(&self) -> &ModuleBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ModuleBase {
            &mut self.base
        }

        fn update(&mut self) -> Result<(), ModuleError> {
            self.output.set(self.input.get()?)?;
            Ok(())
        }
    }

    #[test]
    fn test_execution_follows_push_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(PipelineKind::Animation);
        pipeline.create_module(Recorder::new("c", &log)).unwrap();
        pipeline.create_module(Recorder::new("a", &log)).unwrap();
        pipeline.create_module(Recorder::new("b", &log)).unwrap();

        for frame in 0..3 {
            pipeline.execute(frame);
        }

        assert_eq!(*log.lock(), ["c", "a", "b", "c", "a", "b", "c", "a", "b"]);
        assert_eq!(pipeline.executions(), 3);
    }

    #[test]
    fn test_update_tokens_follow_push_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(PipelineKind::Animation);
        let first = pipeline.create_module(Recorder::new("first", &log)).unwrap();
        let second = pipeline.create_module(Recorder::new("second", &log)).unwrap();

        pipeline.execute(0);
        assert!(first.lock().base().last_updated() < second.lock().base().last_updated());
    }

    #[test]
    fn test_failure_does_not_abort_pipeline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(PipelineKind::Animation);
        let bad = pipeline
            .create_module(Recorder::new("bad", &log).failing())
            .unwrap();
        let good = pipeline.create_module(Recorder::new("good", &log)).unwrap();

        let report = pipeline.execute(7);

        assert_eq!(*log.lock(), ["bad", "good"]);
        assert_eq!(report.executed, vec![good.lock().base().id()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].frame, 7);
        assert_eq!(report.failures[0].message, "malformed input");
        assert!(bad.lock().base().last_failure().is_some());
        assert!(good.lock().base().last_failure().is_none());

        pipeline.prime();
        assert!(bad.lock().base().last_failure().is_none());
    }

    #[test]
    fn test_disable_skips_but_keeps_wiring() {
        let mut pipeline = Pipeline::new(PipelineKind::Animation);
        let copy = pipeline.create_module(Forward::new()).unwrap();
        let (id, input, output) = {
            let guard = copy.lock();
            (guard.base().id(), guard.input.clone(), guard.output.clone())
        };

        let source = Field::<i32>::state("Source", "");
        source.connect(&input).unwrap();
        source.set(1).unwrap();
        pipeline.execute(0);
        assert_eq!(output.get().unwrap(), 1);

        pipeline.disable(id).unwrap();
        source.set(2).unwrap();
        let report = pipeline.execute(1);
        assert_eq!(report.skipped, vec![id]);
        assert_eq!(output.get().unwrap(), 1);
        assert!(input.is_connected());

        pipeline.enable(id).unwrap();
        pipeline.execute(2);
        assert_eq!(output.get().unwrap(), 2);
    }

    #[test]
    fn test_module_side_effects_limited_to_outputs() {
        let mut pipeline = Pipeline::new(PipelineKind::Animation);
        let copy = pipeline.create_module(Forward::new()).unwrap();
        let source = Field::<i32>::state("Source", "");
        source.set(5).unwrap();
        source.connect(&copy.lock().input).unwrap();

        let before: Vec<(String, u64)> = {
            let guard = copy.lock();
            guard
                .base()
                .fields()
                .map(|f| (f.name().to_string(), f.version()))
                .collect()
        };
        let source_version = source.version();

        pipeline.execute(0);

        let guard = copy.lock();
        for (field, (name, version)) in guard.base().fields().zip(before) {
            assert_eq!(field.name(), name);
            if guard.base().outputs().contains(&name) {
                assert!(field.version() > version);
            } else {
                assert_eq!(field.version(), version);
            }
        }
        assert_eq!(source.version(), source_version);
    }

    #[test]
    fn test_module_in_one_pipeline_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut animation = Pipeline::new(PipelineKind::Animation);
        let mut graphics = Pipeline::new(PipelineKind::Graphics);
        let module = animation.create_module(Recorder::new("m", &log)).unwrap();

        let err = graphics.push_module(module.clone()).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyInPipeline { .. }));
        let err = animation.push_module(module.clone()).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyInPipeline { .. }));
        assert_eq!(animation.len(), 1);
        assert!(graphics.is_empty());

        let id = module.lock().base().id();
        animation.remove_module(id).unwrap();
        graphics.push_module(module).unwrap();
        assert!(graphics.contains(id));
    }

    #[test]
    fn test_unknown_module() {
        let pipeline = Pipeline::new(PipelineKind::Graphics);
        let id = ModuleId::new();
        assert_eq!(pipeline.enable(id), Err(PipelineError::ModuleNotFound(id)));
    }

    #[test]
    fn test_pipeline_tags_module_fields_with_node() {
        let mut pipeline = Pipeline::new(PipelineKind::Animation);
        let node = NodeId::new();
        pipeline.set_node(Some(node));
        let copy = pipeline.create_module(Forward::new()).unwrap();
        let guard = copy.lock();
        assert_eq!(guard.base().node(), Some(node));
        assert_eq!(AnyField::node(&guard.input), Some(node));
        assert_eq!(AnyField::node(&guard.output), Some(node));
    }
}
