// SPDX-License-Identifier: MIT OR Apache-2.0
//! Modules: the units of computation a pipeline executes.
//!
//! A module declares its input, output and parameter fields once, at
//! construction, through its [`ModuleBase`]. `update` reads the inputs and
//! writes the outputs; the engine trusts that discipline rather than
//! enforcing it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::field::{AnyField, Field, FieldData, FieldError, FieldKind, FieldSet};
use crate::node::NodeId;
use crate::pipeline::PipelineId;

/// Unique identifier for a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub Uuid);

impl ModuleId {
    /// Create a new random module ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

static UPDATE_TICK: AtomicU64 = AtomicU64::new(0);

fn next_tick() -> u64 {
    UPDATE_TICK.fetch_add(1, Ordering::Relaxed) + 1
}

/// Error returned from [`Module::update`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    /// A field could not be read or written
    #[error(transparent)]
    Field(#[from] FieldError),

    /// The computation itself failed
    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    /// Create a computation failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A failed `update`, recorded against the module for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleFailure {
    /// Failing module
    pub module: ModuleId,
    /// Module name
    pub module_name: String,
    /// Node owning the pipeline, if any
    pub node: Option<NodeId>,
    /// Frame the failure happened in
    pub frame: u64,
    /// Rendered error
    pub message: String,
}

/// Bookkeeping shared by every module
#[derive(Debug)]
pub struct ModuleBase {
    id: ModuleId,
    name: String,
    inputs: FieldSet,
    outputs: FieldSet,
    params: FieldSet,
    enabled: bool,
    last_updated: u64,
    pipeline: Option<PipelineId>,
    node: Option<NodeId>,
    last_failure: Option<ModuleFailure>,
}

impl ModuleBase {
    /// Create an empty module base
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ModuleId::new(),
            name: name.into(),
            inputs: FieldSet::new(),
            outputs: FieldSet::new(),
            params: FieldSet::new(),
            enabled: true,
            last_updated: 0,
            pipeline: None,
            node: None,
            last_failure: None,
        }
    }

    /// Declare an input field
    pub fn declare_input<T: FieldData>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Field<T> {
        self.inputs.insert(Field::input(name, description))
    }

    /// Declare an output field owned by this module
    pub fn declare_output<T: FieldData>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Field<T> {
        self.outputs.insert(Field::output(name, description))
    }

    /// Declare a parameter with its initial value
    pub fn declare_param<T: FieldData>(
        &mut self,
        name: impl Into<String>,
        value: T,
        description: impl Into<String>,
    ) -> Field<T> {
        self.params.insert(Field::param(name, value, description))
    }

    /// List an existing owned field (typically node state) among this
    /// module's outputs, so `update` may write it in place
    pub fn bind_output<T: FieldData>(&mut self, field: &Field<T>) -> Result<(), FieldError> {
        if field.kind() == FieldKind::Input {
            return Err(FieldError::WriteToInput {
                field: field.name().to_string(),
            });
        }
        self.outputs.insert(field.clone());
        Ok(())
    }

    /// Module identity
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared inputs
    pub fn inputs(&self) -> &FieldSet {
        &self.inputs
    }

    /// Declared outputs
    pub fn outputs(&self) -> &FieldSet {
        &self.outputs
    }

    /// Declared parameters
    pub fn params(&self) -> &FieldSet {
        &self.params
    }

    /// Whether the pipeline will run this module
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Token of the last successful update; later updates carry larger tokens
    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    /// Pipeline this module was pushed into
    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    /// Node owning that pipeline
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Failure recorded by the most recent execution, if it failed
    pub fn last_failure(&self) -> Option<&ModuleFailure> {
        self.last_failure.as_ref()
    }

    pub(crate) fn attach_to(&mut self, pipeline: PipelineId, node: Option<NodeId>) {
        self.pipeline = Some(pipeline);
        self.set_owner(node);
    }

    pub(crate) fn detach(&mut self) {
        self.pipeline = None;
        self.set_owner(None);
    }

    pub(crate) fn set_owner(&mut self, node: Option<NodeId>) {
        self.node = node;
        self.inputs.set_node(node);
        self.params.set_node(node);
        // Bound node state keeps its own tag.
        for field in self.outputs.iter() {
            if field.kind() == FieldKind::Output {
                field.set_node(node);
            }
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.last_updated = next_tick();
        self.last_failure = None;
    }

    pub(crate) fn record_failure(&mut self, failure: ModuleFailure) {
        self.last_failure = Some(failure);
    }

    pub(crate) fn clear_failure(&mut self) {
        self.last_failure = None;
    }

    /// Every declared field, inputs first
    pub fn fields(&self) -> impl Iterator<Item = &Arc<dyn AnyField>> {
        self.inputs
            .iter()
            .chain(self.params.iter())
            .chain(self.outputs.iter())
    }
}

/// A unit of computation
pub trait Module: Send + Sync {
    /// Shared bookkeeping
    fn base(&self) -> &ModuleBase;

    /// Shared bookkeeping, mutably
    fn base_mut(&mut self) -> &mut ModuleBase;

    /// Read declared inputs, write declared outputs
    fn update(&mut self) -> Result<(), ModuleError>;

    /// Display name
    fn caption(&self) -> String {
        self.base().name().to_string()
    }
}

/// Shared handle to a module inside a pipeline
pub type ModuleRef = Arc<Mutex<dyn Module>>;
