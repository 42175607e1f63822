// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scene nodes.
//!
//! A node owns its fields, an animation pipeline and a graphics pipeline.
//! Concrete node types embed a [`NodeCore`] and implement [`Node`]; the
//! lifecycle driver (`reset`, `advance`) is provided by the trait.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::field::{AnyField, Field, FieldData, FieldError, FieldKind, FieldSet};
use crate::pipeline::{Pipeline, PipelineKind, PipelineReport};

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle position of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Constructed, never reset
    Uninitialized,
    /// States populated, no frame advanced yet
    Reset,
    /// Advanced this many frames since the last reset
    Stepping(u64),
    /// Removed from its scene
    Terminated,
}

/// Error raised by the node lifecycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// Node was advanced before its first reset
    #[error("Node '{0}' has not been reset")]
    NotReset(String),

    /// Node was used after removal
    #[error("Node '{0}' has been terminated")]
    Terminated(String),

    /// `reset_states` could not populate the node
    #[error("Failed to reset node '{node}': {message}")]
    ResetFailed {
        /// Node name
        node: String,
        /// What went wrong
        message: String,
    },

    /// A built-in state could not be written
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// How many nodes a node port accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortCardinality {
    /// Exactly one imported node
    Single,
    /// Any number of imported nodes
    Multiple,
}

/// A port through which whole nodes are imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePort {
    /// Port name
    pub name: String,
    /// Description
    pub description: String,
    /// Accepted number of nodes
    pub cardinality: PortCardinality,
    /// Imported nodes, in connection order
    pub nodes: Vec<NodeId>,
}

impl NodePort {
    /// Whether another node can be imported
    pub fn accepts_more(&self) -> bool {
        self.cardinality == PortCardinality::Multiple || self.nodes.is_empty()
    }
}

/// State every node carries
pub struct NodeCore {
    id: NodeId,
    name: String,
    fields: FieldSet,
    ports: IndexMap<String, NodePort>,
    animation: Pipeline,
    graphics: Pipeline,
    visible: bool,
    status: NodeStatus,
    elapsed_time: Field<f64>,
    time_step: Field<f64>,
    frame_number: Field<u64>,
}

impl NodeCore {
    /// Create a core with the built-in states declared
    pub fn new(name: impl Into<String>) -> Self {
        let id = NodeId::new();
        let mut fields = FieldSet::new();
        let elapsed_time = fields.insert(Field::state("ElapsedTime", "Simulated time since reset"));
        let time_step = fields.insert(Field::state("TimeStep", "Length of the last frame"));
        let frame_number = fields.insert(Field::state("FrameNumber", "Frames advanced since reset"));
        fields.set_node(Some(id));

        let mut animation = Pipeline::new(PipelineKind::Animation);
        animation.set_node(Some(id));
        let mut graphics = Pipeline::new(PipelineKind::Graphics);
        graphics.set_node(Some(id));

        Self {
            id,
            name: name.into(),
            fields,
            ports: IndexMap::new(),
            animation,
            graphics,
            visible: true,
            status: NodeStatus::Uninitialized,
            elapsed_time,
            time_step,
            frame_number,
        }
    }

    fn declare<T: FieldData>(&mut self, field: Field<T>) -> Field<T> {
        field.set_node(Some(self.id));
        self.fields.insert(field)
    }

    /// Declare an empty state field
    pub fn declare_state<T: FieldData>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Field<T> {
        self.declare(Field::state(name, description))
    }

    /// Declare a parameter with its initial value
    pub fn declare_param<T: FieldData>(
        &mut self,
        name: impl Into<String>,
        value: T,
        description: impl Into<String>,
    ) -> Field<T> {
        self.declare(Field::param(name, value, description))
    }

    /// Declare an inter-node input port
    pub fn declare_input<T: FieldData>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Field<T> {
        self.declare(Field::input(name, description))
    }

    /// Declare an inter-node output port
    pub fn declare_output<T: FieldData>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Field<T> {
        self.declare(Field::output(name, description))
    }

    /// Expose an existing field (for example a module output) as a field of this node
    pub fn expose<T: FieldData>(&mut self, field: &Field<T>) -> Field<T> {
        self.declare(field.clone())
    }

    /// Declare a port importing whole nodes
    pub fn declare_node_port(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        cardinality: PortCardinality,
    ) {
        let name = name.into();
        self.ports.insert(
            name.clone(),
            NodePort {
                name,
                description: description.into(),
                cardinality,
                nodes: Vec::new(),
            },
        );
    }

    /// Node identity
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every node-level field, in declaration order
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Look up a node-level field
    pub fn field(&self, name: &str) -> Option<&Arc<dyn AnyField>> {
        self.fields.get(name)
    }

    /// Fields other nodes may wire from
    pub fn output_ports(&self) -> impl Iterator<Item = &Arc<dyn AnyField>> {
        self.fields.iter().filter(|f| f.is_output_port())
    }

    /// Fields other nodes may wire into
    pub fn input_ports(&self) -> impl Iterator<Item = &Arc<dyn AnyField>> {
        self.fields.of_kind(FieldKind::Input)
    }

    /// Node ports, in declaration order
    pub fn node_ports(&self) -> impl Iterator<Item = &NodePort> {
        self.ports.values()
    }

    /// Look up a node port
    pub fn node_port(&self, name: &str) -> Option<&NodePort> {
        self.ports.get(name)
    }

    pub(crate) fn node_port_mut(&mut self, name: &str) -> Option<&mut NodePort> {
        self.ports.get_mut(name)
    }

    pub(crate) fn node_ports_mut(&mut self) -> impl Iterator<Item = &mut NodePort> {
        self.ports.values_mut()
    }

    /// Nodes imported through a port
    pub fn imported_nodes(&self, port: &str) -> &[NodeId] {
        self.ports
            .get(port)
            .map(|p| p.nodes.as_slice())
            .unwrap_or_default()
    }

    /// The animation pipeline
    pub fn animation_pipeline(&self) -> &Pipeline {
        &self.animation
    }

    /// The animation pipeline, mutably
    pub fn animation_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.animation
    }

    /// The graphics pipeline
    pub fn graphics_pipeline(&self) -> &Pipeline {
        &self.graphics
    }

    /// The graphics pipeline, mutably
    pub fn graphics_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.graphics
    }

    /// One of the two pipelines
    pub fn pipeline(&self, kind: PipelineKind) -> &Pipeline {
        match kind {
            PipelineKind::Animation => &self.animation,
            PipelineKind::Graphics => &self.graphics,
        }
    }

    /// Whether the renderer should draw this node
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Show or hide the node
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Lifecycle position
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// `ElapsedTime` state
    pub fn state_elapsed_time(&self) -> &Field<f64> {
        &self.elapsed_time
    }

    /// `TimeStep` state
    pub fn state_time_step(&self) -> &Field<f64> {
        &self.time_step
    }

    /// `FrameNumber` state
    pub fn state_frame_number(&self) -> &Field<u64> {
        &self.frame_number
    }

    /// Frames advanced since the last reset
    pub fn frame_number(&self) -> u64 {
        self.frame_number.get().unwrap_or(0)
    }

    /// Simulated time since the last reset
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time.get().unwrap_or(0.0)
    }

    fn restore_clock(&self, (frame, elapsed): (Option<u64>, Option<f64>)) -> Result<(), FieldError> {
        match frame {
            Some(frame) => self.frame_number.set(frame)?,
            None => self.frame_number.clear()?,
        }
        match elapsed {
            Some(elapsed) => self.elapsed_time.set(elapsed)?,
            None => self.elapsed_time.clear()?,
        }
        Ok(())
    }

    /// Every field of the node and of its modules
    pub fn all_fields(&self) -> Vec<Arc<dyn AnyField>> {
        let mut fields: Vec<_> = self.fields.iter().cloned().collect();
        for module in self.animation.modules().chain(self.graphics.modules()) {
            let guard = module.lock();
            fields.extend(guard.base().fields().cloned());
        }
        fields
    }

    /// Cut every connection touching this node's fields or its modules' fields
    pub fn detach_all(&self) {
        for field in self.all_fields() {
            field.detach_all();
        }
    }
}

impl std::fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("fields", &self.fields)
            .field("animation", &self.animation)
            .field("graphics", &self.graphics)
            .finish()
    }
}

/// A scene entity owning state and two pipelines
pub trait Node: Send + Sync {
    /// Shared node state
    fn core(&self) -> &NodeCore;

    /// Shared node state, mutably
    fn core_mut(&mut self) -> &mut NodeCore;

    /// Display name
    fn caption(&self) -> String {
        self.core().name().to_string()
    }

    /// Populate state fields from configuration
    fn reset_states(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Advance state by one frame
    fn update_states(&mut self, frame: u64) -> PipelineReport {
        self.core_mut().animation_pipeline_mut().execute(frame)
    }

    /// Runs after `update_states`, before the frame counter moves
    fn post_update_states(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Reset the node: zero the clock, repopulate states, clear failure records
    fn reset(&mut self) -> Result<(), NodeError> {
        if self.core().status == NodeStatus::Terminated {
            return Err(NodeError::Terminated(self.caption()));
        }

        let clock = {
            let core = self.core();
            let clock = (core.frame_number.get().ok(), core.elapsed_time.get().ok());
            core.frame_number.set(0)?;
            core.elapsed_time.set(0.0)?;
            clock
        };
        if let Err(error) = self.reset_states() {
            // A failed reset leaves the node where it was.
            self.core().restore_clock(clock)?;
            return Err(error);
        }

        let core = self.core_mut();
        core.animation.prime();
        core.graphics.prime();
        core.status = NodeStatus::Reset;
        tracing::debug!(node = %core.name, "Node reset");
        Ok(())
    }

    /// Run the animation pipeline once and move the frame counter
    fn advance(&mut self, dt: f64) -> Result<PipelineReport, NodeError> {
        match self.core().status {
            NodeStatus::Uninitialized => return Err(NodeError::NotReset(self.caption())),
            NodeStatus::Terminated => return Err(NodeError::Terminated(self.caption())),
            NodeStatus::Reset | NodeStatus::Stepping(_) => {}
        }

        let frame = self.core().frame_number();
        self.core().time_step.set(dt)?;

        let report = self.update_states(frame);
        if let Err(error) = self.post_update_states() {
            tracing::warn!(node = %self.caption(), frame, error = %error, "Post-update hook failed");
        }

        let core = self.core_mut();
        core.frame_number.set(frame + 1)?;
        core.elapsed_time.modify(|t| *t += dt)?;
        core.status = NodeStatus::Stepping(frame + 1);
        Ok(report)
    }

    /// Run the graphics pipeline once
    fn update_graphics(&mut self) -> PipelineReport {
        let frame = self.core().frame_number();
        self.core_mut().graphics_pipeline_mut().execute(frame)
    }

    /// Disconnect everything and refuse further use
    fn terminate(&mut self) {
        let core = self.core_mut();
        core.detach_all();
        core.status = NodeStatus::Terminated;
        tracing::debug!(node = %core.name, "Node terminated");
    }
}
