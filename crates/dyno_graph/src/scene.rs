// SPDX-License-Identifier: MIT OR Apache-2.0
//! The scene graph: an ordered set of nodes plus global configuration.
//!
//! Insertion order doubles as the execution order. Wiring through the scene
//! only lets a node consume outputs of nodes added before it, so that order
//! is always a valid topological order.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::field::{AnyField, FieldError, FieldKind};
use crate::introspect::{NodeInfo, SceneInfo};
use crate::module::ModuleFailure;
use crate::node::{Node, NodeError, NodeId, NodeStatus};
use crate::pipeline::{PipelineError, PipelineReport};

/// Shared handle to a node owned by a scene
pub type NodeRef = Arc<RwLock<dyn Node>>;

/// Global scene configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Lower corner of the simulation domain
    pub lower_bound: [f32; 3],
    /// Upper corner of the simulation domain
    pub upper_bound: [f32; 3],
    /// Simulated seconds per frame
    pub time_step: f64,
    /// Gravitational acceleration
    pub gravity: [f32; 3],
    /// Frames a driver should run before finishing; 0 means unbounded
    pub total_frames: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            lower_bound: [-1.0, -1.0, -1.0],
            upper_bound: [1.0, 1.0, 1.0],
            time_step: 0.016,
            gravity: [0.0, -9.8, 0.0],
            total_frames: 1000,
        }
    }
}

/// Error when composing a scene
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// Node not found
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Field not found on a node
    #[error("Node '{node}' has no field '{field}'")]
    FieldNotFound {
        /// Node name
        node: String,
        /// Field name
        field: String,
    },

    /// Field cannot be wired from
    #[error("Field '{field}' of node '{node}' is not an output port")]
    NotAnOutputPort {
        /// Node name
        node: String,
        /// Field name
        field: String,
    },

    /// Node port not found
    #[error("Node '{node}' has no node port '{port}'")]
    PortNotFound {
        /// Node name
        node: String,
        /// Port name
        port: String,
    },

    /// Single-node port already holds another node
    #[error("Node port '{port}' of node '{node}' is already connected")]
    PortOccupied {
        /// Node name
        node: String,
        /// Port name
        port: String,
    },

    /// Wiring would break the insertion-order invariant
    #[error("Cannot wire '{from}' into '{to}': {reason}")]
    CyclicDependency {
        /// Producing node
        from: String,
        /// Consuming node
        to: String,
        /// Which rule was violated
        reason: &'static str,
    },

    /// Field-level wiring failed
    #[error(transparent)]
    Field(#[from] FieldError),

    /// A node's pipeline could not be assembled
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Error when the live wiring contains a cycle
#[derive(Debug, thiserror::Error)]
#[error("Scene contains a cycle through node {node:?}")]
pub struct CycleError {
    /// A node on the cycle
    pub node: NodeId,
}

/// A node-level failure during reset or advance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// Failing node
    pub node: NodeId,
    /// Node name
    pub node_name: String,
    /// Scene frame it happened in
    pub frame: u64,
    /// Rendered error
    pub message: String,
}

/// What happened during `reset` or `advance`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneReport {
    /// Frames completed
    pub frames: u64,
    /// Module failures, in occurrence order
    pub failures: Vec<ModuleFailure>,
    /// Node lifecycle failures, in occurrence order
    pub node_errors: Vec<NodeFailure>,
}

impl SceneReport {
    /// Whether nothing failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.node_errors.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: SceneReport) {
        self.frames += other.frames;
        self.failures.extend(other.failures);
        self.node_errors.extend(other.node_errors);
    }
}

/// Ordered collection of nodes driving frame advancement
pub struct SceneGraph {
    config: SceneConfig,
    nodes: IndexMap<NodeId, NodeRef>,
    frame_number: u64,
    elapsed_time: f64,
    initialized: bool,
}

impl SceneGraph {
    /// Create an empty scene with default configuration
    pub fn new() -> Self {
        Self::with_config(SceneConfig::default())
    }

    /// Create an empty scene
    pub fn with_config(config: SceneConfig) -> Self {
        Self {
            config,
            nodes: IndexMap::new(),
            frame_number: 0,
            elapsed_time: 0.0,
            initialized: false,
        }
    }

    /// Global configuration
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Global configuration, mutably
    pub fn config_mut(&mut self) -> &mut SceneConfig {
        &mut self.config
    }

    /// Set the simulation domain
    pub fn set_bounds(&mut self, lower: [f32; 3], upper: [f32; 3]) {
        self.config.lower_bound = lower;
        self.config.upper_bound = upper;
    }

    /// Set the frame length
    pub fn set_time_step(&mut self, dt: f64) {
        self.config.time_step = dt;
    }

    /// Frames advanced since the last reset
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Simulated time since the last reset
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    /// Whether `reset` has run
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Add a node and return a handle for further wiring
    ///
    /// Rejected without touching the scene if any input of the node (or of
    /// its modules) already reads from a node that is not in the scene, or
    /// if any of its fields already feeds a node that is.
    pub fn add_node<N: Node + 'static>(&mut self, node: N) -> Result<Arc<RwLock<N>>, SceneError> {
        self.check_wiring(&node)?;
        let id = node.core().id();
        let caption = node.caption();
        let handle = Arc::new(RwLock::new(node));
        self.nodes.insert(id, handle.clone());
        tracing::info!(node = %caption, count = self.nodes.len(), "Added node");
        Ok(handle)
    }

    fn check_wiring(&self, node: &dyn Node) -> Result<(), SceneError> {
        let core = node.core();
        let fields = core.all_fields();

        let upstream = fields
            .iter()
            .filter(|f| f.kind() == FieldKind::Input)
            .filter_map(|f| f.source_node())
            .chain(core.node_ports().flat_map(|p| p.nodes.iter().copied()));
        for source in upstream {
            if source != core.id() && !self.nodes.contains_key(&source) {
                return Err(SceneError::CyclicDependency {
                    from: format!("{:?}", source.0),
                    to: node.caption(),
                    reason: "source node has not been added",
                });
            }
        }

        let downstream = fields.iter().flat_map(|f| f.sink_nodes());
        for sink in downstream {
            if sink != core.id() && self.nodes.contains_key(&sink) {
                return Err(SceneError::CyclicDependency {
                    from: node.caption(),
                    to: self.caption_of(sink),
                    reason: "source node was added after its consumer",
                });
            }
        }
        Ok(())
    }

    /// Remove a node, cutting every connection it takes part in
    pub fn remove_node(&mut self, id: NodeId) -> Option<NodeRef> {
        let handle = self.nodes.shift_remove(&id)?;
        handle.write().terminate();
        for other in self.nodes.values() {
            let mut guard = other.write();
            for port in guard.core_mut().node_ports_mut() {
                port.nodes.retain(|n| *n != id);
            }
        }
        tracing::info!(node = ?id, "Removed node");
        Some(handle)
    }

    /// Get a node by ID
    pub fn node(&self, id: NodeId) -> Option<&NodeRef> {
        self.nodes.get(&id)
    }

    /// All nodes in traversal order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.nodes.values()
    }

    /// All node IDs in traversal order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the scene has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn caption_of(&self, id: NodeId) -> String {
        self.nodes
            .get(&id)
            .map_or_else(|| format!("{:?}", id.0), |n| n.read().caption())
    }

    fn check_order(&self, from: NodeId, to: NodeId) -> Result<(), SceneError> {
        let to_index = self
            .nodes
            .get_index_of(&to)
            .ok_or(SceneError::NodeNotFound(to))?;
        let cycle = |reason| SceneError::CyclicDependency {
            from: self.caption_of(from),
            to: self.caption_of(to),
            reason,
        };
        if from == to {
            return Err(cycle("a node cannot consume its own output"));
        }
        let from_index = self
            .nodes
            .get_index_of(&from)
            .ok_or_else(|| cycle("source node has not been added"))?;
        if from_index > to_index {
            return Err(cycle("source node was added after its consumer"));
        }
        Ok(())
    }

    /// Wire an output port of one node into an input port of another by name
    pub fn connect(&self, from: NodeId, output: &str, to: NodeId, input: &str) -> Result<(), SceneError> {
        self.check_order(from, to)?;

        let source = {
            let node = self.nodes[&from].read();
            let field = node
                .core()
                .field(output)
                .cloned()
                .ok_or_else(|| SceneError::FieldNotFound {
                    node: node.caption(),
                    field: output.to_string(),
                })?;
            if !field.is_output_port() {
                return Err(SceneError::NotAnOutputPort {
                    node: node.caption(),
                    field: output.to_string(),
                });
            }
            field
        };
        let target = {
            let node = self.nodes[&to].read();
            node.core()
                .field(input)
                .cloned()
                .ok_or_else(|| SceneError::FieldNotFound {
                    node: node.caption(),
                    field: input.to_string(),
                })?
        };

        source.connect_any(target.as_ref())?;
        Ok(())
    }

    /// Wire two field handles, enforcing insertion order when they belong to different nodes
    pub fn connect_fields(&self, output: &dyn AnyField, input: &dyn AnyField) -> Result<(), SceneError> {
        if let (Some(from), Some(to)) = (output.node(), input.node()) {
            if from != to {
                self.check_order(from, to)?;
            }
        }
        output.connect_any(input)?;
        Ok(())
    }

    /// Hand `upstream` to a node port of `downstream`
    pub fn connect_node_port(&self, upstream: NodeId, downstream: NodeId, port: &str) -> Result<(), SceneError> {
        self.check_order(upstream, downstream)?;

        let mut node = self.nodes[&downstream].write();
        let caption = node.caption();
        let slot = node
            .core_mut()
            .node_port_mut(port)
            .ok_or_else(|| SceneError::PortNotFound {
                node: caption.clone(),
                port: port.to_string(),
            })?;
        if slot.nodes.contains(&upstream) {
            return Ok(());
        }
        if !slot.accepts_more() {
            return Err(SceneError::PortOccupied {
                node: caption,
                port: port.to_string(),
            });
        }
        slot.nodes.push(upstream);
        tracing::debug!(port = %port, node = %caption, "Connected node port");
        Ok(())
    }

    /// Take `upstream` out of a node port; returns whether it was there
    pub fn disconnect_node_port(&self, upstream: NodeId, downstream: NodeId, port: &str) -> bool {
        let Some(node) = self.nodes.get(&downstream) else {
            return false;
        };
        let mut node = node.write();
        let Some(slot) = node.core_mut().node_port_mut(port) else {
            return false;
        };
        let before = slot.nodes.len();
        slot.nodes.retain(|n| *n != upstream);
        slot.nodes.len() != before
    }

    /// Reset every node, in insertion order
    pub fn reset(&mut self) -> SceneReport {
        let mut report = SceneReport::default();
        for (id, node) in &self.nodes {
            let mut node = node.write();
            if let Err(error) = node.reset() {
                tracing::warn!(node = %node.caption(), error = %error, "Node reset failed");
                report.node_errors.push(failure(*id, &*node, 0, &error));
            }
        }
        self.frame_number = 0;
        self.elapsed_time = 0.0;
        self.initialized = true;
        tracing::info!(nodes = self.nodes.len(), "Scene reset");
        report
    }

    /// Advance every node by `frames` frames
    pub fn advance(&mut self, frames: u64) -> SceneReport {
        self.advance_while(frames, || true)
    }

    /// Advance up to `frames` frames, asking `keep_going` before each one
    ///
    /// This is the only place a driver can pause or stop: never inside a
    /// frame, so every node's animation pipeline always runs to completion.
    pub fn advance_while(&mut self, frames: u64, mut keep_going: impl FnMut() -> bool) -> SceneReport {
        let mut report = SceneReport::default();
        if frames == 0 {
            return report;
        }
        if !self.initialized {
            report.merge(self.reset());
        }

        let dt = self.config.time_step;
        for _ in 0..frames {
            if !keep_going() {
                tracing::debug!(frame = self.frame_number, "Advance interrupted between frames");
                break;
            }

            let frame = self.frame_number;
            for (id, node) in &self.nodes {
                let mut node = node.write();
                if node.core().status() == NodeStatus::Uninitialized {
                    if let Err(error) = node.reset() {
                        tracing::warn!(node = %node.caption(), error = %error, "Node reset failed");
                        report.node_errors.push(failure(*id, &*node, frame, &error));
                        continue;
                    }
                }
                match node.advance(dt) {
                    Ok(pipeline) => report.failures.extend(pipeline.failures),
                    Err(error) => {
                        tracing::warn!(node = %node.caption(), frame, error = %error, "Node advance failed");
                        report.node_errors.push(failure(*id, &*node, frame, &error));
                    }
                }
            }

            self.frame_number += 1;
            self.elapsed_time += dt;
            report.frames += 1;
            tracing::trace!(frame = self.frame_number, "Frame finished");
        }
        report
    }

    /// Run the graphics pipeline of every visible node
    pub fn update_graphics(&self) -> PipelineReport {
        let mut report = PipelineReport::default();
        for node in self.nodes.values() {
            let mut node = node.write();
            if node.core().is_visible() {
                report.merge(node.update_graphics());
            }
        }
        report
    }

    fn dependencies(&self) -> HashMap<NodeId, Vec<NodeId>> {
        self.nodes
            .iter()
            .map(|(id, node)| {
                let node = node.read();
                let core = node.core();
                let mut deps: Vec<NodeId> = core
                    .all_fields()
                    .iter()
                    .filter(|f| f.kind() == FieldKind::Input)
                    .filter_map(|f| f.source_node())
                    .filter(|source| source != id)
                    .collect();
                deps.extend(core.node_ports().flat_map(|p| p.nodes.iter().copied()));
                deps.dedup();
                (*id, deps)
            })
            .collect()
    }

    /// Nodes ordered so that every node follows the nodes it reads from
    pub fn dependency_order(&self) -> Result<Vec<NodeId>, CycleError> {
        let deps = self.dependencies();
        let mut visited = HashSet::new();
        let mut temp_mark = HashSet::new();
        let mut order = Vec::new();

        for id in self.nodes.keys() {
            if !visited.contains(id) {
                Self::visit(*id, &deps, &mut visited, &mut temp_mark, &mut order)?;
            }
        }

        Ok(order)
    }

    fn visit(
        id: NodeId,
        deps: &HashMap<NodeId, Vec<NodeId>>,
        visited: &mut HashSet<NodeId>,
        temp_mark: &mut HashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) -> Result<(), CycleError> {
        if temp_mark.contains(&id) {
            return Err(CycleError { node: id });
        }
        if visited.contains(&id) {
            return Ok(());
        }

        temp_mark.insert(id);
        // Nodes outside the scene have no entry and end the walk.
        for dep in deps.get(&id).into_iter().flatten() {
            if deps.contains_key(dep) {
                Self::visit(*dep, deps, visited, temp_mark, order)?;
            }
        }
        temp_mark.remove(&id);
        visited.insert(id);
        order.push(id);

        Ok(())
    }

    /// Confirm that insertion order respects the live wiring
    pub fn validate(&self) -> Result<(), SceneError> {
        for (to, deps) in self.dependencies() {
            for from in deps {
                self.check_order(from, to)?;
            }
        }
        Ok(())
    }

    /// Snapshot every node
    pub fn scene_info(&self) -> SceneInfo {
        SceneInfo {
            config: self.config.clone(),
            frame_number: self.frame_number,
            elapsed_time: self.elapsed_time,
            nodes: self.nodes.values().map(|n| NodeInfo::of(&*n.read())).collect(),
        }
    }

    /// Log and return a listing of the nodes
    pub fn print_node_info(&self, verbose: bool) -> String {
        let text = self.scene_info().render_nodes(verbose);
        tracing::info!("\n{text}");
        text
    }

    /// Log and return a listing of every pipeline
    pub fn print_module_info(&self, verbose: bool) -> String {
        let text = self.scene_info().render_modules(verbose);
        tracing::info!("\n{text}");
        text
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SceneGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneGraph")
            .field("config", &self.config)
            .field("nodes", &self.nodes.len())
            .field("frame_number", &self.frame_number)
            .finish()
    }
}

fn failure(id: NodeId, node: &dyn Node, frame: u64, error: &NodeError) -> NodeFailure {
    NodeFailure {
        node: id,
        node_name: node.caption(),
        frame,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::module::{Module, ModuleBase, ModuleError};
    use crate::node::{NodeCore, PortCardinality};

    /// Node A: a promoted scalar state initialised from a parameter
    struct Source {
        core: NodeCore,
        initial: Field<f64>,
        value: Field<f64>,
    }

    impl Source {
        fn new(initial: f64) -> Self {
            let mut core = NodeCore::new("Source");
            let initial = core.declare_param("Initial", initial, "Value after reset");
            let value = core.declare_state::<f64>("Value", "Current value");
            value.promote_output().unwrap();
            core.declare_input::<f64>("Feedback", "Unused feedback port");
            Self {
                core,
                initial,
                value,
            }
        }
    }

    impl Node for Source {
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

    struct Double {
        base: ModuleBase,
        input: Field<f64>,
        output: Field<f64>,
    }

    impl Module for Double {
        fn base(&self) -> &ModuleBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut ModuleBase {
            &mut self.base
        }

        fn update(&mut self) -> Result<(), ModuleError> {
            let value = self.input.get()?;
            if !value.is_finite() {
                return Err(ModuleError::failed("input is not finite"));
            }
            self.output.set(value * 2.0)?;
            Ok(())
        }
    }

    /// Node B: doubles its input into its output
    struct Doubler {
        core: NodeCore,
        output: Field<f64>,
    }

    impl Doubler {
        fn new() -> Self {
            let mut core = NodeCore::new("Doubler");
            let input = core.declare_input::<f64>("Value", "Value to double");
            let output = core.declare_output::<f64>("Result", "Doubled value");
            core.declare_node_port("Sources", "Upstream nodes", PortCardinality::Single);

            let mut base = ModuleBase::new("Double");
            let module_in = base.declare_input::<f64>("In", "");
            base.bind_output(&output).unwrap();
            input.connect(&module_in).unwrap();
            core.animation_pipeline_mut()
                .create_module(Double {
                    base,
                    input: module_in,
                    output: output.clone(),
                })
                .unwrap();

            Self { core, output }
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

    fn two_nodes() -> (SceneGraph, Arc<RwLock<Source>>, Arc<RwLock<Doubler>>) {
        let mut scene = SceneGraph::new();
        let a = scene.add_node(Source::new(2.0)).unwrap();
        let b = scene.add_node(Doubler::new()).unwrap();
        let (a_id, b_id) = (a.read().core().id(), b.read().core().id());
        scene.connect(a_id, "Value", b_id, "Value").unwrap();
        (scene, a, b)
    }

    #[test]
    fn test_two_node_propagation() {
        let (mut scene, a, b) = two_nodes();

        let report = scene.advance(1);
        assert!(report.is_clean());
        assert_eq!(b.read().output.get().unwrap(), 4.0);

        a.read().value.set(5.0).unwrap();
        scene.advance(1);
        assert_eq!(b.read().output.get().unwrap(), 10.0);
        assert_eq!(scene.frame_number(), 2);
    }

    #[test]
    fn test_advance_zero_is_a_no_op() {
        let (mut scene, a, b) = two_nodes();
        scene.advance(3);
        let versions = (a.read().value.version(), b.read().output.version());

        let report = scene.advance(0);
        assert_eq!(report.frames, 0);
        assert_eq!(a.read().core().frame_number(), 3);
        assert_eq!(b.read().core().frame_number(), 3);
        assert_eq!((a.read().value.version(), b.read().output.version()), versions);
    }

    #[test]
    fn test_advance_zero_before_reset() {
        let (mut scene, a, _) = two_nodes();
        scene.advance(0);
        assert!(!scene.is_initialized());
        assert_eq!(a.read().core().status(), NodeStatus::Uninitialized);
        assert!(a.read().value.is_empty());
    }

    #[test]
    fn test_advance_increments_every_frame_counter() {
        let (mut scene, a, b) = two_nodes();
        scene.reset();
        scene.advance(4);
        scene.advance(3);
        assert_eq!(a.read().core().frame_number(), 7);
        assert_eq!(b.read().core().frame_number(), 7);
        assert_eq!(b.read().core().status(), NodeStatus::Stepping(7));
    }

    #[test]
    fn test_reset_restores_configuration() {
        let (mut scene, a, b) = two_nodes();
        scene.advance(2);
        a.read().value.set(9.0).unwrap();

        scene.reset();
        assert_eq!(a.read().value.get().unwrap(), 2.0);
        assert_eq!(a.read().core().frame_number(), 0);
        assert_eq!(scene.frame_number(), 0);
        assert_eq!(b.read().core().status(), NodeStatus::Reset);
    }

    #[test]
    fn test_back_edge_rejected_without_mutation() {
        let (scene, a, b) = two_nodes();
        let (a_id, b_id) = (a.read().core().id(), b.read().core().id());

        let err = scene.connect(b_id, "Result", a_id, "Feedback").unwrap_err();
        assert!(matches!(err, SceneError::CyclicDependency { .. }));
        let feedback = a.read().core().field("Feedback").cloned().unwrap();
        assert!(!feedback.is_connected());
        assert!(b.read().output.sink_ids().is_empty());

        let b_out = b.read().output.clone();
        let err = scene.connect_fields(&b_out, feedback.as_ref()).unwrap_err();
        assert!(matches!(err, SceneError::CyclicDependency { .. }));
        assert!(!feedback.is_connected());
    }

    #[test]
    fn test_self_wiring_rejected() {
        let (scene, a, _) = two_nodes();
        let a_id = a.read().core().id();
        let err = scene.connect(a_id, "Value", a_id, "Feedback").unwrap_err();
        assert!(matches!(err, SceneError::CyclicDependency { .. }));
    }

    #[test]
    fn test_add_node_reading_from_unadded_node_rejected() {
        let mut scene = SceneGraph::new();
        let upstream = Source::new(1.0);
        let downstream = Doubler::new();
        let input = downstream.core().fields().typed::<f64>("Value").unwrap();
        upstream.value.connect(&input).unwrap();

        let err = scene.add_node(downstream).err().unwrap();
        assert!(matches!(err, SceneError::CyclicDependency { .. }));
        assert!(scene.is_empty());

        scene.add_node(upstream).unwrap();
        assert_eq!(scene.node_count(), 1);
    }

    #[test]
    fn test_add_node_feeding_an_added_node_rejected() {
        let mut scene = SceneGraph::new();
        let consumer = scene.add_node(Source::new(1.0)).unwrap();
        let feedback = consumer.read().core().fields().typed::<f64>("Feedback").unwrap();

        let late = Doubler::new();
        late.output.connect(&feedback).unwrap();
        let err = scene.add_node(late).err().unwrap();
        assert!(matches!(
            err,
            SceneError::CyclicDependency {
                reason: "source node was added after its consumer",
                ..
            }
        ));
        assert_eq!(scene.node_count(), 1);
        scene.validate().unwrap();
    }

    #[test]
    fn test_add_node_with_internal_wiring_accepted() {
        let mut scene = SceneGraph::new();
        let upstream = Source::new(1.0);
        let downstream = Doubler::new();
        let input = downstream.core().fields().typed::<f64>("Value").unwrap();
        upstream.value.connect(&input).unwrap();

        // Downstream is not in the scene yet, so feeding it is fine.
        scene.add_node(upstream).unwrap();
        scene.add_node(downstream).unwrap();
        scene.validate().unwrap();
    }

    #[test]
    fn test_connect_type_mismatch_leaves_both_ends_untouched() {
        let (scene, a, b) = two_nodes();
        let (a_id, b_id) = (a.read().core().id(), b.read().core().id());

        let frame_input = {
            let mut guard = b.write();
            guard.core_mut().declare_input::<u64>("Frames", "Frame count");
            guard.core().field("Frames").cloned().unwrap()
        };
        let err = scene.connect(a_id, "Value", b_id, "Frames").unwrap_err();
        assert!(matches!(err, SceneError::Field(FieldError::TypeMismatch { .. })));
        assert!(!frame_input.is_connected());
        assert_eq!(a.read().value.sink_ids().len(), 1);
    }

    #[test]
    fn test_connect_errors() {
        let (scene, a, b) = two_nodes();
        let (a_id, b_id) = (a.read().core().id(), b.read().core().id());

        assert!(matches!(
            scene.connect(a_id, "Missing", b_id, "Value"),
            Err(SceneError::FieldNotFound { .. })
        ));
        assert!(matches!(
            scene.connect(a_id, "Initial", b_id, "Value"),
            Err(SceneError::NotAnOutputPort { .. })
        ));
        assert!(matches!(
            scene.connect(a_id, "FrameNumber", b_id, "Value"),
            Err(SceneError::NotAnOutputPort { .. })
        ));
        let stranger = NodeId::new();
        assert_eq!(
            scene.connect(a_id, "Value", stranger, "Value"),
            Err(SceneError::NodeNotFound(stranger))
        );
        // Re-wiring the same edge is a no-op
        scene.connect(a_id, "Value", b_id, "Value").unwrap();
    }

    #[test]
    fn test_module_failure_does_not_stop_the_frame() {
        let (mut scene, a, b) = two_nodes();
        scene.advance(1);
        a.read().value.set(f64::NAN).unwrap();

        let report = scene.advance(1);
        assert_eq!(report.frames, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].module_name, "Double");
        assert_eq!(report.failures[0].frame, 1);
        assert_eq!(b.read().core().frame_number(), 2);
        assert_eq!(b.read().output.get().unwrap(), 4.0);
    }

    #[test]
    fn test_unconnected_input_reported_as_module_failure() {
        let mut scene = SceneGraph::new();
        let b = scene.add_node(Doubler::new()).unwrap();
        let report = scene.advance(1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].message.contains("not connected"));
        assert_eq!(b.read().core().frame_number(), 1);
    }

    #[test]
    fn test_late_node_is_reset_before_first_step() {
        let (mut scene, _, _) = two_nodes();
        scene.advance(2);
        let late = scene.add_node(Source::new(3.0)).unwrap();
        scene.advance(1);
        assert_eq!(late.read().value.get().unwrap(), 3.0);
        assert_eq!(late.read().core().frame_number(), 1);
    }

    #[test]
    fn test_advance_while_stops_between_frames() {
        let (mut scene, a, _) = two_nodes();
        let mut budget = 2;
        let report = scene.advance_while(10, || {
            budget -= 1;
            budget >= 0
        });
        assert_eq!(report.frames, 2);
        assert_eq!(a.read().core().frame_number(), 2);
    }

    #[test]
    fn test_remove_node_disconnects() {
        let (mut scene, a, b) = two_nodes();
        let (a_id, b_id) = (a.read().core().id(), b.read().core().id());
        scene.connect_node_port(a_id, b_id, "Sources").unwrap();

        scene.remove_node(a_id).unwrap();
        let input = b.read().core().field("Value").cloned().unwrap();
        assert!(!input.is_connected());
        assert!(b.read().core().imported_nodes("Sources").is_empty());
        assert_eq!(a.read().core().status(), NodeStatus::Terminated);
        assert_eq!(scene.node_ids().collect::<Vec<_>>(), vec![b_id]);
    }

    #[test]
    fn test_node_ports() {
        let (mut scene, a, b) = two_nodes();
        let (a_id, b_id) = (a.read().core().id(), b.read().core().id());
        let c = scene.add_node(Source::new(0.0)).unwrap();
        let c_id = c.read().core().id();

        scene.connect_node_port(a_id, b_id, "Sources").unwrap();
        scene.connect_node_port(a_id, b_id, "Sources").unwrap();
        assert_eq!(b.read().core().imported_nodes("Sources"), &[a_id]);
        assert!(matches!(
            scene.connect_node_port(c_id, b_id, "Sources"),
            Err(SceneError::CyclicDependency { .. })
        ));
        assert!(matches!(
            scene.connect_node_port(a_id, b_id, "Nope"),
            Err(SceneError::PortNotFound { .. })
        ));

        assert!(scene.disconnect_node_port(a_id, b_id, "Sources"));
        assert!(!scene.disconnect_node_port(a_id, b_id, "Sources"));
    }

    #[test]
    fn test_single_node_port_occupied() {
        let mut scene = SceneGraph::new();
        let first = scene.add_node(Source::new(0.0)).unwrap();
        let second = scene.add_node(Source::new(0.0)).unwrap();
        let consumer = scene.add_node(Doubler::new()).unwrap();
        let ids = [&first, &second].map(|n| n.read().core().id());
        let consumer_id = consumer.read().core().id();

        scene.connect_node_port(ids[0], consumer_id, "Sources").unwrap();
        assert!(matches!(
            scene.connect_node_port(ids[1], consumer_id, "Sources"),
            Err(SceneError::PortOccupied { .. })
        ));
    }

    #[test]
    fn test_dependency_order_and_validate() {
        let (scene, a, b) = two_nodes();
        let (a_id, b_id) = (a.read().core().id(), b.read().core().id());
        assert_eq!(scene.dependency_order().unwrap(), vec![a_id, b_id]);
        scene.validate().unwrap();
    }

    #[test]
    fn test_validate_catches_out_of_order_wiring() {
        let (scene, a, b) = two_nodes();
        // Bypass the scene and wire B back into A directly.
        let feedback = a.read().core().fields().typed::<f64>("Feedback").unwrap();
        b.read().output.connect(&feedback).unwrap();

        assert!(matches!(scene.validate(), Err(SceneError::CyclicDependency { .. })));
        assert!(scene.dependency_order().is_err());
    }

    #[test]
    fn test_graphics_only_for_visible_nodes() {
        let (mut scene, _, b) = two_nodes();
        scene.advance(1);
        b.write().core_mut().set_visible(false);
        let report = scene.update_graphics();
        assert!(report.executed.is_empty());
        assert_eq!(b.read().core().graphics_pipeline().executions(), 0);
    }

    #[test]
    fn test_introspection() {
        let (mut scene, _, _) = two_nodes();
        scene.advance(1);

        let nodes = scene.print_node_info(true);
        assert!(nodes.contains("Nodes (2):"));
        assert!(nodes.contains("Source"));
        assert!(nodes.contains("-> Doubler.Value"));
        assert!(nodes.contains("(promoted)"));

        let modules = scene.print_module_info(true);
        assert!(modules.contains("[x] Double"));
        assert!(modules.contains("<- Doubler.Value"));

        let info = scene.scene_info();
        assert_eq!(info.nodes.len(), 2);
        assert_eq!(info.nodes[1].animation.len(), 1);
        assert!(info.to_ron().unwrap().contains("Doubler"));
    }
}
