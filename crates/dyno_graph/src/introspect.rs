// SPDX-License-Identifier: MIT OR Apache-2.0
//! Read-only snapshots of a scene for diagnostics and tooling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::field::{FieldId, FieldKind, Residency};
use crate::module::{Module, ModuleId};
use crate::node::{Node, NodeId, NodePort, NodeStatus};
use crate::pipeline::PipelineKind;
use crate::scene::SceneConfig;

/// Snapshot of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field identity
    pub id: FieldId,
    /// Field name
    pub name: String,
    /// Description
    pub description: String,
    /// Role
    pub kind: FieldKind,
    /// Rust type name of the element
    pub element_type: String,
    /// Container residency
    pub residency: Residency,
    /// Promoted to an output port
    pub promoted: bool,
    /// Whether a read would fail
    pub empty: bool,
    /// Live source, for inputs
    pub source: Option<FieldId>,
    /// Live sinks
    pub sinks: Vec<FieldId>,
    /// Write counter
    pub version: u64,
}

/// Snapshot of one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Module identity
    pub id: ModuleId,
    /// Module name
    pub name: String,
    /// Display name
    pub caption: String,
    /// Pipeline it runs in
    pub pipeline: PipelineKind,
    /// Whether it runs
    pub enabled: bool,
    /// Token of the last successful update
    pub last_updated: u64,
    /// Declared inputs
    pub inputs: Vec<FieldInfo>,
    /// Declared parameters
    pub params: Vec<FieldInfo>,
    /// Declared outputs
    pub outputs: Vec<FieldInfo>,
    /// Error recorded by the most recent execution
    pub last_failure: Option<String>,
}

impl ModuleInfo {
    /// Snapshot a module
    pub fn of(module: &dyn Module, pipeline: PipelineKind) -> Self {
        let base = module.base();
        Self {
            id: base.id(),
            name: base.name().to_string(),
            caption: module.caption(),
            pipeline,
            enabled: base.is_enabled(),
            last_updated: base.last_updated(),
            inputs: base.inputs().iter().map(|f| f.info()).collect(),
            params: base.params().iter().map(|f| f.info()).collect(),
            outputs: base.outputs().iter().map(|f| f.info()).collect(),
            last_failure: base.last_failure().map(|f| f.message.clone()),
        }
    }

    fn fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.inputs.iter().chain(&self.params).chain(&self.outputs)
    }
}

/// Snapshot of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identity
    pub id: NodeId,
    /// Node name
    pub name: String,
    /// Display name
    pub caption: String,
    /// Lifecycle position
    pub status: NodeStatus,
    /// Whether it is drawn
    pub visible: bool,
    /// Frames advanced since reset
    pub frame_number: u64,
    /// Node-level fields
    pub fields: Vec<FieldInfo>,
    /// Node ports
    pub ports: Vec<NodePort>,
    /// Animation pipeline, in execution order
    pub animation: Vec<ModuleInfo>,
    /// Graphics pipeline, in execution order
    pub graphics: Vec<ModuleInfo>,
}

impl NodeInfo {
    /// Snapshot a node
    pub fn of(node: &dyn Node) -> Self {
        let core = node.core();
        let modules = |kind: PipelineKind| -> Vec<ModuleInfo> {
            core.pipeline(kind)
                .modules()
                .map(|m| ModuleInfo::of(&*m.lock(), kind))
                .collect()
        };
        Self {
            id: core.id(),
            name: core.name().to_string(),
            caption: node.caption(),
            status: core.status(),
            visible: core.is_visible(),
            frame_number: core.frame_number(),
            fields: core.fields().iter().map(|f| f.info()).collect(),
            ports: core.node_ports().cloned().collect(),
            animation: modules(PipelineKind::Animation),
            graphics: modules(PipelineKind::Graphics),
        }
    }
}

/// Snapshot of a whole scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    /// Global configuration
    pub config: SceneConfig,
    /// Frames advanced since reset
    pub frame_number: u64,
    /// Simulated time since reset
    pub elapsed_time: f64,
    /// Nodes in traversal order
    pub nodes: Vec<NodeInfo>,
}

impl SceneInfo {
    /// Serialize as pretty RON
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Qualified `Owner.Field` names for every field in the snapshot
    fn field_names(&self) -> HashMap<FieldId, String> {
        let mut names = HashMap::new();
        for node in &self.nodes {
            for field in &node.fields {
                names.insert(field.id, format!("{}.{}", node.caption, field.name));
            }
            for module in node.animation.iter().chain(&node.graphics) {
                for field in module.fields() {
                    names
                        .entry(field.id)
                        .or_insert_with(|| format!("{}.{}", module.caption, field.name));
                }
            }
        }
        names
    }

    /// Text listing of nodes and, when `verbose`, their fields
    pub fn render_nodes(&self, verbose: bool) -> String {
        let names = self.field_names();
        let mut out = String::new();
        let _ = writeln!(out, "Nodes ({}):", self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            let _ = writeln!(
                out,
                "  [{index}] {} {:?} frame={} visible={}",
                node.caption, node.status, node.frame_number, node.visible
            );
            if !verbose {
                continue;
            }
            for field in &node.fields {
                render_field(&mut out, "      ", field, &names);
            }
            for port in &node.ports {
                let _ = writeln!(
                    out,
                    "      port  {} ({:?}): {} node(s)",
                    port.name,
                    port.cardinality,
                    port.nodes.len()
                );
            }
        }
        out
    }

    /// Text listing of every pipeline and, when `verbose`, module wiring
    pub fn render_modules(&self, verbose: bool) -> String {
        let names = self.field_names();
        let mut out = String::new();
        for node in &self.nodes {
            let _ = writeln!(out, "{}:", node.caption);
            for (label, modules) in [("animation", &node.animation), ("graphics", &node.graphics)] {
                let _ = writeln!(out, "  {label} ({}):", modules.len());
                for module in modules {
                    let mark = if module.enabled { 'x' } else { ' ' };
                    let _ = write!(out, "    [{mark}] {}", module.caption);
                    if let Some(failure) = &module.last_failure {
                        let _ = write!(out, " FAILED: {failure}");
                    }
                    out.push('\n');
                    if verbose {
                        for field in module.fields() {
                            render_field(&mut out, "        ", field, &names);
                        }
                    }
                }
            }
        }
        out
    }
}

fn render_field(out: &mut String, indent: &str, field: &FieldInfo, names: &HashMap<FieldId, String>) {
    let _ = write!(
        out,
        "{indent}{:<5} {}: {}",
        field.kind.label(),
        field.name,
        field.element_type
    );
    if field.promoted {
        out.push_str(" (promoted)");
    }
    if let Some(source) = &field.source {
        let source = names.get(source).map_or("<external>", String::as_str);
        let _ = write!(out, " <- {source}");
    }
    for sink in &field.sinks {
        let sink = names.get(sink).map_or("<external>", String::as_str);
        let _ = write!(out, " -> {sink}");
    }
    out.push('\n');
}
