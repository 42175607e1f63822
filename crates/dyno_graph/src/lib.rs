// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow engine for physics simulation scenes.
//!
//! A scene is an ordered list of nodes. Each node owns typed fields and two
//! pipelines of modules:
//! - the animation pipeline advances simulation state once per frame
//! - the graphics pipeline derives render buffers when a renderer asks
//!
//! ## Architecture
//!
//! The framework is built on:
//! - Typed fields with live, single-producer connections
//! - Modules that read input fields and write output fields
//! - Pipelines executing modules in push order
//! - A scene graph whose insertion order is a valid dependency order

pub mod field;
pub mod module;
pub mod pipeline;
pub mod node;
pub mod scene;
pub mod controller;
pub mod render;
pub mod introspect;

pub use field::{AnyField, ElementType, Field, FieldData, FieldError, FieldId, FieldKind, FieldSet, Residency};
pub use module::{Module, ModuleBase, ModuleError, ModuleFailure, ModuleId, ModuleRef};
pub use pipeline::{Pipeline, PipelineError, PipelineKind, PipelineReport};
pub use node::{Node, NodeCore, NodeError, NodeId, NodePort, NodeStatus, PortCardinality};
pub use scene::{NodeRef, SceneConfig, SceneError, SceneGraph, SceneReport};
pub use controller::{ControllerError, RunState, SimulationController, SimulationEvent};
pub use render::{RenderEngine, RenderError, RenderParams};
pub use introspect::{FieldInfo, ModuleInfo, NodeInfo, SceneInfo};
