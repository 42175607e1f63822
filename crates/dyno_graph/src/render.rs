// SPDX-License-Identifier: MIT OR Apache-2.0
//! Renderer seam.
//!
//! The engine never draws. It runs graphics pipelines so render buffers are
//! current, then hands the scene to whatever [`RenderEngine`] the host wires in.

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineReport;
use crate::scene::SceneGraph;

/// Per-draw parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Scene frame being drawn
    pub frame: u64,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame: 0,
        }
    }
}

/// Error raised by a render engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Engine could not start
    #[error("Renderer initialization failed: {0}")]
    Initialization(String),

    /// A draw call failed
    #[error("Draw failed: {0}")]
    Draw(String),

    /// Drawing before `initialize`
    #[error("Renderer '{0}' is not initialized")]
    NotInitialized(String),
}

/// Something that can draw a scene
pub trait RenderEngine {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Acquire resources
    fn initialize(&mut self) -> Result<(), RenderError>;

    /// Draw the scene's current render buffers
    fn draw(&mut self, scene: &SceneGraph, params: &RenderParams) -> Result<(), RenderError>;

    /// Release resources
    fn terminate(&mut self) {}
}

/// Refresh render buffers, then draw
pub fn render_frame(
    engine: &mut dyn RenderEngine,
    scene: &SceneGraph,
    width: u32,
    height: u32,
) -> Result<PipelineReport, RenderError> {
    let report = scene.update_graphics();
    let params = RenderParams {
        width,
        height,
        frame: scene.frame_number(),
    };
    engine.draw(scene, &params)?;
    tracing::trace!(engine = engine.name(), frame = params.frame, "Frame drawn");
    Ok(report)
}
