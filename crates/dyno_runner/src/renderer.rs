// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless renderer.
//!
//! Collects the point buffers graphics pipelines publish and packs them into
//! a byte buffer the way a GPU upload would, keeping per-frame statistics
//! instead of pixels.

use bytemuck::{Pod, Zeroable};
use dyno_graph::{RenderEngine, RenderError, RenderParams, SceneGraph};
use serde::Serialize;

/// Node field holding a node's render points
pub const RENDER_POINTS: &str = "RenderPoints";

/// Vertex layout for point rendering
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointVertex {
    /// World position
    pub position: [f32; 3],
    /// RGBA color
    pub color: [f32; 4],
}

/// What one draw produced
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    /// Scene frame
    pub frame: u64,
    /// Nodes that contributed points
    pub nodes: usize,
    /// Points drawn
    pub points: usize,
    /// Points outside the scene bounds
    pub clipped: usize,
    /// Bytes uploaded
    pub bytes: usize,
}

/// Renderer that draws nothing and measures everything
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    initialized: bool,
    upload: Vec<u8>,
    history: Vec<FrameStats>,
}

impl HeadlessRenderer {
    /// Create an uninitialized renderer
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for every draw so far
    pub fn history(&self) -> &[FrameStats] {
        &self.history
    }

    /// Bytes packed by the last draw
    pub fn last_upload(&self) -> &[u8] {
        &self.upload
    }
}

impl RenderEngine for HeadlessRenderer {
    fn name(&self) -> &str {
        "headless"
    }

    fn initialize(&mut self) -> Result<(), RenderError> {
        self.initialized = true;
        tracing::debug!("Headless renderer initialized");
        Ok(())
    }

    fn draw(&mut self, scene: &SceneGraph, params: &RenderParams) -> Result<(), RenderError> {
        if !self.initialized {
            return Err(RenderError::NotInitialized(self.name().to_string()));
        }
        if params.width == 0 || params.height == 0 {
            return Err(RenderError::Draw(format!(
                "empty viewport {}x{}",
                params.width, params.height
            )));
        }

        let config = scene.config();
        let inside = |p: &[f32; 3]| {
            (0..3).all(|i| p[i] >= config.lower_bound[i] && p[i] <= config.upper_bound[i])
        };

        self.upload.clear();
        let mut stats = FrameStats {
            frame: params.frame,
            nodes: 0,
            points: 0,
            clipped: 0,
            bytes: 0,
        };

        for node in scene.nodes() {
            let node = node.read();
            let core = node.core();
            if !core.is_visible() {
                continue;
            }
            let Some(points) = core.fields().typed::<Vec<PointVertex>>(RENDER_POINTS) else {
                continue;
            };
            let drawn = points.with(|points| {
                self.upload.extend_from_slice(bytemuck::cast_slice(points));
                stats.points += points.len();
                stats.clipped += points.iter().filter(|v| !inside(&v.position)).count();
            });
            // Graphics pipeline has not produced anything yet.
            if drawn.is_err() {
                continue;
            }
            stats.nodes += 1;
        }

        stats.bytes = self.upload.len();
        tracing::trace!(frame = stats.frame, points = stats.points, bytes = stats.bytes, "Drew frame");
        self.history.push(stats);
        Ok(())
    }

    fn terminate(&mut self) {
        self.initialized = false;
        self.upload = Vec::new();
        tracing::debug!(draws = self.history.len(), "Headless renderer terminated");
    }
}
