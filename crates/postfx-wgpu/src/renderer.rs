//! The renderer collaborator contract
//!
//! The wiring engine and the execution loop drive a [`Renderer`] but never
//! depend on a concrete GPU backend: anything that can bind one of the
//! pooled targets and paint into it satisfies the contract. The crate ships
//! a wgpu implementation in [`crate::gpu`]; tests use a recording double.

use crate::error::RenderError;
use crate::io::TargetBinding;
use crate::material::Material;
use crate::resource::{ResourceId, ResourcePool, TextureBinding};
use crate::target::ColorSpace;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Opaque handle to a host-owned scene graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(pub u64);

/// Opaque handle to a host-owned camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraHandle(pub u64);

/// Stencil comparison functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Renderer capabilities and state the wiring engine needs to observe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererInfo {
    /// Size of the actual display surface in pixels
    pub drawing_buffer_size: (u32, u32),
    /// Color space of the final display output
    pub output_color_space: ColorSpace,
    /// Whether intermediate buffers should carry an alpha channel
    pub alpha: bool,
    /// Preferred format for high-precision intermediate buffers
    pub frame_buffer_format: wgpu::TextureFormat,
}

impl Default for RendererInfo {
    fn default() -> Self {
        Self {
            drawing_buffer_size: (1, 1),
            output_color_space: ColorSpace::Srgb,
            alpha: true,
            frame_buffer_format: crate::target::FORMAT_HIGH_PRECISION,
        }
    }
}

/// Everything a fullscreen draw call needs besides the bound target
#[derive(Debug)]
pub struct FullscreenDraw<'a> {
    /// The material to draw with
    pub material: &'a Material,
    /// The default input buffer the material samples, if any
    pub source: TargetBinding,
    /// Auxiliary texture bindings (G-buffer attachments, depth texture)
    pub textures: &'a BTreeMap<crate::io::ParamKey, TextureBinding>,
}

/// Contract every GPU backend implements for the pipeline
///
/// Submission is synchronous and single-threaded: a call issues work and
/// returns without waiting for GPU completion. The one exception is
/// [`Renderer::read_pixel`], a deliberate synchronization point that blocks
/// until the GPU has produced the requested pixel.
pub trait Renderer {
    /// Capabilities and display state
    fn info(&self) -> RendererInfo;

    /// Binds a pooled target (or the screen) for subsequent draws
    fn set_render_target(&mut self, pool: &ResourcePool, target: TargetBinding) -> Result<(), RenderError>;

    /// Clears the selected aspects of the bound target
    fn clear(&mut self, color: bool, depth: bool, stencil: bool);

    /// Draws a host scene through a host camera into the bound target
    fn render_scene(&mut self, scene: SceneHandle, camera: CameraHandle) -> Result<(), RenderError>;

    /// Draws a fullscreen material into the bound target
    fn draw_fullscreen(&mut self, pool: &ResourcePool, draw: &FullscreenDraw<'_>) -> Result<(), RenderError>;

    /// Enables or disables the stencil test for subsequent draws
    fn set_stencil_test(&mut self, enabled: bool);

    /// Sets the stencil comparison for subsequent draws
    fn set_stencil_func(&mut self, func: StencilFunc, reference: u32);

    /// Makes passing fragments write the reference value into the stencil
    /// buffer (used by mask passes to carve the masked region)
    fn set_stencil_write(&mut self, enabled: bool);

    /// Reads one pixel back from a pooled target, blocking until available
    ///
    /// Readback stalls the pipeline and must only happen once per requested
    /// query, never automatically every frame.
    fn read_pixel(&mut self, pool: &ResourcePool, source: ResourceId, x: u32, y: u32) -> Result<Bytes, RenderError>;
}
