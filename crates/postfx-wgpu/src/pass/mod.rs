//! Pass contract and the built-in pass implementations
//!
//! A pass is the unit of work in a pipeline: it reads the buffers its
//! [`Input`] table points at, paints into the buffer its [`Output`] table
//! points at, and exposes lifecycle hooks for sizing and disposal. Concrete
//! passes compose a [`PassBase`] for the shared state instead of deriving
//! from a common base class, and declare their structural role through
//! [`PassKind`] so the execution loop and the I/O manager never need to
//! downcast.

mod clear;
mod copy;
mod effect;
mod geometry;
mod mask;

pub use clear::ClearPass;
pub use copy::CopyPass;
pub use effect::EffectPass;
pub use geometry::GeometryPass;
pub use mask::{ClearMaskPass, MaskPass};

use crate::error::RenderError;
use crate::io::{Input, Output, TargetBinding};
use crate::renderer::{CameraHandle, Renderer, RendererInfo, SceneHandle};
use crate::resource::{ResourceId, ResourcePool, TextureBinding};

/// Structural role of a pass, checked by the wiring and execution engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Ordinary pass that consumes its input and produces its output
    Effect,
    /// Clears the buffer the following pass is about to write into
    Clear,
    /// Restricts subsequent rendering to a stencil-masked region
    Mask,
    /// Lifts the stencil restriction
    ClearMask,
    /// Renders the 3D scene and produces the shared G-buffer
    Geometry,
}

/// State shared by every pass implementation
#[derive(Debug)]
pub struct PassBase {
    name: String,
    enabled: bool,
    needs_swap: bool,
    needs_depth_texture: bool,
    input: Input,
    output: Output,
    scene: Option<SceneHandle>,
    camera: Option<CameraHandle>,
}

impl PassBase {
    /// Creates the shared state for a named pass
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            needs_swap: false,
            needs_depth_texture: false,
            input: Input::default(),
            output: Output::default(),
            scene: None,
            camera: None,
        }
    }

    /// Marks the pass as participating in double-buffer swaps
    pub fn with_swap(mut self) -> Self {
        self.needs_swap = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables the pass; takes effect from the next wiring
    /// update onward
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the execution loop swaps the shared double buffers after
    /// this pass
    pub fn needs_swap(&self) -> bool {
        self.needs_swap
    }

    /// Whether this pass reads the shared scene depth texture
    pub fn needs_depth_texture(&self) -> bool {
        self.needs_depth_texture
    }

    pub fn set_needs_depth_texture(&mut self, needs: bool) {
        self.needs_depth_texture = needs;
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Input {
        &mut self.input
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut Output {
        &mut self.output
    }

    pub fn scene(&self) -> Option<SceneHandle> {
        self.scene
    }

    pub fn set_scene(&mut self, scene: Option<SceneHandle>) {
        self.scene = scene;
    }

    pub fn camera(&self) -> Option<CameraHandle> {
        self.camera
    }

    pub fn set_camera(&mut self, camera: Option<CameraHandle>) {
        self.camera = camera;
    }
}

/// Context handed to [`Pass::initialize`]
pub struct InitializeContext<'a> {
    /// Pool the pass allocates its owned buffers in
    pub pool: &'a mut ResourcePool,
    /// Renderer capabilities (alpha, preferred frame buffer format)
    pub info: RendererInfo,
    /// Current effective pipeline width
    pub width: u32,
    /// Current effective pipeline height
    pub height: u32,
}

/// Context handed to [`Pass::render`] once per frame
pub struct RenderContext<'a> {
    /// The renderer to issue draws through
    pub renderer: &'a mut dyn Renderer,
    /// Pool to resolve buffer bindings against (read-only during a frame)
    pub pool: &'a ResourcePool,
    /// The wired default input buffer
    pub input_buffer: TargetBinding,
    /// The wired default output buffer
    pub output_buffer: TargetBinding,
    /// Seconds since the previous frame
    pub delta_seconds: f32,
    /// Whether a stencil mask region is currently active
    pub stencil_test: bool,
}

/// The unit of work scheduled by a render pipeline
///
/// `render` must be idempotent with respect to wiring: it reads the input
/// and output tables but never mutates them. All table mutation belongs to
/// the I/O manager.
pub trait Pass {
    /// Shared pass state
    fn base(&self) -> &PassBase;

    /// Shared pass state, mutable
    fn base_mut(&mut self) -> &mut PassBase;

    /// Structural role; defaults to an ordinary effect
    fn kind(&self) -> PassKind {
        PassKind::Effect
    }

    /// The buffer this pass naturally writes into, when it owns one
    ///
    /// Passes without an owned target are wired to the shared double
    /// buffers instead.
    fn owned_output(&self) -> Option<ResourceId> {
        None
    }

    /// Capability accessor for the G-buffer producer role
    fn as_geometry(&self) -> Option<&GeometryPass> {
        None
    }

    /// Capability accessor for the G-buffer producer role, mutable
    fn as_geometry_mut(&mut self) -> Option<&mut GeometryPass> {
        None
    }

    /// One-time setup when the pass joins an initialized pipeline
    fn initialize(&mut self, _ctx: &mut InitializeContext<'_>) {}

    /// Propagates a pipeline resolution change to owned buffers
    ///
    /// Must be idempotent; the pipeline may call it with an unchanged size.
    fn set_size(&mut self, _pool: &mut ResourcePool, _width: u32, _height: u32) {}

    /// Performs this pass's work for the current frame
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<(), RenderError>;

    /// Receives the shared scene depth texture, or `None` when it is
    /// destroyed
    fn set_depth_texture(&mut self, _texture: Option<TextureBinding>) {}

    /// Releases owned buffers before the pass is dropped
    fn dispose(&mut self, _pool: &mut ResourcePool) {}
}
