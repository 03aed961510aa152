//! Test doubles shared by the unit tests
//!
//! The mock renderer records every call the pipeline issues so tests can
//! assert on submission order without a GPU.

use crate::error::RenderError;
use crate::io::TargetBinding;
use crate::material::Material;
use crate::pass::EffectPass;
use crate::renderer::{CameraHandle, FullscreenDraw, Renderer, RendererInfo, SceneHandle, StencilFunc};
use crate::resource::{ResourceId, ResourcePool};
use bytes::Bytes;

/// One recorded renderer call
#[derive(Debug, Clone, PartialEq)]
pub enum MockOp {
    SetTarget(TargetBinding),
    Clear { color: bool, depth: bool, stencil: bool },
    Scene { scene: SceneHandle, camera: CameraHandle, target: TargetBinding },
    Fullscreen { label: &'static str, source: TargetBinding, target: TargetBinding },
    StencilTest(bool),
    StencilFunc(StencilFunc, u32),
    StencilWrite(bool),
    ReadPixel { source: ResourceId, x: u32, y: u32 },
}

/// Renderer double that records submissions in order
#[derive(Debug)]
pub struct MockRenderer {
    pub info: RendererInfo,
    pub ops: Vec<MockOp>,
    current_target: TargetBinding,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self {
            info: RendererInfo::default(),
            ops: Vec::new(),
            current_target: TargetBinding::Unbound,
        }
    }

}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MockRenderer {
    fn info(&self) -> RendererInfo {
        self.info
    }

    fn set_render_target(&mut self, _pool: &ResourcePool, target: TargetBinding) -> Result<(), RenderError> {
        self.current_target = target;
        self.ops.push(MockOp::SetTarget(target));
        Ok(())
    }

    fn clear(&mut self, color: bool, depth: bool, stencil: bool) {
        self.ops.push(MockOp::Clear { color, depth, stencil });
    }

    fn render_scene(&mut self, scene: SceneHandle, camera: CameraHandle) -> Result<(), RenderError> {
        self.ops.push(MockOp::Scene { scene, camera, target: self.current_target });
        Ok(())
    }

    fn draw_fullscreen(&mut self, _pool: &ResourcePool, draw: &FullscreenDraw<'_>) -> Result<(), RenderError> {
        self.ops.push(MockOp::Fullscreen {
            label: draw.material.label,
            source: draw.source,
            target: self.current_target,
        });
        Ok(())
    }

    fn set_stencil_test(&mut self, enabled: bool) {
        self.ops.push(MockOp::StencilTest(enabled));
    }

    fn set_stencil_func(&mut self, func: StencilFunc, reference: u32) {
        self.ops.push(MockOp::StencilFunc(func, reference));
    }

    fn set_stencil_write(&mut self, enabled: bool) {
        self.ops.push(MockOp::StencilWrite(enabled));
    }

    fn read_pixel(&mut self, _pool: &ResourcePool, source: ResourceId, x: u32, y: u32) -> Result<Bytes, RenderError> {
        self.ops.push(MockOp::ReadPixel { source, x, y });
        Ok(Bytes::from_static(&[0, 0, 0, 0]))
    }
}

/// Installs a test subscriber so `tracing` output lands in the test log
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// An ordinary swap-participating effect pass for wiring tests
///
/// The material label matches the pass name so recorded draws are
/// attributable.
pub fn test_effect(name: &'static str) -> EffectPass {
    EffectPass::new(name, Material::new(name, crate::material::COPY_SHADER))
}
