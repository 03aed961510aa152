//! Stencil mask passes
//!
//! A [`MaskPass`] renders a host scene into the stencil buffers of both
//! shared double buffers, marking the region subsequent passes are allowed
//! to touch. A [`ClearMaskPass`] lifts the restriction. The execution loop
//! flips its stencil bookkeeping after each of them.

use crate::error::RenderError;
use crate::pass::{Pass, PassBase, PassKind, RenderContext};
use crate::renderer::{CameraHandle, SceneHandle, StencilFunc};

/// Marks a stencil region that restricts subsequent rendering
#[derive(Debug)]
pub struct MaskPass {
    base: PassBase,
    inverse: bool,
}

impl MaskPass {
    /// Creates a mask pass that renders the given scene as the mask shape
    pub fn new(scene: SceneHandle, camera: CameraHandle) -> Self {
        let mut base = PassBase::new("mask");
        base.set_scene(Some(scene));
        base.set_camera(Some(camera));
        Self { base, inverse: false }
    }

    /// Inverts the mask: rendering is restricted to pixels the scene does
    /// not cover
    pub fn set_inverse(&mut self, inverse: bool) {
        self.inverse = inverse;
    }
}

impl Pass for MaskPass {
    fn base(&self) -> &PassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PassBase {
        &mut self.base
    }

    fn kind(&self) -> PassKind {
        PassKind::Mask
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
        let (Some(scene), Some(camera)) = (self.base.scene(), self.base.camera()) else {
            tracing::warn!(pass = self.base.name(), "mask pass has no scene or camera");
            return Ok(());
        };

        let reference = if self.inverse { 0 } else { 1 };

        // Carve the mask into the stencil of both shared buffers so the
        // restriction survives a swap.
        ctx.renderer.set_stencil_test(true);
        ctx.renderer.set_stencil_write(true);
        ctx.renderer.set_stencil_func(StencilFunc::Always, reference);
        for target in [ctx.input_buffer, ctx.output_buffer] {
            if target.resource().is_some() {
                ctx.renderer.set_render_target(ctx.pool, target)?;
                ctx.renderer.clear(false, false, true);
                ctx.renderer.render_scene(scene, camera)?;
            }
        }

        // Subsequent passes draw only where the mask value matches.
        ctx.renderer.set_stencil_write(false);
        ctx.renderer.set_stencil_func(StencilFunc::Equal, 1);
        Ok(())
    }
}

/// Lifts the stencil restriction established by a [`MaskPass`]
#[derive(Debug)]
pub struct ClearMaskPass {
    base: PassBase,
}

impl ClearMaskPass {
    pub fn new() -> Self {
        Self { base: PassBase::new("clear_mask") }
    }
}

impl Default for ClearMaskPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for ClearMaskPass {
    fn base(&self) -> &PassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PassBase {
        &mut self.base
    }

    fn kind(&self) -> PassKind {
        PassKind::ClearMask
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
        ctx.renderer.set_stencil_test(false);
        Ok(())
    }
}
