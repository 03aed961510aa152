//! Plain blit pass

use crate::error::RenderError;
use crate::io::{UniformValue, keys};
use crate::material::Material;
use crate::pass::{Pass, PassBase, RenderContext};
use crate::renderer::FullscreenDraw;

/// Copies the default input buffer into the default output buffer
///
/// Useful as the final stage of a chain and as a building block for
/// feedback effects. The execution loop keeps a private instance for the
/// stencil-preserving part of a masked buffer swap.
#[derive(Debug)]
pub struct CopyPass {
    base: PassBase,
    material: Material,
}

impl CopyPass {
    pub fn new() -> Self {
        Self {
            base: PassBase::new("copy").with_swap(),
            material: Material::copy(),
        }
    }

    /// Sets the blend opacity of the copy
    pub fn set_opacity(&mut self, opacity: f32) {
        self.material.set_uniform(keys::OPACITY, UniformValue::Float(opacity));
    }
}

impl Default for CopyPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for CopyPass {
    fn base(&self) -> &PassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PassBase {
        &mut self.base
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
        if !ctx.output_buffer.is_bound() {
            return Err(RenderError::MissingOutput(self.base.name().to_string()));
        }
        ctx.renderer.set_render_target(ctx.pool, ctx.output_buffer)?;
        ctx.renderer.draw_fullscreen(
            ctx.pool,
            &FullscreenDraw {
                material: &self.material,
                source: ctx.input_buffer,
                textures: self.base.input().buffers(),
            },
        )
    }
}
