//! Generic fullscreen effect pass

use crate::error::RenderError;
use crate::io::GBufferComponent;
use crate::material::Material;
use crate::pass::{Pass, PassBase, RenderContext};
use crate::renderer::FullscreenDraw;

/// Applies a fullscreen material to the default input buffer
///
/// The pass owns its material as a value. At render time the defines and
/// uniforms wired onto the output table are merged over the material's own,
/// so the I/O manager can parameterize an effect without reaching into it.
#[derive(Debug)]
pub struct EffectPass {
    base: PassBase,
    material: Material,
}

impl EffectPass {
    /// Creates an effect pass around a fullscreen material
    pub fn new(name: impl Into<String>, material: Material) -> Self {
        Self {
            base: PassBase::new(name).with_swap(),
            material,
        }
    }

    /// Requests a G-buffer component as an auxiliary input
    pub fn with_gbuffer_component(mut self, component: GBufferComponent) -> Self {
        self.base.input_mut().g_buffer.insert(component);
        if component == GBufferComponent::Depth {
            self.base.set_needs_depth_texture(true);
        }
        self
    }

    /// Requests a high-precision default input buffer
    pub fn with_high_precision(mut self) -> Self {
        self.base.input_mut().frame_buffer_precision_high = true;
        self
    }

    /// The material this pass draws with
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// The material, mutable (parameter animation between frames)
    pub fn material_mut(&mut self) -> &mut Material {
        &mut self.material
    }
}

impl Pass for EffectPass {
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

        // Wired parameters take precedence over the material's own values.
        let mut material = self.material.clone();
        for (key, value) in &self.base.output().defines {
            material.set_define(*key, value.clone());
        }
        for (key, value) in &self.base.output().uniforms {
            material.set_uniform(*key, *value);
        }

        ctx.renderer.set_render_target(ctx.pool, ctx.output_buffer)?;
        ctx.renderer.draw_fullscreen(
            ctx.pool,
            &FullscreenDraw {
                material: &material,
                source: ctx.input_buffer,
                textures: self.base.input().buffers(),
            },
        )
    }
}
