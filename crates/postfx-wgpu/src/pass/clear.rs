//! Pass that clears the buffer the following pass writes into

use crate::error::RenderError;
use crate::pass::{Pass, PassBase, PassKind, RenderContext};

/// Clears a render target without owning one
///
/// A clear pass never allocates a buffer of its own: the I/O manager mirrors
/// the output of the pass that follows it, so it always clears exactly what
/// that pass is about to write into.
#[derive(Debug)]
pub struct ClearPass {
    base: PassBase,
    color: bool,
    depth: bool,
    stencil: bool,
}

impl ClearPass {
    /// Creates a clear pass for the selected buffer aspects
    pub fn new(color: bool, depth: bool, stencil: bool) -> Self {
        Self {
            base: PassBase::new("clear"),
            color,
            depth,
            stencil,
        }
    }
}

impl Default for ClearPass {
    /// Clears all three aspects
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

impl Pass for ClearPass {
    fn base(&self) -> &PassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PassBase {
        &mut self.base
    }

    fn kind(&self) -> PassKind {
        PassKind::Clear
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
        ctx.renderer.set_render_target(ctx.pool, ctx.output_buffer)?;
        ctx.renderer.clear(self.color, self.depth, self.stencil);
        Ok(())
    }
}
