//! Scene rendering pass that owns the shared G-buffer

use crate::error::RenderError;
use crate::io::GBufferComponent;
use crate::pass::{InitializeContext, Pass, PassBase, PassKind, RenderContext};
use crate::renderer::{CameraHandle, SceneHandle};
use crate::resource::{ResourceId, ResourcePool, TextureBinding};
use crate::target::{FORMAT_HIGH_PRECISION, TargetSpec};
use std::collections::{BTreeMap, BTreeSet};

/// Renders the 3D scene once and publishes its attachments to the pipeline
///
/// The pass owns a multi-attachment render target whose layout follows the
/// union of every downstream pass's G-buffer requests, computed by the I/O
/// manager on each wiring update. Downstream passes receive individual
/// attachments as texture bindings; the depth component maps to the
/// target's dedicated depth texture rather than a color attachment.
#[derive(Debug)]
pub struct GeometryPass {
    base: PassBase,
    g_buffer: Option<ResourceId>,
    components: BTreeSet<GBufferComponent>,
    indices: BTreeMap<GBufferComponent, u32>,
    shared_depth: Option<TextureBinding>,
}

impl GeometryPass {
    /// Creates a geometry pass producing color and depth by default
    pub fn new(scene: SceneHandle, camera: CameraHandle) -> Self {
        let mut base = PassBase::new("geometry");
        base.set_scene(Some(scene));
        base.set_camera(Some(camera));

        let mut components = BTreeSet::new();
        components.insert(GBufferComponent::Color);
        components.insert(GBufferComponent::Depth);
        // The pass requests its own baseline, so the downstream union never
        // shrinks the G-buffer below color and depth.
        base.input_mut().g_buffer = components.clone();

        let mut pass = Self {
            base,
            g_buffer: None,
            components,
            indices: BTreeMap::new(),
            shared_depth: None,
        };
        pass.rebuild_indices();
        pass
    }

    /// The G-buffer resource, once allocated
    pub fn g_buffer(&self) -> Option<ResourceId> {
        self.g_buffer
    }

    /// The components this pass currently produces
    pub fn g_buffer_components(&self) -> &BTreeSet<GBufferComponent> {
        &self.components
    }

    /// Color attachment index for each produced component
    ///
    /// Depth is absent here; it lives in the dedicated depth texture.
    pub fn g_buffer_indices(&self) -> &BTreeMap<GBufferComponent, u32> {
        &self.indices
    }

    /// Depth texture borrowed from another pass, when this pass is the
    /// secondary scene renderer and must depth-test against the primary
    pub fn shared_depth(&self) -> Option<TextureBinding> {
        self.shared_depth
    }

    /// Replaces the produced component set and reshapes the G-buffer
    ///
    /// Called by the I/O manager with the union of all downstream requests.
    pub fn set_g_buffer_components(&mut self, pool: &mut ResourcePool, components: BTreeSet<GBufferComponent>) {
        if components == self.components {
            return;
        }
        tracing::debug!(pass = self.base.name(), ?components, "reshaping G-buffer");
        self.components = components;
        self.rebuild_indices();
        if let Some(id) = self.g_buffer {
            let mut spec = self.build_spec();
            if let Some(existing) = pool.spec(id) {
                spec.width = existing.width;
                spec.height = existing.height;
            }
            pool.set_spec(id, Some(spec));
        }
    }

    fn rebuild_indices(&mut self) {
        self.indices.clear();
        let mut next = 0;
        for component in &self.components {
            if *component != GBufferComponent::Depth {
                self.indices.insert(*component, next);
                next += 1;
            }
        }
    }

    fn color_attachment_count(&self) -> u32 {
        self.indices.len().max(1) as u32
    }

    fn build_spec(&self) -> TargetSpec {
        TargetSpec::color(format!("{} g-buffer", self.base.name()), FORMAT_HIGH_PRECISION)
            .with_color_attachments(self.color_attachment_count())
            .with_depth(false)
    }
}

impl Pass for GeometryPass {
    fn base(&self) -> &PassBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PassBase {
        &mut self.base
    }

    fn kind(&self) -> PassKind {
        PassKind::Geometry
    }

    fn owned_output(&self) -> Option<ResourceId> {
        self.g_buffer
    }

    fn as_geometry(&self) -> Option<&GeometryPass> {
        Some(self)
    }

    fn as_geometry_mut(&mut self) -> Option<&mut GeometryPass> {
        Some(self)
    }

    fn initialize(&mut self, ctx: &mut InitializeContext<'_>) {
        if self.g_buffer.is_none() {
            let mut spec = self.build_spec();
            spec.apply_size(ctx.width, ctx.height);
            let label = spec.label.clone();
            self.g_buffer = Some(ctx.pool.insert(label, Some(spec)));
        }
    }

    fn set_size(&mut self, pool: &mut ResourcePool, width: u32, height: u32) {
        if let Some(id) = self.g_buffer {
            pool.update_spec(id, |spec| spec.apply_size(width, height));
        }
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
        let (Some(scene), Some(camera)) = (self.base.scene(), self.base.camera()) else {
            tracing::warn!(pass = self.base.name(), "geometry pass has no scene or camera");
            return Ok(());
        };
        ctx.renderer.set_render_target(ctx.pool, ctx.output_buffer)?;
        ctx.renderer.render_scene(scene, camera)
    }

    fn set_depth_texture(&mut self, texture: Option<TextureBinding>) {
        self.shared_depth = texture;
    }

    fn dispose(&mut self, pool: &mut ResourcePool) {
        if let Some(id) = self.g_buffer.take() {
            pool.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_indices_skip_depth() {
        let mut pass = GeometryPass::new(SceneHandle(1), CameraHandle(1));
        let mut pool = ResourcePool::new();

        let components: BTreeSet<_> = [GBufferComponent::Color, GBufferComponent::Depth, GBufferComponent::Normal]
            .into_iter()
            .collect();
        pass.set_g_buffer_components(&mut pool, components);

        let indices = pass.g_buffer_indices();
        assert_eq!(indices[&GBufferComponent::Color], 0);
        assert_eq!(indices[&GBufferComponent::Normal], 1);
        assert!(!indices.contains_key(&GBufferComponent::Depth));
    }

    #[test]
    fn test_reshaping_preserves_buffer_size() {
        let mut pool = ResourcePool::new();
        let mut pass = GeometryPass::new(SceneHandle(1), CameraHandle(1));
        let mut ctx = crate::pass::InitializeContext {
            pool: &mut pool,
            info: crate::renderer::RendererInfo::default(),
            width: 1280,
            height: 720,
        };
        pass.initialize(&mut ctx);

        let mut components = pass.g_buffer_components().clone();
        components.insert(GBufferComponent::Velocity);
        pass.set_g_buffer_components(&mut pool, components);

        let spec = pool.spec(pass.g_buffer().unwrap()).unwrap();
        assert_eq!((spec.width, spec.height), (1280, 720));
        assert_eq!(spec.color_attachments, 2);
    }
}
