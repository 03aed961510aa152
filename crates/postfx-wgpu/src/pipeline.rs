//! Ordered pass list with the per-frame execution loop
//!
//! A pipeline owns its passes, the resource pool their buffers live in, the
//! shared double buffers ordinary effect passes ping-pong between, and the
//! pipeline-wide depth texture. Wiring is rebuilt by [`update`], either
//! explicitly or automatically at the start of a frame once the pass list,
//! an enabled flag or the resolution changed.
//!
//! [`update`]: RenderPipeline::update

use crate::error::{RenderError, WiringError};
use crate::io::TargetBinding;
use crate::io_manager::{IoManager, Wiring};
use crate::pass::{CopyPass, InitializeContext, Pass, PassKind, RenderContext};
use crate::renderer::{Renderer, RendererInfo, StencilFunc};
use crate::resolution::Resolution;
use crate::resource::{ResourceId, ResourcePool, TextureBinding};
use crate::target::{FORMAT_DEPTH, FORMAT_LOW_PRECISION, TargetSpec};

/// An ordered, mutable list of passes executed once per frame
pub struct RenderPipeline {
    passes: Vec<Box<dyn Pass>>,
    auto_render_to_screen: bool,
    pool: ResourcePool,
    io: IoManager,
    resolution: Resolution,
    seen_epoch: u64,
    buffer_a: ResourceId,
    buffer_b: ResourceId,
    buffers_high_precision: bool,
    owned_depth: Option<ResourceId>,
    copy_pass: CopyPass,
    renderer_info: Option<RendererInfo>,
    wired_enabled: Vec<bool>,
    dirty: bool,
}

impl RenderPipeline {
    /// Creates an empty pipeline with its own resource pool
    pub fn new() -> Self {
        let mut pool = ResourcePool::new();
        let buffer_a = pool.insert("buffer A", Some(TargetSpec::color("buffer A", FORMAT_LOW_PRECISION).with_depth(false)));
        let buffer_b = pool.insert("buffer B", Some(TargetSpec::color("buffer B", FORMAT_LOW_PRECISION).with_depth(false)));

        Self {
            passes: Vec::new(),
            auto_render_to_screen: true,
            pool,
            io: IoManager::new(),
            resolution: Resolution::new(),
            seen_epoch: 0,
            buffer_a,
            buffer_b,
            buffers_high_precision: false,
            owned_depth: None,
            copy_pass: CopyPass::new(),
            renderer_info: None,
            wired_enabled: Vec::new(),
            dirty: true,
        }
    }

    /// Whether the last enabled pass is redirected to the screen
    pub fn auto_render_to_screen(&self) -> bool {
        self.auto_render_to_screen
    }

    /// Enables or disables automatic screen targeting of the last pass
    pub fn set_auto_render_to_screen(&mut self, enabled: bool) {
        if self.auto_render_to_screen != enabled {
            self.auto_render_to_screen = enabled;
            self.dirty = true;
        }
    }

    /// The resolution every pipeline buffer observes
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// The resolution, mutable; changes propagate at the next update or
    /// frame
    pub fn resolution_mut(&mut self) -> &mut Resolution {
        &mut self.resolution
    }

    /// Shorthand for setting the base surface size
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.resolution.set_base_size(width, height);
    }

    /// The pipeline's resource pool
    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// The shared double buffers of the execution loop
    pub fn shared_buffers(&self) -> (ResourceId, ResourceId) {
        (self.buffer_a, self.buffer_b)
    }

    /// The pipeline-wide depth texture resource, when one is alive
    pub fn depth_texture(&self) -> Option<ResourceId> {
        self.owned_depth
    }

    /// Number of passes, including disabled ones
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether the pipeline holds no passes
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// A pass by position
    pub fn pass(&self, index: usize) -> &dyn Pass {
        self.passes[index].as_ref()
    }

    /// A pass by position, mutable
    ///
    /// Structural changes made through this (enabled flag, G-buffer
    /// requests) take effect from the next update onward.
    pub fn pass_mut(&mut self, index: usize) -> &mut dyn Pass {
        self.dirty = true;
        self.passes[index].as_mut()
    }

    /// Stores the renderer capabilities and initializes every pass
    pub fn initialize(&mut self, renderer: &dyn Renderer) {
        let info = renderer.info();
        self.renderer_info = Some(info);
        let (width, height) = (self.resolution.width(), self.resolution.height());
        for pass in &mut self.passes {
            let mut ctx = InitializeContext { pool: &mut self.pool, info, width, height };
            pass.initialize(&mut ctx);
            pass.set_size(&mut self.pool, width, height);
        }
        self.refresh_depth_texture();
        self.dirty = true;
    }

    /// Appends a pass
    pub fn add_pass(&mut self, pass: impl Pass + 'static) {
        self.insert_pass(self.passes.len(), pass);
    }

    /// Inserts a pass at a position
    pub fn insert_pass(&mut self, index: usize, pass: impl Pass + 'static) {
        let mut pass: Box<dyn Pass> = Box::new(pass);
        if let Some(info) = self.renderer_info {
            let (width, height) = (self.resolution.width(), self.resolution.height());
            let mut ctx = InitializeContext { pool: &mut self.pool, info, width, height };
            pass.initialize(&mut ctx);
            pass.set_size(&mut self.pool, width, height);
        }
        self.passes.insert(index, pass);
        self.refresh_depth_texture();
        self.dirty = true;
    }

    /// Removes a pass, disposing its owned buffers
    pub fn remove_pass(&mut self, index: usize) -> Box<dyn Pass> {
        let mut pass = self.passes.remove(index);
        pass.dispose(&mut self.pool);
        self.refresh_depth_texture();
        self.dirty = true;
        pass
    }

    /// Toggles a pass; takes effect from the next update or frame onward
    pub fn set_pass_enabled(&mut self, index: usize, enabled: bool) {
        self.passes[index].base_mut().set_enabled(enabled);
        self.dirty = true;
    }

    /// Rebuilds the wiring of every pass
    ///
    /// Safe to call redundantly: with no intervening mutation the resulting
    /// wiring is identical. Returns a validation error when a pass requests
    /// G-buffer components no enabled geometry pass can produce; the rest of
    /// the wiring is still rebuilt in that case.
    pub fn update(&mut self) -> Result<(), WiringError> {
        self.apply_resolution();
        self.refresh_shared_buffers();
        self.refresh_depth_texture();

        let info = self.renderer_info.unwrap_or_default();
        let result = self.io.update(&mut Wiring {
            passes: &mut self.passes,
            pool: &mut self.pool,
            auto_render_to_screen: self.auto_render_to_screen,
            buffer_a: self.buffer_a,
            buffer_b: self.buffer_b,
            info,
        });

        self.wired_enabled = self.passes.iter().map(|p| p.base().enabled()).collect();
        self.dirty = false;
        result
    }

    /// Executes one frame: renders every enabled pass in order
    ///
    /// Wiring is refreshed first when anything structural changed since the
    /// last update; wiring validation problems are logged, not fatal, so a
    /// misconfigured effect cannot tear down the whole frame.
    pub fn render(&mut self, renderer: &mut dyn Renderer, delta_seconds: f32) -> Result<(), RenderError> {
        if self.renderer_info.is_none() {
            self.initialize(renderer);
        }

        let enabled_now: Vec<bool> = self.passes.iter().map(|p| p.base().enabled()).collect();
        if self.dirty || enabled_now != self.wired_enabled || self.seen_epoch != self.resolution.epoch() {
            if let Err(error) = self.update() {
                tracing::warn!(%error, "pipeline wiring incomplete");
            }
        }

        let mut stencil_test = false;
        for index in 0..self.passes.len() {
            if !self.passes[index].base().enabled() {
                continue;
            }

            let input_buffer = self.passes[index].base().input().default_buffer();
            let output_buffer = self.passes[index].base().output().default_buffer();
            let kind = self.passes[index].kind();
            let needs_swap = self.passes[index].base().needs_swap();

            {
                let mut ctx = RenderContext {
                    renderer: &mut *renderer,
                    pool: &self.pool,
                    input_buffer,
                    output_buffer,
                    delta_seconds,
                    stencil_test,
                };
                self.passes[index].render(&mut ctx)?;
            }

            if needs_swap && stencil_test {
                // Carry the pixels outside the masked region across the
                // swap: blend the previous image in wherever the stencil
                // does not match, then restore the normal comparison.
                if let (TargetBinding::Resource(_), TargetBinding::Resource(_)) = (input_buffer, output_buffer) {
                    renderer.set_stencil_func(StencilFunc::NotEqual, 1);
                    let mut ctx = RenderContext {
                        renderer: &mut *renderer,
                        pool: &self.pool,
                        input_buffer,
                        output_buffer,
                        delta_seconds,
                        stencil_test,
                    };
                    self.copy_pass.render(&mut ctx)?;
                    renderer.set_stencil_func(StencilFunc::Equal, 1);
                }
            }

            match kind {
                PassKind::Mask => stencil_test = true,
                PassKind::ClearMask => stencil_test = false,
                _ => {}
            }
        }

        Ok(())
    }

    /// Disposes every pass and the pipeline-owned buffers
    pub fn dispose(&mut self) {
        for pass in &mut self.passes {
            pass.dispose(&mut self.pool);
        }
        self.passes.clear();
        if let Some(id) = self.owned_depth.take() {
            self.pool.remove(id);
        }
        self.pool.remove(self.buffer_a);
        self.pool.remove(self.buffer_b);
    }

    /// Propagates a resolution change to every sized buffer, once per epoch
    fn apply_resolution(&mut self) {
        if self.seen_epoch == self.resolution.epoch() {
            return;
        }
        self.seen_epoch = self.resolution.epoch();
        let (width, height) = (self.resolution.width(), self.resolution.height());
        tracing::debug!(width, height, "resolution changed");

        for id in [self.buffer_a, self.buffer_b] {
            self.pool.update_spec(id, |spec| spec.apply_size(width, height));
        }
        if let Some(id) = self.owned_depth {
            self.pool.update_spec(id, |spec| spec.apply_size(width, height));
        }
        for pass in &mut self.passes {
            pass.set_size(&mut self.pool, width, height);
        }
    }

    /// Reconciles the shared double buffer specs with the current pass list
    fn refresh_shared_buffers(&mut self) {
        let info = self.renderer_info.unwrap_or_default();
        let precision_high = self
            .passes
            .iter()
            .any(|p| p.base().enabled() && p.base().input().frame_buffer_precision_high);
        let needs_stencil = self.passes.iter().any(|p| matches!(p.kind(), PassKind::Mask | PassKind::ClearMask));
        let (width, height) = (self.resolution.width(), self.resolution.height());

        let precision_changed = precision_high != self.buffers_high_precision;
        self.buffers_high_precision = precision_high;

        for id in [self.buffer_a, self.buffer_b] {
            self.pool.update_spec(id, |spec| {
                let mut changed = spec.apply_size(width, height);
                if precision_changed {
                    // The format sync step may widen this again afterwards;
                    // this is only the baseline.
                    spec.format = if precision_high { info.frame_buffer_format } else { FORMAT_LOW_PRECISION };
                    changed = true;
                }
                if spec.stencil != needs_stencil {
                    spec.depth = true;
                    spec.stencil = needs_stencil;
                    changed = true;
                }
                changed
            });
        }
    }

    /// Maintains the pipeline-wide depth texture singleton
    ///
    /// Created the first time any pass needs the scene depth while no
    /// geometry pass can provide it; destroyed, with every pass notified,
    /// once no pass needs it anymore. With a geometry pass present its
    /// G-buffer depth texture is the one copy instead.
    fn refresh_depth_texture(&mut self) {
        let needed = self
            .passes
            .iter()
            .any(|p| p.base().enabled() && p.base().needs_depth_texture());
        let geometry_buffer = self
            .passes
            .iter()
            .find(|p| p.kind() == PassKind::Geometry)
            .and_then(|p| p.owned_output());

        if !needed {
            if let Some(id) = self.owned_depth.take() {
                tracing::debug!("disposing shared depth texture");
                self.pool.remove(id);
                for pass in &mut self.passes {
                    pass.set_depth_texture(None);
                }
            }
            return;
        }

        let binding = if let Some(buffer) = geometry_buffer {
            if let Some(id) = self.owned_depth.take() {
                self.pool.remove(id);
            }
            TextureBinding::depth(buffer)
        } else {
            let id = *self.owned_depth.get_or_insert_with(|| {
                tracing::debug!("creating shared depth texture");
                let mut spec = TargetSpec::color("depth texture", FORMAT_DEPTH);
                spec.color_attachments = 0;
                spec.depth = true;
                self.pool.insert("depth texture", Some(spec))
            });
            TextureBinding::depth(id)
        };

        for pass in &mut self.passes {
            pass.set_depth_texture(Some(binding));
        }
    }
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{ClearMaskPass, GeometryPass, MaskPass};
    use crate::renderer::{CameraHandle, SceneHandle};
    use crate::testing::{MockOp, MockRenderer, test_effect};

    fn scene_pair() -> (SceneHandle, CameraHandle) {
        (SceneHandle(1), CameraHandle(2))
    }

    #[test]
    fn test_passes_execute_in_order_with_wired_targets() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("bloom"));
        pipeline.add_pass(test_effect("tonemap"));

        let mut renderer = MockRenderer::new();
        pipeline.render(&mut renderer, 0.016).unwrap();

        let g_buffer = pipeline.pass(0).as_geometry().unwrap().g_buffer().unwrap();
        let (_, buffer_b) = pipeline.shared_buffers();

        let draws: Vec<MockOp> = renderer
            .ops
            .iter()
            .filter(|op| matches!(op, MockOp::Scene { .. } | MockOp::Fullscreen { .. }))
            .cloned()
            .collect();
        assert_eq!(
            draws,
            vec![
                MockOp::Scene { scene, camera, target: TargetBinding::Resource(g_buffer) },
                MockOp::Fullscreen {
                    label: "bloom",
                    source: TargetBinding::Resource(g_buffer),
                    target: TargetBinding::Resource(buffer_b),
                },
                MockOp::Fullscreen {
                    label: "tonemap",
                    source: TargetBinding::Resource(buffer_b),
                    target: TargetBinding::Screen,
                },
            ]
        );
    }

    #[test]
    fn test_disabled_pass_is_skipped() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("bloom"));
        pipeline.add_pass(test_effect("tonemap"));
        pipeline.set_pass_enabled(1, false);

        let mut renderer = MockRenderer::new();
        pipeline.render(&mut renderer, 0.016).unwrap();

        assert!(!renderer.ops.iter().any(|op| matches!(op, MockOp::Fullscreen { label: "bloom", .. })));
        assert!(renderer.ops.iter().any(|op| matches!(op, MockOp::Fullscreen { label: "tonemap", .. })));
    }

    #[test]
    fn test_masked_swap_runs_inverted_copy() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(test_effect("base"));
        pipeline.add_pass(MaskPass::new(scene, camera));
        pipeline.add_pass(test_effect("tint"));
        pipeline.add_pass(ClearMaskPass::new());
        pipeline.add_pass(test_effect("final"));

        let mut renderer = MockRenderer::new();
        pipeline.render(&mut renderer, 0.016).unwrap();

        // The masked effect is followed by the stencil-inverted copy and the
        // restored comparison, in that order.
        let relevant: Vec<MockOp> = renderer
            .ops
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    MockOp::Fullscreen { label: "tint" | "copy", .. } | MockOp::StencilFunc(StencilFunc::NotEqual | StencilFunc::Equal, _)
                )
            })
            .cloned()
            .collect();

        let tint_position = relevant
            .iter()
            .position(|op| matches!(op, MockOp::Fullscreen { label: "tint", .. }))
            .unwrap();
        assert!(matches!(relevant[tint_position + 1], MockOp::StencilFunc(StencilFunc::NotEqual, 1)));
        assert!(matches!(relevant[tint_position + 2], MockOp::Fullscreen { label: "copy", .. }));
        assert!(matches!(relevant[tint_position + 3], MockOp::StencilFunc(StencilFunc::Equal, 1)));

        // After the mask is cleared no further inverted copies run.
        let final_position = renderer
            .ops
            .iter()
            .position(|op| matches!(op, MockOp::Fullscreen { label: "final", .. }))
            .unwrap();
        assert!(
            !renderer.ops[final_position..]
                .iter()
                .any(|op| matches!(op, MockOp::StencilFunc(StencilFunc::NotEqual, _)))
        );
    }

    #[test]
    fn test_mask_pass_toggles_stencil_bookkeeping() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(MaskPass::new(scene, camera));
        pipeline.add_pass(test_effect("tint"));
        pipeline.add_pass(ClearMaskPass::new());

        let mut renderer = MockRenderer::new();
        pipeline.render(&mut renderer, 0.016).unwrap();

        assert!(renderer.ops.contains(&MockOp::StencilTest(true)));
        assert_eq!(renderer.ops.last(), Some(&MockOp::StencilTest(false)));
    }

    #[test]
    fn test_depth_texture_singleton_lifecycle() {
        let mut pipeline = RenderPipeline::new();
        pipeline.initialize(&MockRenderer::new());

        let mut dof = test_effect("dof");
        dof.base_mut().set_needs_depth_texture(true);
        let mut fog = test_effect("fog");
        fog.base_mut().set_needs_depth_texture(true);

        pipeline.add_pass(dof);
        let depth = pipeline.depth_texture().expect("created on first demand");

        pipeline.add_pass(fog);
        // Still the same shared resource.
        assert_eq!(pipeline.depth_texture(), Some(depth));
        assert!(pipeline.pool().contains(depth));

        pipeline.remove_pass(0);
        assert_eq!(pipeline.depth_texture(), Some(depth));
        assert!(pipeline.pool().contains(depth));

        pipeline.remove_pass(0);
        assert_eq!(pipeline.depth_texture(), None);
        assert!(!pipeline.pool().contains(depth));
    }

    #[test]
    fn test_resolution_change_resizes_shared_buffers() {
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(test_effect("bloom"));
        pipeline.initialize(&MockRenderer::new());
        pipeline.resolution_mut().set_base_size(800, 600);
        pipeline.resolution_mut().set_scale(0.5);
        pipeline.update().unwrap();

        let (buffer_a, _) = pipeline.shared_buffers();
        let spec = pipeline.pool().spec(buffer_a).unwrap();
        assert_eq!((spec.width, spec.height), (400, 300));
    }

    #[test]
    fn test_render_rewires_after_enabled_change_without_explicit_update() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("tonemap"));

        let mut renderer = MockRenderer::new();
        pipeline.render(&mut renderer, 0.016).unwrap();
        assert!(pipeline.pass(1).base().output().default_buffer().is_screen());

        pipeline.pass_mut(1).base_mut().set_enabled(false);
        renderer.ops.clear();
        pipeline.render(&mut renderer, 0.016).unwrap();

        // The geometry pass became the last enabled pass and now paints the
        // screen directly.
        assert!(pipeline.pass(0).base().output().default_buffer().is_screen());
        assert!(renderer.ops.contains(&MockOp::Scene { scene, camera, target: TargetBinding::Screen }));
    }

    #[test]
    fn test_dispose_releases_pipeline_buffers() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.initialize(&MockRenderer::new());
        let g_buffer = pipeline.pass(0).as_geometry().unwrap().g_buffer().unwrap();
        let (buffer_a, buffer_b) = pipeline.shared_buffers();

        pipeline.dispose();
        assert!(!pipeline.pool().contains(g_buffer));
        assert!(!pipeline.pool().contains(buffer_a));
        assert!(!pipeline.pool().contains(buffer_b));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_removed_pass_buffers_are_released() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("tonemap"));
        pipeline.initialize(&MockRenderer::new());
        let g_buffer = pipeline.pass(0).as_geometry().unwrap().g_buffer().unwrap();

        pipeline.remove_pass(0);
        assert!(!pipeline.pool().contains(g_buffer));
    }
}
