//! The wiring algorithm that connects passes into a working chain
//!
//! Every wiring update rebuilds the input/output tables of all passes from
//! scratch in a fixed order: G-buffer requests are unioned onto the geometry
//! pass, outputs are decided (including the screen-target decision and
//! clear-pass buffer adoption), inputs are chained to the previous output,
//! and finally buffer formats are synchronized between adjacent passes.
//! Outputs are decided before inputs so that chaining observes final
//! outputs and no intermediate reassignments fire.

use crate::error::WiringError;
use crate::io::{GBufferComponent, TargetBinding};
use crate::pass::{Pass, PassKind};
use crate::renderer::RendererInfo;
use crate::resource::{ResourceId, ResourcePool, TextureBinding};
use crate::target::ColorSpace;
use std::collections::BTreeSet;

/// Borrowed view of everything a wiring update operates on
pub(crate) struct Wiring<'a> {
    /// The pipeline's passes in execution order
    pub passes: &'a mut [Box<dyn Pass>],
    /// The pipeline's resource pool
    pub pool: &'a mut ResourcePool,
    /// Whether the last enabled pass is forced to target the screen
    pub auto_render_to_screen: bool,
    /// Shared double buffer the execution loop starts reading from
    pub buffer_a: ResourceId,
    /// Shared double buffer the execution loop starts writing into
    pub buffer_b: ResourceId,
    /// Renderer capabilities observed by the format sync step
    pub info: RendererInfo,
}

/// Rebuilds pipeline wiring and guards against reentrant updates
///
/// A nested update request arriving while one is in flight is not run
/// immediately; it is recorded and replayed once right after the in-flight
/// rebuild finishes, so wiring can never stay stale until the next frame.
#[derive(Debug, Default)]
pub(crate) struct IoManager {
    updating: bool,
    pending: bool,
}

impl IoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a wiring update; defers when one is already in flight
    pub fn update(&mut self, wiring: &mut Wiring<'_>) -> Result<(), WiringError> {
        if self.updating {
            self.pending = true;
            return Ok(());
        }

        self.updating = true;
        let mut result = rebuild(wiring);
        while self.pending {
            self.pending = false;
            result = rebuild(wiring);
        }
        self.updating = false;
        result
    }
}

/// One full wiring rebuild, in the fixed four-step order
fn rebuild(wiring: &mut Wiring<'_>) -> Result<(), WiringError> {
    let gbuffer_result = gather_g_buffer_components(wiring);
    update_outputs(wiring);
    update_inputs(wiring);
    sync_buffer_types(wiring);
    gbuffer_result
}

fn enabled_indices(passes: &[Box<dyn Pass>]) -> Vec<usize> {
    passes
        .iter()
        .enumerate()
        .filter(|(_, pass)| pass.base().enabled())
        .map(|(index, _)| index)
        .collect()
}

/// Step 1: union every enabled pass's G-buffer requests onto the geometry
/// pass
///
/// A secondary enabled geometry pass does not write into the primary
/// G-buffer: it is reduced to a single color attachment of its own and
/// shares the primary depth texture so its depth testing stays correct.
fn gather_g_buffer_components(wiring: &mut Wiring<'_>) -> Result<(), WiringError> {
    let enabled = enabled_indices(wiring.passes);
    let geometry: Vec<usize> = enabled
        .iter()
        .copied()
        .filter(|&i| wiring.passes[i].kind() == PassKind::Geometry)
        .collect();

    let mut union: BTreeSet<GBufferComponent> = BTreeSet::new();
    for &i in &enabled {
        union.extend(wiring.passes[i].base().input().g_buffer.iter().copied());
    }

    let Some(&primary) = geometry.first() else {
        // No producer: report every requesting pass, but leave the rest of
        // the wiring to complete so a frame in flight keeps rendering.
        let requesting: Vec<String> = enabled
            .iter()
            .copied()
            .filter(|&i| !wiring.passes[i].base().input().g_buffer.is_empty())
            .map(|i| wiring.passes[i].base().name().to_string())
            .collect();
        if requesting.is_empty() {
            return Ok(());
        }
        tracing::warn!(passes = ?requesting, components = ?union, "G-buffer requests without a geometry pass");
        return Err(WiringError::UnfulfilledGBufferRequest { passes: requesting, components: union });
    };

    if let Some(pass) = wiring.passes[primary].as_geometry_mut() {
        pass.set_g_buffer_components(wiring.pool, union);
    }

    // Secondary geometry passes keep their own single-color target when the
    // primary already produces color.
    let primary_produces_color = wiring.passes[primary]
        .as_geometry()
        .is_some_and(|p| p.g_buffer_components().contains(&GBufferComponent::Color));
    let primary_buffer = wiring.passes[primary].owned_output();
    if primary_produces_color {
        for &i in geometry.iter().skip(1) {
            let mut own = BTreeSet::new();
            own.insert(GBufferComponent::Color);
            let needs_depth = wiring.passes[i].base().needs_depth_texture();
            if let Some(pass) = wiring.passes[i].as_geometry_mut() {
                pass.set_g_buffer_components(wiring.pool, own);
            }
            if needs_depth
                && let Some(buffer) = primary_buffer
            {
                wiring.passes[i].set_depth_texture(Some(TextureBinding::depth(buffer)));
            }
        }
    }

    Ok(())
}

/// Step 2: decide every pass's output buffer
///
/// Ordinary passes alternate between the shared double buffers following
/// the swaps the execution loop will perform; passes with an owned target
/// keep it. Under `auto_render_to_screen` the last enabled pass targets the
/// screen instead, and every clear pass adopts the output of the pass that
/// follows it.
fn update_outputs(wiring: &mut Wiring<'_>) {
    let enabled = enabled_indices(wiring.passes);

    let mut read = wiring.buffer_a;
    let mut write = wiring.buffer_b;
    for &i in &enabled {
        let pass = &mut wiring.passes[i];
        if pass.kind() == PassKind::Clear {
            // Decided by adoption below; a trailing clear pass with nothing
            // to mirror stays unbound.
            let output = pass.base_mut().output_mut();
            output.remove_default_buffer();
            output.defines.clear();
            output.uniforms.clear();
            continue;
        }
        if let Some(own) = pass.owned_output() {
            pass.base_mut().output_mut().set_default_buffer(TargetBinding::Resource(own));
        } else if pass.base().needs_swap() {
            pass.base_mut().output_mut().set_default_buffer(TargetBinding::Resource(write));
            std::mem::swap(&mut read, &mut write);
        } else {
            // The pass paints into whatever currently holds the image.
            pass.base_mut().output_mut().set_default_buffer(TargetBinding::Resource(read));
        }
    }

    if wiring.auto_render_to_screen
        && let Some(&last) = enabled.last()
    {
        wiring.passes[last].base_mut().output_mut().set_default_buffer(TargetBinding::Screen);
    }

    // Clear passes mirror the pass that follows them; walking backwards
    // lets consecutive clear passes cascade the adoption.
    for position in (0..enabled.len()).rev() {
        let i = enabled[position];
        if wiring.passes[i].kind() != PassKind::Clear {
            continue;
        }
        let Some(&next) = enabled.get(position + 1) else {
            continue;
        };
        let adopted = wiring.passes[next].base().output();
        let default_buffer = adopted.default_buffer();
        let defines = adopted.defines.clone();
        let uniforms = adopted.uniforms.clone();

        let output = wiring.passes[i].base_mut().output_mut();
        output.set_default_buffer(default_buffer);
        output.defines = defines;
        output.uniforms = uniforms;
    }
}

/// Step 3: chain inputs to outputs and distribute G-buffer attachments
fn update_inputs(wiring: &mut Wiring<'_>) {
    let enabled = enabled_indices(wiring.passes);

    let geometry_index = enabled.iter().copied().find(|&i| wiring.passes[i].kind() == PassKind::Geometry);
    let geometry = geometry_index.and_then(|i| {
        let pass = wiring.passes[i].as_geometry()?;
        Some((pass.g_buffer()?, pass.g_buffer_indices().clone(), pass.base().scene(), pass.base().camera()))
    });

    let mut current = TargetBinding::Unbound;
    for (position, &i) in enabled.iter().enumerate() {
        if wiring.passes[i].kind() == PassKind::Clear {
            // A clear pass acts on behalf of the pass that follows it, so it
            // also borrows that pass's scene and camera.
            if let Some(&next) = enabled.get(position + 1) {
                let scene = wiring.passes[next].base().scene();
                let camera = wiring.passes[next].base().camera();
                let base = wiring.passes[i].base_mut();
                if base.scene().is_none() {
                    base.set_scene(scene);
                }
                if base.camera().is_none() {
                    base.set_camera(camera);
                }
            }
            continue;
        }

        if wiring.passes[i].kind() != PassKind::Geometry {
            if let Some((_, _, scene, camera)) = geometry.as_ref() {
                let base = wiring.passes[i].base_mut();
                if base.scene().is_none() {
                    base.set_scene(*scene);
                }
                if base.camera().is_none() {
                    base.set_camera(*camera);
                }
            }

            // Hand out the requested G-buffer attachments; depth maps to the
            // dedicated depth texture rather than a color attachment.
            let requests: Vec<GBufferComponent> = wiring.passes[i].base().input().g_buffer.iter().copied().collect();
            for component in requests {
                let binding = geometry.as_ref().and_then(|(buffer, indices, _, _)| match component {
                    GBufferComponent::Depth => Some(TextureBinding::depth(*buffer)),
                    _ => indices.get(&component).map(|&index| TextureBinding {
                        resource: *buffer,
                        slot: crate::resource::AttachmentSlot::Color(index),
                    }),
                });
                let input = wiring.passes[i].base_mut().input_mut();
                match binding {
                    Some(binding) => input.set_buffer(component.param_key(), binding),
                    None => {
                        input.remove_buffer(component.param_key());
                    }
                }
            }
        }

        // Chain the default buffer: the most recent non-null output wins; an
        // explicit screen output clears the following input instead.
        let input = wiring.passes[i].base_mut().input_mut();
        match current {
            TargetBinding::Resource(id) => input.set_default_buffer(TargetBinding::Resource(id)),
            TargetBinding::Screen | TargetBinding::Unbound => input.remove_default_buffer(),
        }

        match wiring.passes[i].base().output().default_buffer() {
            TargetBinding::Resource(id) => current = TargetBinding::Resource(id),
            TargetBinding::Screen => current = TargetBinding::Screen,
            TargetBinding::Unbound => {}
        }
    }
}

/// Step 4: synchronize precision and color space between chained buffers
///
/// The output inherits the input's texture format so a chain never narrows
/// silently mid-way, and a low-precision output is switched to sRGB
/// encoding when the display output is sRGB, which keeps the banding of a
/// narrow intermediate format below visibility.
fn sync_buffer_types(wiring: &mut Wiring<'_>) {
    let enabled = enabled_indices(wiring.passes);

    for &i in &enabled {
        if wiring.passes[i].kind() == PassKind::Geometry {
            continue;
        }
        let base = wiring.passes[i].base();
        let (Some(input_id), Some(output_id)) = (
            base.input().default_buffer().resource(),
            base.output().default_buffer().resource(),
        ) else {
            continue;
        };
        if input_id == output_id {
            continue;
        }

        let Some(input_spec) = wiring.pool.spec(input_id) else {
            continue;
        };
        let format = input_spec.format;
        let input_is_float = input_spec.is_float_format();
        let srgb_output = wiring.info.output_color_space == ColorSpace::Srgb;

        wiring.pool.update_spec(output_id, |spec| {
            let mut changed = false;
            if spec.format != format {
                spec.format = format;
                changed = true;
            }
            if !input_is_float && srgb_output && spec.color_space != ColorSpace::Srgb {
                spec.color_space = ColorSpace::Srgb;
                changed = true;
            }
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::RenderPipeline;
    use crate::error::WiringError;
    use crate::io::{GBufferComponent, TargetBinding, keys};
    use crate::pass::{ClearPass, GeometryPass, Pass, PassKind};
    use crate::renderer::{CameraHandle, SceneHandle};
    use crate::resource::AttachmentSlot;
    use crate::testing::{MockRenderer, init_test_logging, test_effect};

    fn scene_pair() -> (SceneHandle, CameraHandle) {
        (SceneHandle(1), CameraHandle(2))
    }

    /// Pipeline of scenario 1: clear, geometry, one fullscreen effect
    fn clear_geometry_effect() -> RenderPipeline {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(ClearPass::default());
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("bloom"));
        pipeline.initialize(&MockRenderer::new());
        pipeline
    }

    #[test]
    fn test_clear_pass_mirrors_geometry_output_and_effect_targets_screen() {
        init_test_logging();
        let mut pipeline = clear_geometry_effect();
        pipeline.update().unwrap();

        let clear_output = pipeline.pass(0).base().output().default_buffer();
        let geometry_output = pipeline.pass(1).base().output().default_buffer();
        let effect_input = pipeline.pass(2).base().input().default_buffer();
        let effect_output = pipeline.pass(2).base().output().default_buffer();

        assert_eq!(clear_output, geometry_output);
        assert_eq!(geometry_output, effect_input);
        assert!(geometry_output.resource().is_some());
        assert_eq!(effect_output, TargetBinding::Screen);
    }

    #[test]
    fn test_disabling_last_pass_moves_screen_target() {
        let mut pipeline = clear_geometry_effect();
        pipeline.update().unwrap();

        pipeline.set_pass_enabled(2, false);
        pipeline.update().unwrap();

        assert_eq!(pipeline.pass(1).base().output().default_buffer(), TargetBinding::Screen);
        // The clear pass mirrors whatever the geometry pass now targets.
        assert_eq!(pipeline.pass(0).base().output().default_buffer(), TargetBinding::Screen);
    }

    #[test]
    fn test_chain_invariant_and_screen_uniqueness() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("bloom"));
        pipeline.add_pass(test_effect("vignette"));
        pipeline.add_pass(test_effect("grain"));
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();

        // Adjacent enabled passes share the buffer by identity.
        for index in 0..pipeline.len() - 1 {
            let output = pipeline.pass(index).base().output().default_buffer();
            let input = pipeline.pass(index + 1).base().input().default_buffer();
            assert_eq!(output, input, "chain broken between passes {} and {}", index, index + 1);
        }

        // Exactly one pass targets the screen, and it is the last one.
        let screen_indices: Vec<usize> = (0..pipeline.len())
            .filter(|&i| pipeline.pass(i).base().output().default_buffer().is_screen())
            .collect();
        assert_eq!(screen_indices, vec![pipeline.len() - 1]);
    }

    #[test]
    fn test_effects_alternate_between_shared_buffers() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("a"));
        pipeline.add_pass(test_effect("b"));
        pipeline.add_pass(test_effect("c"));
        pipeline.set_auto_render_to_screen(false);
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();

        let (buffer_a, buffer_b) = pipeline.shared_buffers();
        assert_eq!(pipeline.pass(1).base().output().default_buffer().resource(), Some(buffer_b));
        assert_eq!(pipeline.pass(2).base().output().default_buffer().resource(), Some(buffer_a));
        assert_eq!(pipeline.pass(3).base().output().default_buffer().resource(), Some(buffer_b));
    }

    #[test]
    fn test_gbuffer_union_and_attachment_bindings() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("ssao").with_gbuffer_component(GBufferComponent::Normal).with_gbuffer_component(GBufferComponent::Depth));
        pipeline.add_pass(test_effect("motion-blur").with_gbuffer_component(GBufferComponent::Velocity));
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();

        let geometry = pipeline.pass(0).as_geometry().unwrap();
        let expected: std::collections::BTreeSet<_> = [
            GBufferComponent::Color,
            GBufferComponent::Depth,
            GBufferComponent::Normal,
            GBufferComponent::Velocity,
        ]
        .into_iter()
        .collect();
        assert_eq!(geometry.g_buffer_components(), &expected);

        let g_buffer = geometry.g_buffer().unwrap();
        let normal_index = geometry.g_buffer_indices()[&GBufferComponent::Normal];

        let ssao_input = pipeline.pass(1).base().input();
        let normal = ssao_input.buffer(keys::NORMAL_BUFFER).unwrap();
        assert_eq!(normal.resource, g_buffer);
        assert_eq!(normal.slot, AttachmentSlot::Color(normal_index));

        // Depth maps to the dedicated depth texture, not a color attachment.
        let depth = ssao_input.buffer(keys::DEPTH_BUFFER).unwrap();
        assert_eq!(depth.resource, g_buffer);
        assert_eq!(depth.slot, AttachmentSlot::Depth);
    }

    #[test]
    fn test_union_shrinks_when_requesting_pass_is_disabled() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("ssao").with_gbuffer_component(GBufferComponent::Normal));
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();
        assert!(pipeline.pass(0).as_geometry().unwrap().g_buffer_components().contains(&GBufferComponent::Normal));

        pipeline.set_pass_enabled(1, false);
        pipeline.update().unwrap();
        assert!(!pipeline.pass(0).as_geometry().unwrap().g_buffer_components().contains(&GBufferComponent::Normal));
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut pipeline = clear_geometry_effect();
        pipeline.update().unwrap();

        let snapshot = |pipeline: &RenderPipeline| {
            let mut wiring = Vec::new();
            for index in 0..pipeline.len() {
                let base = pipeline.pass(index).base();
                wiring.push((base.input().default_buffer(), base.output().default_buffer()));
            }
            let (a, b) = pipeline.shared_buffers();
            let versions = (
                pipeline.pool().get(a).map(|r| r.version()),
                pipeline.pool().get(b).map(|r| r.version()),
            );
            (wiring, versions)
        };

        let first = snapshot(&pipeline);
        pipeline.update().unwrap();
        let second = snapshot(&pipeline);
        assert_eq!(first, second);
    }

    #[test]
    fn test_gbuffer_request_without_geometry_pass_is_reported() {
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(test_effect("ssao").with_gbuffer_component(GBufferComponent::Normal));
        pipeline.add_pass(test_effect("tonemap"));
        pipeline.initialize(&MockRenderer::new());

        let error = pipeline.update().unwrap_err();
        match error {
            WiringError::UnfulfilledGBufferRequest { passes, components } => {
                assert_eq!(passes, vec!["ssao".to_string()]);
                assert!(components.contains(&GBufferComponent::Normal));
            }
        }

        // The rest of the wiring still completed.
        assert_eq!(pipeline.pass(1).base().output().default_buffer(), TargetBinding::Screen);
        assert!(pipeline.pass(0).base().input().buffer(keys::NORMAL_BUFFER).is_none());
    }

    #[test]
    fn test_first_pass_input_stays_unbound() {
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(test_effect("procedural"));
        pipeline.add_pass(test_effect("tonemap"));
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();

        // Nothing precedes the first pass, so it has no default input.
        assert_eq!(pipeline.pass(0).base().input().default_buffer(), TargetBinding::Unbound);
        assert!(pipeline.pass(1).base().input().default_buffer().resource().is_some());
    }

    #[test]
    fn test_auto_render_to_screen_restores_buffer_when_disabled() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("tonemap"));
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();
        assert!(pipeline.pass(1).base().output().default_buffer().is_screen());

        pipeline.set_auto_render_to_screen(false);
        pipeline.update().unwrap();
        let restored = pipeline.pass(1).base().output().default_buffer();
        let (_, buffer_b) = pipeline.shared_buffers();
        assert_eq!(restored.resource(), Some(buffer_b));

        pipeline.set_auto_render_to_screen(true);
        pipeline.update().unwrap();
        assert!(pipeline.pass(1).base().output().default_buffer().is_screen());
    }

    #[test]
    fn test_clear_pass_borrows_scene_from_next_pass() {
        let mut pipeline = clear_geometry_effect();
        pipeline.update().unwrap();

        let (scene, camera) = scene_pair();
        assert_eq!(pipeline.pass(0).base().scene(), Some(scene));
        assert_eq!(pipeline.pass(0).base().camera(), Some(camera));
        // Non-geometry passes inherit the geometry pass's scene as well.
        assert_eq!(pipeline.pass(2).base().scene(), Some(scene));
    }

    #[test]
    fn test_secondary_geometry_pass_gets_own_color_target() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(GeometryPass::new(SceneHandle(9), CameraHandle(9)));
        pipeline.add_pass(test_effect("ssao").with_gbuffer_component(GBufferComponent::Normal));
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();

        let primary = pipeline.pass(0).as_geometry().unwrap();
        let secondary = pipeline.pass(1).as_geometry().unwrap();
        assert!(primary.g_buffer_components().contains(&GBufferComponent::Normal));

        let expected: std::collections::BTreeSet<_> = [GBufferComponent::Color].into_iter().collect();
        assert_eq!(secondary.g_buffer_components(), &expected);
        assert_ne!(primary.g_buffer(), secondary.g_buffer());
        assert_eq!(pipeline.pool().spec(secondary.g_buffer().unwrap()).unwrap().color_attachments, 1);
    }

    #[test]
    fn test_format_sync_copies_input_format_downstream() {
        let (scene, camera) = scene_pair();
        let mut pipeline = RenderPipeline::new();
        pipeline.add_pass(GeometryPass::new(scene, camera));
        pipeline.add_pass(test_effect("bloom"));
        pipeline.add_pass(test_effect("tonemap"));
        pipeline.set_auto_render_to_screen(false);
        pipeline.initialize(&MockRenderer::new());
        pipeline.update().unwrap();

        // The G-buffer is high precision; the first effect's output buffer
        // inherits that format instead of narrowing the chain.
        let geometry_format = pipeline
            .pool()
            .spec(pipeline.pass(0).as_geometry().unwrap().g_buffer().unwrap())
            .unwrap()
            .format;
        let bloom_output = pipeline.pass(1).base().output().default_buffer().resource().unwrap();
        assert_eq!(pipeline.pool().spec(bloom_output).unwrap().format, geometry_format);
    }

    #[test]
    fn test_kind_tags_match_pass_roles() {
        let (scene, camera) = scene_pair();
        assert_eq!(ClearPass::default().kind(), PassKind::Clear);
        assert_eq!(GeometryPass::new(scene, camera).kind(), PassKind::Geometry);
        assert_eq!(test_effect("x").kind(), PassKind::Effect);
    }
}
