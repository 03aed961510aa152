//! wgpu-backed renderer
//!
//! Realizes the pool's target descriptions into cached GPU textures and
//! executes the draw calls the pipeline issues. A realized texture is keyed
//! by its resource id and version: when the wiring reassigns or resizes a
//! buffer the version bump alone triggers reallocation on next use. Scene
//! rendering is delegated to a host-supplied [`SceneDrawer`]; this module
//! only knows how to bind targets, clear them, and draw fullscreen
//! materials.

use crate::error::RenderError;
use crate::io::{ParamKey, TargetBinding, UniformValue};
use crate::renderer::{CameraHandle, FullscreenDraw, Renderer, RendererInfo, SceneHandle, StencilFunc};
use crate::resource::{AttachmentSlot, ResourceId, ResourcePool, TextureBinding};
use crate::target::{ColorSpace, FORMAT_DEPTH, FORMAT_DEPTH_STENCIL, TargetSpec};
use bytes::Bytes;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Texture usage for realized render targets
const TARGET_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC);

/// Host hook that records the actual scene draw calls
///
/// The pipeline treats scenes and cameras as opaque handles; whatever owns
/// the meshes resolves them here. The stencil settings reflect the state
/// the pipeline has requested so the host can pick compatible pipelines.
pub trait SceneDrawer {
    fn draw(&mut self, render_pass: &mut wgpu::RenderPass<'_>, scene: SceneHandle, camera: CameraHandle, stencil: &StencilSettings);
}

/// Current stencil request of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilSettings {
    /// Whether the stencil test is enabled at all
    pub test: bool,
    /// Comparison applied to existing stencil values
    pub func: StencilFunc,
    /// Reference value for the comparison
    pub reference: u32,
    /// Whether passing fragments write the reference value back
    pub write: bool,
}

impl Default for StencilSettings {
    fn default() -> Self {
        Self {
            test: false,
            func: StencilFunc::Always,
            reference: 0,
            write: false,
        }
    }
}

fn compare_function(func: StencilFunc) -> wgpu::CompareFunction {
    match func {
        StencilFunc::Never => wgpu::CompareFunction::Never,
        StencilFunc::Less => wgpu::CompareFunction::Less,
        StencilFunc::Equal => wgpu::CompareFunction::Equal,
        StencilFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        StencilFunc::Greater => wgpu::CompareFunction::Greater,
        StencilFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        StencilFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        StencilFunc::Always => wgpu::CompareFunction::Always,
    }
}

#[derive(Debug)]
struct RealizedTarget {
    version: u64,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    color: Vec<(wgpu::Texture, wgpu::TextureView)>,
    depth: Option<(wgpu::Texture, wgpu::TextureView)>,
    has_stencil: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    label: &'static str,
    format: wgpu::TextureFormat,
    defines: String,
    aux_count: u32,
    aux_depth_mask: u32,
    depth_stencil_format: Option<wgpu::TextureFormat>,
    stencil: Option<(wgpu::CompareFunction, bool)>,
}

/// [`Renderer`] implementation over a wgpu device and queue
pub struct WgpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: RendererInfo,
    scene_drawer: Box<dyn SceneDrawer>,
    surface_format: wgpu::TextureFormat,
    surface_view: Option<wgpu::TextureView>,
    targets: HashMap<ResourceId, RealizedTarget>,
    pipelines: HashMap<PipelineKey, (wgpu::BindGroupLayout, wgpu::RenderPipeline)>,
    sampler: wgpu::Sampler,
    fallback_texture_view: wgpu::TextureView,
    current_target: TargetBinding,
    stencil: StencilSettings,
}

impl WgpuRenderer {
    /// Creates a renderer over an existing device
    ///
    /// `surface_format` is the format frames presented to the screen use;
    /// the output color space is derived from it.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, surface_format: wgpu::TextureFormat, scene_drawer: Box<dyn SceneDrawer>) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("postfx sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // Sampled when a material has no wired source buffer.
        let fallback_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("postfx fallback"),
            size: wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &fallback_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0, 0, 0, 255],
            wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: None },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        let fallback_texture_view = fallback_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let output_color_space = if surface_format.is_srgb() { ColorSpace::Srgb } else { ColorSpace::Linear };

        Self {
            device,
            queue,
            info: RendererInfo {
                drawing_buffer_size: (1, 1),
                output_color_space,
                ..RendererInfo::default()
            },
            scene_drawer,
            surface_format,
            surface_view: None,
            targets: HashMap::new(),
            pipelines: HashMap::new(),
            sampler,
            fallback_texture_view,
            current_target: TargetBinding::Unbound,
            stencil: StencilSettings::default(),
        }
    }

    /// Points the renderer at this frame's surface texture
    pub fn begin_frame(&mut self, surface_view: wgpu::TextureView, width: u32, height: u32) {
        self.surface_view = Some(surface_view);
        self.info.drawing_buffer_size = (width, height);
    }

    /// Releases the surface texture after presentation
    pub fn end_frame(&mut self) {
        self.surface_view = None;
    }

    /// Drops realized textures for resources the pool no longer holds
    pub fn collect_garbage(&mut self, pool: &ResourcePool) {
        self.targets.retain(|id, _| pool.contains(*id));
    }

    fn realize(&mut self, pool: &ResourcePool, id: ResourceId) -> Result<(), RenderError> {
        let resource = pool.get(id).ok_or(RenderError::StaleResource(id))?;
        let spec = resource.spec().ok_or_else(|| RenderError::UnrealizedTarget(resource.name().to_string()))?;
        let version = resource.version();

        let stale = self.targets.get(&id).is_none_or(|t| t.version != version);
        if stale {
            let realized = self.create_target(spec, version);
            self.targets.insert(id, realized);
        }
        Ok(())
    }

    fn create_target(&self, spec: &TargetSpec, version: u64) -> RealizedTarget {
        let size = wgpu::Extent3d {
            width: spec.width.max(1),
            height: spec.height.max(1),
            depth_or_array_layers: 1,
        };

        let color = (0..spec.color_attachments)
            .map(|index| {
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("{} [{}]", spec.label, index)),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: spec.format,
                    usage: TARGET_USAGE,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                (texture, view)
            })
            .collect();

        let depth = spec.depth.then(|| {
            let format = if spec.stencil { FORMAT_DEPTH_STENCIL } else { FORMAT_DEPTH };
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&format!("{} depth", spec.label)),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: TARGET_USAGE,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            (texture, view)
        });

        RealizedTarget {
            version,
            width: size.width,
            height: size.height,
            format: spec.format,
            color,
            depth,
            has_stencil: spec.stencil,
        }
    }

    fn resolve_texture_view(&self, binding: TextureBinding) -> Result<wgpu::TextureView, RenderError> {
        let target = self.targets.get(&binding.resource).ok_or(RenderError::StaleResource(binding.resource))?;
        match binding.slot {
            AttachmentSlot::Color(index) => target
                .color
                .get(index as usize)
                .map(|(_, view)| view.clone())
                .ok_or(RenderError::StaleResource(binding.resource)),
            AttachmentSlot::Depth => target
                .depth
                .as_ref()
                .map(|(_, view)| view.clone())
                .ok_or(RenderError::StaleResource(binding.resource)),
        }
    }

    /// Expands defines into WGSL const items ahead of the shader source
    fn preprocess(shader: &str, defines: &str) -> String {
        if defines.is_empty() {
            shader.to_string()
        } else {
            format!("{defines}\n{shader}")
        }
    }

    fn defines_prelude(draw: &FullscreenDraw<'_>) -> String {
        let mut prelude = String::new();
        for (key, value) in &draw.material.defines {
            if value.parse::<f64>().is_ok() {
                prelude.push_str(&format!("const {key}: f32 = {value};\n"));
            } else if value == "true" || value == "false" {
                prelude.push_str(&format!("const {key}: bool = {value};\n"));
            } else {
                tracing::debug!(%key, %value, "define is not a WGSL constant, skipped");
            }
        }
        prelude
    }

    /// Packs the uniform table into a buffer with WGSL struct alignment
    ///
    /// Values are laid out in key order; the host shader declares a struct
    /// with fields in the same order.
    fn pack_uniforms(draw: &FullscreenDraw<'_>) -> Vec<u8> {
        fn align(data: &mut Vec<u8>, alignment: usize) {
            while data.len() % alignment != 0 {
                data.push(0);
            }
        }

        let mut data = Vec::new();
        for value in draw.material.uniforms.values() {
            match value {
                UniformValue::Bool(v) => {
                    align(&mut data, 4);
                    data.extend_from_slice(bytemuck::bytes_of(&(*v as u32)));
                }
                UniformValue::Int(v) => {
                    align(&mut data, 4);
                    data.extend_from_slice(bytemuck::bytes_of(v));
                }
                UniformValue::UInt(v) => {
                    align(&mut data, 4);
                    data.extend_from_slice(bytemuck::bytes_of(v));
                }
                UniformValue::Float(v) => {
                    align(&mut data, 4);
                    data.extend_from_slice(bytemuck::bytes_of(v));
                }
                UniformValue::Vec2(v) => {
                    align(&mut data, 8);
                    data.extend_from_slice(bytemuck::cast_slice(v));
                }
                UniformValue::Vec3(v) => {
                    align(&mut data, 16);
                    data.extend_from_slice(bytemuck::cast_slice(v));
                }
                UniformValue::Vec4(v) => {
                    align(&mut data, 16);
                    data.extend_from_slice(bytemuck::cast_slice(v));
                }
            }
        }
        align(&mut data, 16);
        if data.is_empty() {
            data.resize(16, 0);
        }
        data
    }

    fn current_color_attachments(&self) -> Result<(Vec<wgpu::TextureView>, wgpu::TextureFormat, Option<(wgpu::TextureView, bool)>), RenderError> {
        match self.current_target {
            TargetBinding::Screen => {
                let view = self
                    .surface_view
                    .as_ref()
                    .ok_or_else(|| RenderError::UnrealizedTarget("screen".to_string()))?;
                Ok((vec![view.clone()], self.surface_format, None))
            }
            TargetBinding::Resource(id) => {
                let target = self.targets.get(&id).ok_or(RenderError::StaleResource(id))?;
                let depth = target.depth.as_ref().map(|(_, view)| (view.clone(), target.has_stencil));
                Ok((target.color.iter().map(|(_, view)| view.clone()).collect(), target.format, depth))
            }
            TargetBinding::Unbound => Err(RenderError::UnrealizedTarget("unbound target".to_string())),
        }
    }

    fn depth_stencil_state(&self, depth: &Option<(wgpu::TextureView, bool)>) -> Option<wgpu::DepthStencilState> {
        let (_, has_stencil) = *depth.as_ref()?;
        let stencil = if self.stencil.test && has_stencil {
            let face = wgpu::StencilFaceState {
                compare: compare_function(self.stencil.func),
                fail_op: wgpu::StencilOperation::Keep,
                depth_fail_op: wgpu::StencilOperation::Keep,
                pass_op: if self.stencil.write { wgpu::StencilOperation::Replace } else { wgpu::StencilOperation::Keep },
            };
            wgpu::StencilState {
                front: face,
                back: face,
                read_mask: 0xff,
                write_mask: 0xff,
            }
        } else {
            wgpu::StencilState::default()
        };

        Some(wgpu::DepthStencilState {
            format: if has_stencil { FORMAT_DEPTH_STENCIL } else { FORMAT_DEPTH },
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil,
            bias: wgpu::DepthBiasState::default(),
        })
    }
}

impl Renderer for WgpuRenderer {
    fn info(&self) -> RendererInfo {
        self.info
    }

    fn set_render_target(&mut self, pool: &ResourcePool, target: TargetBinding) -> Result<(), RenderError> {
        if let TargetBinding::Resource(id) = target {
            self.realize(pool, id)?;
        }
        self.current_target = target;
        Ok(())
    }

    fn clear(&mut self, color: bool, depth: bool, stencil: bool) {
        let Ok((views, _, depth_view)) = self.current_color_attachments() else {
            tracing::warn!("clear issued without a bound target");
            return;
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = views
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: if color {
                            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let depth_stencil_attachment = depth_view.as_ref().map(|(view, has_stencil)| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: if depth { wgpu::LoadOp::Clear(1.0) } else { wgpu::LoadOp::Load },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: has_stencil.then_some(wgpu::Operations {
                load: if stencil { wgpu::LoadOp::Clear(0) } else { wgpu::LoadOp::Load },
                store: wgpu::StoreOp::Store,
            }),
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("postfx clear") });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("postfx clear"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn render_scene(&mut self, scene: SceneHandle, camera: CameraHandle) -> Result<(), RenderError> {
        let (views, _, depth_view) = self.current_color_attachments()?;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = views
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                })
            })
            .collect();

        let depth_stencil_attachment = depth_view.as_ref().map(|(view, has_stencil)| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
            stencil_ops: has_stencil.then_some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
        });

        let stencil = self.stencil;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("postfx scene") });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("postfx scene"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_stencil_reference(stencil.reference);
            self.scene_drawer.draw(&mut render_pass, scene, camera, &stencil);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn draw_fullscreen(&mut self, pool: &ResourcePool, draw: &FullscreenDraw<'_>) -> Result<(), RenderError> {
        // Realize everything the draw samples before borrowing views.
        if let TargetBinding::Resource(id) = draw.source {
            self.realize(pool, id)?;
        }
        for binding in draw.textures.values() {
            self.realize(pool, binding.resource)?;
        }

        let defines = Self::defines_prelude(draw);
        let aux: Vec<(&ParamKey, &TextureBinding)> = draw.textures.iter().collect();
        let aux_depth_mask = aux
            .iter()
            .enumerate()
            .fold(0u32, |mask, (i, (_, b))| if b.slot == AttachmentSlot::Depth { mask | (1 << i) } else { mask });

        let (_, format, depth_view) = self.current_color_attachments()?;
        let depth_stencil = self.depth_stencil_state(&depth_view);
        let key = PipelineKey {
            label: draw.material.label,
            format,
            defines: defines.clone(),
            aux_count: aux.len() as u32,
            aux_depth_mask,
            depth_stencil_format: depth_stencil.as_ref().map(|state| state.format),
            stencil: depth_stencil
                .as_ref()
                .map(|state| (state.stencil.front.compare, state.stencil.front.pass_op == wgpu::StencilOperation::Replace)),
        };

        if !self.pipelines.contains_key(&key) {
            // Bindings: 0 = source texture, 1 = sampler, 2 = uniforms, then
            // auxiliary textures in table key order.
            let mut entries = vec![
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ];
            for (index, (_, binding)) in aux.iter().enumerate() {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: 3 + index as u32,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: if binding.slot == AttachmentSlot::Depth {
                            wgpu::TextureSampleType::Depth
                        } else {
                            wgpu::TextureSampleType::Float { filterable: true }
                        },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                });
            }

            let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(draw.material.label),
                entries: &entries,
            });
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(draw.material.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(draw.material.label),
                source: wgpu::ShaderSource::Wgsl(Self::preprocess(draw.material.shader, &defines).into()),
            });
            let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(draw.material.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: depth_stencil.clone(),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            });
            self.pipelines.insert(key.clone(), (bind_group_layout, pipeline));
        }

        let uniform_data = Self::pack_uniforms(draw);
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(draw.material.label),
            contents: &uniform_data,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let source_view = match draw.source {
            TargetBinding::Resource(id) => self
                .targets
                .get(&id)
                .and_then(|t| t.color.first())
                .map(|(_, view)| view.clone())
                .ok_or(RenderError::StaleResource(id))?,
            _ => self.fallback_texture_view.clone(),
        };

        let mut bind_entries = vec![
            wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&source_view) },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            wgpu::BindGroupEntry { binding: 2, resource: uniform_buffer.as_entire_binding() },
        ];
        let mut aux_views: Vec<wgpu::TextureView> = Vec::with_capacity(aux.len());
        for (_, binding) in &aux {
            aux_views.push(self.resolve_texture_view(**binding)?);
        }
        for (index, view) in aux_views.iter().enumerate() {
            bind_entries.push(wgpu::BindGroupEntry {
                binding: 3 + index as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        let (bind_group_layout, pipeline) = &self.pipelines[&key];
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(draw.material.label),
            layout: bind_group_layout,
            entries: &bind_entries,
        });

        let (views, _, depth_view) = self.current_color_attachments()?;
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = views
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                })
            })
            .collect();
        let depth_stencil_attachment = depth_view.as_ref().map(|(view, has_stencil)| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
            stencil_ops: has_stencil.then_some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(draw.material.label) });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(draw.material.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_stencil_reference(self.stencil.reference);
            render_pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn set_stencil_test(&mut self, enabled: bool) {
        self.stencil.test = enabled;
    }

    fn set_stencil_func(&mut self, func: StencilFunc, reference: u32) {
        self.stencil.func = func;
        self.stencil.reference = reference;
    }

    fn set_stencil_write(&mut self, enabled: bool) {
        self.stencil.write = enabled;
    }

    fn read_pixel(&mut self, pool: &ResourcePool, source: ResourceId, x: u32, y: u32) -> Result<Bytes, RenderError> {
        self.realize(pool, source)?;
        let target = &self.targets[&source];
        let (texture, _) = target
            .color
            .first()
            .ok_or(RenderError::UnrealizedTarget("readback source".to_string()))?;
        if x >= target.width || y >= target.height {
            return Err(RenderError::Readback(format!("pixel ({x}, {y}) outside {}x{}", target.width, target.height)));
        }
        let texel_size = texture
            .format()
            .block_copy_size(None)
            .ok_or_else(|| RenderError::Readback("format has no copyable size".to_string()))? as u64;

        // bytes_per_row must be 256-aligned even for a single texel.
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("postfx readback"),
            size: 256,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("postfx readback") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(256), rows_per_image: None },
            },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));

        // Deliberate synchronization point: block until the GPU delivers.
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|error| RenderError::Readback(error.to_string()))?;
        receiver
            .recv()
            .map_err(|_| RenderError::Readback("mapping callback dropped".to_string()))?
            .map_err(|error| RenderError::Readback(error.to_string()))?;

        let data = buffer.slice(..).get_mapped_range();
        let pixel = Bytes::copy_from_slice(&data[..texel_size as usize]);
        drop(data);
        buffer.unmap();
        Ok(pixel)
    }
}
