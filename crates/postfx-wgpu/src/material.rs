//! Fullscreen shader materials
//!
//! A material is a value a pass owns: WGSL source plus the defines and
//! uniforms it is rendered with. Passes compose materials instead of
//! deriving from them, so swapping the shader of an effect never changes
//! the pass's wiring behavior.

use crate::io::{ParamKey, UniformValue};
use std::collections::BTreeMap;

/// A fullscreen shader with its parameter tables
#[derive(Debug, Clone)]
pub struct Material {
    /// Debug label, also used to key pipeline caches
    pub label: &'static str,
    /// WGSL source containing a `vs_main` vertex and `fs_main` fragment entry
    pub shader: &'static str,
    /// Compile-time constants substituted into the shader
    pub defines: BTreeMap<ParamKey, String>,
    /// Uniform block values
    pub uniforms: BTreeMap<ParamKey, UniformValue>,
}

impl Material {
    /// Creates a material with empty parameter tables
    pub fn new(label: &'static str, shader: &'static str) -> Self {
        Self {
            label,
            shader,
            defines: BTreeMap::new(),
            uniforms: BTreeMap::new(),
        }
    }

    /// Sets a define, replacing any previous value
    pub fn set_define(&mut self, key: ParamKey, value: impl Into<String>) {
        self.defines.insert(key, value.into());
    }

    /// Sets a uniform, replacing any previous value
    pub fn set_uniform(&mut self, key: ParamKey, value: UniformValue) {
        self.uniforms.insert(key, value);
    }
}

/// WGSL source of the plain copy material
///
/// Samples the default input buffer and writes it through unchanged, scaled
/// by an opacity uniform. Also used internally by the execution loop to
/// carry unmasked pixels across a buffer swap.
pub const COPY_SHADER: &str = r#"
struct CopyUniforms {
    opacity: f32,
}

@group(0) @binding(0) var input_buffer: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(0) @binding(2) var<uniform> uniforms: CopyUniforms;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    // Single oversized triangle covering the viewport
    var out: VertexOutput;
    let x = f32(i32(index) / 2) * 4.0 - 1.0;
    let y = f32(i32(index) % 2) * 4.0 - 1.0;
    out.position = vec4<f32>(x, y, 0.0, 1.0);
    out.uv = vec2<f32>((x + 1.0) * 0.5, 1.0 - (y + 1.0) * 0.5);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(input_buffer, input_sampler, in.uv) * uniforms.opacity;
}
"#;

impl Material {
    /// The plain copy material at full opacity
    pub fn copy() -> Self {
        let mut material = Material::new("copy", COPY_SHADER);
        material.set_uniform(crate::io::keys::OPACITY, UniformValue::Float(1.0));
        material
    }
}
