//! Per-pass input and output resource tables
//!
//! Each pass owns one [`Input`] and one [`Output`]. The tables hold the
//! default buffer binding the pass reads from or writes to, named auxiliary
//! texture bindings, shader defines and uniforms, and the set of G-buffer
//! components the pass requests as input. The tables are data only: the I/O
//! manager rewrites them on every wiring update, and passes read them at
//! render time without mutating them.

use crate::resource::{ResourceId, TextureBinding};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Interned key for shader defines, uniforms and named texture bindings
///
/// Keys are static symbols rather than free strings so a typo'd key is a
/// compile-time unknown identifier instead of a silently empty lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamKey(&'static str);

impl ParamKey {
    /// Creates a key from a static symbol
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The symbol text, as spelled in shader source
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Well-known parameter keys used by the built-in passes
pub mod keys {
    use super::ParamKey;

    /// The default input buffer a fullscreen material samples
    pub const INPUT_BUFFER: ParamKey = ParamKey::new("input_buffer");
    /// G-buffer color attachment
    pub const COLOR_BUFFER: ParamKey = ParamKey::new("color_buffer");
    /// Shared scene depth texture
    pub const DEPTH_BUFFER: ParamKey = ParamKey::new("depth_buffer");
    /// G-buffer normal attachment
    pub const NORMAL_BUFFER: ParamKey = ParamKey::new("normal_buffer");
    /// G-buffer emissive attachment
    pub const EMISSIVE_BUFFER: ParamKey = ParamKey::new("emissive_buffer");
    /// G-buffer velocity attachment
    pub const VELOCITY_BUFFER: ParamKey = ParamKey::new("velocity_buffer");
    /// Opacity uniform of the copy material
    pub const OPACITY: ParamKey = ParamKey::new("opacity");
}

/// A typed uniform value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

/// Components of the shared G-buffer produced by the geometry pass
///
/// Passes list the components they need on their input table; the I/O
/// manager unions the requests onto the geometry pass and hands back the
/// matching attachment bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GBufferComponent {
    /// Scene color
    Color,
    /// Scene depth (special-cased to the dedicated depth texture)
    Depth,
    /// View-space normals
    Normal,
    /// Emissive color
    Emissive,
    /// Screen-space motion vectors
    Velocity,
}

impl GBufferComponent {
    /// The input-table key the matching texture binding is stored under
    pub fn param_key(&self) -> ParamKey {
        match self {
            GBufferComponent::Color => keys::COLOR_BUFFER,
            GBufferComponent::Depth => keys::DEPTH_BUFFER,
            GBufferComponent::Normal => keys::NORMAL_BUFFER,
            GBufferComponent::Emissive => keys::EMISSIVE_BUFFER,
            GBufferComponent::Velocity => keys::VELOCITY_BUFFER,
        }
    }
}

/// The default-buffer slot of an input or output table
///
/// Distinguishes "never assigned" from "explicitly the screen" from a pooled
/// buffer, matching the three-valued getter contract of the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetBinding {
    /// No buffer has been assigned
    #[default]
    Unbound,
    /// The actual display surface
    Screen,
    /// A pooled buffer
    Resource(ResourceId),
}

impl TargetBinding {
    /// The pooled buffer, if this binding refers to one
    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            TargetBinding::Resource(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether this binding targets the display surface
    pub fn is_screen(&self) -> bool {
        matches!(self, TargetBinding::Screen)
    }

    /// Whether a buffer or the screen has been assigned
    pub fn is_bound(&self) -> bool {
        !matches!(self, TargetBinding::Unbound)
    }
}

/// Input resource table of a pass
#[derive(Debug, Clone, Default)]
pub struct Input {
    buffers: BTreeMap<ParamKey, TextureBinding>,
    default_buffer: TargetBinding,
    /// Shader defines propagated into the pass material
    pub defines: BTreeMap<ParamKey, String>,
    /// Uniform values propagated into the pass material
    pub uniforms: BTreeMap<ParamKey, UniformValue>,
    /// G-buffer components this pass requests as input
    pub g_buffer: BTreeSet<GBufferComponent>,
    /// Whether this pass needs a high-precision default input buffer
    pub frame_buffer_precision_high: bool,
}

/// Output resource table of a pass
///
/// Same shape as [`Input`]; a [`TargetBinding::Screen`] default buffer means
/// the pass paints directly to the display.
#[derive(Debug, Clone, Default)]
pub struct Output {
    buffers: BTreeMap<ParamKey, TextureBinding>,
    default_buffer: TargetBinding,
    /// Shader defines this pass exposes to adopters
    pub defines: BTreeMap<ParamKey, String>,
    /// Uniform values this pass exposes to adopters
    pub uniforms: BTreeMap<ParamKey, UniformValue>,
}

macro_rules! impl_table {
    ($table:ty) => {
        impl $table {
            /// Registers a named texture binding
            pub fn set_buffer(&mut self, key: ParamKey, binding: TextureBinding) {
                self.buffers.insert(key, binding);
            }

            /// Looks up a named texture binding
            pub fn buffer(&self, key: ParamKey) -> Option<TextureBinding> {
                self.buffers.get(&key).copied()
            }

            /// Removes a named texture binding
            pub fn remove_buffer(&mut self, key: ParamKey) -> Option<TextureBinding> {
                self.buffers.remove(&key)
            }

            /// All named texture bindings
            pub fn buffers(&self) -> &BTreeMap<ParamKey, TextureBinding> {
                &self.buffers
            }

            /// The default buffer binding
            pub fn default_buffer(&self) -> TargetBinding {
                self.default_buffer
            }

            /// Assigns the default buffer binding
            pub fn set_default_buffer(&mut self, binding: TargetBinding) {
                self.default_buffer = binding;
            }

            /// Clears the default buffer back to unbound
            pub fn remove_default_buffer(&mut self) {
                self.default_buffer = TargetBinding::Unbound;
            }

            /// Whether a default buffer (or the screen) is assigned
            pub fn has_default_buffer(&self) -> bool {
                self.default_buffer.is_bound()
            }
        }
    };
}

impl_table!(Input);
impl_table!(Output);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourcePool;

    #[test]
    fn test_default_buffer_tri_state() {
        let mut pool = ResourcePool::new();
        let id = pool.insert("buffer", None);

        let mut output = Output::default();
        assert!(!output.has_default_buffer());
        assert_eq!(output.default_buffer(), TargetBinding::Unbound);

        output.set_default_buffer(TargetBinding::Screen);
        assert!(output.has_default_buffer());
        assert!(output.default_buffer().is_screen());
        assert_eq!(output.default_buffer().resource(), None);

        output.set_default_buffer(TargetBinding::Resource(id));
        assert_eq!(output.default_buffer().resource(), Some(id));

        output.remove_default_buffer();
        assert!(!output.has_default_buffer());
    }

    #[test]
    fn test_named_buffers() {
        let mut pool = ResourcePool::new();
        let id = pool.insert("gbuffer", None);

        let mut input = Input::default();
        input.set_buffer(keys::NORMAL_BUFFER, crate::resource::TextureBinding::color(id));
        assert_eq!(input.buffer(keys::NORMAL_BUFFER).unwrap().resource, id);
        assert!(input.buffer(keys::DEPTH_BUFFER).is_none());

        input.remove_buffer(keys::NORMAL_BUFFER);
        assert!(input.buffer(keys::NORMAL_BUFFER).is_none());
    }

    #[test]
    fn test_gbuffer_component_keys_are_distinct() {
        let components = [
            GBufferComponent::Color,
            GBufferComponent::Depth,
            GBufferComponent::Normal,
            GBufferComponent::Emissive,
            GBufferComponent::Velocity,
        ];
        let keys: BTreeSet<_> = components.iter().map(|c| c.param_key()).collect();
        assert_eq!(keys.len(), components.len());
    }
}
