//! CPU-side descriptions of GPU render targets
//!
//! The wiring engine never talks to the GPU directly. Buffers are described
//! by [`TargetSpec`] values held in the resource pool; a renderer realizes
//! them into actual textures and watches the resource version to know when a
//! reallocation is required.

use std::fmt;

/// Represents a rational scale factor as a fraction
///
/// Used to express the size of reduced-resolution targets (for example a
/// half-resolution blur buffer) relative to the pipeline resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor {
    /// The numerator of the fraction
    pub numerator: u32,
    /// The denominator of the fraction
    pub denominator: u32,
}

impl ScaleFactor {
    /// Creates a new scale factor from numerator and denominator
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// The identity scale factor
    pub const ONE: ScaleFactor = ScaleFactor::new(1, 1);

    /// Returns true if this scale factor equals 1.0 (no scaling)
    pub fn is_unity(&self) -> bool {
        self.numerator == self.denominator
    }

    /// Applies this scale factor to a dimension, rounding down
    pub fn apply(&self, value: u32) -> u32 {
        ((value as u64 * self.numerator as u64) / self.denominator.max(1) as u64) as u32
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

/// Color space a target's contents are encoded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// Linear working-space values
    Linear,
    /// sRGB-encoded values
    Srgb,
}

/// How a target's concrete size follows the pipeline resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
    /// Match the pipeline resolution exactly
    FullResolution,
    /// A rational fraction of the pipeline resolution per axis
    Scaled(ScaleFactor, ScaleFactor),
    /// A fixed size that ignores resolution changes
    Fixed(u32, u32),
}

impl SizePolicy {
    /// Computes the concrete size for a given pipeline resolution
    pub fn apply(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            SizePolicy::FullResolution => (width, height),
            SizePolicy::Scaled(sx, sy) => (sx.apply(width).max(1), sy.apply(height).max(1)),
            SizePolicy::Fixed(w, h) => (w, h),
        }
    }
}

/// Default texture format for low-precision intermediate buffers
pub const FORMAT_LOW_PRECISION: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Default texture format for high-precision intermediate buffers
pub const FORMAT_HIGH_PRECISION: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Depth-stencil format used when a target carries a stencil mask
pub const FORMAT_DEPTH_STENCIL: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Depth-only format for targets without stencil
pub const FORMAT_DEPTH: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Description of a render target buffer
///
/// `width`/`height` are the current concrete size, kept in sync with the
/// pipeline resolution through [`TargetSpec::apply_size`] according to the
/// size policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
    /// Debug label, also used for realized texture labels
    pub label: String,
    /// Concrete width in pixels
    pub width: u32,
    /// Concrete height in pixels
    pub height: u32,
    /// How the concrete size follows the pipeline resolution
    pub size: SizePolicy,
    /// Texture format of every color attachment
    pub format: wgpu::TextureFormat,
    /// Color space the contents are encoded in
    pub color_space: ColorSpace,
    /// Number of simultaneous color attachments (more than one makes this an
    /// MRT target)
    pub color_attachments: u32,
    /// Whether the target carries a depth attachment
    pub depth: bool,
    /// Whether the depth attachment includes a stencil aspect
    pub stencil: bool,
}

impl TargetSpec {
    /// Creates a full-resolution single-attachment color target
    pub fn color(label: impl Into<String>, format: wgpu::TextureFormat) -> Self {
        Self {
            label: label.into(),
            width: 1,
            height: 1,
            size: SizePolicy::FullResolution,
            format,
            color_space: ColorSpace::Linear,
            color_attachments: 1,
            depth: false,
            stencil: false,
        }
    }

    /// Adds a depth attachment, optionally with a stencil aspect
    pub fn with_depth(mut self, stencil: bool) -> Self {
        self.depth = true;
        self.stencil = stencil;
        self
    }

    /// Overrides the size policy
    pub fn with_size(mut self, size: SizePolicy) -> Self {
        self.size = size;
        let (w, h) = size.apply(self.width, self.height);
        self.width = w;
        self.height = h;
        self
    }

    /// Overrides the number of color attachments
    pub fn with_color_attachments(mut self, count: u32) -> Self {
        self.color_attachments = count;
        self
    }

    /// Recomputes the concrete size for a new pipeline resolution
    ///
    /// Returns true when the concrete size actually changed.
    pub fn apply_size(&mut self, width: u32, height: u32) -> bool {
        let (w, h) = self.size.apply(width, height);
        if (w, h) != (self.width, self.height) {
            self.width = w;
            self.height = h;
            true
        } else {
            false
        }
    }

    /// Whether the format stores floating-point components
    ///
    /// Non-float intermediate buffers lose precision, which the wiring
    /// compensates for by forcing sRGB encoding on them when the final
    /// output is sRGB.
    pub fn is_float_format(&self) -> bool {
        matches!(
            self.format,
            wgpu::TextureFormat::Rgba16Float
                | wgpu::TextureFormat::Rgba32Float
                | wgpu::TextureFormat::Rg16Float
                | wgpu::TextureFormat::Rg32Float
                | wgpu::TextureFormat::R16Float
                | wgpu::TextureFormat::R32Float
                | wgpu::TextureFormat::Rg11b10Ufloat
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_factor_apply() {
        assert_eq!(ScaleFactor::new(1, 2).apply(801), 400);
        assert_eq!(ScaleFactor::new(2, 1).apply(400), 800);
        assert_eq!(ScaleFactor::ONE.apply(123), 123);
        assert!(ScaleFactor::new(3, 3).is_unity());
    }

    #[test]
    fn test_size_policy() {
        assert_eq!(SizePolicy::FullResolution.apply(800, 600), (800, 600));
        assert_eq!(
            SizePolicy::Scaled(ScaleFactor::new(1, 4), ScaleFactor::new(1, 4)).apply(800, 600),
            (200, 150)
        );
        assert_eq!(SizePolicy::Fixed(64, 64).apply(800, 600), (64, 64));
    }

    #[test]
    fn test_apply_size_reports_changes() {
        let mut spec = TargetSpec::color("test", FORMAT_LOW_PRECISION);
        assert!(spec.apply_size(800, 600));
        assert_eq!((spec.width, spec.height), (800, 600));
        assert!(!spec.apply_size(800, 600));

        let mut fixed = TargetSpec::color("lut", FORMAT_LOW_PRECISION).with_size(SizePolicy::Fixed(16, 16));
        assert!(!fixed.apply_size(800, 600));
        assert_eq!((fixed.width, fixed.height), (16, 16));
    }
}
