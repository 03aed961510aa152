//! Error types for pipeline wiring and frame execution
//!
//! Wiring problems that can be corrected automatically (format mismatches,
//! missing optional buffers) are corrected in place and never surface here.
//! Only genuine misconfigurations and GPU-side failures are reported.

use crate::io::GBufferComponent;
use crate::resource::ResourceId;
use std::collections::BTreeSet;

/// Validation errors raised while rebuilding pipeline wiring
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WiringError {
    /// One or more passes request G-buffer components but no enabled
    /// geometry pass exists to produce them. Wiring of the remaining passes
    /// still completes; the affected input slots are simply left empty.
    #[error("passes {passes:?} request G-buffer components {components:?} but the pipeline has no enabled geometry pass")]
    UnfulfilledGBufferRequest {
        /// Names of the requesting passes
        passes: Vec<String>,
        /// Union of the unfulfillable component requests
        components: BTreeSet<GBufferComponent>,
    },
}

/// Errors raised while executing a frame
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A pass referenced a resource whose pool slot was reused or removed
    #[error("resource {0:?} is stale or was disposed")]
    StaleResource(ResourceId),

    /// A render target was bound before any buffer value was assigned to it
    #[error("render target `{0}` has no buffer value to realize")]
    UnrealizedTarget(String),

    /// A pass was asked to render without a usable output binding
    #[error("pass `{0}` has no output binding")]
    MissingOutput(String),

    /// Pixel readback failed on the GPU side
    #[error("pixel readback failed: {0}")]
    Readback(String),
}
