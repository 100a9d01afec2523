//! Core types for the Nova renderer.
//!
//! This crate provides the foundational types used throughout the renderer:
//! - The declarative shaderpack data model (passes, pipelines, materials, resources)
//! - Renderer settings
//! - Common error types and well-known resource names

pub mod error;
pub mod settings;
pub mod shaderpack;

pub use error::{Error, Result};
pub use settings::NovaSettings;

/// Well-known names and renderer-wide constants
pub mod constants {
    /// Name of the swapchain image that passes may write to
    pub const BACKBUFFER_NAME: &str = "Backbuffer";
    /// Name of the builtin UI renderpass
    pub const UI_RENDER_PASS_NAME: &str = "NovaUI";
    /// Builtin uniform buffer holding per-frame camera data
    pub const PER_FRAME_DATA_NAME: &str = "NovaPerFrameUBO";
    /// Builtin uniform buffer holding one model matrix per renderable
    pub const MODEL_MATRIX_BUFFER_NAME: &str = "NovaModelMatrixUBO";
    /// Sampler used when a render target is bound to a material
    pub const POINT_SAMPLER_NAME: &str = "NovaPointSampler";
    /// Default number of frames the CPU may record ahead of the GPU
    pub const DEFAULT_IN_FLIGHT_FRAMES: u32 = 3;
}
