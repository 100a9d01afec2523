//! RHI error types.

use thiserror::Error;

/// Errors reported by a render device.
#[derive(Error, Debug)]
pub enum RhiError {
    /// A framebuffer or renderpass was requested with a zero width or height.
    #[error("Framebuffer width and height must be greater than 0, got {width}x{height}")]
    ZeroFramebufferSize { width: u32, height: u32 },

    /// A renderpass declares more color attachments than the device supports.
    #[error("Renderpass {pass} has {count} color attachments, but the device supports at most {max}")]
    TooManyColorAttachments { pass: String, count: u32, max: u32 },

    /// Shader compilation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Renderpass creation failed.
    #[error("Renderpass creation failed: {0}")]
    RenderpassCreation(String),

    /// No memory type matches the requested usage.
    #[error("No memory type supports {0}")]
    NoSuitableMemoryType(String),

    /// A memory pool has no room for the requested allocation.
    #[error("Out of device memory: requested {requested} bytes")]
    OutOfDeviceMemory { requested: u64 },

    /// The CPU tried to write to memory it cannot see.
    #[error("Buffer memory is not host visible")]
    MemoryNotHostVisible,

    /// A write would run past the end of a buffer.
    #[error("Write of {size} bytes at offset {offset} exceeds buffer size {capacity}")]
    WriteOutOfBounds { offset: u64, size: u64, capacity: u64 },

    /// A handle does not refer to a live object.
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// Waiting on a fence that was never submitted would block forever.
    #[error("Fence was never submitted and will not be signaled")]
    FenceNeverSignaled,

    /// Surface or swapchain failure.
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Backend-specific error.
    #[error("{0}")]
    Backend(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RhiError>;
