//! Renderer errors.

use glam::UVec2;
use nova_rhi::RhiError;
use nova_shaderpack::ShaderpackError;
use thiserror::Error;

/// Errors raised while building the render graph or running frames.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device error
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Shaderpack loading error
    #[error(transparent)]
    Shaderpack(#[from] ShaderpackError),

    /// Settings or data error
    #[error(transparent)]
    Core(#[from] nova_core::Error),

    /// The passes' dependencies form a cycle
    #[error("Render passes {0:?} depend on each other in a cycle")]
    DependencyCycle(Vec<String>),

    /// A pass depends on a pass that does not exist
    #[error("Pass {pass} depends on {dependency}, which does not exist")]
    UnknownDependency { pass: String, dependency: String },

    /// Two attachments of one pass have different sizes
    #[error(
        "Attachments {first} ({first_size}) and {second} ({second_size}) of pass {pass} have different sizes"
    )]
    AttachmentSizeMismatch {
        pass: String,
        first: String,
        first_size: UVec2,
        second: String,
        second_size: UVec2,
    },

    /// A backbuffer pass also writes other textures
    #[error("Pass {pass} writes to the backbuffer and {others} other textures, but a backbuffer pass may write nothing else")]
    BackbufferNotExclusive { pass: String, others: usize },

    /// A second shaderpack pass writes to the backbuffer
    #[error("Pass {pass} writes to the backbuffer, but pass {first} already does")]
    DuplicateBackbufferPass { pass: String, first: String },

    /// A pass names a render target the shaderpack does not declare
    #[error("Pass {pass} uses render target {target}, which is not declared")]
    UnknownRenderTarget { pass: String, target: String },

    /// A pipeline could not be created
    #[error("Could not create pipeline {pipeline}: {source}")]
    Pipeline {
        pipeline: String,
        #[source]
        source: Box<RenderError>,
    },

    /// A pipeline's parent does not exist
    #[error("Pipeline {pipeline} inherits from {parent}, which does not exist")]
    UnknownParent { pipeline: String, parent: String },

    /// A pipeline is its own ancestor
    #[error("Pipeline {0} inherits from itself")]
    InheritanceCycle(String),

    /// A pipeline names a pass that was not built
    #[error("Pipeline {pipeline} renders in pass {pass}, which was not built")]
    UnknownPass { pipeline: String, pass: String },

    /// Two shader stages disagree on where a resource is bound
    #[error("Resource {name} is bound at set {}, binding {} in one stage and set {}, binding {} in another", .first.0, .first.1, .second.0, .second.1)]
    BindingConflict {
        name: String,
        first: (u32, u32),
        second: (u32, u32),
    },

    /// SPIR-V could not be reflected
    #[error("Shader reflection failed: {0}")]
    Reflection(String),

    /// Data written to a procedural mesh exceeds its buffers
    #[error("Procedural mesh has room for {capacity} bytes, but {size} bytes were written")]
    MeshDataTooLarge { size: u64, capacity: u64 },

    /// A mesh needs at least one vertex and one index
    #[error("Mesh data has no vertices or no indices")]
    EmptyMesh,

    /// No mesh has this id
    #[error("No mesh with id {0}")]
    UnknownMesh(String),

    /// The renderer was already shut down
    #[error("The renderer has been shut down")]
    ShutDown,
}

/// Result type alias using [`RenderError`].
pub type Result<T> = std::result::Result<T, RenderError>;
