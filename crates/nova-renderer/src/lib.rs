//! Render graph construction and frame execution for the Nova renderer.
//!
//! [`NovaRenderer`] owns a [`RenderDevice`](nova_rhi::RenderDevice), turns
//! shaderpack data into ordered renderpasses, pipelines and materials, and
//! records one command list per frame that draws every renderable.
//!
//! Frames run in a fixed cycle: acquire a swapchain image, record the
//! shaderpack passes followed by the builtin passes, upload the builtin
//! uniform buffers, submit, wait on the frame's fence, present.

pub mod builtin;
pub mod error;
pub mod frame;
pub mod material;
pub mod mesh;
pub mod pipeline_storage;
pub mod reflection;
pub mod render_graph;
pub mod renderer;
pub mod uniforms;

pub use builtin::{BuiltinRegistry, BuiltinRenderpass, NullUiRenderpass};
pub use error::{RenderError, Result};
pub use frame::{FrameArena, FrameContext, FrameState};
pub use material::{FullMaterialPassName, RenderableId};
pub use mesh::{FullVertex, MeshData, MeshId, ProceduralMeshAccessor};
pub use pipeline_storage::{PipelineReturn, PipelineStorage};
pub use reflection::{ShaderReflector, SpirqReflector};
pub use render_graph::{order_passes, RenderGraph};
pub use renderer::{NovaRenderer, StaticMeshRenderableData};
pub use uniforms::PerFrameUniforms;
