//! Materials: descriptor sets bound to shaderpack resources, plus the draws
//! that use them.

use std::collections::HashMap;

use glam::Mat4;
use nova_core::shaderpack::{self, SamplerCreateInfo};
use nova_rhi::{
    DescriptorPoolHandle, DescriptorResource, DescriptorSetHandle, DescriptorSetWrite,
    RenderDevice, SamplerHandle,
};

use crate::error::Result;
use crate::mesh::MeshId;
use crate::pipeline_storage::PipelineReturn;
use crate::render_graph::RenderGraph;
use crate::uniforms::BuiltinBuffers;

/// Identifies one pass of one material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullMaterialPassName {
    pub material_name: String,
    pub pass_name: String,
}

impl FullMaterialPassName {
    pub fn new(material_name: impl Into<String>, pass_name: impl Into<String>) -> Self {
        Self {
            material_name: material_name.into(),
            pass_name: pass_name.into(),
        }
    }
}

/// Handle to a renderable added with
/// [`NovaRenderer::add_renderable_for_material`](crate::NovaRenderer::add_renderable_for_material).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderableId(pub u64);

impl RenderableId {
    /// Returned when a renderable could not be added.
    pub const INVALID: Self = Self(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticMeshRenderCommand {
    pub id: RenderableId,
    pub transform: Mat4,
    pub is_visible: bool,
}

/// Draws of one mesh, instanced together.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshBatch {
    pub mesh: MeshId,
    pub commands: Vec<StaticMeshRenderCommand>,
}

/// A material pass ready to draw.
#[derive(Debug, Clone)]
pub struct MaterialPass {
    pub name: FullMaterialPassName,
    pub pipeline_name: String,
    /// One set per set index of the pipeline's interface
    pub descriptor_sets: Vec<DescriptorSetHandle>,
    pub static_mesh_draws: Vec<MeshBatch>,
}

impl MaterialPass {
    pub fn add_draw(&mut self, mesh: MeshId, command: StaticMeshRenderCommand) {
        match self.static_mesh_draws.iter_mut().find(|batch| batch.mesh == mesh) {
            Some(batch) => batch.commands.push(command),
            None => self.static_mesh_draws.push(MeshBatch {
                mesh,
                commands: vec![command],
            }),
        }
    }

    pub fn command_mut(&mut self, id: RenderableId) -> Option<&mut StaticMeshRenderCommand> {
        self.static_mesh_draws
            .iter_mut()
            .flat_map(|batch| batch.commands.iter_mut())
            .find(|command| command.id == id)
    }

    /// Remove a draw, dropping its batch if it was the last one.
    pub fn remove_draw(&mut self, id: RenderableId) -> bool {
        let mut removed = false;
        for batch in &mut self.static_mesh_draws {
            let before = batch.commands.len();
            batch.commands.retain(|command| command.id != id);
            removed |= batch.commands.len() != before;
        }
        self.static_mesh_draws.retain(|batch| !batch.commands.is_empty());
        removed
    }

    /// Remove every draw of `mesh`. Returns the removed renderables.
    pub fn remove_mesh(&mut self, mesh: MeshId) -> Vec<RenderableId> {
        let mut removed = Vec::new();
        self.static_mesh_draws.retain(|batch| {
            if batch.mesh == mesh {
                removed.extend(batch.commands.iter().map(|command| command.id));
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn num_draws(&self) -> usize {
        self.static_mesh_draws
            .iter()
            .map(|batch| batch.commands.len())
            .sum()
    }
}

/// What material bindings can point at.
pub struct BindingSources<'a> {
    pub graph: &'a RenderGraph,
    pub builtin_buffers: &'a BuiltinBuffers,
    /// Shaderpack samplers by name. A texture is sampled with the sampler of
    /// the same name.
    pub samplers: &'a HashMap<String, SamplerHandle>,
    /// Used for textures without a sampler of their own
    pub point_sampler: SamplerHandle,
}

/// Create every sampler the shaderpack declares.
///
/// A sampler the device refuses is logged and left out, so textures it was
/// meant for fall back to point sampling.
pub fn create_samplers<D: RenderDevice>(
    device: &mut D,
    samplers: &[SamplerCreateInfo],
) -> HashMap<String, SamplerHandle> {
    let mut created = HashMap::with_capacity(samplers.len());
    for info in samplers {
        match device.create_sampler(info) {
            Ok(sampler) => {
                tracing::debug!("Created sampler {} ({:?}, {:?})", info.name, info.filter, info.wrap_mode);
                if let Some(old) = created.insert(info.name.clone(), sampler) {
                    tracing::warn!("Sampler {} is declared more than once", info.name);
                    device.destroy_sampler(old);
                }
            }
            Err(e) => tracing::error!("Could not create sampler {}: {e}", info.name),
        }
    }
    created
}

/// Create the descriptor sets of a material pass and point them at the
/// resources the material names.
pub fn create_material_pass<D: RenderDevice>(
    device: &mut D,
    pool: DescriptorPoolHandle,
    data: &shaderpack::MaterialPass,
    pipeline: &PipelineReturn,
    sources: &BindingSources<'_>,
) -> Result<MaterialPass> {
    let descriptor_sets = device.create_descriptor_sets(pipeline.pipeline_interface, pool)?;

    let writes = descriptor_writes(data, pipeline, &descriptor_sets, sources);
    device.update_descriptor_sets(&writes);

    Ok(MaterialPass {
        name: FullMaterialPassName::new(&data.material_name, &data.name),
        pipeline_name: pipeline.data.name.clone(),
        descriptor_sets,
        static_mesh_draws: Vec::new(),
    })
}

/// Resolve each binding of `data` to a render target or builtin buffer.
/// Render targets are sampled with their own sampler when the shaderpack
/// declares one.
///
/// Bindings are visited in name order. One the pipeline does not declare, or
/// whose resource is unknown, is logged and left unwritten.
pub fn descriptor_writes(
    data: &shaderpack::MaterialPass,
    pipeline: &PipelineReturn,
    descriptor_sets: &[DescriptorSetHandle],
    sources: &BindingSources<'_>,
) -> Vec<DescriptorSetWrite> {
    let mut bindings: Vec<_> = data.bindings.iter().collect();
    bindings.sort();

    let mut writes = Vec::with_capacity(bindings.len());
    for (descriptor_name, resource_name) in bindings {
        let Some(description) = pipeline.bindings.get(descriptor_name) else {
            tracing::warn!(
                "Material {} binds {descriptor_name}, which pipeline {} does not use",
                data.material_name,
                pipeline.data.name
            );
            continue;
        };
        let Some(&set) = descriptor_sets.get(description.set as usize) else {
            tracing::error!(
                "Pipeline {} has no descriptor set {} for {descriptor_name}",
                pipeline.data.name,
                description.set
            );
            continue;
        };

        let resource = if let Some(target) = sources.graph.render_target(resource_name) {
            DescriptorResource::Image {
                image: target.image,
                sampler: sources
                    .samplers
                    .get(resource_name)
                    .copied()
                    .unwrap_or(sources.point_sampler),
            }
        } else if let Some(buffer) = sources.builtin_buffers.by_name(resource_name) {
            DescriptorResource::Buffer { buffer }
        } else {
            tracing::error!("Resource {resource_name} is not known to Nova");
            continue;
        };

        writes.push(DescriptorSetWrite {
            set,
            binding: description.binding,
            resource,
        });
    }

    writes
}
