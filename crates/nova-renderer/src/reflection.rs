//! Shader resource reflection.

use std::collections::HashMap;

use nova_rhi::{DescriptorType, ResourceBindingDescription, ShaderStage};
use nova_shaderpack::{SPIRV_HEADER_WORDS, SPIRV_MAGIC};

use crate::error::{RenderError, Result};

/// Reads the resource bindings a SPIR-V module declares.
pub trait ShaderReflector: Send {
    /// Every descriptor the module uses, by name. `stage` becomes each
    /// binding's stage mask.
    fn reflect(
        &self,
        stage: ShaderStage,
        spirv: &[u32],
    ) -> Result<Vec<(String, ResourceBindingDescription)>>;
}

/// Reflection backed by `spirq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpirqReflector;

impl ShaderReflector for SpirqReflector {
    fn reflect(
        &self,
        stage: ShaderStage,
        spirv: &[u32],
    ) -> Result<Vec<(String, ResourceBindingDescription)>> {
        // spirq indexes past the header without checking the length
        if spirv.len() < SPIRV_HEADER_WORDS || spirv[0] != SPIRV_MAGIC {
            return Err(RenderError::Reflection(format!(
                "{} words do not form a SPIR-V module",
                spirv.len()
            )));
        }

        let entry_points = spirq::ReflectConfig::new()
            .spv(spirv)
            .ref_all_rscs(true)
            .reflect()
            .map_err(|e| RenderError::Reflection(format!("{e:?}")))?;

        let mut bindings = Vec::new();
        for entry_point in &entry_points {
            for var in &entry_point.vars {
                let spirq::var::Variable::Descriptor {
                    name,
                    desc_bind,
                    desc_ty,
                    nbind,
                    ..
                } = var
                else {
                    continue;
                };

                let Some(descriptor_type) = to_descriptor_type(desc_ty) else {
                    tracing::warn!("Skipping descriptor {name:?} of unsupported type {desc_ty:?}");
                    continue;
                };

                let name = name
                    .clone()
                    .unwrap_or_else(|| format!("set{}_binding{}", desc_bind.set(), desc_bind.bind()));
                bindings.push((
                    name,
                    ResourceBindingDescription {
                        set: desc_bind.set(),
                        binding: desc_bind.bind(),
                        count: (*nbind).max(1),
                        descriptor_type,
                        stages: stage,
                        is_unbounded: *nbind == 0,
                    },
                ));
            }
        }

        Ok(bindings)
    }
}

fn to_descriptor_type(desc_ty: &spirq::ty::DescriptorType) -> Option<DescriptorType> {
    use spirq::ty::DescriptorType as Spirq;

    match desc_ty {
        Spirq::UniformBuffer() => Some(DescriptorType::UniformBuffer),
        Spirq::StorageBuffer(..) => Some(DescriptorType::StorageBuffer),
        Spirq::CombinedImageSampler() | Spirq::SampledImage() | Spirq::Sampler() => {
            Some(DescriptorType::CombinedImageSampler)
        }
        _ => None,
    }
}

/// Add one stage's binding to the pipeline's table.
///
/// A name seen before must sit at the same set and binding; its stage mask
/// grows to cover the new stage.
pub fn merge_binding(
    bindings: &mut HashMap<String, ResourceBindingDescription>,
    name: String,
    binding: ResourceBindingDescription,
) -> Result<()> {
    match bindings.get_mut(&name) {
        Some(existing) => {
            if (existing.set, existing.binding) != (binding.set, binding.binding) {
                return Err(RenderError::BindingConflict {
                    name,
                    first: (existing.set, existing.binding),
                    second: (binding.set, binding.binding),
                });
            }
            existing.stages |= binding.stages;
            existing.count = existing.count.max(binding.count);
            existing.is_unbounded |= binding.is_unbounded;
        }
        None => {
            bindings.insert(name, binding);
        }
    }
    Ok(())
}
