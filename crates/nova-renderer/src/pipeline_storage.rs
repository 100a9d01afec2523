//! Compiled pipelines, keyed by name.

use std::collections::HashMap;

use nova_core::shaderpack::{PipelineCreateInfo, RenderPassCreateInfo, ShaderSource};
use nova_rhi::{
    PipelineHandle, PipelineInterfaceHandle, RenderDevice, ResourceBindingDescription, ShaderStage,
};

use crate::error::{RenderError, Result};
use crate::reflection::{merge_binding, ShaderReflector, SpirqReflector};

/// A pipeline that made it onto the device.
#[derive(Debug, Clone)]
pub struct PipelineReturn {
    pub pipeline: PipelineHandle,
    pub pipeline_interface: PipelineInterfaceHandle,
    /// Resources the pipeline's shaders use, merged across stages
    pub bindings: HashMap<String, ResourceBindingDescription>,
    /// The create info after inheritance was resolved
    pub data: PipelineCreateInfo,
}

pub struct PipelineStorage {
    pipelines: HashMap<String, PipelineReturn>,
    reflector: Box<dyn ShaderReflector>,
}

impl Default for PipelineStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStorage {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
            reflector: Box::new(SpirqReflector),
        }
    }

    pub fn set_reflector(&mut self, reflector: Box<dyn ShaderReflector>) {
        self.reflector = reflector;
    }

    pub fn get_pipeline(&self, name: &str) -> Option<&PipelineReturn> {
        self.pipelines.get(name)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Reflect, lay out and compile one resolved pipeline for `pass`.
    ///
    /// On failure nothing is registered and every device object created on
    /// the way is destroyed again.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn create_pipeline<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: &PipelineCreateInfo,
        pass: &RenderPassCreateInfo,
    ) -> Result<&PipelineReturn> {
        let wrap = |source: RenderError| RenderError::Pipeline {
            pipeline: data.name.clone(),
            source: Box::new(source),
        };

        let bindings = self.reflect_bindings(data).map_err(wrap)?;

        let pipeline_interface = device
            .create_pipeline_interface(&bindings, &pass.texture_outputs, pass.depth_texture.as_ref())
            .map_err(|e| wrap(e.into()))?;

        let pipeline = match device.create_pipeline(pipeline_interface, data) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                device.destroy_pipeline_interface(pipeline_interface);
                return Err(wrap(e.into()));
            }
        };

        tracing::debug!(
            "Created pipeline {} for pass {} with {} bindings",
            data.name,
            pass.name,
            bindings.len()
        );

        if let Some(old) = self.pipelines.remove(&data.name) {
            tracing::warn!("Replacing pipeline {}", data.name);
            device.destroy_pipeline(old.pipeline);
            device.destroy_pipeline_interface(old.pipeline_interface);
        }

        Ok(self
            .pipelines
            .entry(data.name.clone())
            .or_insert(PipelineReturn {
                pipeline,
                pipeline_interface,
                bindings,
                data: data.clone(),
            }))
    }

    fn reflect_bindings(
        &self,
        data: &PipelineCreateInfo,
    ) -> Result<HashMap<String, ResourceBindingDescription>> {
        let stages: [(ShaderStage, Option<&ShaderSource>); 5] = [
            (ShaderStage::VERTEX, Some(&data.vertex_shader)),
            (
                ShaderStage::TESSELLATION_CONTROL,
                data.tessellation_control_shader.as_ref(),
            ),
            (
                ShaderStage::TESSELLATION_EVALUATION,
                data.tessellation_evaluation_shader.as_ref(),
            ),
            (ShaderStage::GEOMETRY, data.geometry_shader.as_ref()),
            (ShaderStage::FRAGMENT, data.fragment_shader.as_ref()),
        ];

        let mut bindings = HashMap::new();
        for (stage, shader) in stages {
            let Some(shader) = shader.filter(|shader| !shader.source.is_empty()) else {
                continue;
            };
            for (name, binding) in self.reflector.reflect(stage, &shader.source)? {
                merge_binding(&mut bindings, name, binding)?;
            }
        }

        Ok(bindings)
    }

    /// Destroy every pipeline and its interface.
    pub fn destroy_all<D: RenderDevice>(&mut self, device: &mut D) {
        for (_, pipeline) in self.pipelines.drain() {
            device.destroy_pipeline(pipeline.pipeline);
            device.destroy_pipeline_interface(pipeline.pipeline_interface);
        }
    }
}

/// Resolve `pipeline`'s parent chain into one create info.
///
/// Parents are looked up by name in `all`. A missing parent or a chain that
/// loops back on itself is an error.
pub fn resolve_inheritance(
    pipeline: &PipelineCreateInfo,
    all: &[PipelineCreateInfo],
) -> Result<PipelineCreateInfo> {
    let mut visited = vec![pipeline.name.clone()];
    resolve_with_visited(pipeline, all, &mut visited)
}

fn resolve_with_visited(
    pipeline: &PipelineCreateInfo,
    all: &[PipelineCreateInfo],
    visited: &mut Vec<String>,
) -> Result<PipelineCreateInfo> {
    let Some(parent_name) = &pipeline.parent_name else {
        return Ok(pipeline.clone());
    };

    if visited.contains(parent_name) {
        return Err(RenderError::InheritanceCycle(pipeline.name.clone()));
    }

    let parent = all
        .iter()
        .find(|candidate| &candidate.name == parent_name)
        .ok_or_else(|| RenderError::UnknownParent {
            pipeline: pipeline.name.clone(),
            parent: parent_name.clone(),
        })?;

    visited.push(parent_name.clone());
    let resolved_parent = resolve_with_visited(parent, all, visited)?;

    Ok(pipeline.merge_with_parent(&resolved_parent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_core::shaderpack::{PixelFormat, TextureAttachmentInfo};
    use nova_rhi::{DescriptorType, HeadlessDevice};
    use std::path::PathBuf;

    /// Reports one uniform buffer per stage, named after the first word of
    /// the stage's code.
    struct WordReflector;

    impl ShaderReflector for WordReflector {
        fn reflect(
            &self,
            stage: ShaderStage,
            spirv: &[u32],
        ) -> Result<Vec<(String, ResourceBindingDescription)>> {
            Ok(vec![(
                format!("ubo{}", spirv[0]),
                ResourceBindingDescription {
                    set: 0,
                    binding: spirv[0],
                    count: 1,
                    descriptor_type: DescriptorType::UniformBuffer,
                    stages: stage,
                    is_unbounded: false,
                },
            )])
        }
    }

    fn shader(name: &str, word: u32) -> ShaderSource {
        ShaderSource {
            filename: PathBuf::from(name),
            source: vec![word],
        }
    }

    fn pass() -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            name: "Forward".to_string(),
            texture_outputs: vec![TextureAttachmentInfo::new("Color", PixelFormat::Rgba8, true)],
            ..RenderPassCreateInfo::default()
        }
    }

    fn storage() -> PipelineStorage {
        let mut storage = PipelineStorage::new();
        storage.set_reflector(Box::new(WordReflector));
        storage
    }

    #[test]
    fn child_inherits_stages_and_keeps_its_depth_bias() {
        let parent = PipelineCreateInfo {
            name: "Parent".to_string(),
            pass: "Forward".to_string(),
            vertex_shader: shader("parent.vert", 1),
            fragment_shader: Some(shader("parent.frag", 2)),
            ..PipelineCreateInfo::default()
        };
        let child = PipelineCreateInfo {
            name: "Child".to_string(),
            parent_name: Some("Parent".to_string()),
            depth_bias: 2.5,
            ..PipelineCreateInfo::default()
        };

        let resolved = resolve_inheritance(&child, &[parent.clone(), child.clone()]).unwrap();

        assert_eq!(resolved.name, "Child");
        assert_eq!(resolved.pass, "Forward");
        assert_eq!(resolved.vertex_shader, parent.vertex_shader);
        assert_eq!(resolved.fragment_shader, parent.fragment_shader);
        assert!((resolved.depth_bias - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn grandparents_resolve_through_the_chain() {
        let root = PipelineCreateInfo {
            name: "Root".to_string(),
            vertex_shader: shader("root.vert", 1),
            ..PipelineCreateInfo::default()
        };
        let middle = PipelineCreateInfo {
            name: "Middle".to_string(),
            parent_name: Some("Root".to_string()),
            pass: "Forward".to_string(),
            ..PipelineCreateInfo::default()
        };
        let leaf = PipelineCreateInfo {
            name: "Leaf".to_string(),
            parent_name: Some("Middle".to_string()),
            ..PipelineCreateInfo::default()
        };

        let resolved = resolve_inheritance(&leaf, &[root, middle, leaf.clone()]).unwrap();
        assert_eq!(resolved.pass, "Forward");
        assert_eq!(resolved.vertex_shader.source, vec![1]);
    }

    #[test]
    fn inheritance_errors() {
        let orphan = PipelineCreateInfo {
            name: "Orphan".to_string(),
            parent_name: Some("Missing".to_string()),
            ..PipelineCreateInfo::default()
        };
        assert!(matches!(
            resolve_inheritance(&orphan, &[orphan.clone()]),
            Err(RenderError::UnknownParent { .. })
        ));

        let a = PipelineCreateInfo {
            name: "A".to_string(),
            parent_name: Some("B".to_string()),
            ..PipelineCreateInfo::default()
        };
        let b = PipelineCreateInfo {
            name: "B".to_string(),
            parent_name: Some("A".to_string()),
            ..PipelineCreateInfo::default()
        };
        assert!(matches!(
            resolve_inheritance(&a, &[a.clone(), b]),
            Err(RenderError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn bindings_merge_across_stages() {
        let mut device = HeadlessDevice::default();
        let mut storage = storage();
        let data = PipelineCreateInfo {
            name: "Opaque".to_string(),
            pass: "Forward".to_string(),
            vertex_shader: shader("opaque.vert", 0),
            fragment_shader: Some(shader("opaque.frag", 1)),
            ..PipelineCreateInfo::default()
        };

        let created = storage.create_pipeline(&mut device, &data, &pass()).unwrap();

        assert_eq!(created.bindings.len(), 2);
        assert_eq!(created.bindings["ubo0"].stages, ShaderStage::VERTEX);
        assert_eq!(created.bindings["ubo1"].stages, ShaderStage::FRAGMENT);
        assert!(storage.get_pipeline("Opaque").is_some());
        assert_eq!(device.num_pipelines(), 1);
    }

    #[test]
    fn failed_pipeline_is_not_registered() {
        let mut device = HeadlessDevice::default();
        let mut storage = storage();
        let data = PipelineCreateInfo {
            name: "Broken".to_string(),
            pass: "Forward".to_string(),
            ..PipelineCreateInfo::default()
        };

        let error = storage.create_pipeline(&mut device, &data, &pass()).unwrap_err();

        assert!(matches!(error, RenderError::Pipeline { ref pipeline, .. } if pipeline == "Broken"));
        assert!(storage.get_pipeline("Broken").is_none());
        assert_eq!(device.num_pipelines(), 0);
    }

    #[test]
    fn destroy_all_empties_the_storage() {
        let mut device = HeadlessDevice::default();
        let mut storage = storage();
        let data = PipelineCreateInfo {
            name: "Opaque".to_string(),
            pass: "Forward".to_string(),
            vertex_shader: shader("opaque.vert", 0),
            ..PipelineCreateInfo::default()
        };
        storage.create_pipeline(&mut device, &data, &pass()).unwrap();

        storage.destroy_all(&mut device);

        assert!(storage.is_empty());
        assert_eq!(device.num_pipelines(), 0);
    }
}
