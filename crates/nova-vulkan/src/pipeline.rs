//! Renderpasses, framebuffers, pipeline interfaces and graphics pipelines.

use std::collections::{BTreeMap, HashMap};

use ash::vk;
use glam::UVec2;
use nova_core::constants::BACKBUFFER_NAME;
use nova_core::shaderpack::{PipelineCreateInfo, PixelFormat, ShaderSource, StateFlag, StencilOpState, TextureAttachmentInfo};
use nova_rhi::{ResourceBindingDescription, Result, RhiError, VertexLayout};

use crate::convert;
use crate::objects::VulkanPipelineInterface;

/// Array length given to runtime-sized descriptor arrays.
pub const MAX_UNBOUNDED_DESCRIPTORS: u32 = 64;

/// Layout a render target stays in outside of the renderpasses that write it.
pub const fn resting_layout(format: PixelFormat) -> vk::ImageLayout {
    if format.is_depth() {
        vk::ImageLayout::GENERAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

/// A renderpass with one subpass writing `color` and `depth`, which is
/// attached last. Every attachment starts and ends in its resting layout, so
/// passes can run in any order without explicit transitions.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_renderpass(
    device: &ash::Device,
    name: &str,
    color: &[TextureAttachmentInfo],
    depth: Option<&TextureAttachmentInfo>,
    backbuffer_format: vk::Format,
) -> Result<vk::RenderPass> {
    let load_op = |clear: bool| {
        if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        }
    };

    let mut attachments: Vec<vk::AttachmentDescription> = color
        .iter()
        .map(|output| {
            let (format, layout) = if output.name == BACKBUFFER_NAME {
                (backbuffer_format, vk::ImageLayout::PRESENT_SRC_KHR)
            } else {
                (convert::pixel_format(output.pixel_format), resting_layout(output.pixel_format))
            };
            vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op(output.clear))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(layout)
                .final_layout(layout)
        })
        .collect();

    let color_refs: Vec<vk::AttachmentReference> = (0u32..)
        .take(color.len())
        .map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .collect();

    let depth_ref = depth.map(|depth| {
        let layout = resting_layout(depth.pixel_format);
        attachments.push(
            vk::AttachmentDescription::default()
                .format(convert::pixel_format(depth.pixel_format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op(depth.clear))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(load_op(depth.clear))
                .stencil_store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(layout)
                .final_layout(layout),
        );
        vk::AttachmentReference {
            attachment: u32::try_from(color.len()).unwrap_or(u32::MAX),
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    });

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }

    let memory_access = vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;
    let dependencies = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage_mask: vk::PipelineStageFlags::ALL_GRAPHICS,
            src_access_mask: memory_access,
            dst_access_mask: memory_access,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::ALL_GRAPHICS,
            dst_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            src_access_mask: memory_access,
            dst_access_mask: memory_access,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(&dependencies);

    device
        .create_render_pass(&create_info, None)
        .map_err(|e| RhiError::RenderpassCreation(format!("{name}: {e}")))
}

/// # Safety
/// The device, renderpass and views must be valid.
pub unsafe fn create_framebuffer(
    device: &ash::Device,
    renderpass: vk::RenderPass,
    views: &[vk::ImageView],
    size: UVec2,
) -> Result<vk::Framebuffer> {
    if size.x == 0 || size.y == 0 {
        return Err(RhiError::ZeroFramebufferSize {
            width: size.x,
            height: size.y,
        });
    }

    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(renderpass)
        .attachments(views)
        .width(size.x)
        .height(size.y)
        .layers(1);
    device.create_framebuffer(&create_info, None).map_err(crate::error::rhi)
}

/// One binding of a descriptor set layout, before it reaches Vulkan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub flags: vk::DescriptorBindingFlags,
}

/// Group reflected bindings into per-set layouts, filling gaps with empty sets.
///
/// Runtime-sized arrays become partially bound arrays of
/// [`MAX_UNBOUNDED_DESCRIPTORS`]. Only the highest binding of a set may have
/// a variable count; an unbounded binding anywhere else gets one descriptor.
pub fn plan_set_layouts(bindings: &HashMap<String, ResourceBindingDescription>) -> Vec<Vec<SetLayoutBinding>> {
    let mut sets: BTreeMap<u32, BTreeMap<u32, (&str, &ResourceBindingDescription)>> = BTreeMap::new();
    for (name, binding) in bindings {
        sets.entry(binding.set)
            .or_default()
            .insert(binding.binding, (name.as_str(), binding));
    }

    let num_sets = sets.keys().next_back().map_or(0, |last| last + 1);
    (0..num_sets)
        .map(|set| {
            let Some(set_bindings) = sets.get(&set) else {
                return Vec::new();
            };
            let highest = set_bindings.keys().next_back().copied();

            set_bindings
                .iter()
                .map(|(&index, &(name, binding))| {
                    let (count, flags) = if !binding.is_unbounded {
                        (binding.count.max(1), vk::DescriptorBindingFlags::empty())
                    } else if Some(index) == highest {
                        (
                            MAX_UNBOUNDED_DESCRIPTORS,
                            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
                        )
                    } else {
                        tracing::warn!(
                            "Runtime-sized binding {name} is not the last binding of set {set}, giving it one descriptor"
                        );
                        (1, vk::DescriptorBindingFlags::PARTIALLY_BOUND)
                    };

                    SetLayoutBinding {
                        binding: index,
                        descriptor_type: convert::descriptor_type(binding.descriptor_type),
                        count,
                        stages: convert::shader_stages(binding.stages),
                        flags,
                    }
                })
                .collect()
        })
        .collect()
}

/// Create the descriptor set layouts, pipeline layout and a renderpass
/// compatible with the pass the interface's pipelines draw in.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_pipeline_interface(
    device: &ash::Device,
    bindings: &HashMap<String, ResourceBindingDescription>,
    color: &[TextureAttachmentInfo],
    depth: Option<&TextureAttachmentInfo>,
    backbuffer_format: vk::Format,
) -> Result<VulkanPipelineInterface> {
    let plan = plan_set_layouts(bindings);

    let mut set_layouts = Vec::with_capacity(plan.len());
    let destroy_layouts = |layouts: &[vk::DescriptorSetLayout]| {
        for &layout in layouts {
            device.destroy_descriptor_set_layout(layout, None);
        }
    };

    for set in &plan {
        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = set
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect();
        let binding_flags: Vec<vk::DescriptorBindingFlags> = set.iter().map(|binding| binding.flags).collect();

        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let mut create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        if binding_flags.iter().any(|flags| !flags.is_empty()) {
            create_info = create_info.push_next(&mut flags_info);
        }

        match device.create_descriptor_set_layout(&create_info, None) {
            Ok(layout) => set_layouts.push(layout),
            Err(e) => {
                destroy_layouts(&set_layouts);
                return Err(crate::error::rhi(e));
            }
        }
    }

    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    let layout = match device.create_pipeline_layout(&layout_info, None) {
        Ok(layout) => layout,
        Err(e) => {
            destroy_layouts(&set_layouts);
            return Err(RhiError::PipelineCreation(format!("Pipeline layout: {e}")));
        }
    };

    let renderpass = match create_renderpass(device, "pipeline interface", color, depth, backbuffer_format) {
        Ok(renderpass) => renderpass,
        Err(e) => {
            device.destroy_pipeline_layout(layout, None);
            destroy_layouts(&set_layouts);
            return Err(e);
        }
    };

    Ok(VulkanPipelineInterface {
        set_layouts,
        layout,
        renderpass,
        num_color_attachments: color.len(),
        binding_types: plan
            .iter()
            .map(|set| {
                set.iter()
                    .map(|binding| (binding.binding, binding.descriptor_type))
                    .collect()
            })
            .collect(),
        variable_sets: plan
            .iter()
            .map(|set| {
                set.iter().any(|binding| {
                    binding
                        .flags
                        .contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
                })
            })
            .collect(),
    })
}

pub fn cull_mode(data: &PipelineCreateInfo) -> vk::CullModeFlags {
    if data.has_state(StateFlag::DisableCulling) {
        vk::CullModeFlags::NONE
    } else if data.has_state(StateFlag::InvertCulling) {
        vk::CullModeFlags::FRONT
    } else {
        vk::CullModeFlags::BACK
    }
}

pub fn color_write_mask(data: &PipelineCreateInfo) -> vk::ColorComponentFlags {
    if data.has_state(StateFlag::DisableColorWrite) {
        vk::ColorComponentFlags::empty()
    } else if data.has_state(StateFlag::DisableAlphaWrite) {
        vk::ColorComponentFlags::R | vk::ColorComponentFlags::G | vk::ColorComponentFlags::B
    } else {
        vk::ColorComponentFlags::RGBA
    }
}

unsafe fn shader_module(device: &ash::Device, pipeline: &str, source: &ShaderSource) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(&source.source);
    device.create_shader_module(&create_info, None).map_err(|e| {
        RhiError::ShaderCompilation(format!("{pipeline}: {} did not load: {e}", source.filename.display()))
    })
}

/// Create a graphics pipeline in the interface's renderpass.
///
/// # Safety
/// The device and interface must be valid.
pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    interface: &VulkanPipelineInterface,
    data: &PipelineCreateInfo,
) -> Result<vk::Pipeline> {
    if data.vertex_shader.source.is_empty() {
        return Err(RhiError::ShaderCompilation(format!(
            "Pipeline {} has no vertex shader code",
            data.name
        )));
    }

    let stage_sources = [
        (vk::ShaderStageFlags::VERTEX, Some(&data.vertex_shader)),
        (
            vk::ShaderStageFlags::TESSELLATION_CONTROL,
            data.tessellation_control_shader.as_ref(),
        ),
        (
            vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            data.tessellation_evaluation_shader.as_ref(),
        ),
        (vk::ShaderStageFlags::GEOMETRY, data.geometry_shader.as_ref()),
        (vk::ShaderStageFlags::FRAGMENT, data.fragment_shader.as_ref()),
    ];

    let mut modules = Vec::new();
    for (stage, source) in stage_sources {
        let Some(source) = source.filter(|source| !source.source.is_empty()) else {
            continue;
        };
        match shader_module(device, &data.name, source) {
            Ok(module) => modules.push((stage, module)),
            Err(e) => {
                for (_, module) in modules {
                    device.destroy_shader_module(module, None);
                }
                return Err(e);
            }
        }
    }

    let result = build_pipeline(device, interface, data, &modules);
    for (_, module) in modules {
        device.destroy_shader_module(module, None);
    }
    result
}

unsafe fn build_pipeline(
    device: &ash::Device,
    interface: &VulkanPipelineInterface,
    data: &PipelineCreateInfo,
    modules: &[(vk::ShaderStageFlags, vk::ShaderModule)],
) -> Result<vk::Pipeline> {
    let stages: Vec<vk::PipelineShaderStageCreateInfo> = modules
        .iter()
        .map(|&(stage, module)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage)
                .module(module)
                .name(c"main")
        })
        .collect();
    let tessellated = modules
        .iter()
        .any(|(stage, _)| *stage == vk::ShaderStageFlags::TESSELLATION_CONTROL);

    let layout = VertexLayout::from_fields(&data.vertex_fields);
    let vertex_bindings: Vec<vk::VertexInputBindingDescription> = layout
        .attributes
        .iter()
        .map(|attribute| vk::VertexInputBindingDescription {
            binding: attribute.binding,
            stride: layout.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        })
        .collect();
    let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = layout
        .attributes
        .iter()
        .map(|attribute| vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding: attribute.binding,
            format: convert::vertex_format(attribute.field),
            offset: attribute.offset,
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let topology = if tessellated {
        vk::PrimitiveTopology::PATCH_LIST
    } else {
        convert::topology(data.primitive_mode)
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(topology)
        .primitive_restart_enable(false);
    let tessellation = vk::PipelineTessellationStateCreateInfo::default().patch_control_points(3);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let depth_bias = data.depth_bias != 0.0 || data.slope_scaled_depth_bias != 0.0;
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(cull_mode(data))
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(depth_bias)
        .depth_bias_constant_factor(data.depth_bias)
        .depth_bias_slope_factor(data.slope_scaled_depth_bias)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .alpha_to_coverage_enable(data.has_state(StateFlag::EnableAlphaToCoverage));

    let stencil_write_mask = if data.has_state(StateFlag::StencilWrite) {
        data.stencil_write_mask
    } else {
        0
    };
    let stencil = |face: Option<&StencilOpState>| {
        convert::stencil_state(
            &face.copied().unwrap_or_default(),
            data.stencil_ref,
            data.stencil_read_mask,
            stencil_write_mask,
        )
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(!data.has_state(StateFlag::DisableDepthTest))
        .depth_write_enable(!data.has_state(StateFlag::DisableDepthWrite))
        .depth_compare_op(convert::compare_op(data.depth_func))
        .stencil_test_enable(data.has_state(StateFlag::EnableStencilTest))
        .front(stencil(data.front_face.as_ref()))
        .back(stencil(data.back_face.as_ref()));

    let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(data.has_state(StateFlag::Blending))
        .src_color_blend_factor(convert::blend_factor(data.source_blend_factor))
        .dst_color_blend_factor(convert::blend_factor(data.destination_blend_factor))
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(convert::blend_factor(data.alpha_src))
        .dst_alpha_blend_factor(convert::blend_factor(data.alpha_dst))
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(color_write_mask(data));
    let blend_attachments = vec![blend_attachment; interface.num_color_attachments];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(interface.layout)
        .render_pass(interface.renderpass)
        .subpass(0);
    if tessellated {
        pipeline_info = pipeline_info.tessellation_state(&tessellation);
    }

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        .map_err(|(_, e)| RhiError::PipelineCreation(format!("{}: {e}", data.name)))?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineCreation(format!("{}: driver returned no pipeline", data.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_rhi::{DescriptorType, ShaderStage};
    use pretty_assertions::assert_eq;

    fn binding(set: u32, binding: u32, is_unbounded: bool) -> ResourceBindingDescription {
        ResourceBindingDescription {
            set,
            binding,
            count: 1,
            descriptor_type: DescriptorType::CombinedImageSampler,
            stages: ShaderStage::FRAGMENT,
            is_unbounded,
        }
    }

    #[test]
    fn sets_are_dense_and_sorted_by_binding() {
        let bindings = HashMap::from([
            ("b".to_string(), binding(2, 3, false)),
            ("a".to_string(), binding(2, 1, false)),
            ("c".to_string(), binding(0, 0, false)),
        ]);
        let plan = plan_set_layouts(&bindings);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].len(), 1);
        assert!(plan[1].is_empty());
        assert_eq!(plan[2].iter().map(|b| b.binding).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(plan[2][0].stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn only_the_last_binding_gets_a_variable_count() {
        let bindings = HashMap::from([
            ("textures".to_string(), binding(0, 2, true)),
            ("early".to_string(), binding(0, 0, true)),
        ]);
        let plan = plan_set_layouts(&bindings);

        assert_eq!(plan[0][0].count, 1);
        assert_eq!(plan[0][0].flags, vk::DescriptorBindingFlags::PARTIALLY_BOUND);
        assert_eq!(plan[0][1].count, MAX_UNBOUNDED_DESCRIPTORS);
        assert!(plan[0][1]
            .flags
            .contains(vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT));
    }

    #[test]
    fn no_bindings_means_no_sets() {
        assert!(plan_set_layouts(&HashMap::new()).is_empty());
    }

    #[test]
    fn state_flags_pick_culling_and_write_masks() {
        let mut data = PipelineCreateInfo::default();
        assert_eq!(cull_mode(&data), vk::CullModeFlags::BACK);
        assert_eq!(color_write_mask(&data), vk::ColorComponentFlags::RGBA);

        data.states = vec![StateFlag::InvertCulling, StateFlag::DisableAlphaWrite];
        assert_eq!(cull_mode(&data), vk::CullModeFlags::FRONT);
        assert!(!color_write_mask(&data).contains(vk::ColorComponentFlags::A));

        data.states.push(StateFlag::DisableCulling);
        data.states.push(StateFlag::DisableColorWrite);
        assert_eq!(cull_mode(&data), vk::CullModeFlags::NONE);
        assert!(color_write_mask(&data).is_empty());
    }

    #[test]
    fn depth_targets_rest_in_the_general_layout() {
        assert_eq!(resting_layout(PixelFormat::Depth), vk::ImageLayout::GENERAL);
        assert_eq!(resting_layout(PixelFormat::Rgba8), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
