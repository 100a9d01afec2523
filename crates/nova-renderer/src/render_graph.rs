//! The render graph: pass ordering, render targets and renderpass objects.

use std::collections::{HashMap, HashSet};

use glam::UVec2;
use nova_core::shaderpack::{
    PipelineCreateInfo, PixelFormat, RenderPassCreateInfo, TextureAttachmentInfo,
    TextureCreateInfo,
};
use nova_rhi::{
    FramebufferHandle, ImageCreateInfo, ImageHandle, ImageUsage, RenderDevice, RenderpassHandle,
};

use crate::error::{RenderError, Result};

/// Order passes so every pass comes after the passes it depends on.
///
/// Independent passes keep their input order. Only the first declaration of a
/// pass name is kept. Depending on a pass that is not in `passes` or a
/// dependency cycle rejects the whole list.
pub fn order_passes(passes: &[RenderPassCreateInfo]) -> Result<Vec<RenderPassCreateInfo>> {
    let mut seen = HashSet::new();
    let passes: Vec<&RenderPassCreateInfo> = passes
        .iter()
        .filter(|pass| {
            let first = seen.insert(pass.name.as_str());
            if !first {
                tracing::warn!("Render pass {} is declared more than once, keeping the first", pass.name);
            }
            first
        })
        .collect();

    for pass in &passes {
        if let Some(missing) = pass
            .dependencies
            .iter()
            .find(|dependency| !seen.contains(dependency.as_str()))
        {
            return Err(RenderError::UnknownDependency {
                pass: pass.name.clone(),
                dependency: missing.clone(),
            });
        }
    }

    let mut remaining = passes;
    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|pass| {
            pass.dependencies
                .iter()
                .all(|dependency| placed.contains(dependency.as_str()))
        });

        let Some(index) = ready else {
            return Err(RenderError::DependencyCycle(
                remaining.iter().map(|pass| pass.name.clone()).collect(),
            ));
        };

        let pass = remaining.remove(index);
        placed.insert(pass.name.as_str());
        ordered.push(pass.clone());
    }

    Ok(ordered)
}

/// A dynamic texture passes render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub image: ImageHandle,
    pub size: UVec2,
    pub format: PixelFormat,
}

/// Create every texture the shaderpack declares, sized against the swapchain.
///
/// A texture the device refuses is logged and left out.
pub fn create_dynamic_textures<D: RenderDevice>(
    device: &mut D,
    textures: &[TextureCreateInfo],
) -> HashMap<String, RenderTarget> {
    let swapchain_size = device.swapchain_size();
    let mut targets = HashMap::with_capacity(textures.len());

    for texture in textures {
        let size = texture.format.size_in_pixels(swapchain_size);
        let info = ImageCreateInfo {
            name: texture.name.clone(),
            pixel_format: texture.format.pixel_format,
            size,
            usage: ImageUsage::RenderTarget,
        };

        match device.create_image(&info) {
            Ok(image) => {
                tracing::debug!("Created render target {} ({}x{})", texture.name, size.x, size.y);
                if let Some(old) = targets.insert(
                    texture.name.clone(),
                    RenderTarget {
                        image,
                        size,
                        format: texture.format.pixel_format,
                    },
                ) {
                    tracing::warn!("Render target {} is declared more than once", texture.name);
                    device.destroy_image(old.image);
                }
            }
            Err(e) => tracing::error!("Could not create render target {}: {e}", texture.name),
        }
    }

    targets
}

/// A pass with its device objects.
#[derive(Debug, Clone)]
pub struct Renderpass {
    pub name: String,
    pub renderpass: RenderpassHandle,
    /// `None` when the pass renders straight into the swapchain image
    pub framebuffer: Option<FramebufferHandle>,
    pub writes_to_backbuffer: bool,
    pub framebuffer_size: UVec2,
    /// Pipelines whose owning pass is this one
    pub pipeline_names: Vec<String>,
}

impl Renderpass {
    pub fn destroy<D: RenderDevice>(self, device: &mut D) {
        if let Some(framebuffer) = self.framebuffer {
            device.destroy_framebuffer(framebuffer);
        }
        device.destroy_renderpass(self.renderpass);
    }
}

fn lookup_target<'a>(
    pass: &RenderPassCreateInfo,
    targets: &'a HashMap<String, RenderTarget>,
    attachment: &TextureAttachmentInfo,
) -> Result<&'a RenderTarget> {
    targets
        .get(&attachment.name)
        .ok_or_else(|| RenderError::UnknownRenderTarget {
            pass: pass.name.clone(),
            target: attachment.name.clone(),
        })
}

/// Validate one pass and create its renderpass and framebuffer.
///
/// `backbuffer_writer` is the name of the pass already writing to the
/// swapchain, if any. Device objects created before a failure are destroyed.
pub fn build_renderpass<D: RenderDevice>(
    device: &mut D,
    pass: &RenderPassCreateInfo,
    targets: &HashMap<String, RenderTarget>,
    pipelines: &[PipelineCreateInfo],
    backbuffer_writer: Option<&str>,
) -> Result<Renderpass> {
    let writes_to_backbuffer = pass.writes_to_backbuffer();

    let mut attachments = Vec::new();
    if writes_to_backbuffer {
        let others = pass.texture_outputs.len() - 1 + usize::from(pass.depth_texture.is_some());
        if others > 0 {
            return Err(RenderError::BackbufferNotExclusive {
                pass: pass.name.clone(),
                others,
            });
        }
        if let Some(first) = backbuffer_writer {
            return Err(RenderError::DuplicateBackbufferPass {
                pass: pass.name.clone(),
                first: first.to_string(),
            });
        }
    } else {
        let mut first: Option<(&str, UVec2)> = None;
        for attachment in pass.texture_outputs.iter().chain(&pass.depth_texture) {
            let target = lookup_target(pass, targets, attachment)?;
            match first {
                None => first = Some((attachment.name.as_str(), target.size)),
                Some((first_name, first_size)) if first_size != target.size => {
                    return Err(RenderError::AttachmentSizeMismatch {
                        pass: pass.name.clone(),
                        first: first_name.to_string(),
                        first_size,
                        second: attachment.name.clone(),
                        second_size: target.size,
                    });
                }
                Some(_) => {}
            }
            attachments.push(target.image);
        }
    }

    let framebuffer_size = match pass.texture_outputs.first().or(pass.depth_texture.as_ref()) {
        Some(attachment) if !writes_to_backbuffer => lookup_target(pass, targets, attachment)?.size,
        _ => device.swapchain_size(),
    };

    let renderpass = device.create_renderpass(pass, framebuffer_size)?;

    let framebuffer = if writes_to_backbuffer {
        None
    } else {
        match device.create_framebuffer(renderpass, &attachments, framebuffer_size) {
            Ok(framebuffer) => Some(framebuffer),
            Err(e) => {
                device.destroy_renderpass(renderpass);
                return Err(e.into());
            }
        }
    };

    let pipeline_names = pipelines
        .iter()
        .filter(|pipeline| pipeline.pass == pass.name)
        .map(|pipeline| pipeline.name.clone())
        .collect();

    Ok(Renderpass {
        name: pass.name.clone(),
        renderpass,
        framebuffer,
        writes_to_backbuffer,
        framebuffer_size,
        pipeline_names,
    })
}

/// The passes of a loaded shaderpack, in submission order.
#[derive(Debug, Default)]
pub struct RenderGraph {
    passes: Vec<Renderpass>,
    metadata: HashMap<String, RenderPassCreateInfo>,
    render_targets: HashMap<String, RenderTarget>,
}

impl RenderGraph {
    /// Build renderpasses for already ordered passes.
    ///
    /// A pass that fails validation or creation is logged and skipped; the
    /// remaining passes still build.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn build<D: RenderDevice>(
        device: &mut D,
        ordered_passes: &[RenderPassCreateInfo],
        textures: &[TextureCreateInfo],
        pipelines: &[PipelineCreateInfo],
    ) -> Self {
        let render_targets = create_dynamic_textures(device, textures);
        let mut passes: Vec<Renderpass> = Vec::with_capacity(ordered_passes.len());
        let mut metadata = HashMap::with_capacity(ordered_passes.len());

        for pass in ordered_passes {
            let backbuffer_writer = passes
                .iter()
                .find(|built| built.writes_to_backbuffer)
                .map(|built| built.name.as_str());

            match build_renderpass(device, pass, &render_targets, pipelines, backbuffer_writer) {
                Ok(built) => {
                    let mut info = pass.clone();
                    info.pipeline_names.clone_from(&built.pipeline_names);
                    metadata.insert(pass.name.clone(), info);
                    passes.push(built);
                }
                Err(e) => tracing::error!("Skipping render pass {}: {e}", pass.name),
            }
        }

        tracing::info!(
            "Built render graph with {} of {} passes and {} render targets",
            passes.len(),
            ordered_passes.len(),
            render_targets.len()
        );

        Self {
            passes,
            metadata,
            render_targets,
        }
    }

    pub fn passes(&self) -> &[Renderpass] {
        &self.passes
    }

    pub fn pass(&self, name: &str) -> Option<&Renderpass> {
        self.passes.iter().find(|pass| pass.name == name)
    }

    /// The declaration of a built pass, with its pipelines filled in.
    pub fn metadata(&self, name: &str) -> Option<&RenderPassCreateInfo> {
        self.metadata.get(name)
    }

    pub fn render_target(&self, name: &str) -> Option<&RenderTarget> {
        self.render_targets.get(name)
    }

    pub fn render_targets(&self) -> &HashMap<String, RenderTarget> {
        &self.render_targets
    }

    /// Destroy every framebuffer, renderpass and render target.
    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        for pass in self.passes.drain(..) {
            pass.destroy(device);
        }
        for (_, target) in self.render_targets.drain() {
            device.destroy_image(target.image);
        }
        self.metadata.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_core::constants::BACKBUFFER_NAME;
    use nova_core::shaderpack::{TextureDimensionType, TextureFormat};
    use nova_rhi::HeadlessDevice;
    use pretty_assertions::assert_eq;

    fn pass(name: &str, dependencies: &[&str]) -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            name: name.to_string(),
            dependencies: dependencies.iter().map(ToString::to_string).collect(),
            ..RenderPassCreateInfo::default()
        }
    }

    fn writing(name: &str, outputs: &[&str]) -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            name: name.to_string(),
            texture_outputs: outputs
                .iter()
                .map(|output| TextureAttachmentInfo::new(*output, PixelFormat::Rgba8, true))
                .collect(),
            ..RenderPassCreateInfo::default()
        }
    }

    fn absolute(name: &str, width: f32, height: f32) -> TextureCreateInfo {
        TextureCreateInfo {
            name: name.to_string(),
            format: TextureFormat {
                pixel_format: PixelFormat::Rgba8,
                dimension_type: TextureDimensionType::Absolute,
                width,
                height,
            },
        }
    }

    fn names(passes: &[RenderPassCreateInfo]) -> Vec<&str> {
        passes.iter().map(|pass| pass.name.as_str()).collect()
    }

    #[test]
    fn dependencies_come_first() {
        let passes = [pass("Lighting", &["Gbuffer"]), pass("Gbuffer", &[]), pass("Post", &["Lighting"])];
        let ordered = order_passes(&passes).unwrap();
        assert_eq!(names(&ordered), vec!["Gbuffer", "Lighting", "Post"]);
    }

    #[test]
    fn independent_passes_keep_input_order() {
        let passes = [pass("Shadow", &[]), pass("Sky", &[]), pass("Forward", &["Shadow"])];
        let ordered = order_passes(&passes).unwrap();
        assert_eq!(names(&ordered), vec!["Shadow", "Sky", "Forward"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let passes = [pass("A", &["B"]), pass("B", &["A"]), pass("C", &[])];
        match order_passes(&passes) {
            Err(RenderError::DependencyCycle(cycle)) => assert_eq!(cycle, vec!["A", "B"]),
            other => panic!("expected a dependency cycle, got {other:?}"),
        }
    }

    #[test]
    fn later_declarations_of_a_pass_are_dropped() {
        let mut shadow = pass("Shadow", &[]);
        shadow.texture_outputs = vec![TextureAttachmentInfo::new("ShadowMap", PixelFormat::Depth, true)];
        let passes = [shadow, pass("Forward", &["Shadow"]), pass("Shadow", &["Forward"])];

        let ordered = order_passes(&passes).unwrap();

        assert_eq!(names(&ordered), vec!["Shadow", "Forward"]);
        assert_eq!(ordered[0].texture_outputs[0].name, "ShadowMap");
        assert!(ordered[0].dependencies.is_empty());
    }

    #[test]
    fn unknown_dependencies_are_rejected() {
        let passes = [pass("A", &["Missing"])];
        assert!(matches!(
            order_passes(&passes),
            Err(RenderError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn screen_relative_textures_follow_the_swapchain() {
        let mut device = HeadlessDevice::default();
        let half = TextureCreateInfo {
            name: "Half".to_string(),
            format: TextureFormat {
                pixel_format: PixelFormat::Rgba16F,
                dimension_type: TextureDimensionType::ScreenRelative,
                width: 0.5,
                height: 0.5,
            },
        };

        let targets = create_dynamic_textures(&mut device, &[half, absolute("Zero", 0.0, 4.0)]);

        assert_eq!(targets["Half"].size, UVec2::new(640, 360));
        assert!(!targets.contains_key("Zero"));
        assert_eq!(device.num_images(), 1);
    }

    #[test]
    fn mismatched_attachments_skip_only_that_pass() {
        let mut device = HeadlessDevice::default();
        let textures = [
            absolute("Small", 256.0, 256.0),
            absolute("Large", 512.0, 512.0),
            absolute("Other", 256.0, 256.0),
        ];
        let passes = [writing("Broken", &["Small", "Large"]), writing("Fine", &["Small", "Other"])];

        let graph = RenderGraph::build(&mut device, &passes, &textures, &[]);

        assert_eq!(graph.passes().len(), 1);
        assert_eq!(graph.passes()[0].name, "Fine");
        assert!(graph.metadata("Broken").is_none());
        assert_eq!(device.num_framebuffers(), 1);
        assert_eq!(device.num_renderpasses(), 1);
    }

    #[test]
    fn mismatch_names_both_attachments() {
        let mut device = HeadlessDevice::default();
        let targets = create_dynamic_textures(
            &mut device,
            &[absolute("Small", 256.0, 256.0), absolute("Large", 512.0, 512.0)],
        );

        let error = build_renderpass(&mut device, &writing("Broken", &["Small", "Large"]), &targets, &[], None)
            .unwrap_err();

        match error {
            RenderError::AttachmentSizeMismatch { first, second, .. } => {
                assert_eq!((first.as_str(), second.as_str()), ("Small", "Large"));
            }
            other => panic!("expected a size mismatch, got {other:?}"),
        }
    }

    #[test]
    fn backbuffer_must_be_the_only_output() {
        let mut device = HeadlessDevice::default();
        let targets = create_dynamic_textures(&mut device, &[absolute("Color", 1280.0, 720.0)]);

        let error = build_renderpass(
            &mut device,
            &writing("Final", &[BACKBUFFER_NAME, "Color"]),
            &targets,
            &[],
            None,
        )
        .unwrap_err();

        assert!(matches!(error, RenderError::BackbufferNotExclusive { others: 1, .. }));
        assert_eq!(device.num_renderpasses(), 0);
    }

    #[test]
    fn only_one_pass_may_write_the_backbuffer() {
        let mut device = HeadlessDevice::default();
        let passes = [writing("First", &[BACKBUFFER_NAME]), writing("Second", &[BACKBUFFER_NAME])];

        let graph = RenderGraph::build(&mut device, &passes, &[], &[]);

        assert_eq!(graph.passes().len(), 1);
        assert_eq!(graph.passes()[0].name, "First");
    }

    #[test]
    fn backbuffer_pass_has_no_framebuffer() {
        let mut device = HeadlessDevice::default();
        let pipeline = PipelineCreateInfo {
            name: "Blit".to_string(),
            pass: "Final".to_string(),
            ..PipelineCreateInfo::default()
        };

        let built = build_renderpass(
            &mut device,
            &writing("Final", &[BACKBUFFER_NAME]),
            &HashMap::new(),
            &[pipeline],
            None,
        )
        .unwrap();

        assert!(built.writes_to_backbuffer);
        assert!(built.framebuffer.is_none());
        assert_eq!(built.framebuffer_size, device.swapchain_size());
        assert_eq!(built.pipeline_names, vec!["Blit"]);
    }

    #[test]
    fn depth_is_the_last_attachment() {
        let mut device = HeadlessDevice::default();
        let mut textures = vec![absolute("Color", 64.0, 64.0), absolute("Depth", 64.0, 64.0)];
        textures[1].format.pixel_format = PixelFormat::Depth;
        let targets = create_dynamic_textures(&mut device, &textures);
        let mut info = writing("Gbuffer", &["Color"]);
        info.depth_texture = Some(TextureAttachmentInfo::new("Depth", PixelFormat::Depth, true));

        let built = build_renderpass(&mut device, &info, &targets, &[], None).unwrap();

        let framebuffer = device.framebuffer(built.framebuffer.unwrap()).unwrap();
        assert_eq!(
            framebuffer.attachments,
            vec![targets["Color"].image, targets["Depth"].image]
        );
        assert_eq!(built.framebuffer_size, UVec2::new(64, 64));
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let mut device = HeadlessDevice::default();
        let error = build_renderpass(&mut device, &writing("Pass", &["Nowhere"]), &HashMap::new(), &[], None)
            .unwrap_err();
        assert!(matches!(error, RenderError::UnknownRenderTarget { .. }));
    }

    #[test]
    fn destroy_releases_everything() {
        let mut device = HeadlessDevice::default();
        let textures = [absolute("Color", 64.0, 64.0)];
        let mut graph = RenderGraph::build(&mut device, &[writing("Pass", &["Color"])], &textures, &[]);

        graph.destroy(&mut device);

        assert!(graph.passes().is_empty());
        assert_eq!(device.num_images(), 0);
        assert_eq!(device.num_renderpasses(), 0);
        assert_eq!(device.num_framebuffers(), 0);
    }
}
