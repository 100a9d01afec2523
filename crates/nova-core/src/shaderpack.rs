//! Declarative shaderpack data model.
//!
//! These types mirror the JSON files a shaderpack ships with (`resources.json`,
//! `passes.json`, `*.pipeline`, `*.mat`). Keys are camelCase; enum values are
//! written by name.

use std::collections::HashMap;
use std::path::PathBuf;

use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::constants::BACKBUFFER_NAME;

/// Fixed-function state toggles a pipeline can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateFlag {
    /// Enable alpha blending with the pipeline's blend factors
    Blending,
    /// Cull front faces instead of back faces
    InvertCulling,
    /// Disable face culling
    DisableCulling,
    /// Do not write to the depth buffer
    DisableDepthWrite,
    /// Do not test against the depth buffer
    DisableDepthTest,
    /// Enable the stencil test
    EnableStencilTest,
    /// Write to the stencil buffer
    StencilWrite,
    /// Disable writes to the color attachments
    DisableColorWrite,
    /// Enable alpha to coverage
    EnableAlphaToCoverage,
    /// Do not write the alpha channel
    DisableAlphaWrite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFilter {
    #[serde(rename = "TexelAA")]
    TexelAa,
    Bilinear,
    #[default]
    Point,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapMode {
    #[default]
    Repeat,
    Clamp,
}

/// Semantic of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexField {
    /// Vertex position, three floats
    Position,
    /// Vertex color, four normalized bytes
    Color,
    /// Main texture coordinate, two floats
    #[serde(rename = "UV0")]
    Uv0,
    /// Lightmap coordinate, two bytes
    #[serde(rename = "UV1")]
    Uv1,
    /// Normal, three floats
    Normal,
    /// Tangent, three floats
    Tangent,
    /// Texture coordinate of the middle of the face, two floats
    MidTexCoord,
    /// Virtual texture ID, one uint
    VirtualTextureId,
    /// Entity ID, block ID and block metadata, three floats
    McEntityId,
}

impl VertexField {
    /// Size of one attribute of this kind in the vertex stream.
    pub const fn size_in_bytes(self) -> u32 {
        match self {
            Self::Position | Self::Normal | Self::Tangent | Self::McEntityId => 12,
            Self::Color | Self::VirtualTextureId => 4,
            Self::Uv0 | Self::MidTexCoord => 8,
            Self::Uv1 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureLocation {
    #[default]
    Dynamic,
    InUserPackage,
    InAppPackage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsaaSupport {
    #[serde(rename = "MSAA")]
    Msaa,
    Both,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    Incr,
    IncrWrap,
    Decr,
    DecrWrap,
    Invert,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    #[default]
    Triangles,
    Lines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendFactor {
    One,
    Zero,
    SrcColor,
    DstColor,
    OneMinusSrcColor,
    OneMinusDstColor,
    SrcAlpha,
    DstAlpha,
    OneMinusSrcAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderQueue {
    Transparent,
    #[default]
    Opaque,
    Cutout,
}

/// Pixel format of a render target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Four 8-bit unorm channels
    #[default]
    #[serde(rename = "RGBA8")]
    Rgba8,
    /// Four 16-bit float channels
    #[serde(rename = "RGBA16F")]
    Rgba16F,
    /// Four 32-bit float channels
    #[serde(rename = "RGBA32F")]
    Rgba32F,
    /// One 32-bit unsigned integer channel
    U32,
    /// 32-bit float depth
    Depth,
    /// 24-bit depth with 8-bit stencil
    DepthStencil,
}

impl PixelFormat {
    /// Number of bits one pixel of this format occupies.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8 | Self::U32 | Self::Depth | Self::DepthStencil => 32,
            Self::Rgba16F => 64,
            Self::Rgba32F => 128,
        }
    }

    /// Whether this format holds depth data.
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth | Self::DepthStencil)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureDimensionType {
    #[default]
    ScreenRelative,
    Absolute,
}

/// Format and size of a dynamic texture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureFormat {
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub dimension_type: TextureDimensionType,
    /// Width in pixels, or a fraction of the screen width when screen-relative
    pub width: f32,
    /// Height in pixels, or a fraction of the screen height when screen-relative
    pub height: f32,
}

impl TextureFormat {
    /// Resolve the texture's size against the current screen size.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn size_in_pixels(&self, screen_size: UVec2) -> UVec2 {
        let (mut width, mut height) = (self.width, self.height);
        if self.dimension_type == TextureDimensionType::ScreenRelative {
            width *= screen_size.x as f32;
            height *= screen_size.y as f32;
        }

        UVec2::new(width.round() as u32, height.round() as u32)
    }
}

/// A texture the shaderpack asks the renderer to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureCreateInfo {
    pub name: String,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplerCreateInfo {
    pub name: String,
    #[serde(default)]
    pub filter: TextureFilter,
    #[serde(default)]
    pub wrap_mode: WrapMode,
}

/// Contents of `resources.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderpackResourcesData {
    pub textures: Vec<TextureCreateInfo>,
    pub samplers: Vec<SamplerCreateInfo>,
}

/// A texture a pass writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureAttachmentInfo {
    pub name: String,
    /// Filled in from the resource declarations when the shaderpack is loaded
    #[serde(default)]
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub clear: bool,
}

impl TextureAttachmentInfo {
    pub fn new(name: impl Into<String>, pixel_format: PixelFormat, clear: bool) -> Self {
        Self {
            name: name.into(),
            pixel_format,
            clear,
        }
    }
}

/// One render pass of the render graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderPassCreateInfo {
    pub name: String,
    /// Passes that must execute before this one
    pub dependencies: Vec<String>,
    pub texture_inputs: Vec<String>,
    pub texture_outputs: Vec<TextureAttachmentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_texture: Option<TextureAttachmentInfo>,
    pub input_buffers: Vec<String>,
    pub output_buffers: Vec<String>,
    /// Pipelines that render in this pass, recorded when the graph is built
    #[serde(skip)]
    pub pipeline_names: Vec<String>,
}

impl RenderPassCreateInfo {
    /// Whether any color output of this pass is the swapchain backbuffer.
    pub fn writes_to_backbuffer(&self) -> bool {
        self.texture_outputs
            .iter()
            .any(|output| output.name == BACKBUFFER_NAME)
    }
}

/// Contents of `passes.json`.
///
/// The file is either a bare array of passes, or an object with the passes
/// and the names of the builtin passes to append after them. When no builtin
/// list is given, every registered builtin pass is appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RendergraphFile")]
pub struct RendergraphData {
    pub passes: Vec<RenderPassCreateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builtin_passes: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RendergraphFile {
    Passes(Vec<RenderPassCreateInfo>),
    Graph {
        passes: Vec<RenderPassCreateInfo>,
        #[serde(default, rename = "builtinPasses")]
        builtin_passes: Option<Vec<String>>,
    },
}

impl From<RendergraphFile> for RendergraphData {
    fn from(file: RendergraphFile) -> Self {
        match file {
            RendergraphFile::Passes(passes) => Self {
                passes,
                builtin_passes: None,
            },
            RendergraphFile::Graph {
                passes,
                builtin_passes,
            } => Self {
                passes,
                builtin_passes,
            },
        }
    }
}

/// A shader stage: the file it came from and its SPIR-V words.
///
/// Serialized as the bare filename; the words are filled in by the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PathBuf", into = "PathBuf")]
pub struct ShaderSource {
    pub filename: PathBuf,
    pub source: Vec<u32>,
}

impl ShaderSource {
    /// Whether the pipeline file named this stage at all.
    pub fn is_specified(&self) -> bool {
        !self.filename.as_os_str().is_empty()
    }
}

impl From<PathBuf> for ShaderSource {
    fn from(filename: PathBuf) -> Self {
        Self {
            filename,
            source: Vec::new(),
        }
    }
}

impl From<ShaderSource> for PathBuf {
    fn from(shader: ShaderSource) -> Self {
        shader.filename
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StencilOpState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare_op: CompareOp,
    pub compare_mask: u32,
    pub write_mask: u32,
}

impl Default for StencilOpState {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
            compare_mask: 0xFF,
            write_mask: 0xFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexFieldData {
    #[serde(rename = "name")]
    pub semantic_name: String,
    pub field: VertexField,
}

/// A graphics pipeline as declared in a `.pipeline` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineCreateInfo {
    pub name: String,
    /// Pipeline to inherit unspecified fields from
    #[serde(rename = "parent", skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Render pass this pipeline draws in
    pub pass: String,
    pub defines: Vec<String>,
    pub states: Vec<StateFlag>,
    /// Vertex attributes; a field's binding index is its position in this list
    pub vertex_fields: Vec<VertexFieldData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_face: Option<StencilOpState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_face: Option<StencilOpState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    pub depth_bias: f32,
    pub slope_scaled_depth_bias: f32,
    pub stencil_ref: u32,
    pub stencil_read_mask: u32,
    pub stencil_write_mask: u32,
    pub msaa_support: MsaaSupport,
    pub primitive_mode: PrimitiveTopology,
    pub source_blend_factor: BlendFactor,
    pub destination_blend_factor: BlendFactor,
    pub alpha_src: BlendFactor,
    pub alpha_dst: BlendFactor,
    pub depth_func: CompareOp,
    pub render_queue: RenderQueue,
    pub vertex_shader: ShaderSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry_shader: Option<ShaderSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tessellation_control_shader: Option<ShaderSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tessellation_evaluation_shader: Option<ShaderSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment_shader: Option<ShaderSource>,
}

impl Default for PipelineCreateInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            parent_name: None,
            pass: String::new(),
            defines: Vec::new(),
            states: Vec::new(),
            vertex_fields: Vec::new(),
            front_face: None,
            back_face: None,
            fallback: None,
            depth_bias: 0.0,
            slope_scaled_depth_bias: 0.0,
            stencil_ref: 0,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            msaa_support: MsaaSupport::None,
            primitive_mode: PrimitiveTopology::Triangles,
            source_blend_factor: BlendFactor::One,
            destination_blend_factor: BlendFactor::Zero,
            alpha_src: BlendFactor::One,
            alpha_dst: BlendFactor::Zero,
            depth_func: CompareOp::Less,
            render_queue: RenderQueue::Opaque,
            vertex_shader: ShaderSource::default(),
            geometry_shader: None,
            tessellation_control_shader: None,
            tessellation_evaluation_shader: None,
            fragment_shader: None,
        }
    }
}

impl PipelineCreateInfo {
    pub fn has_state(&self, state: StateFlag) -> bool {
        self.states.contains(&state)
    }

    /// Merge this pipeline on top of its parent.
    ///
    /// Scalar fields keep the child's value unless it is still the default.
    /// `defines` and `states` are the union of both, parent entries first.
    /// Shader stages the child does not name are inherited.
    #[allow(clippy::float_cmp)]
    #[must_use]
    pub fn merge_with_parent(&self, parent: &Self) -> Self {
        let defaults = Self::default();
        let mut merged = parent.clone();

        merged.name.clone_from(&self.name);
        merged.parent_name.clone_from(&self.parent_name);

        if !self.pass.is_empty() {
            merged.pass.clone_from(&self.pass);
        }

        for define in &self.defines {
            if !merged.defines.contains(define) {
                merged.defines.push(define.clone());
            }
        }
        for state in &self.states {
            if !merged.states.contains(state) {
                merged.states.push(*state);
            }
        }

        if !self.vertex_fields.is_empty() {
            merged.vertex_fields.clone_from(&self.vertex_fields);
        }

        if self.front_face.is_some() {
            merged.front_face = self.front_face;
        }
        if self.back_face.is_some() {
            merged.back_face = self.back_face;
        }
        if self.fallback.is_some() {
            merged.fallback.clone_from(&self.fallback);
        }

        macro_rules! override_if_set {
            ($($field:ident),+ $(,)?) => {
                $(
                    if self.$field != defaults.$field {
                        merged.$field = self.$field;
                    }
                )+
            };
        }
        override_if_set!(
            depth_bias,
            slope_scaled_depth_bias,
            stencil_ref,
            stencil_read_mask,
            stencil_write_mask,
            msaa_support,
            primitive_mode,
            source_blend_factor,
            destination_blend_factor,
            alpha_src,
            alpha_dst,
            depth_func,
            render_queue,
        );

        if self.vertex_shader.is_specified() {
            merged.vertex_shader = self.vertex_shader.clone();
        }
        if self.geometry_shader.is_some() {
            merged.geometry_shader.clone_from(&self.geometry_shader);
        }
        if self.tessellation_control_shader.is_some() {
            merged
                .tessellation_control_shader
                .clone_from(&self.tessellation_control_shader);
        }
        if self.tessellation_evaluation_shader.is_some() {
            merged
                .tessellation_evaluation_shader
                .clone_from(&self.tessellation_evaluation_shader);
        }
        if self.fragment_shader.is_some() {
            merged.fragment_shader.clone_from(&self.fragment_shader);
        }

        merged
    }
}

/// One pass of a material: which pipeline it uses and what it binds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialPass {
    pub name: String,
    /// Set by the loader from the material's name
    #[serde(default)]
    pub material_name: String,
    pub pipeline: String,
    /// Descriptor name in the shader to resource name
    #[serde(default)]
    pub bindings: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialData {
    #[serde(default)]
    pub name: String,
    pub passes: Vec<MaterialPass>,
    #[serde(rename = "filter", default)]
    pub geometry_filter: String,
}

/// Everything a shaderpack declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderpackData {
    pub pipelines: Vec<PipelineCreateInfo>,
    pub graph_data: RendergraphData,
    pub materials: Vec<MaterialData>,
    pub resources: ShaderpackResourcesData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn screen_relative_size_scales_with_screen() {
        let format = TextureFormat {
            pixel_format: PixelFormat::Rgba8,
            dimension_type: TextureDimensionType::ScreenRelative,
            width: 0.5,
            height: 1.0,
        };
        assert_eq!(
            format.size_in_pixels(UVec2::new(1920, 1080)),
            UVec2::new(960, 1080)
        );
    }

    #[test]
    fn absolute_size_ignores_screen() {
        let format = TextureFormat {
            pixel_format: PixelFormat::Depth,
            dimension_type: TextureDimensionType::Absolute,
            width: 512.0,
            height: 256.0,
        };
        assert_eq!(
            format.size_in_pixels(UVec2::new(1920, 1080)),
            UVec2::new(512, 256)
        );
    }

    #[test]
    fn vertex_field_sizes() {
        assert_eq!(VertexField::Position.size_in_bytes(), 12);
        assert_eq!(VertexField::Color.size_in_bytes(), 4);
        assert_eq!(VertexField::Uv0.size_in_bytes(), 8);
        assert_eq!(VertexField::Uv1.size_in_bytes(), 2);
        assert_eq!(VertexField::McEntityId.size_in_bytes(), 12);
    }

    #[test]
    fn child_depth_bias_overrides_parent_and_keeps_parent_shaders() {
        let parent = PipelineCreateInfo {
            name: "gbuffers_terrain".into(),
            pass: "Forward".into(),
            vertex_shader: ShaderSource {
                filename: "shaders/terrain".into(),
                source: vec![0x0723_0203, 1, 2],
            },
            fragment_shader: Some(ShaderSource {
                filename: "shaders/terrain".into(),
                source: vec![0x0723_0203, 3, 4],
            }),
            depth_bias: 1.0,
            ..Default::default()
        };
        let child = PipelineCreateInfo {
            name: "gbuffers_shadow".into(),
            parent_name: Some("gbuffers_terrain".into()),
            depth_bias: 4.0,
            ..Default::default()
        };

        let merged = child.merge_with_parent(&parent);

        assert_eq!(merged.name, "gbuffers_shadow");
        assert_eq!(merged.pass, "Forward");
        assert_relative_eq!(merged.depth_bias, 4.0);
        assert_eq!(merged.vertex_shader, parent.vertex_shader);
        assert_eq!(merged.fragment_shader, parent.fragment_shader);
    }

    #[test]
    fn merge_unions_defines_and_states() {
        let parent = PipelineCreateInfo {
            defines: vec!["SHADOWS".into(), "FOG".into()],
            states: vec![StateFlag::DisableCulling],
            ..Default::default()
        };
        let child = PipelineCreateInfo {
            defines: vec!["FOG".into(), "WATER".into()],
            states: vec![StateFlag::Blending, StateFlag::DisableCulling],
            ..Default::default()
        };

        let merged = child.merge_with_parent(&parent);

        assert_eq!(merged.defines, vec!["SHADOWS", "FOG", "WATER"]);
        assert_eq!(
            merged.states,
            vec![StateFlag::DisableCulling, StateFlag::Blending]
        );
    }

    #[test]
    fn parses_pipeline_json() {
        let json = r#"{
            "name": "gbuffers_water",
            "parent": "gbuffers_terrain",
            "pass": "Forward",
            "states": ["Blending", "DisableDepthWrite"],
            "vertexFields": [
                { "name": "position", "field": "Position" },
                { "name": "uv", "field": "UV0" }
            ],
            "depthBias": 2.5,
            "sourceBlendFactor": "SrcAlpha",
            "destinationBlendFactor": "OneMinusSrcAlpha",
            "vertexShader": "shaders/water",
            "fragmentShader": "shaders/water"
        }"#;

        let pipeline: PipelineCreateInfo = serde_json::from_str(json).unwrap();

        assert_eq!(pipeline.parent_name.as_deref(), Some("gbuffers_terrain"));
        assert!(pipeline.has_state(StateFlag::Blending));
        assert_eq!(pipeline.vertex_fields[1].field, VertexField::Uv0);
        assert_eq!(pipeline.source_blend_factor, BlendFactor::SrcAlpha);
        assert_eq!(pipeline.vertex_shader.filename, PathBuf::from("shaders/water"));
        assert!(pipeline.vertex_shader.source.is_empty());
        assert!(pipeline.geometry_shader.is_none());
        assert_eq!(pipeline.depth_func, CompareOp::Less);
    }

    #[test]
    fn passes_file_accepts_bare_array() {
        let json = r#"[
            { "name": "Gbuffer", "textureOutputs": [{ "name": "Albedo", "clear": true }] },
            { "name": "Final", "dependencies": ["Gbuffer"], "textureInputs": ["Albedo"],
              "textureOutputs": [{ "name": "Backbuffer" }] }
        ]"#;

        let graph: RendergraphData = serde_json::from_str(json).unwrap();

        assert_eq!(graph.passes.len(), 2);
        assert!(graph.builtin_passes.is_none());
        assert!(graph.passes[0].texture_outputs[0].clear);
        assert!(graph.passes[1].writes_to_backbuffer());
        assert!(!graph.passes[0].writes_to_backbuffer());
    }

    #[test]
    fn passes_file_accepts_object_with_builtins() {
        let json = r#"{
            "passes": [{ "name": "Forward", "depthTexture": { "name": "Depth", "pixelFormat": "Depth" } }],
            "builtinPasses": ["NovaUI"]
        }"#;

        let graph: RendergraphData = serde_json::from_str(json).unwrap();

        assert_eq!(graph.builtin_passes, Some(vec!["NovaUI".to_string()]));
        let depth = graph.passes[0].depth_texture.as_ref().unwrap();
        assert_eq!(depth.pixel_format, PixelFormat::Depth);
    }

    #[test]
    fn pixel_widths() {
        assert_eq!(PixelFormat::Rgba8.bits_per_pixel(), 32);
        assert_eq!(PixelFormat::Rgba16F.bits_per_pixel(), 64);
        assert_eq!(PixelFormat::Rgba32F.bits_per_pixel(), 128);
        assert!(PixelFormat::DepthStencil.is_depth());
        assert!(!PixelFormat::U32.is_depth());
    }
}
