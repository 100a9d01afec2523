//! Turns a shaderpack folder into [`ShaderpackData`].
//!
//! A shaderpack holds:
//! - `resources.json`, the dynamic textures and samplers it needs
//! - `passes.json`, the render graph
//! - `materials/*.pipeline`, one pipeline per file
//! - `materials/*.mat`, one material per file, named after the file
//! - precompiled SPIR-V shaders referenced by the pipelines

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nova_core::constants::BACKBUFFER_NAME;
use nova_core::shaderpack::{
    MaterialData, PipelineCreateInfo, RendergraphData, ShaderpackData, ShaderpackResourcesData,
};
use serde::de::DeserializeOwned;

use crate::accessor::{open_folder, FolderAccessor};
use crate::error::{Result, ShaderpackError};

const MATERIALS_FOLDER: &str = "materials";

/// Shader stages a pipeline file can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShaderStageFile {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
}

impl ShaderStageFile {
    /// Suffixes tried, in order, after the filename the pipeline gives.
    const fn suffixes(self) -> &'static [&'static str] {
        match self {
            Self::Vertex => &[".vert.spirv", ".vsh.spirv", ".vertex.spirv"],
            Self::TessellationControl => &[".tesc.spirv", ".tsc.spirv", ".tess_control.spirv"],
            Self::TessellationEvaluation => &[".tese.spirv", ".tse.spirv", ".tess_eval.spirv"],
            Self::Geometry => &[".geom.spirv", ".geo.spirv", ".geometry.spirv"],
            Self::Fragment => &[".frag.spirv", ".fsh.spirv", ".fragment.spirv"],
        }
    }
}

/// Load the shaderpack at `path`, a directory or a zip archive. When `path`
/// does not exist, `<path>.zip` is tried.
pub fn load_shaderpack_data(path: &Path) -> Result<ShaderpackData> {
    tracing::info!("Loading shaderpack {}", path.display());
    let accessor = open_folder(path)?;
    load_shaderpack_from(accessor.as_ref())
}

/// Load a shaderpack through an already opened accessor.
///
/// A pipeline or material that fails to load is logged and left out; the
/// rest of the shaderpack still loads. A missing or malformed `passes.json`
/// fails the whole load.
pub fn load_shaderpack_from(accessor: &dyn FolderAccessor) -> Result<ShaderpackData> {
    let resources = load_resources_file(accessor)?;
    let graph_data: RendergraphData = parse_json(accessor, Path::new("passes.json"))?;
    let pipelines = load_pipeline_files(accessor);
    let materials = load_material_files(accessor);

    let mut data = ShaderpackData {
        pipelines,
        graph_data,
        materials,
        resources,
    };
    fill_in_render_target_formats(&mut data);

    tracing::debug!(
        "Shaderpack has {} passes, {} pipelines and {} materials",
        data.graph_data.passes.len(),
        data.pipelines.len(),
        data.materials.len()
    );
    Ok(data)
}

/// Copy each render target's pixel format from its texture declaration into
/// every pass that writes it.
pub fn fill_in_render_target_formats(data: &mut ShaderpackData) {
    let textures = &data.resources.textures;

    for pass in &mut data.graph_data.passes {
        for output in &mut pass.texture_outputs {
            if output.name == BACKBUFFER_NAME {
                continue;
            }

            match textures.iter().find(|texture| texture.name == output.name) {
                Some(texture) => output.pixel_format = texture.format.pixel_format,
                None => tracing::error!(
                    "Render pass {} is trying to use texture {}, but it's not in the dynamic texture list",
                    pass.name,
                    output.name
                ),
            }
        }

        if let Some(depth) = &mut pass.depth_texture {
            match textures.iter().find(|texture| texture.name == depth.name) {
                Some(texture) => depth.pixel_format = texture.format.pixel_format,
                None => tracing::error!(
                    "Render pass {} uses depth texture {}, which is not declared",
                    pass.name,
                    depth.name
                ),
            }
        }
    }
}

fn parse_json<T: DeserializeOwned>(accessor: &dyn FolderAccessor, file: &Path) -> Result<T> {
    let text = accessor.read_text_file(file)?;
    serde_json::from_str(&text).map_err(|source| ShaderpackError::Json {
        file: file.to_path_buf(),
        source,
    })
}

fn load_resources_file(accessor: &dyn FolderAccessor) -> Result<ShaderpackResourcesData> {
    let file = Path::new("resources.json");
    if !accessor.does_resource_exist(file) {
        tracing::warn!("Shaderpack has no resources.json, so it declares no dynamic resources");
        return Ok(ShaderpackResourcesData::default());
    }
    parse_json(accessor, file)
}

fn files_with_extension(accessor: &dyn FolderAccessor, extension: &str) -> Vec<PathBuf> {
    match accessor.get_all_items_in_folder(Path::new(MATERIALS_FOLDER)) {
        Ok(items) => items
            .into_iter()
            .filter(|item| item.extension().is_some_and(|ext| ext == extension))
            .collect(),
        Err(error) => {
            tracing::warn!("Could not list the materials folder: {error}");
            Vec::new()
        }
    }
}

fn load_pipeline_files(accessor: &dyn FolderAccessor) -> Vec<PipelineCreateInfo> {
    files_with_extension(accessor, "pipeline")
        .iter()
        .filter_map(|path| match load_single_pipeline(accessor, path) {
            Ok(pipeline) => Some(pipeline),
            Err(error) => {
                tracing::error!("Could not load pipeline {}: {error}", path.display());
                None
            }
        })
        .collect()
}

fn load_single_pipeline(accessor: &dyn FolderAccessor, path: &Path) -> Result<PipelineCreateInfo> {
    tracing::trace!("Loading pipeline {}", path.display());
    let mut pipeline: PipelineCreateInfo = parse_json(accessor, path)?;
    let name = pipeline.name.clone();

    // A child pipeline may leave the vertex shader to its parent
    if pipeline.vertex_shader.is_specified() {
        pipeline.vertex_shader.source = load_shader_file(
            accessor,
            &name,
            &pipeline.vertex_shader.filename,
            ShaderStageFile::Vertex,
        )?;
    }

    let optional_stages = [
        (ShaderStageFile::Geometry, &mut pipeline.geometry_shader),
        (
            ShaderStageFile::TessellationControl,
            &mut pipeline.tessellation_control_shader,
        ),
        (
            ShaderStageFile::TessellationEvaluation,
            &mut pipeline.tessellation_evaluation_shader,
        ),
        (ShaderStageFile::Fragment, &mut pipeline.fragment_shader),
    ];
    for (stage, shader) in optional_stages {
        if let Some(shader) = shader {
            shader.source = load_shader_file(accessor, &name, &shader.filename, stage)?;
        }
    }

    Ok(pipeline)
}

fn load_shader_file(
    accessor: &dyn FolderAccessor,
    pipeline: &str,
    filename: &Path,
    stage: ShaderStageFile,
) -> Result<Vec<u32>> {
    for suffix in stage.suffixes() {
        let mut candidate = OsString::from(filename.as_os_str());
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        if accessor.does_resource_exist(&candidate) {
            tracing::trace!("Loading {stage:?} shader {}", candidate.display());
            return accessor.read_spirv_file(&candidate);
        }
    }

    if filename.extension().is_some_and(|ext| ext == "spirv") && accessor.does_resource_exist(filename)
    {
        return accessor.read_spirv_file(filename);
    }

    Err(ShaderpackError::ShaderNotFound {
        pipeline: pipeline.to_string(),
        filename: filename.to_path_buf(),
    })
}

fn load_material_files(accessor: &dyn FolderAccessor) -> Vec<MaterialData> {
    files_with_extension(accessor, "mat")
        .iter()
        .filter_map(|path| match load_single_material(accessor, path) {
            Ok(material) => Some(material),
            Err(error) => {
                tracing::error!("Could not load material {}: {error}", path.display());
                None
            }
        })
        .collect()
}

fn load_single_material(accessor: &dyn FolderAccessor, path: &Path) -> Result<MaterialData> {
    let mut material: MaterialData = parse_json(accessor, path)?;
    material.name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    for pass in &mut material.passes {
        pass.material_name.clone_from(&material.name);
    }

    Ok(material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_core::shaderpack::PixelFormat;
    use pretty_assertions::assert_eq;

    const HEADER_WORDS: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

    fn spirv_header() -> Vec<u8> {
        HEADER_WORDS.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    fn write(root: &Path, name: &str, contents: &[u8]) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn write_pack(root: &Path) {
        write(
            root,
            "resources.json",
            br#"{
                "textures": [
                    { "name": "Albedo", "format": { "pixelFormat": "RGBA16F", "width": 1.0, "height": 1.0 } },
                    { "name": "Depth", "format": { "pixelFormat": "Depth", "width": 1.0, "height": 1.0 } }
                ],
                "samplers": [ { "name": "Point", "filter": "Point" } ]
            }"#,
        );
        write(
            root,
            "passes.json",
            br#"[
                {
                    "name": "Gbuffer",
                    "textureOutputs": [ { "name": "Albedo", "clear": true }, { "name": "Missing" } ],
                    "depthTexture": { "name": "Depth", "clear": true }
                },
                {
                    "name": "Final",
                    "dependencies": ["Gbuffer"],
                    "textureInputs": ["Albedo"],
                    "textureOutputs": [ { "name": "Backbuffer" } ]
                }
            ]"#,
        );
        write(
            root,
            "materials/gbuffer.pipeline",
            br#"{
                "name": "gbuffer",
                "pass": "Gbuffer",
                "vertexShader": "shaders/gbuffer",
                "fragmentShader": "shaders/gbuffer"
            }"#,
        );
        write(
            root,
            "materials/gbuffer_biased.pipeline",
            br#"{ "name": "gbuffer_biased", "parent": "gbuffer", "depthBias": 2.0 }"#,
        );
        write(
            root,
            "materials/broken.pipeline",
            br#"{ "name": "broken", "pass": "Gbuffer", "vertexShader": "shaders/nope" }"#,
        );
        write(
            root,
            "materials/stone.mat",
            br#"{
                "passes": [ { "name": "main", "pipeline": "gbuffer", "bindings": { "albedo_tex": "Albedo" } } ],
                "filter": "geometry_type::block"
            }"#,
        );
        write(root, "shaders/gbuffer.vert.spirv", &spirv_header());
        write(root, "shaders/gbuffer.fsh.spirv", &spirv_header());
    }

    #[test]
    fn loads_a_shaderpack_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path());

        let data = load_shaderpack_data(dir.path()).unwrap();

        let names: Vec<_> = data.pipelines.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["gbuffer", "gbuffer_biased"]);
        assert_eq!(data.pipelines[0].vertex_shader.source, HEADER_WORDS.to_vec());
        assert_eq!(
            data.pipelines[0].fragment_shader.as_ref().unwrap().source,
            HEADER_WORDS.to_vec()
        );
        assert!(data.pipelines[1].vertex_shader.source.is_empty());

        assert_eq!(data.materials.len(), 1);
        assert_eq!(data.materials[0].name, "stone");
        assert_eq!(data.materials[0].passes[0].material_name, "stone");
        assert_eq!(data.materials[0].geometry_filter, "geometry_type::block");
        assert_eq!(data.resources.samplers[0].name, "Point");
    }

    #[test]
    fn render_target_formats_come_from_resources() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path());

        let data = load_shaderpack_data(dir.path()).unwrap();
        let gbuffer = &data.graph_data.passes[0];

        assert_eq!(gbuffer.texture_outputs[0].pixel_format, PixelFormat::Rgba16F);
        assert_eq!(gbuffer.texture_outputs[1].pixel_format, PixelFormat::default());
        assert_eq!(
            gbuffer.depth_texture.as_ref().unwrap().pixel_format,
            PixelFormat::Depth
        );
        assert_eq!(
            data.graph_data.passes[1].texture_outputs[0].pixel_format,
            PixelFormat::default()
        );
    }

    #[test]
    fn zip_sibling_is_used_when_the_folder_is_missing() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let dir = tempfile::tempdir().unwrap();
        let archive = std::fs::File::create(dir.path().join("Pack.zip")).unwrap();
        let mut writer = zip::ZipWriter::new(archive);
        writer
            .start_file("passes.json", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(br#"{ "passes": [ { "name": "Only" } ], "builtinPasses": [] }"#)
            .unwrap();
        writer.finish().unwrap();

        let data = load_shaderpack_data(&dir.path().join("Pack")).unwrap();

        assert_eq!(data.graph_data.passes[0].name, "Only");
        assert_eq!(data.graph_data.builtin_passes, Some(Vec::new()));
        assert!(data.pipelines.is_empty());
    }

    #[test]
    fn malformed_passes_file_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "passes.json", b"{ not json");

        let error = load_shaderpack_data(dir.path()).unwrap_err();
        assert!(matches!(error, ShaderpackError::Json { ref file, .. } if file == Path::new("passes.json")));
    }

    #[test]
    fn bare_spirv_filenames_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "post.spirv", &spirv_header());
        let accessor = crate::regular::RegularFolderAccessor::new(dir.path());

        let words = load_shader_file(
            &accessor,
            "post",
            Path::new("post.spirv"),
            ShaderStageFile::Fragment,
        )
        .unwrap();
        assert_eq!(words, HEADER_WORDS.to_vec());

        assert!(matches!(
            load_shader_file(&accessor, "post", Path::new("post"), ShaderStageFile::Vertex),
            Err(ShaderpackError::ShaderNotFound { .. })
        ));
    }
}
