//! The renderer: owns the device, the loaded shaderpack and every mesh, and
//! runs frames.

use std::collections::HashMap;
use std::path::Path;

use glam::Mat4;
use nova_core::constants::{POINT_SAMPLER_NAME, UI_RENDER_PASS_NAME};
use nova_core::shaderpack::{
    RenderPassCreateInfo, SamplerCreateInfo, ShaderpackData, TextureFilter, WrapMode,
};
use nova_core::NovaSettings;
use nova_rhi::{
    BlockAllocationStrategy, CommandList, CommandListLevel, DescriptorPoolHandle, DescriptorType,
    DeviceMemoryResource, FenceHandle, IndexType, MemoryUsage, ObjectType, QueueType,
    RenderDevice, ResourceBindingDescription, SamplerHandle, VertexLayout,
};
use slotmap::SlotMap;

use crate::builtin::{BuiltinRegistry, BuiltinRenderpass, NullUiRenderpass};
use crate::error::{RenderError, Result};
use crate::frame::{FrameArena, FrameContext, FrameState};
use crate::material::{
    create_material_pass, create_samplers, BindingSources, FullMaterialPassName, MaterialPass, RenderableId,
    StaticMeshRenderCommand,
};
use crate::mesh::{
    create_mesh, destroy_mesh, MeshData, MeshEntry, MeshId, ProceduralMesh, ProceduralMeshAccessor,
};
use crate::pipeline_storage::{resolve_inheritance, PipelineStorage};
use crate::reflection::ShaderReflector;
use crate::render_graph::{build_renderpass, order_passes, RenderGraph, Renderpass};
use crate::uniforms::{BuiltinBuffers, PerFrameUniforms};

const MESH_MEMORY_ALIGNMENT: u64 = 64;

/// Descriptor sets per material are capped by this many samplers.
const DESCRIPTOR_POOL_SAMPLERS: u32 = 5;

/// A static mesh drawn with a material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticMeshRenderableData {
    pub mesh: MeshId,
    pub initial_transform: Mat4,
    pub is_visible: bool,
}

struct LoadedShaderpack {
    graph: RenderGraph,
    materials: Vec<MaterialPass>,
    material_index: HashMap<FullMaterialPassName, usize>,
    /// Pipeline name to indices into `materials`
    materials_by_pipeline: HashMap<String, Vec<usize>>,
    descriptor_pool: Option<DescriptorPoolHandle>,
    samplers: HashMap<String, SamplerHandle>,
    /// Builtin passes the shaderpack asked for; every registered one if `None`
    builtin_passes: Option<Vec<String>>,
}

/// The Nova renderer.
///
/// Created with an owned [`RenderDevice`]. Call [`NovaRenderer::shutdown`]
/// before dropping it so device objects are released while the device is
/// still alive.
pub struct NovaRenderer<D: RenderDevice> {
    device: D,
    settings: NovaSettings,
    pipeline_storage: PipelineStorage,
    shaderpack: Option<LoadedShaderpack>,
    builtins: BuiltinRegistry<D::CommandList>,
    /// Device renderpasses of the builtin passes a frame records
    builtin_renderpasses: HashMap<String, Renderpass>,

    meshes: SlotMap<MeshId, MeshEntry>,
    mesh_memory: DeviceMemoryResource,
    staging_memory: DeviceMemoryResource,
    builtin_buffers: Option<BuiltinBuffers>,
    point_sampler: SamplerHandle,

    /// One fence per in-flight frame index
    frame_fences: Vec<FenceHandle>,
    frame_arenas: Vec<FrameArena>,
    frame_count: u64,
    frame_state: FrameState,
    camera: (Mat4, Mat4),

    renderables: HashMap<RenderableId, FullMaterialPassName>,
    next_renderable_id: u64,
    is_shut_down: bool,
}

impl<D: RenderDevice> NovaRenderer<D> {
    /// Create the renderer's global memory pools, builtin buffers and frame
    /// fences, and register the default UI pass.
    pub fn new(mut device: D, settings: NovaSettings) -> Result<Self> {
        let in_flight = if settings.max_in_flight_frames == 0 {
            tracing::warn!("max_in_flight_frames is 0, using 1");
            1
        } else {
            settings.max_in_flight_frames
        };

        let mesh_memory_size = settings.memory.mesh_memory_size;
        let mesh_memory =
            device.allocate_device_memory(mesh_memory_size, MemoryUsage::DeviceOnly, ObjectType::BUFFER)?;
        let mesh_memory = DeviceMemoryResource::new(
            mesh_memory,
            BlockAllocationStrategy::new(mesh_memory_size, MESH_MEMORY_ALIGNMENT),
        );

        let staging_memory_size = settings.memory.staging_memory_size;
        let staging_memory = device.allocate_device_memory(
            staging_memory_size,
            MemoryUsage::StagingBuffer,
            ObjectType::BUFFER,
        )?;
        let staging_memory = DeviceMemoryResource::new(
            staging_memory,
            BlockAllocationStrategy::new(staging_memory_size, MESH_MEMORY_ALIGNMENT),
        );

        let builtin_buffers = BuiltinBuffers::new(&mut device, settings.memory.max_model_matrices)?;

        let point_sampler = device.create_sampler(&SamplerCreateInfo {
            name: POINT_SAMPLER_NAME.to_string(),
            filter: TextureFilter::Point,
            wrap_mode: WrapMode::Clamp,
        })?;

        let frame_fences = device.create_fences(in_flight, true)?;
        let frame_arenas = (0..in_flight).map(FrameArena::new).collect();

        let builtins = BuiltinRegistry::new();
        builtins.register(UI_RENDER_PASS_NAME, Box::new(NullUiRenderpass));

        tracing::info!(
            "Initialized Nova on {} with {in_flight} frames in flight",
            device.info().device_name
        );

        let mut renderer = Self {
            device,
            settings,
            pipeline_storage: PipelineStorage::new(),
            shaderpack: None,
            builtins,
            builtin_renderpasses: HashMap::new(),
            meshes: SlotMap::with_key(),
            mesh_memory,
            staging_memory,
            builtin_buffers: Some(builtin_buffers),
            point_sampler,
            frame_fences,
            frame_arenas,
            frame_count: 0,
            frame_state: FrameState::Idle,
            camera: (Mat4::IDENTITY, Mat4::IDENTITY),
            renderables: HashMap::new(),
            next_renderable_id: 0,
            is_shut_down: false,
        };
        renderer.build_builtin_renderpasses();

        Ok(renderer)
    }

    /// Use `reflector` instead of SPIR-V reflection for pipelines created
    /// from now on.
    #[must_use]
    pub fn with_reflector(mut self, reflector: Box<dyn ShaderReflector>) -> Self {
        self.pipeline_storage.set_reflector(reflector);
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn settings(&self) -> &NovaSettings {
        &self.settings
    }

    /// Frames executed since the renderer was created.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame_state
    }

    pub fn frame_arenas(&self) -> &[FrameArena] {
        &self.frame_arenas
    }

    pub fn pipeline_storage(&self) -> &PipelineStorage {
        &self.pipeline_storage
    }

    /// Names of the passes a frame records, in order: shaderpack passes, then
    /// builtin passes.
    pub fn renderpass_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self
            .shaderpack
            .iter()
            .flat_map(|pack| pack.graph.passes())
            .map(|pass| pass.name.clone())
            .collect();
        order.extend(self.builtin_order());
        order
    }

    fn builtin_order(&self) -> Vec<String> {
        match self.shaderpack.as_ref().and_then(|pack| pack.builtin_passes.as_ref()) {
            Some(names) => names.clone(),
            None => self.builtins.names(),
        }
    }

    /// Load the shaderpack at `path`, or its `.zip` sibling.
    pub fn load_shaderpack(&mut self, path: &Path) -> Result<()> {
        tracing::info!("Loading shaderpack {}", path.display());
        let data = nova_shaderpack::load_shaderpack_data(path)?;
        self.load_shaderpack_data(data)
    }

    /// Replace the loaded shaderpack with `data`.
    ///
    /// A pass graph that cannot be ordered is rejected before anything is
    /// torn down, so the previous shaderpack stays loaded. Otherwise the
    /// previous shaderpack and every renderable are destroyed, then passes,
    /// pipelines and materials are built; one that fails is logged and
    /// skipped.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn load_shaderpack_data(&mut self, data: ShaderpackData) -> Result<()> {
        if self.is_shut_down {
            return Err(RenderError::ShutDown);
        }

        let ordered = order_passes(&data.graph_data.passes)?;

        self.device.wait_idle()?;
        self.destroy_shaderpack();

        let pipelines: Vec<_> = data
            .pipelines
            .iter()
            .filter_map(|pipeline| match resolve_inheritance(pipeline, &data.pipelines) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    tracing::error!("Skipping pipeline {}: {e}", pipeline.name);
                    None
                }
            })
            .collect();

        let graph = RenderGraph::build(&mut self.device, &ordered, &data.resources.textures, &pipelines);

        for pipeline in &pipelines {
            let Some(pass) = graph.metadata(&pipeline.pass) else {
                let e = RenderError::UnknownPass {
                    pipeline: pipeline.name.clone(),
                    pass: pipeline.pass.clone(),
                };
                tracing::error!("Skipping pipeline: {e}");
                continue;
            };
            if let Err(e) = self.pipeline_storage.create_pipeline(&mut self.device, pipeline, pass) {
                tracing::error!("{e}");
            }
        }

        let samplers = create_samplers(&mut self.device, &data.resources.samplers);
        let (materials, descriptor_pool) = self.create_materials(&data, &graph, &samplers)?;

        let mut material_index = HashMap::with_capacity(materials.len());
        let mut materials_by_pipeline: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, material) in materials.iter().enumerate() {
            material_index.insert(material.name.clone(), index);
            materials_by_pipeline
                .entry(material.pipeline_name.clone())
                .or_default()
                .push(index);
        }

        let builtin_passes = data.graph_data.builtin_passes.map(|names| {
            names
                .into_iter()
                .filter(|name| {
                    let known = self.builtins.get(name).is_some();
                    if !known {
                        tracing::error!("Shaderpack asks for unknown builtin renderpass {name}");
                    }
                    known
                })
                .collect()
        });

        tracing::info!(
            "Loaded shaderpack with {} passes, {} pipelines and {} material passes",
            graph.passes().len(),
            self.pipeline_storage.len(),
            materials.len()
        );

        self.shaderpack = Some(LoadedShaderpack {
            graph,
            materials,
            material_index,
            materials_by_pipeline,
            descriptor_pool,
            samplers,
            builtin_passes,
        });
        self.build_builtin_renderpasses();

        Ok(())
    }

    /// Create renderpasses for every builtin pass in the frame order that
    /// does not have one yet. A pass whose declaration the device rejects is
    /// logged and left out of frames.
    fn build_builtin_renderpasses(&mut self) {
        for name in self.builtin_order() {
            if self.builtin_renderpasses.contains_key(&name) {
                continue;
            }
            let Some(pass) = self.builtins.get(&name) else {
                continue;
            };
            let info = pass.lock().create_info();

            match build_builtin_renderpass(&mut self.device, self.shaderpack.as_ref(), &name, &info) {
                Ok(built) => {
                    self.builtin_renderpasses.insert(name, built);
                }
                Err(e) => tracing::error!("Skipping builtin renderpass {name}: {e}"),
            }
        }
    }

    fn destroy_builtin_renderpasses(&mut self) {
        for (_, pass) in self.builtin_renderpasses.drain() {
            pass.destroy(&mut self.device);
        }
    }

    fn create_materials(
        &mut self,
        data: &ShaderpackData,
        graph: &RenderGraph,
        samplers: &HashMap<String, SamplerHandle>,
    ) -> Result<(Vec<MaterialPass>, Option<DescriptorPoolHandle>)> {
        let Some(builtin_buffers) = self.builtin_buffers.as_ref() else {
            return Err(RenderError::ShutDown);
        };

        let material_passes: Vec<_> = data
            .materials
            .iter()
            .flat_map(|material| &material.passes)
            .filter_map(|pass| match self.pipeline_storage.get_pipeline(&pass.pipeline) {
                Some(pipeline) => Some((pass, pipeline)),
                None => {
                    tracing::error!(
                        "Skipping material pass {}.{}: pipeline {} was not created",
                        pass.material_name,
                        pass.name,
                        pass.pipeline
                    );
                    None
                }
            })
            .collect();
        if material_passes.is_empty() {
            return Ok((Vec::new(), None));
        }

        let (sampled_images, buffers) =
            descriptor_counts(material_passes.iter().map(|(_, pipeline)| &pipeline.bindings));
        let pool = match self
            .device
            .create_descriptor_pool(sampled_images, DESCRIPTOR_POOL_SAMPLERS, buffers)
        {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!("Could not create the material descriptor pool, no materials will draw: {e}");
                return Ok((Vec::new(), None));
            }
        };

        let sources = BindingSources {
            graph,
            builtin_buffers,
            samplers,
            point_sampler: self.point_sampler,
        };

        let mut materials = Vec::with_capacity(material_passes.len());
        for (pass, pipeline) in material_passes {
            match create_material_pass(&mut self.device, pool, pass, pipeline, &sources) {
                Ok(material) => materials.push(material),
                Err(e) => tracing::error!(
                    "Skipping material pass {}.{}: {e}",
                    pass.material_name,
                    pass.name
                ),
            }
        }

        Ok((materials, Some(pool)))
    }

    fn destroy_shaderpack(&mut self) {
        if !self.renderables.is_empty() {
            tracing::debug!("Dropping {} renderables with the old shaderpack", self.renderables.len());
        }
        self.renderables.clear();
        self.pipeline_storage.destroy_all(&mut self.device);
        self.destroy_builtin_renderpasses();

        if let Some(mut pack) = self.shaderpack.take() {
            if let Some(pool) = pack.descriptor_pool {
                self.device.destroy_descriptor_pool(pool);
            }
            for (_, sampler) in pack.samplers.drain() {
                self.device.destroy_sampler(sampler);
            }
            pack.graph.destroy(&mut self.device);
        }
    }

    /// The declaration of a shaderpack or builtin pass.
    pub fn get_renderpass_metadata(&self, name: &str) -> Option<RenderPassCreateInfo> {
        self.shaderpack
            .as_ref()
            .and_then(|pack| pack.graph.metadata(name))
            .cloned()
            .or_else(|| self.builtins.get(name).map(|pass| pass.lock().create_info()))
    }

    /// Draw `data.mesh` with a material pass.
    ///
    /// Returns [`RenderableId::INVALID`] and changes nothing when the material
    /// pass or the mesh does not exist.
    pub fn add_renderable_for_material(
        &mut self,
        material: &FullMaterialPassName,
        data: StaticMeshRenderableData,
    ) -> RenderableId {
        let Some(pack) = self.shaderpack.as_mut() else {
            tracing::error!(
                "Cannot add a renderable for {}.{}: no shaderpack is loaded",
                material.material_name,
                material.pass_name
            );
            return RenderableId::INVALID;
        };
        let Some(&index) = pack.material_index.get(material) else {
            tracing::error!(
                "Material pass {}.{} does not exist",
                material.material_name,
                material.pass_name
            );
            return RenderableId::INVALID;
        };
        if !self.meshes.contains_key(data.mesh) {
            tracing::error!("Cannot add a renderable for a mesh that does not exist");
            return RenderableId::INVALID;
        }

        let id = RenderableId(self.next_renderable_id);
        self.next_renderable_id += 1;

        pack.materials[index].add_draw(
            data.mesh,
            StaticMeshRenderCommand {
                id,
                transform: data.initial_transform,
                is_visible: data.is_visible,
            },
        );
        self.renderables.insert(id, material.clone());

        id
    }

    fn render_command_mut(&mut self, id: RenderableId) -> Option<&mut StaticMeshRenderCommand> {
        let material = self.renderables.get(&id)?;
        let pack = self.shaderpack.as_mut()?;
        let index = *pack.material_index.get(material)?;
        pack.materials[index].command_mut(id)
    }

    pub fn update_renderable_transform(&mut self, id: RenderableId, transform: Mat4) -> bool {
        match self.render_command_mut(id) {
            Some(command) => {
                command.transform = transform;
                true
            }
            None => false,
        }
    }

    pub fn set_renderable_visibility(&mut self, id: RenderableId, is_visible: bool) -> bool {
        match self.render_command_mut(id) {
            Some(command) => {
                command.is_visible = is_visible;
                true
            }
            None => false,
        }
    }

    pub fn remove_renderable(&mut self, id: RenderableId) -> bool {
        let Some(material) = self.renderables.remove(&id) else {
            return false;
        };
        self.shaderpack
            .as_mut()
            .and_then(|pack| {
                let index = *pack.material_index.get(&material)?;
                Some(pack.materials[index].remove_draw(id))
            })
            .unwrap_or(false)
    }

    pub fn num_renderables(&self) -> usize {
        self.renderables.len()
    }

    /// Upload a static mesh.
    pub fn create_mesh(&mut self, data: &MeshData) -> Result<MeshId> {
        let mesh = create_mesh(&mut self.device, &mut self.mesh_memory, &mut self.staging_memory, data)?;
        Ok(self.meshes.insert(MeshEntry::Static(mesh)))
    }

    /// Create a procedural mesh with room for `vertex_size` vertex bytes and
    /// `index_size` index bytes.
    pub fn create_procedural_mesh(&mut self, vertex_size: u64, index_size: u64) -> Result<MeshId> {
        let frames = self.num_in_flight_frames();
        let mesh = ProceduralMesh::new(&mut self.device, vertex_size, index_size, frames)?;
        Ok(self.meshes.insert(MeshEntry::Procedural(mesh)))
    }

    pub fn procedural_mesh_mut(&mut self, id: MeshId) -> Option<ProceduralMeshAccessor<'_, D>> {
        match self.meshes.get_mut(id)? {
            MeshEntry::Procedural(mesh) => Some(ProceduralMeshAccessor {
                device: &mut self.device,
                mesh,
            }),
            MeshEntry::Static(_) => {
                tracing::warn!("Mesh {id:?} is static and cannot be written to");
                None
            }
        }
    }

    /// Destroy a mesh and every renderable that draws it.
    pub fn destroy_mesh(&mut self, id: MeshId) -> Result<()> {
        let mesh = self
            .meshes
            .remove(id)
            .ok_or_else(|| RenderError::UnknownMesh(format!("{id:?}")))?;

        if let Some(pack) = self.shaderpack.as_mut() {
            for material in &mut pack.materials {
                for renderable in material.remove_mesh(id) {
                    self.renderables.remove(&renderable);
                }
            }
        }

        match mesh {
            MeshEntry::Static(mesh) => destroy_mesh(&mut self.device, &mut self.mesh_memory, mesh),
            MeshEntry::Procedural(mesh) => mesh.destroy(&mut self.device),
        }
        Ok(())
    }

    pub fn set_camera(&mut self, view: Mat4, projection: Mat4) {
        self.camera = (view, projection);
    }

    /// Register a builtin pass, replacing any pass of the same name, and
    /// build its renderpass.
    ///
    /// Shaderpacks without an explicit builtin list pick it up immediately.
    pub fn register_builtin_renderpass(
        &mut self,
        name: impl Into<String>,
        pass: Box<dyn BuiltinRenderpass<D::CommandList>>,
    ) {
        let name = name.into();
        self.builtins.register(name.clone(), pass);
        if self.is_shut_down {
            return;
        }

        if let Some(old) = self.builtin_renderpasses.remove(&name) {
            old.destroy(&mut self.device);
        }
        self.build_builtin_renderpasses();
    }

    fn num_in_flight_frames(&self) -> u32 {
        u32::try_from(self.frame_fences.len()).unwrap_or(u32::MAX)
    }

    /// Record, submit and present one frame.
    ///
    /// Fences are indexed by in-flight frame index, not by swapchain image;
    /// the frame's fence is reset after acquisition and waited on after
    /// submission, so no submission outlives its frame.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn execute_frame(&mut self) -> Result<()> {
        if self.is_shut_down {
            return Err(RenderError::ShutDown);
        }

        let result = self.run_frame();
        if result.is_err() {
            self.frame_state = FrameState::Idle;
        }
        result
    }

    fn run_frame(&mut self) -> Result<()> {
        self.frame_count += 1;
        let in_flight = u64::from(self.num_in_flight_frames());
        let frame_index = u32::try_from(self.frame_count % in_flight).unwrap_or(0);
        let fence = self.frame_fences[frame_index as usize];

        self.frame_state = FrameState::Acquiring;
        self.device.begin_frame(frame_index)?;
        let swapchain_image_index = self.device.acquire_next_swapchain_image()?;
        self.device.reset_fences(&[fence])?;

        self.frame_state = FrameState::Recording;
        let ctx = FrameContext {
            frame_count: self.frame_count,
            frame_index,
            swapchain_image_index,
        };

        let arena = &mut self.frame_arenas[frame_index as usize];
        arena.reset();

        let mut cmds = self
            .device
            .create_command_list(0, QueueType::Graphics, CommandListLevel::Primary)?;
        cmds.set_debug_name("Frame");

        for mesh in self.meshes.values() {
            if let MeshEntry::Procedural(mesh) = mesh {
                mesh.record_commands_to_upload_data(&mut cmds, frame_index);
            }
        }

        let max_model_matrices = self
            .builtin_buffers
            .as_ref()
            .map_or(0, |buffers| usize::try_from(buffers.max_model_matrices()).unwrap_or(usize::MAX));
        if let Some(pack) = &self.shaderpack {
            record_shaderpack_passes(
                &mut cmds,
                pack,
                &self.pipeline_storage,
                &self.meshes,
                arena,
                frame_index,
                max_model_matrices,
            );
        }

        let builtin_passes: Vec<&Renderpass> = self
            .builtin_order()
            .iter()
            .filter_map(|name| self.builtin_renderpasses.get(name))
            .collect();
        self.builtins.render(&builtin_passes, &mut cmds, &ctx);

        if let Some(buffers) = &self.builtin_buffers {
            let (view, projection) = self.camera;
            #[allow(clippy::cast_possible_truncation)]
            let uniforms = PerFrameUniforms::new(view, projection, self.frame_count as u32);
            buffers.write_per_frame(&mut self.device, &uniforms)?;
            buffers.write_model_matrices(&mut self.device, &self.frame_arenas[frame_index as usize].model_matrices)?;
        }

        self.device
            .submit_command_list(cmds, QueueType::Graphics, Some(fence), &[], &[])?;
        self.frame_state = FrameState::Submitted;

        self.device.wait_for_fences(&[fence])?;
        self.frame_state = FrameState::Presenting;

        self.device.present(swapchain_image_index)?;
        self.frame_state = FrameState::Idle;

        tracing::trace!("Frame {} done", self.frame_count);
        Ok(())
    }

    /// Wait for the device, then destroy everything the renderer created.
    ///
    /// Calling it again does nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.is_shut_down {
            return Ok(());
        }

        self.device.wait_idle()?;
        self.destroy_shaderpack();

        for (_, mesh) in self.meshes.drain() {
            match mesh {
                MeshEntry::Static(mesh) => destroy_mesh(&mut self.device, &mut self.mesh_memory, mesh),
                MeshEntry::Procedural(mesh) => mesh.destroy(&mut self.device),
            }
        }

        if let Some(buffers) = self.builtin_buffers.take() {
            buffers.destroy(&mut self.device);
        }
        self.device.destroy_sampler(self.point_sampler);
        self.device.destroy_fences(&self.frame_fences);
        self.frame_fences.clear();
        self.device.free_device_memory(self.mesh_memory.memory());
        self.device.free_device_memory(self.staging_memory.memory());

        self.is_shut_down = true;
        tracing::info!("Nova renderer shut down after {} frames", self.frame_count);
        Ok(())
    }
}

impl<D: RenderDevice> Drop for NovaRenderer<D> {
    fn drop(&mut self) {
        if !self.is_shut_down {
            tracing::warn!("NovaRenderer dropped without shutdown; device objects are left to the device");
        }
    }
}

/// Renderpass for a builtin pass. It may draw into the shaderpack's render
/// targets, and it may write the backbuffer after a shaderpack pass did.
fn build_builtin_renderpass<D: RenderDevice>(
    device: &mut D,
    shaderpack: Option<&LoadedShaderpack>,
    name: &str,
    info: &RenderPassCreateInfo,
) -> Result<Renderpass> {
    let no_targets = HashMap::new();
    let targets = shaderpack.map_or(&no_targets, |pack| pack.graph.render_targets());

    let mut built = build_renderpass(device, info, targets, &[], None)?;
    built.name = name.to_string();
    tracing::debug!("Built renderpass for builtin pass {name}");
    Ok(built)
}

/// Descriptors a pool needs for one set per material pass: sampled images,
/// then uniform and storage buffers. Arrays count every element; runtime-sized
/// arrays are allocated with one. Each count is at least one.
fn descriptor_counts<'a>(
    bindings: impl IntoIterator<Item = &'a HashMap<String, ResourceBindingDescription>>,
) -> (u32, u32) {
    let (mut sampled_images, mut buffers) = (0u32, 0u32);
    for binding in bindings.into_iter().flat_map(HashMap::values) {
        let count = if binding.is_unbounded { 1 } else { binding.count.max(1) };
        match binding.descriptor_type {
            DescriptorType::CombinedImageSampler => sampled_images = sampled_images.saturating_add(count),
            DescriptorType::UniformBuffer | DescriptorType::StorageBuffer => {
                buffers = buffers.saturating_add(count);
            }
        }
    }
    (sampled_images.max(1), buffers.max(1))
}

/// Record every shaderpack pass: for each pipeline of the pass, each material
/// using it, and each mesh batch of the material, one instanced draw of the
/// batch's visible renderables.
///
/// Model matrices are appended to the frame arena so each draw's instances
/// are contiguous starting at its first instance.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
fn record_shaderpack_passes<L: CommandList>(
    cmds: &mut L,
    pack: &LoadedShaderpack,
    pipelines: &PipelineStorage,
    meshes: &SlotMap<MeshId, MeshEntry>,
    arena: &mut FrameArena,
    frame_index: u32,
    max_model_matrices: usize,
) {
    let mut warned_full = false;

    for pass in pack.graph.passes() {
        cmds.begin_renderpass(pass.renderpass, pass.framebuffer);

        for pipeline_name in &pass.pipeline_names {
            let Some(pipeline) = pipelines.get_pipeline(pipeline_name) else {
                continue;
            };
            cmds.bind_pipeline(pipeline.pipeline);

            let num_vertex_bindings = VertexLayout::from_fields(&pipeline.data.vertex_fields)
                .num_bindings()
                .max(1);

            let materials = pack
                .materials_by_pipeline
                .get(pipeline_name)
                .map_or(&[][..], Vec::as_slice);
            for &index in materials {
                let material = &pack.materials[index];
                if material.static_mesh_draws.is_empty() {
                    continue;
                }
                if !material.descriptor_sets.is_empty() {
                    cmds.bind_descriptor_sets(&material.descriptor_sets, pipeline.pipeline_interface);
                }

                for batch in &material.static_mesh_draws {
                    let Some(mesh) = meshes.get(batch.mesh) else {
                        continue;
                    };
                    let (vertex_buffer, index_buffer, num_indices) = match mesh {
                        MeshEntry::Static(mesh) => (mesh.vertex_buffer, mesh.index_buffer, mesh.num_indices),
                        MeshEntry::Procedural(mesh) => {
                            let (vertex_buffer, index_buffer) = mesh.buffers_for_frame(frame_index);
                            (vertex_buffer, index_buffer, mesh.num_indices())
                        }
                    };

                    let first_instance = arena.model_matrices.len();
                    for command in batch.commands.iter().filter(|command| command.is_visible) {
                        if arena.model_matrices.len() >= max_model_matrices {
                            if !warned_full {
                                tracing::warn!("Out of model matrix slots, skipping the remaining renderables");
                                warned_full = true;
                            }
                            break;
                        }
                        arena.model_matrices.push(command.transform);
                    }
                    let num_instances = arena.model_matrices.len() - first_instance;
                    if num_instances == 0 || num_indices == 0 {
                        continue;
                    }

                    cmds.bind_vertex_buffers(&vec![vertex_buffer; num_vertex_bindings]);
                    cmds.bind_index_buffer(index_buffer, IndexType::U32);
                    #[allow(clippy::cast_possible_truncation)]
                    cmds.draw_indexed_mesh(num_indices, num_instances as u32, first_instance as u32);
                }
            }
        }

        cmds.end_renderpass();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    use nova_core::constants::{BACKBUFFER_NAME, PER_FRAME_DATA_NAME};
    use nova_core::shaderpack::{
        MaterialData, PipelineCreateInfo, PixelFormat, RendergraphData, ShaderSource,
        ShaderpackResourcesData, TextureAttachmentInfo, TextureCreateInfo, TextureDimensionType,
        TextureFormat,
    };
    use nova_core::shaderpack::MaterialPass as MaterialPassData;
    use nova_rhi::{
        DescriptorPoolSizes, DescriptorResource, DescriptorType, HeadlessCommandList, HeadlessDevice,
        RecordedCommand, ResourceBindingDescription, ShaderStage,
    };
    use pretty_assertions::assert_eq;

    use crate::mesh::FullVertex;

    /// Every stage reads the per-frame buffer at set 0, binding 0, and the
    /// fragment stage also samples a texture at binding 1.
    struct FixedReflector;

    impl ShaderReflector for FixedReflector {
        fn reflect(
            &self,
            stage: ShaderStage,
            _spirv: &[u32],
        ) -> Result<Vec<(String, ResourceBindingDescription)>> {
            let binding = |binding, descriptor_type| ResourceBindingDescription {
                set: 0,
                binding,
                count: 1,
                descriptor_type,
                stages: stage,
                is_unbounded: false,
            };
            let mut bindings = vec![("per_frame".to_string(), binding(0, DescriptorType::UniformBuffer))];
            if stage == ShaderStage::FRAGMENT {
                bindings.push(("albedo".to_string(), binding(1, DescriptorType::CombinedImageSampler)));
            }
            Ok(bindings)
        }
    }

    fn settings() -> NovaSettings {
        let mut settings = NovaSettings::new("test").with_in_flight_frames(3);
        settings.memory.mesh_memory_size = 1 << 20;
        settings.memory.staging_memory_size = 1 << 20;
        settings.memory.max_model_matrices = 16;
        settings
    }

    fn renderer() -> NovaRenderer<HeadlessDevice> {
        NovaRenderer::new(HeadlessDevice::default(), settings())
            .unwrap()
            .with_reflector(Box::new(FixedReflector))
    }

    fn shader(name: &str) -> ShaderSource {
        ShaderSource {
            filename: PathBuf::from(name),
            source: vec![0x0723_0203],
        }
    }

    fn target(name: &str, width: f32) -> TextureCreateInfo {
        TextureCreateInfo {
            name: name.to_string(),
            format: TextureFormat {
                pixel_format: PixelFormat::Rgba8,
                dimension_type: TextureDimensionType::Absolute,
                width,
                height: width,
            },
        }
    }

    fn pass(name: &str, dependencies: &[&str], outputs: &[&str]) -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            name: name.to_string(),
            dependencies: dependencies.iter().map(ToString::to_string).collect(),
            texture_outputs: outputs
                .iter()
                .map(|output| TextureAttachmentInfo::new(*output, PixelFormat::Rgba8, true))
                .collect(),
            ..RenderPassCreateInfo::default()
        }
    }

    /// `Gbuffer` renders `Stone` into `Color`; `Final` depends on it and
    /// writes the backbuffer.
    fn shaderpack() -> ShaderpackData {
        let gbuffer = PipelineCreateInfo {
            name: "GbufferOpaque".to_string(),
            pass: "Gbuffer".to_string(),
            vertex_shader: shader("gbuffer.vert"),
            fragment_shader: Some(shader("gbuffer.frag")),
            ..PipelineCreateInfo::default()
        };
        let final_pipeline = PipelineCreateInfo {
            name: "Blit".to_string(),
            pass: "Final".to_string(),
            vertex_shader: shader("blit.vert"),
            ..PipelineCreateInfo::default()
        };

        let stone = MaterialData {
            name: "Stone".to_string(),
            passes: vec![MaterialPassData {
                name: "main".to_string(),
                material_name: "Stone".to_string(),
                pipeline: "GbufferOpaque".to_string(),
                bindings: [
                    ("per_frame".to_string(), PER_FRAME_DATA_NAME.to_string()),
                    ("albedo".to_string(), "Color".to_string()),
                ]
                .into_iter()
                .collect(),
            }],
            geometry_filter: "geometry_type::block".to_string(),
        };

        ShaderpackData {
            pipelines: vec![gbuffer, final_pipeline],
            graph_data: RendergraphData {
                passes: vec![
                    pass("Final", &["Gbuffer"], &[BACKBUFFER_NAME]),
                    pass("Gbuffer", &[], &["Color"]),
                ],
                builtin_passes: None,
            },
            materials: vec![stone],
            resources: ShaderpackResourcesData {
                textures: vec![target("Color", 128.0)],
                samplers: Vec::new(),
            },
        }
    }

    fn cube() -> MeshData {
        MeshData {
            vertex_data: vec![FullVertex::default(); 8],
            indices: (0..36).map(|i| i % 8).collect(),
        }
    }

    fn stone() -> FullMaterialPassName {
        FullMaterialPassName::new("Stone", "main")
    }

    fn graphics_submissions(device: &HeadlessDevice) -> Vec<&nova_rhi::Submission> {
        device
            .submissions()
            .iter()
            .filter(|submission| submission.queue_type == QueueType::Graphics)
            .collect()
    }

    #[test]
    fn passes_run_in_dependency_order_then_builtins() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();

        assert_eq!(renderer.renderpass_order(), vec!["Gbuffer", "Final", UI_RENDER_PASS_NAME]);
        assert_eq!(
            renderer.get_renderpass_metadata("Gbuffer").unwrap().pipeline_names,
            vec!["GbufferOpaque"]
        );
        assert!(renderer.get_renderpass_metadata(UI_RENDER_PASS_NAME).is_some());
        assert!(renderer.get_renderpass_metadata("Missing").is_none());

        renderer.shutdown().unwrap();
    }

    #[test]
    fn cyclic_graph_keeps_the_previous_shaderpack() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();

        let mut cyclic = shaderpack();
        cyclic.graph_data.passes[1].dependencies = vec!["Final".to_string()];

        assert!(matches!(
            renderer.load_shaderpack_data(cyclic),
            Err(RenderError::DependencyCycle(_))
        ));
        assert_eq!(renderer.renderpass_order(), vec!["Gbuffer", "Final", UI_RENDER_PASS_NAME]);

        renderer.shutdown().unwrap();
    }

    #[test]
    fn a_broken_pass_does_not_stop_its_siblings() {
        let mut renderer = renderer();
        let mut data = shaderpack();
        data.resources.textures.push(target("Tiny", 16.0));
        data.graph_data
            .passes
            .push(pass("Mismatched", &[], &["Color", "Tiny"]));

        renderer.load_shaderpack_data(data).unwrap();

        assert_eq!(renderer.renderpass_order(), vec!["Gbuffer", "Final", UI_RENDER_PASS_NAME]);
        assert!(renderer.get_renderpass_metadata("Mismatched").is_none());

        renderer.shutdown().unwrap();
    }

    #[test]
    fn explicit_builtin_list_filters_unknown_names() {
        let mut renderer = renderer();
        let mut data = shaderpack();
        data.graph_data.builtin_passes = Some(vec!["Imaginary".to_string()]);

        renderer.load_shaderpack_data(data).unwrap();

        assert_eq!(renderer.renderpass_order(), vec!["Gbuffer", "Final"]);
        renderer.shutdown().unwrap();
    }

    #[test]
    fn material_bindings_point_at_targets_and_builtins() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();

        let pack = renderer.shaderpack.as_ref().unwrap();
        let material = &pack.materials[pack.material_index[&stone()]];
        let color = pack.graph.render_target("Color").unwrap().image;
        let per_frame = renderer.builtin_buffers.as_ref().unwrap().per_frame;

        let writes = renderer
            .device()
            .descriptor_writes(material.descriptor_sets[0])
            .unwrap();
        assert_eq!(writes[&0], DescriptorResource::Buffer { buffer: per_frame });
        assert_eq!(
            writes[&1],
            DescriptorResource::Image {
                image: color,
                sampler: renderer.point_sampler,
            }
        );
        assert_eq!(
            renderer
                .pipeline_storage()
                .get_pipeline("GbufferOpaque")
                .unwrap()
                .bindings["per_frame"]
                .stages,
            ShaderStage::VERTEX | ShaderStage::FRAGMENT
        );

        renderer.shutdown().unwrap();
    }

    #[test]
    fn unknown_material_returns_the_sentinel_and_changes_nothing() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();
        let mesh = renderer.create_mesh(&cube()).unwrap();
        let data = StaticMeshRenderableData {
            mesh,
            initial_transform: Mat4::IDENTITY,
            is_visible: true,
        };

        let id = renderer.add_renderable_for_material(&FullMaterialPassName::new("Glass", "main"), data);

        assert_eq!(id, RenderableId::INVALID);
        assert_eq!(renderer.num_renderables(), 0);
        let pack = renderer.shaderpack.as_ref().unwrap();
        assert!(pack.materials.iter().all(|material| material.static_mesh_draws.is_empty()));

        renderer.shutdown().unwrap();
    }

    #[test]
    fn renderables_draw_instanced_per_mesh() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();
        let mesh = renderer.create_mesh(&cube()).unwrap();

        let mut ids = Vec::new();
        for x in 0..3 {
            #[allow(clippy::cast_precision_loss)]
            let transform = Mat4::from_translation(glam::Vec3::new(x as f32, 0.0, 0.0));
            ids.push(renderer.add_renderable_for_material(
                &stone(),
                StaticMeshRenderableData {
                    mesh,
                    initial_transform: transform,
                    is_visible: true,
                },
            ));
        }
        assert!(renderer.set_renderable_visibility(ids[1], false));
        assert!(renderer.update_renderable_transform(ids[2], Mat4::from_scale(glam::Vec3::splat(2.0))));

        renderer.execute_frame().unwrap();

        let submissions = graphics_submissions(renderer.device());
        let draws: Vec<_> = submissions[0]
            .commands
            .iter()
            .filter(|command| matches!(command, RecordedCommand::DrawIndexedMesh { .. }))
            .collect();
        assert_eq!(
            draws,
            vec![&RecordedCommand::DrawIndexedMesh {
                num_indices: 36,
                num_instances: 2,
                first_instance: 0,
            }]
        );

        let matrices = renderer
            .device()
            .buffer_contents(renderer.builtin_buffers.as_ref().unwrap().model_matrices)
            .unwrap();
        let expected = [Mat4::IDENTITY, Mat4::from_scale(glam::Vec3::splat(2.0))];
        assert_eq!(&matrices[..128], bytemuck::cast_slice::<Mat4, u8>(&expected));

        assert!(renderer.remove_renderable(ids[0]));
        assert!(!renderer.remove_renderable(ids[0]));
        assert_eq!(renderer.num_renderables(), 2);

        renderer.shutdown().unwrap();
    }

    #[test]
    fn destroying_a_mesh_drops_its_renderables() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();
        let mesh = renderer.create_mesh(&cube()).unwrap();
        let id = renderer.add_renderable_for_material(
            &stone(),
            StaticMeshRenderableData {
                mesh,
                initial_transform: Mat4::IDENTITY,
                is_visible: true,
            },
        );
        assert!(id.is_valid());

        renderer.destroy_mesh(mesh).unwrap();

        assert_eq!(renderer.num_renderables(), 0);
        assert!(matches!(renderer.destroy_mesh(mesh), Err(RenderError::UnknownMesh(_))));
        renderer.shutdown().unwrap();
    }

    #[test]
    fn frames_cycle_through_every_arena() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();

        for _ in 0..7 {
            renderer.execute_frame().unwrap();
        }

        assert_eq!(renderer.frame_count(), 7);
        assert_eq!(renderer.frame_state(), FrameState::Idle);
        let indices: HashSet<u32> = graphics_submissions(renderer.device())
            .iter()
            .map(|submission| submission.frame_index)
            .collect();
        assert_eq!(indices, HashSet::from([0, 1, 2]));
        assert!(renderer.frame_arenas().iter().all(|arena| arena.frames_recorded >= 2));
        assert_eq!(renderer.device().presented_images().len(), 7);

        renderer.shutdown().unwrap();
    }

    #[test]
    fn each_pass_is_bracketed_by_its_renderpass() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();

        renderer.execute_frame().unwrap();

        let submissions = graphics_submissions(renderer.device());
        let begins: Vec<_> = submissions[0]
            .commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::BeginRenderpass { framebuffer, .. } => Some(framebuffer.is_some()),
                _ => None,
            })
            .collect();
        assert_eq!(begins, vec![true, false, false]);
        let ends = submissions[0]
            .commands
            .iter()
            .filter(|command| matches!(command, RecordedCommand::EndRenderpass))
            .count();
        assert_eq!(ends, 3);

        renderer.shutdown().unwrap();
    }

    #[test]
    fn procedural_meshes_upload_every_frame() {
        let mut renderer = renderer();
        let mesh = renderer.create_procedural_mesh(64, 16).unwrap();
        {
            let mut accessor = renderer.procedural_mesh_mut(mesh).unwrap();
            accessor.set_vertex_data(&[3; 64]).unwrap();
            accessor.set_indices(&[0, 1, 2, 3]).unwrap();
            assert!(matches!(
                accessor.set_vertex_data(&[0; 65]),
                Err(RenderError::MeshDataTooLarge { size: 65, capacity: 64 })
            ));
        }

        renderer.execute_frame().unwrap();
        renderer.execute_frame().unwrap();

        for submission in graphics_submissions(renderer.device()) {
            let copies = submission
                .commands
                .iter()
                .filter(|command| matches!(command, RecordedCommand::CopyBuffer { .. }))
                .count();
            assert_eq!(copies, 2);
        }

        let static_mesh = renderer.create_mesh(&cube()).unwrap();
        assert!(renderer.procedural_mesh_mut(static_mesh).is_none());

        renderer.shutdown().unwrap();
    }

    struct CountingPass(std::sync::Arc<std::sync::atomic::AtomicU64>);

    impl BuiltinRenderpass<HeadlessCommandList> for CountingPass {
        fn create_info(&self) -> RenderPassCreateInfo {
            RenderPassCreateInfo {
                name: "Counter".to_string(),
                ..RenderPassCreateInfo::default()
            }
        }

        fn render(&mut self, _cmds: &mut HeadlessCommandList, ctx: &FrameContext) {
            self.0
                .store(ctx.frame_count, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn registered_builtins_render_after_the_graph() {
        let mut renderer = renderer();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        renderer.register_builtin_renderpass("Counter", Box::new(CountingPass(count.clone())));
        renderer.load_shaderpack_data(shaderpack()).unwrap();

        renderer.execute_frame().unwrap();
        renderer.execute_frame().unwrap();

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(
            renderer.renderpass_order(),
            vec!["Gbuffer", "Final", UI_RENDER_PASS_NAME, "Counter"]
        );
        renderer.shutdown().unwrap();
    }

    #[test]
    fn builtin_passes_record_inside_their_own_renderpass() {
        let mut renderer = renderer();
        assert_eq!(renderer.device().num_renderpasses(), 1);

        renderer.load_shaderpack_data(ShaderpackData::default()).unwrap();
        renderer.register_builtin_renderpass(UI_RENDER_PASS_NAME, Box::new(NullUiRenderpass));
        assert_eq!(renderer.device().num_renderpasses(), 1);

        renderer.execute_frame().unwrap();

        let submissions = graphics_submissions(renderer.device());
        let renderpasses: Vec<_> = submissions[0]
            .commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::BeginRenderpass {
                    renderpass,
                    framebuffer,
                } => Some((*renderpass, *framebuffer)),
                _ => None,
            })
            .collect();
        assert_eq!(renderpasses.len(), 1);
        let (ui, framebuffer) = renderpasses[0];
        assert!(framebuffer.is_none());
        assert_eq!(renderer.device().renderpass(ui).unwrap().name, UI_RENDER_PASS_NAME);
        assert_eq!(submissions[0].commands.last(), Some(&RecordedCommand::EndRenderpass));

        renderer.shutdown().unwrap();
        assert_eq!(renderer.device().num_renderpasses(), 0);
    }

    /// Like [`FixedReflector`], but the fragment stage samples an array of
    /// eight layers and reads a runtime-sized storage buffer.
    struct ArrayReflector;

    impl ShaderReflector for ArrayReflector {
        fn reflect(
            &self,
            stage: ShaderStage,
            _spirv: &[u32],
        ) -> Result<Vec<(String, ResourceBindingDescription)>> {
            let binding = |binding, count, descriptor_type| ResourceBindingDescription {
                set: 0,
                binding,
                count,
                descriptor_type,
                stages: stage,
                is_unbounded: false,
            };
            let mut bindings = vec![("per_frame".to_string(), binding(0, 1, DescriptorType::UniformBuffer))];
            if stage == ShaderStage::FRAGMENT {
                bindings.push(("layers".to_string(), binding(1, 8, DescriptorType::CombinedImageSampler)));
                bindings.push((
                    "lights".to_string(),
                    ResourceBindingDescription {
                        is_unbounded: true,
                        ..binding(2, 1, DescriptorType::StorageBuffer)
                    },
                ));
            }
            Ok(bindings)
        }
    }

    #[test]
    fn descriptor_pool_holds_every_array_element() {
        let mut renderer = NovaRenderer::new(HeadlessDevice::default(), settings())
            .unwrap()
            .with_reflector(Box::new(ArrayReflector));
        renderer.load_shaderpack_data(shaderpack()).unwrap();

        let pool = renderer.shaderpack.as_ref().unwrap().descriptor_pool.unwrap();
        assert_eq!(
            renderer.device().descriptor_pool_sizes(pool),
            Some(DescriptorPoolSizes {
                sampled_images: 8,
                samplers: DESCRIPTOR_POOL_SAMPLERS,
                uniform_buffers: 2,
            })
        );

        renderer.shutdown().unwrap();
    }

    #[test]
    fn render_targets_use_the_sampler_declared_for_them() {
        let mut renderer = renderer();
        let mut data = shaderpack();
        data.resources.samplers = vec![
            SamplerCreateInfo {
                name: "Color".to_string(),
                filter: TextureFilter::Bilinear,
                wrap_mode: WrapMode::Repeat,
            },
            SamplerCreateInfo {
                name: "Unused".to_string(),
                filter: TextureFilter::TexelAa,
                wrap_mode: WrapMode::Clamp,
            },
        ];
        renderer.load_shaderpack_data(data).unwrap();
        assert_eq!(renderer.device().num_samplers(), 3);

        let pack = renderer.shaderpack.as_ref().unwrap();
        let material = &pack.materials[pack.material_index[&stone()]];
        let writes = renderer
            .device()
            .descriptor_writes(material.descriptor_sets[0])
            .unwrap();
        let DescriptorResource::Image { sampler, .. } = writes[&1] else {
            panic!("albedo should be bound to an image, got {:?}", writes[&1]);
        };
        assert_ne!(sampler, renderer.point_sampler);
        assert_eq!(
            renderer.device().sampler_info(sampler).unwrap().filter,
            TextureFilter::Bilinear
        );

        renderer.load_shaderpack_data(shaderpack()).unwrap();
        assert_eq!(renderer.device().num_samplers(), 1);

        renderer.shutdown().unwrap();
    }

    #[test]
    fn shutdown_releases_everything_and_blocks_further_frames() {
        let mut renderer = renderer();
        renderer.load_shaderpack_data(shaderpack()).unwrap();
        renderer.create_mesh(&cube()).unwrap();
        renderer.create_procedural_mesh(64, 16).unwrap();

        renderer.shutdown().unwrap();
        renderer.shutdown().unwrap();

        let device = renderer.device();
        assert_eq!(device.num_buffers(), 0);
        assert_eq!(device.num_images(), 0);
        assert_eq!(device.num_pipelines(), 0);
        assert_eq!(device.num_renderpasses(), 0);
        assert_eq!(device.num_samplers(), 0);
        assert!(matches!(renderer.execute_frame(), Err(RenderError::ShutDown)));
    }
}
