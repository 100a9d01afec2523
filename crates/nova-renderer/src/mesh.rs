//! Static and procedural meshes.

use bytemuck::{Pod, Zeroable};
use nova_rhi::{
    BlockAllocationStrategy, BufferCreateInfo, BufferHandle, BufferUsage, CommandList,
    CommandListLevel, DeviceMemoryResource, MemoryUsage, ObjectType, PipelineStage, QueueType,
    RenderDevice, ResourceAccess, ResourceBarrier, ResourceState,
};

use crate::error::{RenderError, Result};

slotmap::new_key_type! {
    /// A mesh owned by the renderer.
    pub struct MeshId;
}

/// Procedural mesh buffers are sized to multiples of this.
const PROCEDURAL_BUFFER_ALIGNMENT: u64 = 256;

/// The vertex format of static meshes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct FullVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub main_uv: [f32; 2],
    pub secondary_uv: [f32; 2],
    pub virtual_texture_id: u32,
    pub additional_stuff: [f32; 4],
}

/// CPU-side geometry for a static mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertex_data: Vec<FullVertex>,
    pub indices: Vec<u32>,
}

/// A static mesh in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub num_indices: u32,
}

/// Upload `data` into new device-local buffers.
///
/// The bytes go through staging buffers and a transfer submission that is
/// waited on before returning, so the mesh is ready to draw immediately.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn create_mesh<D: RenderDevice>(
    device: &mut D,
    mesh_memory: &mut DeviceMemoryResource,
    staging_memory: &mut DeviceMemoryResource,
    data: &MeshData,
) -> Result<Mesh> {
    if data.vertex_data.is_empty() || data.indices.is_empty() {
        return Err(RenderError::EmptyMesh);
    }
    let num_indices = u32::try_from(data.indices.len()).map_err(|_| RenderError::MeshDataTooLarge {
        size: data.indices.len() as u64,
        capacity: u64::from(u32::MAX),
    })?;

    let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertex_data);
    let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);

    let vertex_buffer = device.create_buffer(
        &BufferCreateInfo {
            size: vertex_bytes.len() as u64,
            buffer_usage: BufferUsage::VertexBuffer,
        },
        mesh_memory,
    )?;
    let index_buffer = match device.create_buffer(
        &BufferCreateInfo {
            size: index_bytes.len() as u64,
            buffer_usage: BufferUsage::IndexBuffer,
        },
        mesh_memory,
    ) {
        Ok(buffer) => buffer,
        Err(e) => {
            device.destroy_buffer(vertex_buffer, mesh_memory);
            return Err(e.into());
        }
    };

    let mesh = Mesh {
        vertex_buffer,
        index_buffer,
        num_indices,
    };

    if let Err(e) = upload_through_staging(device, staging_memory, &mesh, vertex_bytes, index_bytes) {
        destroy_mesh(device, mesh_memory, mesh);
        return Err(e);
    }

    tracing::debug!(
        "Created mesh with {} vertices and {} indices",
        data.vertex_data.len(),
        num_indices
    );

    Ok(mesh)
}

fn upload_through_staging<D: RenderDevice>(
    device: &mut D,
    staging_memory: &mut DeviceMemoryResource,
    mesh: &Mesh,
    vertex_bytes: &[u8],
    index_bytes: &[u8],
) -> Result<()> {
    let staging_info = |size: usize| BufferCreateInfo {
        size: size as u64,
        buffer_usage: BufferUsage::StagingBuffer,
    };

    let vertex_staging = device.create_buffer(&staging_info(vertex_bytes.len()), staging_memory)?;
    let result = match device.create_buffer(&staging_info(index_bytes.len()), staging_memory) {
        Ok(index_staging) => {
            let result = copy_and_wait(device, mesh, (vertex_staging, vertex_bytes), (index_staging, index_bytes));
            device.destroy_buffer(index_staging, staging_memory);
            result
        }
        Err(e) => Err(e.into()),
    };
    device.destroy_buffer(vertex_staging, staging_memory);

    result
}

fn copy_and_wait<D: RenderDevice>(
    device: &mut D,
    mesh: &Mesh,
    (vertex_staging, vertex_bytes): (BufferHandle, &[u8]),
    (index_staging, index_bytes): (BufferHandle, &[u8]),
) -> Result<()> {
    device.write_data_to_buffer(vertex_bytes, 0, vertex_staging)?;
    device.write_data_to_buffer(index_bytes, 0, index_staging)?;

    let vertex_size = vertex_bytes.len() as u64;
    let index_size = index_bytes.len() as u64;

    let mut cmds = device.create_command_list(0, QueueType::Transfer, CommandListLevel::Primary)?;
    cmds.set_debug_name("Static mesh upload");
    cmds.copy_buffer(mesh.vertex_buffer, 0, vertex_staging, 0, vertex_size);
    cmds.copy_buffer(mesh.index_buffer, 0, index_staging, 0, index_size);
    cmds.resource_barriers(
        PipelineStage::TRANSFER,
        PipelineStage::VERTEX_INPUT,
        &[
            ResourceBarrier::buffer(
                mesh.vertex_buffer,
                0,
                vertex_size,
                (ResourceState::CopyDestination, ResourceAccess::COPY_WRITE),
                (ResourceState::VertexBuffer, ResourceAccess::VERTEX_ATTRIBUTE_READ),
                QueueType::Transfer,
            ),
            ResourceBarrier::buffer(
                mesh.index_buffer,
                0,
                index_size,
                (ResourceState::CopyDestination, ResourceAccess::COPY_WRITE),
                (ResourceState::IndexBuffer, ResourceAccess::INDEX_READ),
                QueueType::Transfer,
            ),
        ],
    );

    let fence = device.create_fence(false)?;
    let result = device
        .submit_command_list(cmds, QueueType::Transfer, Some(fence), &[], &[])
        .and_then(|()| device.wait_for_fences(&[fence]));
    device.destroy_fences(&[fence]);

    result.map_err(Into::into)
}

pub fn destroy_mesh<D: RenderDevice>(device: &mut D, mesh_memory: &mut DeviceMemoryResource, mesh: Mesh) {
    device.destroy_buffer(mesh.vertex_buffer, mesh_memory);
    device.destroy_buffer(mesh.index_buffer, mesh_memory);
}

/// A mesh whose geometry is rewritten from the CPU, potentially every frame.
///
/// Keeps one device buffer pair per in-flight frame plus a host-visible
/// staging pair. Writes land in the staging pair; the frame's command list
/// copies them into that frame's device pair before drawing.
pub struct ProceduralMesh {
    vertex_buffers: Vec<BufferHandle>,
    index_buffers: Vec<BufferHandle>,
    cached_vertex_buffer: BufferHandle,
    cached_index_buffer: BufferHandle,
    device_memory: DeviceMemoryResource,
    staging_memory: DeviceMemoryResource,
    vertex_buffer_size: u64,
    index_buffer_size: u64,
    num_vertex_bytes_to_upload: u64,
    num_index_bytes_to_upload: u64,
}

impl ProceduralMesh {
    /// Create the buffers for a mesh of at most `vertex_buffer_size` vertex
    /// bytes and `index_buffer_size` index bytes.
    pub fn new<D: RenderDevice>(
        device: &mut D,
        vertex_buffer_size: u64,
        index_buffer_size: u64,
        num_in_flight_frames: u32,
    ) -> Result<Self> {
        let aligned_vertex = vertex_buffer_size.next_multiple_of(PROCEDURAL_BUFFER_ALIGNMENT);
        let aligned_index = index_buffer_size.next_multiple_of(PROCEDURAL_BUFFER_ALIGNMENT);
        let frames = u64::from(num_in_flight_frames);

        let device_size = (aligned_vertex + aligned_index) * frames;
        let staging_size = aligned_vertex + aligned_index;

        let device_memory = device.allocate_device_memory(
            device_size,
            MemoryUsage::LowFrequencyUpload,
            ObjectType::BUFFER,
        )?;
        let staging = match device.allocate_device_memory(
            staging_size,
            MemoryUsage::StagingBuffer,
            ObjectType::BUFFER,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                device.free_device_memory(device_memory);
                return Err(e.into());
            }
        };

        let device_memory = DeviceMemoryResource::new(
            device_memory,
            BlockAllocationStrategy::new(device_size, PROCEDURAL_BUFFER_ALIGNMENT),
        );
        let mut staging_memory = DeviceMemoryResource::new(
            staging,
            BlockAllocationStrategy::new(staging_size, PROCEDURAL_BUFFER_ALIGNMENT),
        );

        let staging_info = |size| BufferCreateInfo {
            size,
            buffer_usage: BufferUsage::StagingBuffer,
        };
        let cached = device
            .create_buffer(&staging_info(vertex_buffer_size), &mut staging_memory)
            .and_then(|vertex| {
                match device.create_buffer(&staging_info(index_buffer_size), &mut staging_memory) {
                    Ok(index) => Ok((vertex, index)),
                    Err(e) => {
                        device.destroy_buffer(vertex, &mut staging_memory);
                        Err(e)
                    }
                }
            });
        let (cached_vertex_buffer, cached_index_buffer) = match cached {
            Ok(cached) => cached,
            Err(e) => {
                device.free_device_memory(device_memory.memory());
                device.free_device_memory(staging_memory.memory());
                return Err(e.into());
            }
        };

        let mut mesh = Self {
            vertex_buffers: Vec::with_capacity(num_in_flight_frames as usize),
            index_buffers: Vec::with_capacity(num_in_flight_frames as usize),
            cached_vertex_buffer,
            cached_index_buffer,
            device_memory,
            staging_memory,
            vertex_buffer_size,
            index_buffer_size,
            num_vertex_bytes_to_upload: 0,
            num_index_bytes_to_upload: 0,
        };

        if let Err(e) = mesh.create_frame_buffers(device, num_in_flight_frames) {
            mesh.destroy(device);
            return Err(e);
        }

        Ok(mesh)
    }

    fn create_frame_buffers<D: RenderDevice>(&mut self, device: &mut D, num_in_flight_frames: u32) -> Result<()> {
        for _ in 0..num_in_flight_frames {
            let vertex_buffer = device.create_buffer(
                &BufferCreateInfo {
                    size: self.vertex_buffer_size,
                    buffer_usage: BufferUsage::VertexBuffer,
                },
                &mut self.device_memory,
            )?;
            self.vertex_buffers.push(vertex_buffer);

            let index_buffer = device.create_buffer(
                &BufferCreateInfo {
                    size: self.index_buffer_size,
                    buffer_usage: BufferUsage::IndexBuffer,
                },
                &mut self.device_memory,
            )?;
            self.index_buffers.push(index_buffer);
        }
        Ok(())
    }

    /// Replace the vertex bytes uploaded from the next frame on.
    pub fn set_vertex_data<D: RenderDevice>(&mut self, device: &mut D, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        if size > self.vertex_buffer_size {
            return Err(RenderError::MeshDataTooLarge {
                size,
                capacity: self.vertex_buffer_size,
            });
        }

        device.write_data_to_buffer(data, 0, self.cached_vertex_buffer)?;
        self.num_vertex_bytes_to_upload = size;
        Ok(())
    }

    /// Replace the index bytes uploaded from the next frame on.
    pub fn set_index_data<D: RenderDevice>(&mut self, device: &mut D, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        if size > self.index_buffer_size {
            return Err(RenderError::MeshDataTooLarge {
                size,
                capacity: self.index_buffer_size,
            });
        }

        device.write_data_to_buffer(data, 0, self.cached_index_buffer)?;
        self.num_index_bytes_to_upload = size;
        Ok(())
    }

    /// Record the copy of the staged bytes into `frame_index`'s buffers.
    pub fn record_commands_to_upload_data<L: CommandList>(&self, cmds: &mut L, frame_index: u32) {
        let (vertex_buffer, index_buffer) = self.buffers_for_frame(frame_index);

        let mut before = Vec::with_capacity(2);
        let mut after = Vec::with_capacity(2);
        for (buffer, size, state, access) in [
            (
                vertex_buffer,
                self.num_vertex_bytes_to_upload,
                ResourceState::VertexBuffer,
                ResourceAccess::VERTEX_ATTRIBUTE_READ,
            ),
            (
                index_buffer,
                self.num_index_bytes_to_upload,
                ResourceState::IndexBuffer,
                ResourceAccess::INDEX_READ,
            ),
        ] {
            if size == 0 {
                continue;
            }
            before.push(ResourceBarrier::buffer(
                buffer,
                0,
                size,
                (state, access),
                (ResourceState::CopyDestination, ResourceAccess::COPY_WRITE),
                QueueType::Graphics,
            ));
            after.push(ResourceBarrier::buffer(
                buffer,
                0,
                size,
                (ResourceState::CopyDestination, ResourceAccess::COPY_WRITE),
                (state, access),
                QueueType::Graphics,
            ));
        }
        if before.is_empty() {
            return;
        }

        cmds.resource_barriers(PipelineStage::VERTEX_INPUT, PipelineStage::TRANSFER, &before);
        if self.num_vertex_bytes_to_upload > 0 {
            cmds.copy_buffer(vertex_buffer, 0, self.cached_vertex_buffer, 0, self.num_vertex_bytes_to_upload);
        }
        if self.num_index_bytes_to_upload > 0 {
            cmds.copy_buffer(index_buffer, 0, self.cached_index_buffer, 0, self.num_index_bytes_to_upload);
        }
        cmds.resource_barriers(PipelineStage::TRANSFER, PipelineStage::VERTEX_INPUT, &after);
    }

    /// The vertex and index buffer to draw from in frame `frame_index`.
    pub fn buffers_for_frame(&self, frame_index: u32) -> (BufferHandle, BufferHandle) {
        let index = frame_index as usize % self.vertex_buffers.len();
        (self.vertex_buffers[index], self.index_buffers[index])
    }

    pub fn num_indices(&self) -> u32 {
        u32::try_from(self.num_index_bytes_to_upload / 4).unwrap_or(u32::MAX)
    }

    pub fn destroy<D: RenderDevice>(mut self, device: &mut D) {
        for buffer in self.vertex_buffers.drain(..).chain(self.index_buffers.drain(..)) {
            device.destroy_buffer(buffer, &mut self.device_memory);
        }
        device.destroy_buffer(self.cached_vertex_buffer, &mut self.staging_memory);
        device.destroy_buffer(self.cached_index_buffer, &mut self.staging_memory);
        device.free_device_memory(self.device_memory.memory());
        device.free_device_memory(self.staging_memory.memory());
    }
}

/// Any mesh the renderer owns.
pub enum MeshEntry {
    Static(Mesh),
    Procedural(ProceduralMesh),
}

/// Write access to a procedural mesh's geometry.
pub struct ProceduralMeshAccessor<'a, D: RenderDevice> {
    pub(crate) device: &'a mut D,
    pub(crate) mesh: &'a mut ProceduralMesh,
}

impl<D: RenderDevice> ProceduralMeshAccessor<'_, D> {
    pub fn set_vertex_data(&mut self, data: &[u8]) -> Result<()> {
        self.mesh.set_vertex_data(self.device, data)
    }

    pub fn set_index_data(&mut self, data: &[u8]) -> Result<()> {
        self.mesh.set_index_data(self.device, data)
    }

    /// Write typed vertices.
    pub fn set_vertices<T: Pod>(&mut self, vertices: &[T]) -> Result<()> {
        self.set_vertex_data(bytemuck::cast_slice(vertices))
    }

    pub fn set_indices(&mut self, indices: &[u32]) -> Result<()> {
        self.set_index_data(bytemuck::cast_slice(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_rhi::{HeadlessDevice, RecordedCommand};

    fn memories(device: &mut HeadlessDevice) -> (DeviceMemoryResource, DeviceMemoryResource) {
        let mesh = device
            .allocate_device_memory(1 << 20, MemoryUsage::DeviceOnly, ObjectType::BUFFER)
            .unwrap();
        let staging = device
            .allocate_device_memory(1 << 20, MemoryUsage::StagingBuffer, ObjectType::BUFFER)
            .unwrap();
        (
            DeviceMemoryResource::new(mesh, BlockAllocationStrategy::new(1 << 20, 64)),
            DeviceMemoryResource::new(staging, BlockAllocationStrategy::new(1 << 20, 64)),
        )
    }

    fn triangle() -> MeshData {
        let vertex = |x: f32| FullVertex {
            position: [x, 1.0, 0.0],
            ..FullVertex::default()
        };
        MeshData {
            vertex_data: vec![vertex(0.0), vertex(1.0), vertex(2.0)],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn full_vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<FullVertex>(), 72);
    }

    #[test]
    fn static_mesh_bytes_reach_device_memory() {
        let mut device = HeadlessDevice::default();
        let (mut mesh_memory, mut staging_memory) = memories(&mut device);
        let data = triangle();

        let mesh = create_mesh(&mut device, &mut mesh_memory, &mut staging_memory, &data).unwrap();

        assert_eq!(mesh.num_indices, 3);
        assert_eq!(
            device.buffer_contents(mesh.vertex_buffer).unwrap(),
            bytemuck::cast_slice::<FullVertex, u8>(&data.vertex_data)
        );
        assert_eq!(
            device.buffer_contents(mesh.index_buffer).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&data.indices)
        );
        assert_eq!(staging_memory.free_bytes(), staging_memory.capacity());
        assert_eq!(device.submissions().len(), 1);
        assert_eq!(device.submissions()[0].queue_type, QueueType::Transfer);
    }

    #[test]
    fn empty_meshes_are_rejected() {
        let mut device = HeadlessDevice::default();
        let (mut mesh_memory, mut staging_memory) = memories(&mut device);

        let result = create_mesh(&mut device, &mut mesh_memory, &mut staging_memory, &MeshData::default());

        assert!(matches!(result, Err(RenderError::EmptyMesh)));
        assert_eq!(device.num_buffers(), 0);
    }

    #[test]
    fn procedural_data_must_fit() {
        let mut device = HeadlessDevice::default();
        let mut mesh = ProceduralMesh::new(&mut device, 16, 8, 3).unwrap();

        let error = mesh.set_vertex_data(&mut device, &[0; 17]).unwrap_err();
        assert!(matches!(error, RenderError::MeshDataTooLarge { size: 17, capacity: 16 }));

        mesh.set_vertex_data(&mut device, &[7; 16]).unwrap();
        mesh.set_index_data(&mut device, &[0; 8]).unwrap();
        assert_eq!(mesh.num_indices(), 2);
    }

    #[test]
    fn procedural_upload_targets_the_frame_buffers() {
        let mut device = HeadlessDevice::default();
        let mut mesh = ProceduralMesh::new(&mut device, 16, 8, 3).unwrap();
        mesh.set_vertex_data(&mut device, &[7; 16]).unwrap();
        mesh.set_index_data(&mut device, &[1; 8]).unwrap();

        let mut cmds = device
            .create_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
            .unwrap();
        mesh.record_commands_to_upload_data(&mut cmds, 4);
        let (vertex_buffer, index_buffer) = mesh.buffers_for_frame(4);
        let copies: Vec<_> = cmds
            .commands()
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::CopyBuffer { destination, num_bytes, .. } => Some((*destination, *num_bytes)),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec![(vertex_buffer, 16), (index_buffer, 8)]);
        assert_eq!(mesh.buffers_for_frame(1), (vertex_buffer, index_buffer));

        device
            .submit_command_list(cmds, QueueType::Graphics, None, &[], &[])
            .unwrap();
        assert_eq!(device.buffer_contents(vertex_buffer).unwrap(), vec![7; 16]);

        mesh.destroy(&mut device);
        assert_eq!(device.num_buffers(), 0);
    }

    #[test]
    fn nothing_staged_records_nothing() {
        let mut device = HeadlessDevice::default();
        let mesh = ProceduralMesh::new(&mut device, 16, 8, 2).unwrap();
        let mut cmds = device
            .create_command_list(0, QueueType::Graphics, CommandListLevel::Primary)
            .unwrap();

        mesh.record_commands_to_upload_data(&mut cmds, 0);

        assert!(cmds.commands().is_empty());
    }
}
