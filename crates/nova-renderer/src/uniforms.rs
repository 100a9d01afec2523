//! Uniform buffers the renderer provides to every shaderpack.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use nova_core::constants::{MODEL_MATRIX_BUFFER_NAME, PER_FRAME_DATA_NAME};
use nova_rhi::{
    BufferCreateInfo, BufferHandle, BufferUsage, BumpPointAllocationStrategy,
    DeviceMemoryResource, MemoryUsage, ObjectType, RenderDevice,
};

use crate::error::Result;

const UNIFORM_BUFFER_ALIGNMENT: u64 = 256;

/// Contents of the per-frame uniform buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerFrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub frame_count: u32,
    pub _padding: [u32; 3],
}

impl Default for PerFrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            frame_count: 0,
            _padding: [0; 3],
        }
    }
}

impl PerFrameUniforms {
    pub fn new(view: Mat4, projection: Mat4, frame_count: u32) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            frame_count,
            _padding: [0; 3],
        }
    }
}

/// The builtin uniform buffers and the memory they live in.
pub struct BuiltinBuffers {
    memory: DeviceMemoryResource,
    pub per_frame: BufferHandle,
    pub model_matrices: BufferHandle,
    max_model_matrices: u64,
}

impl BuiltinBuffers {
    pub fn new<D: RenderDevice>(device: &mut D, max_model_matrices: u64) -> Result<Self> {
        let per_frame_size = std::mem::size_of::<PerFrameUniforms>() as u64;
        let model_matrix_size = max_model_matrices * std::mem::size_of::<Mat4>() as u64;
        let total = per_frame_size.next_multiple_of(UNIFORM_BUFFER_ALIGNMENT)
            + model_matrix_size.next_multiple_of(UNIFORM_BUFFER_ALIGNMENT);

        let memory = device.allocate_device_memory(total, MemoryUsage::LowFrequencyUpload, ObjectType::BUFFER)?;
        let mut memory =
            DeviceMemoryResource::new(memory, BumpPointAllocationStrategy::new(total, UNIFORM_BUFFER_ALIGNMENT));

        let uniform = |size| BufferCreateInfo {
            size,
            buffer_usage: BufferUsage::UniformBuffer,
        };
        let buffers = device
            .create_buffer(&uniform(per_frame_size), &mut memory)
            .and_then(|per_frame| {
                device
                    .create_buffer(&uniform(model_matrix_size), &mut memory)
                    .map(|model_matrices| (per_frame, model_matrices))
            });
        let (per_frame, model_matrices) = match buffers {
            Ok(buffers) => buffers,
            Err(e) => {
                device.free_device_memory(memory.memory());
                return Err(e.into());
            }
        };

        tracing::debug!(
            "Created {PER_FRAME_DATA_NAME} and {MODEL_MATRIX_BUFFER_NAME} for {max_model_matrices} model matrices"
        );

        Ok(Self {
            memory,
            per_frame,
            model_matrices,
            max_model_matrices,
        })
    }

    /// The buffer a shader resource name refers to, if it names a builtin.
    pub fn by_name(&self, name: &str) -> Option<BufferHandle> {
        match name {
            PER_FRAME_DATA_NAME => Some(self.per_frame),
            MODEL_MATRIX_BUFFER_NAME => Some(self.model_matrices),
            _ => None,
        }
    }

    pub fn max_model_matrices(&self) -> u64 {
        self.max_model_matrices
    }

    pub fn write_per_frame<D: RenderDevice>(&self, device: &mut D, uniforms: &PerFrameUniforms) -> Result<()> {
        device.write_data_to_buffer(bytemuck::bytes_of(uniforms), 0, self.per_frame)?;
        Ok(())
    }

    /// Write model matrices from the start of the buffer. Matrices past the
    /// buffer's capacity are dropped with a warning.
    pub fn write_model_matrices<D: RenderDevice>(&self, device: &mut D, matrices: &[Mat4]) -> Result<()> {
        let capacity = usize::try_from(self.max_model_matrices).unwrap_or(usize::MAX);
        let matrices = if matrices.len() > capacity {
            tracing::warn!(
                "{} model matrices do not fit in {MODEL_MATRIX_BUFFER_NAME}, dropping {}",
                matrices.len(),
                matrices.len() - capacity
            );
            &matrices[..capacity]
        } else {
            matrices
        };

        if !matrices.is_empty() {
            device.write_data_to_buffer(bytemuck::cast_slice(matrices), 0, self.model_matrices)?;
        }
        Ok(())
    }

    pub fn destroy<D: RenderDevice>(mut self, device: &mut D) {
        device.destroy_buffer(self.per_frame, &mut self.memory);
        device.destroy_buffer(self.model_matrices, &mut self.memory);
        device.free_device_memory(self.memory.memory());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use nova_rhi::HeadlessDevice;

    #[test]
    fn per_frame_layout_is_std140_friendly() {
        assert_eq!(std::mem::size_of::<PerFrameUniforms>(), 208);
    }

    #[test]
    fn view_projection_is_projection_times_view() {
        let view = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let projection = Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 100.0);
        let uniforms = PerFrameUniforms::new(view, projection, 7);
        assert_eq!(uniforms.view_projection, projection * view);
        assert_eq!(uniforms.frame_count, 7);
    }

    #[test]
    fn builtin_buffers_resolve_by_name() {
        let mut device = HeadlessDevice::default();
        let buffers = BuiltinBuffers::new(&mut device, 4).unwrap();

        assert_eq!(buffers.by_name(PER_FRAME_DATA_NAME), Some(buffers.per_frame));
        assert_eq!(buffers.by_name(MODEL_MATRIX_BUFFER_NAME), Some(buffers.model_matrices));
        assert_eq!(buffers.by_name("Albedo"), None);
    }

    #[test]
    fn excess_model_matrices_are_dropped() {
        let mut device = HeadlessDevice::default();
        let buffers = BuiltinBuffers::new(&mut device, 2).unwrap();
        let matrices = [
            Mat4::from_scale(Vec3::splat(1.0)),
            Mat4::from_scale(Vec3::splat(2.0)),
            Mat4::from_scale(Vec3::splat(3.0)),
        ];

        buffers.write_model_matrices(&mut device, &matrices).unwrap();

        let contents = device.buffer_contents(buffers.model_matrices).unwrap();
        assert_eq!(contents, bytemuck::cast_slice::<Mat4, u8>(&matrices[..2]));

        buffers.destroy(&mut device);
        assert_eq!(device.num_buffers(), 0);
    }
}
