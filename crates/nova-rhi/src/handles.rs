//! Generational handles to device objects.
//!
//! Every object a [`RenderDevice`](crate::RenderDevice) creates is addressed by
//! an index plus a generation counter, so a handle to a destroyed object is
//! detected instead of aliasing whatever reused its slot.

slotmap::new_key_type! {
    /// Raw device memory backing a [`DeviceMemoryResource`](crate::DeviceMemoryResource).
    pub struct DeviceMemoryHandle;
    pub struct BufferHandle;
    pub struct ImageHandle;
    pub struct RenderpassHandle;
    pub struct FramebufferHandle;
    /// Descriptor set layouts and pipeline layout shared by a pipeline.
    pub struct PipelineInterfaceHandle;
    pub struct PipelineHandle;
    pub struct DescriptorPoolHandle;
    pub struct DescriptorSetHandle;
    pub struct SamplerHandle;
    pub struct SemaphoreHandle;
    pub struct FenceHandle;
}
