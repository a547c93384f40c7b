pub mod device;
pub mod freelist;
pub mod page;
pub mod allocator;
pub mod memory;

pub use device::{MemoryDevice, VulkanDevice};
pub use allocator::Allocator;
pub use memory::{MemoryManager, PAGE_SIZE};

use thiserror::Error;

// Real device-memory allocations are expensive, and the number
// a platform is willing to hand out is bounded (the Vulkan
// limit 'maxMemoryAllocationCount' can be as low as 4096). The
// allocator therefore requests a few large pages from the
// device and carves them into the many small regions buffers
// and images actually need, reusing freed regions over the
// lifetime of the renderer.

/// Errors reported by the allocator. None of them is retried
/// internally: every failure propagates to the caller at once,
/// and is in practice fatal for the rendering session.
#[derive(Error, Debug)]
pub enum AllocError {
    /// The request exceeds the page capacity. A resource must
    /// fit within a single page; there are no multi-page
    /// allocations.
    #[error("Allocation of {size} bytes exceeds the page size of {page_size} bytes.")]
    RequestTooLarge { size: u64, page_size: u64 },
    /// The platform refused to allocate a new page.
    #[error("Device memory allocation failed.")]
    DeviceOutOfMemory(#[from] vulkanalia::vk::ErrorCode),
    /// Placement failed on a freshly created, empty page. This
    /// cannot happen for a request that fits the page size and
    /// indicates a logic error.
    #[error("Placement failed on an empty page.")]
    AllocationFailed,
    /// No available memory type satisfies the requirements.
    #[error("Failed to find suitable memory type.")]
    NoSuitableMemoryType,
    /// No allocator has been created for the given memory type.
    #[error("No allocator exists for memory type {0}.")]
    NoSuchAllocator(u32),
    /// The memory is not host-visible, or is not owned by the
    /// allocator it was presented to.
    #[error("Memory is not mapped and cannot be.")]
    NotMapped,
}

pub type Result<T> = std::result::Result<T, AllocError>;

/// Handle to a sub-allocated region of a page, held by the
/// resource (buffer or image) bound to that region. The handle
/// is all a caller keeps: it carries the device memory and the
/// offset needed to bind the resource, plus the back-references
/// (memory type and page index) that let a later free locate
/// the owning page without any global lookup table. Freeing
/// consumes the handle, so a region cannot be returned twice
/// through the same handle.
#[derive(Debug)]
pub struct Allocation<M> {
    /// Device memory of the owning page, to bind the resource
    /// against.
    pub memory: M,
    /// Memory type index of the owning allocator.
    pub memory_type: u32,
    /// Index of the owning page within that allocator.
    pub(crate) page: usize,
    /// Byte offset of the region within the page.
    pub offset: u64,
    /// Byte size of the region.
    pub size: u64,
}
