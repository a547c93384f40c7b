use super::Result;

use std::ffi::c_void;

use vulkanalia::prelude::v1_0::*;
use log::*;

/// Interface to the device that pages are allocated from. The
/// allocator only ever needs four things from the graphics API:
/// allocating and releasing whole memory objects, mapping one
/// into host address space, and the capability flags of the
/// memory types the platform exposes. Keeping that surface
/// behind a trait lets the sub-allocation logic run against a
/// stub device in the tests.
pub trait MemoryDevice {
    /// Opaque handle to one real device-memory allocation.
    type Memory: Copy + PartialEq;

    /// Allocate a new memory object of `size` bytes from the
    /// given memory type. Possibly slow and bounded by the
    /// platform allocation limit; called only when no existing
    /// page has room left.
    fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<Self::Memory>;

    /// Release a memory object. Any mapping into it becomes
    /// invalid.
    fn free_memory(&self, memory: Self::Memory);

    /// Map `size` bytes of the memory object, starting at
    /// `offset`, into host address space. The memory type the
    /// object was allocated from must be host-visible.
    fn map_memory(&self, memory: Self::Memory, offset: u64, size: u64) -> Result<*mut c_void>;

    /// Capability flags of the platform memory types, indexed
    /// by memory type index.
    fn memory_types(&self) -> &[vk::MemoryPropertyFlags];
}

/// The real device: a Vulkan logical device together with the
/// memory type table of the physical device it was created
/// from.
pub struct VulkanDevice {
    device: Device,
    memory_types: Vec<vk::MemoryPropertyFlags>,
}

impl VulkanDevice {
    pub fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
    ) -> Self {
        // Graphics cards offer different types of memory to
        // allocate from, grouped in heaps (the distinct memory
        // resources, like VRAM and swap space in RAM). Each
        // type carries a set of capability flags (device-local,
        // host-visible, host-coherent, and so on); the table is
        // fixed for the lifetime of the physical device, so it
        // is captured once here.
        let properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        let memory_types = properties.memory_types
            .iter()
            .take(properties.memory_type_count as usize)
            .map(|memory_type| memory_type.property_flags)
            .collect();

        Self { device, memory_types }
    }

    /// The wrapped logical device, for creating and binding the
    /// resources that consume the allocations.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl MemoryDevice for VulkanDevice {
    type Memory = vk::DeviceMemory;

    fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type);

        let memory = unsafe { self.device.allocate_memory(&info, None)? };
        debug!("Allocated {} bytes of device memory (type {}).", size, memory_type);

        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None); }
    }

    fn map_memory(&self, memory: vk::DeviceMemory, offset: u64, size: u64) -> Result<*mut c_void> {
        // The returned pointer stays valid until the memory is
        // either unmapped or freed; freeing unmaps implicitly.
        let pointer = unsafe {
            self.device.map_memory(memory, offset, size, vk::MemoryMapFlags::empty())?
        };

        Ok(pointer)
    }

    fn memory_types(&self) -> &[vk::MemoryPropertyFlags] {
        &self.memory_types
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Stub device for exercising the allocator hostside. Hands
    /// out fake memory handles and fake mapping pointers, and
    /// records every call so tests can assert how often the
    /// device was actually hit.
    pub struct MockDevice {
        memory_types: Vec<vk::MemoryPropertyFlags>,
        next_handle: Cell<u64>,
        allocations: RefCell<Vec<(u64, u64, u32)>>,
        freed: RefCell<Vec<u64>>,
        map_calls: Cell<usize>,
        budget: Cell<usize>,
    }

    impl MockDevice {
        pub fn new(memory_types: &[vk::MemoryPropertyFlags]) -> Self {
            Self {
                memory_types: memory_types.to_vec(),
                next_handle: Cell::new(1),
                allocations: RefCell::new(Vec::new()),
                freed: RefCell::new(Vec::new()),
                map_calls: Cell::new(0),
                budget: Cell::new(usize::MAX),
            }
        }

        /// Make every further allocation fail, as an exhausted
        /// device would.
        pub fn exhaust(&self) {
            self.budget.set(0);
        }

        pub fn allocation_count(&self) -> usize {
            self.allocations.borrow().len()
        }

        pub fn freed_handles(&self) -> Vec<u64> {
            self.freed.borrow().clone()
        }

        pub fn map_count(&self) -> usize {
            self.map_calls.get()
        }
    }

    impl MemoryDevice for MockDevice {
        type Memory = u64;

        fn allocate_memory(&self, size: u64, memory_type: u32) -> Result<u64> {
            if self.allocations.borrow().len() >= self.budget.get() {
                return Err(vk::ErrorCode::OUT_OF_DEVICE_MEMORY.into());
            }

            let handle = self.next_handle.get();
            self.next_handle.set(handle + 1);
            self.allocations.borrow_mut().push((handle, size, memory_type));

            Ok(handle)
        }

        fn free_memory(&self, memory: u64) {
            self.freed.borrow_mut().push(memory);
        }

        fn map_memory(&self, memory: u64, offset: u64, _size: u64) -> Result<*mut c_void> {
            self.map_calls.set(self.map_calls.get() + 1);

            // A distinct, never-dereferenced address per call,
            // so a cached mapping is distinguishable from a
            // remapped one.
            let address = (memory << 32) + offset + (self.map_calls.get() as u64) * 0x10_0000;
            Ok(address as *mut c_void)
        }

        fn memory_types(&self) -> &[vk::MemoryPropertyFlags] {
            &self.memory_types
        }
    }
}
