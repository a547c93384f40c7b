use super::{
    AllocError, Allocation, Result,
    device::MemoryDevice,
    page::Page,
};

use std::ffi::c_void;

use vulkanalia::prelude::v1_0::*;
use log::*;

/// Sub-allocator for a single memory type. It owns a growing
/// list of fixed-size pages and serves every request out of
/// them, only going back to the device for a whole new page
/// when the existing ones are full. Pages are appended in
/// creation order and never removed before the allocator
/// itself is destroyed, so the page index stored in a handle
/// stays valid for the handle's whole lifetime.
pub struct Allocator<M> {
    /// Platform memory type this allocator is restricted to.
    memory_type: u32,
    /// Capability flags of that memory type.
    properties: vk::MemoryPropertyFlags,
    /// Capacity of every page, in bytes.
    page_size: u64,
    /// Pages in creation order.
    pages: Vec<Page<M>>,
}

impl<M: Copy + PartialEq> Allocator<M> {
    /// A new allocator with no pages yet; the first allocation
    /// pulls the first page from the device.
    pub fn new(memory_type: u32, properties: vk::MemoryPropertyFlags, page_size: u64) -> Self {
        Self {
            memory_type,
            properties,
            page_size,
            pages: Vec::new(),
        }
    }

    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Place `size` bytes aligned to `alignment` on one of the
    /// pages, pulling a new page from the device if none of the
    /// existing ones has room.
    pub fn alloc<D>(&mut self, device: &D, size: u64, alignment: u64) -> Result<Allocation<M>>
    where
        D: MemoryDevice<Memory = M>,
    {
        // A resource must fit within a single page; multi-page
        // allocations do not exist. Checked up front, so an
        // oversized request can never cause a page allocation.
        if size > self.page_size {
            return Err(AllocError::RequestTooLarge { size, page_size: self.page_size });
        }

        // First fit over the pages in creation order.
        let placed = self.pages
            .iter_mut()
            .enumerate()
            .find_map(|(index, page)| {
                page.try_place(size, alignment).map(|offset| (index, offset))
            });

        if let Some((index, offset)) = placed {
            return Ok(self.allocation(index, offset, size));
        }

        // Every page rejected the request, so grow by one page.
        // If the device refuses, the failure surfaces to the
        // caller as is; there is no reclaim strategy to retry
        // with.
        let memory = device.allocate_memory(self.page_size, self.memory_type)?;
        self.pages.push(Page::new(memory, self.page_size));
        info!(
            "Allocated page {} of {} bytes (memory type {}).",
            self.pages.len() - 1, self.page_size, self.memory_type,
        );

        // Placement on a brand-new empty page only fails if
        // alignment slack pushes the region past the end of the
        // page, which a caller can never recover from.
        let index = self.pages.len() - 1;
        let offset = self.pages[index]
            .try_place(size, alignment)
            .ok_or(AllocError::AllocationFailed)?;

        Ok(self.allocation(index, offset, size))
    }

    /// Return a region to its owning page. The handle is
    /// consumed; the range becomes available to later requests
    /// immediately.
    pub fn free(&mut self, allocation: Allocation<M>) {
        debug_assert_eq!(allocation.memory_type, self.memory_type);

        // The handle records the index of its owning page, so
        // there is nothing to search for.
        self.pages[allocation.page].release(allocation.offset, allocation.size);
    }

    /// Host pointer for the page backed by `memory`. The page
    /// is mapped in full on the first request and the pointer
    /// cached from then on. Only the host allocator's memory
    /// can be mapped; asking for device-local memory is a
    /// caller error.
    pub fn mapping<D>(&mut self, device: &D, memory: M) -> Result<*mut c_void>
    where
        D: MemoryDevice<Memory = M>,
    {
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(AllocError::NotMapped);
        }

        let page = self.pages
            .iter_mut()
            .find(|page| page.memory() == memory)
            .ok_or(AllocError::NotMapped)?;

        page.mapping(device)
    }

    /// Drop every region on every page at once, keeping the
    /// pages themselves. Used by session-scoped scratch pools
    /// that recycle their whole capacity between frames.
    pub fn reset(&mut self) {
        for page in &mut self.pages {
            page.reset();
        }
    }

    /// Return every page to the device. All handles issued by
    /// this allocator are invalid afterwards, as are mappings
    /// into its pages.
    pub fn destroy<D>(&mut self, device: &D)
    where
        D: MemoryDevice<Memory = M>,
    {
        for page in self.pages.drain(..) {
            device.free_memory(page.memory());
        }

        info!("Destroyed allocator for memory type {}.", self.memory_type);
    }

    fn allocation(&self, page: usize, offset: u64, size: u64) -> Allocation<M> {
        Allocation {
            memory: self.pages[page].memory(),
            memory_type: self.memory_type,
            page,
            offset,
            size,
        }
    }
}
