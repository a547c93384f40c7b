use super::{
    Result,
    device::MemoryDevice,
    freelist::{FreeList, FreeRange},
};

use std::ffi::c_void;

/// One real device-memory block of fixed capacity, subdivided
/// into regions by the allocator that owns it. The page keeps
/// the free-list bookkeeping and, for host-visible memory, the
/// persistent mapping of the whole block.
pub struct Page<M> {
    /// Device memory backing the page.
    memory: M,
    /// Capacity of the page in bytes.
    size: u64,
    /// The unused ranges of the page.
    free: FreeList,
    /// Host pointer to the mapped page. Created on first use
    /// and kept until the page is destroyed, so every region
    /// of the page shares one mapping of the whole block.
    mapping: Option<*mut c_void>,
}

impl<M: Copy + PartialEq> Page<M> {
    /// Wrap a freshly allocated memory block: everything free,
    /// nothing mapped.
    pub fn new(memory: M, size: u64) -> Self {
        Self {
            memory,
            size,
            free: FreeList::new(size),
            mapping: None,
        }
    }

    pub fn memory(&self) -> M {
        self.memory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Try to find room for `size` bytes aligned to `alignment`
    /// somewhere in the page, returning the placed offset.
    pub fn try_place(&mut self, size: u64, alignment: u64) -> Option<u64> {
        self.free.place(size, alignment)
    }

    /// Return a previously placed region to the page.
    pub fn release(&mut self, offset: u64, size: u64) {
        self.free.release(offset, size);
    }

    /// Host pointer to the start of the page. The first call
    /// maps the whole page once; later calls return the cached
    /// pointer, which stays valid for the page's lifetime.
    pub fn mapping<D>(&mut self, device: &D) -> Result<*mut c_void>
    where
        D: MemoryDevice<Memory = M>,
    {
        match self.mapping {
            Some(pointer) => Ok(pointer),
            None => {
                let pointer = device.map_memory(self.memory, 0, self.size)?;
                self.mapping = Some(pointer);

                Ok(pointer)
            }
        }
    }

    /// Drop all regions at once, returning to a single free
    /// range over the whole page.
    pub fn reset(&mut self) {
        self.free.reset(self.size);
    }

    /// The page's free ranges, ordered by offset.
    pub fn free_ranges(&self) -> &[FreeRange] {
        self.free.ranges()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::device::mock::MockDevice;
    use vulkanalia::vk;

    #[test]
    fn fresh_page_is_one_free_range() {
        let page: Page<u64> = Page::new(7, 4096);
        assert_eq!(page.free_ranges(), &[FreeRange { offset: 0, size: 4096 }]);
    }

    #[test]
    fn mapping_is_created_once_and_cached() {
        let device = MockDevice::new(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let memory = device.allocate_memory(4096, 0).unwrap();
        let mut page = Page::new(memory, 4096);

        let first = page.mapping(&device).unwrap();
        let second = page.mapping(&device).unwrap();

        // The stub returns a fresh address on every map call,
        // so identical pointers mean the page mapped only once.
        assert_eq!(first, second);
        assert_eq!(device.map_count(), 1);
    }
}
