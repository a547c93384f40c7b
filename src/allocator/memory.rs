use super::{
    AllocError, Allocation, Result,
    allocator::Allocator,
    device::MemoryDevice,
};

use std::ffi::c_void;

use vulkanalia::prelude::v1_0::*;
use log::*;

/// All pages are carved out of 128 MiB device allocations.
pub const PAGE_SIZE: u64 = 128 * 1024 * 1024;

/// Owner of one sub-allocator per memory type in use. There is
/// a single host allocator, created eagerly because staging and
/// uniform data always need somewhere host-visible to live, and
/// any number of device allocators, created lazily the first
/// time a resource asks for their memory type.
pub struct MemoryManager<M> {
    /// Capability flags of every memory type of the physical
    /// device, captured once at creation.
    memory_types: Vec<vk::MemoryPropertyFlags>,
    /// Allocator for the host-visible memory that the host
    /// writes staging and uniform data through.
    host: Allocator<M>,
    /// Device allocators in creation order, at most one per
    /// memory type.
    device_allocators: Vec<Allocator<M>>,
}

impl<M: Copy + PartialEq> MemoryManager<M> {
    pub fn new<D>(device: &D) -> Result<Self>
    where
        D: MemoryDevice<Memory = M>,
    {
        let memory_types = device.memory_types().to_vec();
        let host = host_allocator(&memory_types)?;
        info!("Memory manager created (host memory type {}).", host.memory_type());

        Ok(Self {
            memory_types,
            host,
            device_allocators: Vec::new(),
        })
    }

    /// The allocator for host-visible memory.
    pub fn host_allocator(&mut self) -> &mut Allocator<M> {
        &mut self.host
    }

    /// An allocator able to serve a resource whose supported
    /// memory types are given by the `type_bits` mask (bit i
    /// set means memory type i works for the resource).
    ///
    /// An allocator that already exists and matches is always
    /// preferred, so resources with overlapping requirements
    /// share pages. Otherwise a new allocator is created for
    /// the best matching type: first choice is a type with no
    /// capabilities beyond DEVICE_LOCAL (the fastest memory for
    /// resources the host never touches), second choice is any
    /// type the resource supports.
    pub fn device_allocator(&mut self, type_bits: u32) -> Result<&mut Allocator<M>> {
        let existing = self.device_allocators
            .iter()
            .position(|allocator| type_bits & (1 << allocator.memory_type()) != 0);

        if let Some(index) = existing {
            return Ok(&mut self.device_allocators[index]);
        }

        let device_local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let memory_type = self
            .find_type(type_bits, |flags| flags == device_local)
            .or_else(|| self.find_type(type_bits, |_| true))
            .ok_or(AllocError::NoSuitableMemoryType)?;

        info!("Created device allocator for memory type {}.", memory_type);
        let properties = self.memory_types[memory_type as usize];
        let index = self.device_allocators.len();
        self.device_allocators.push(Allocator::new(memory_type, properties, PAGE_SIZE));

        Ok(&mut self.device_allocators[index])
    }

    /// The already-created device allocator for an exact memory
    /// type index, for callers that recorded the type of an
    /// earlier allocation.
    pub fn device_allocator_for_type(&mut self, memory_type: u32) -> Result<&mut Allocator<M>> {
        self.device_allocators
            .iter_mut()
            .find(|allocator| allocator.memory_type() == memory_type)
            .ok_or(AllocError::NoSuchAllocator(memory_type))
    }

    /// Return an allocation to the allocator that issued it.
    /// The handle records its memory type, which identifies the
    /// owner among the host and device allocators.
    pub fn free(&mut self, allocation: Allocation<M>) {
        if allocation.memory_type == self.host.memory_type() {
            self.host.free(allocation);
            return;
        }

        let owner = self.device_allocators
            .iter_mut()
            .find(|allocator| allocator.memory_type() == allocation.memory_type);

        match owner {
            Some(allocator) => allocator.free(allocation),
            None => warn!(
                "Freed an allocation of unknown memory type {}.",
                allocation.memory_type,
            ),
        }
    }

    /// Host pointer for a page of the host allocator.
    pub fn mapping<D>(&mut self, device: &D, memory: M) -> Result<*mut c_void>
    where
        D: MemoryDevice<Memory = M>,
    {
        self.host.mapping(device, memory)
    }

    /// Return every page of every allocator to the device.
    pub fn destroy<D>(&mut self, device: &D)
    where
        D: MemoryDevice<Memory = M>,
    {
        self.host.destroy(device);
        for allocator in &mut self.device_allocators {
            allocator.destroy(device);
        }

        info!("Destroyed the memory manager.");
    }

    fn find_type(
        &self,
        type_bits: u32,
        predicate: impl Fn(vk::MemoryPropertyFlags) -> bool,
    ) -> Option<u32> {
        // The type bits have one bit per platform memory type,
        // set when that type works for the resource; the first
        // set type that also passes the predicate wins.
        self.memory_types
            .iter()
            .enumerate()
            .find(|(index, &flags)| type_bits & (1 << index) != 0 && predicate(flags))
            .map(|(index, _)| index as u32)
    }
}

fn host_allocator<M: Copy + PartialEq>(
    memory_types: &[vk::MemoryPropertyFlags],
) -> Result<Allocator<M>> {
    // The host allocator wants memory that the host can write
    // and that needs no explicit flushing, so the first choice
    // is a type with exactly the host-visible and host-coherent
    // flags. Failing that, any type carrying at least one of
    // the two is accepted; a platform offering neither cannot
    // run the renderer at all.
    let desired = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

    let memory_type = memory_types
        .iter()
        .position(|&flags| flags == desired)
        .or_else(|| memory_types.iter().position(|&flags| flags.intersects(desired)))
        .ok_or(AllocError::NoSuitableMemoryType)?;

    Ok(Allocator::new(
        memory_type as u32,
        memory_types[memory_type],
        PAGE_SIZE,
    ))
}
