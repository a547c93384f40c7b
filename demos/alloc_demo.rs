use vulkanalia::{
    prelude::v1_0::*,
    loader::{LibloadingLoader, LIBRARY},
};

use anyhow::{anyhow, Result};
use log::info;

use smaug::{MemoryManager, VulkanDevice};

const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
const VALIDATION_LAYER: vk::ExtensionName = vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

fn main() -> Result<()> {
    std::env::set_var("RUST_LOG", "info");
    pretty_env_logger::init();

    // Vulkan entry point
    let entry = unsafe {
        let loader = LibloadingLoader::new(LIBRARY).map_err(|e| anyhow!("{}", e))?;
        Entry::new(loader).map_err(|e| anyhow!("{}", e))?
    };

    // Application info and validation layers
    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"alloc-demo\0")
        .application_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 0, 0));

    let layers = if VALIDATION_ENABLED {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers);

    // Vulkan instance
    let instance = unsafe { entry.create_instance(&info, None)? };

    // Physical device: no presentation is involved, so any
    // device with a queue family will do.
    let physical_device = unsafe { instance.enumerate_physical_devices()? }
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No Vulkan device available."))?;

    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    info!("Using physical device: {}.", properties.device_name);

    // Logical device with a single queue from the first family
    let priorities = &[1.0];
    let queues = &[
        vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(0)
            .queue_priorities(priorities)
    ];

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(queues)
        .enabled_layer_names(&layers);

    let device = unsafe { instance.create_device(physical_device, &create_info, None)? };
    info!("Created device.");

    // Wrap the device for the allocator and create the memory
    // manager, which sets up the host allocator right away.
    let vulkan = VulkanDevice::new(&instance, physical_device, device);
    let mut memory = MemoryManager::new(&vulkan)?;

    // A small staging-style buffer. The buffer itself carries
    // no memory; its requirements say how much is needed, at
    // which alignment, and which memory types can back it.
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(1024)
        .usage(vk::BufferUsageFlags::TRANSFER_SRC)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { vulkan.device().create_buffer(&buffer_info, None)? };
    let requirements = unsafe { vulkan.device().get_buffer_memory_requirements(buffer) };

    // Sub-allocate host-visible memory for it and bind the
    // buffer at the returned offset.
    let allocation = memory
        .host_allocator()
        .alloc(&vulkan, requirements.size, requirements.alignment)?;

    unsafe {
        vulkan.device().bind_buffer_memory(buffer, allocation.memory, allocation.offset)?;
    }
    info!("Bound a {} byte buffer at offset {}.", allocation.size, allocation.offset);

    // The page mapping covers the whole page; this buffer's
    // bytes start at the allocation offset within it.
    let mapping = memory.mapping(&vulkan, allocation.memory)?;
    unsafe {
        let pointer = (mapping as *mut u8).add(allocation.offset as usize);
        std::ptr::write_bytes(pointer, 0x5a, allocation.size as usize);
    }
    info!("Filled the buffer through the persistent mapping.");

    // Tear everything down in reverse order.
    unsafe { vulkan.device().destroy_buffer(buffer, None); }
    memory.free(allocation);
    memory.destroy(&vulkan);

    unsafe {
        vulkan.device().destroy_device(None);
        instance.destroy_instance(None);
    }
    info!("Done.");

    Ok(())
}
