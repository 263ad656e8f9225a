//! The resource handler owns every image, view and buffer declared against a
//! graph: it interns descriptors into ids and lazily creates the backing
//! Vulkan objects and device memory on first use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan as vk_alloc;
use gpu_allocator::MemoryLocation;

use crate::context::GraphContext;
use crate::error::{map_vk, Error};
use crate::resource::buffer::{BufferData, BufferId, BufferViewData, BufferViewId};
use crate::resource::image::{ImageData, ImageId, ImageViewData, ImageViewId};

#[derive(Debug, Default)]
struct Interner {
    next_id: u32,
    views: HashMap<Arc<ImageViewData>, ImageViewId>,
    buffer_views: HashMap<Arc<BufferViewData>, BufferViewId>,
}

impl Interner {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug)]
struct CreatedImage {
    image: vk::Image,
    allocation: Option<vk_alloc::Allocation>,
}

#[derive(Debug)]
struct CreatedBuffer {
    buffer: vk::Buffer,
    allocation: Option<vk_alloc::Allocation>,
}

/// Owns resource identity and the lifetime of the backing Vulkan objects.
///
/// Ids are assigned monotonically. View descriptors are interned by value:
/// two `create_view_id` calls with equal [`ImageViewData`] return the same
/// id. Vulkan objects are created lazily by the `create_*` calls, cached per
/// id, and destroyed on [`ResourceHandler::clear`] or drop. Dropping the
/// handler with live objects logs an error and frees them anyway.
#[derive(Debug, Default)]
pub struct ResourceHandler {
    interner: Mutex<Interner>,
    vk_images: Mutex<HashMap<u32, CreatedImage>>,
    vk_views: Mutex<HashMap<u32, vk::ImageView>>,
    vk_buffers: Mutex<HashMap<u32, CreatedBuffer>>,
    vk_buffer_views: Mutex<HashMap<u32, vk::BufferView>>,
}

impl ResourceHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an image descriptor, returning a fresh id.
    pub fn create_image_id(&self, data: ImageData) -> Result<ImageId> {
        let mut interner = self.interner.lock().map_err(Error::from)?;
        let id = interner.next();
        Ok(ImageId::new(id, Arc::new(data)))
    }

    /// Intern a view descriptor. Value-equal descriptors merge to one id.
    pub fn create_view_id(&self, data: ImageViewData) -> Result<ImageViewId> {
        let mut interner = self.interner.lock().map_err(Error::from)?;
        let data = Arc::new(data);
        if let Some(existing) = interner.views.get(&data) {
            return Ok(existing.clone());
        }
        let id = interner.next();
        let view = ImageViewId::new(id, data.clone());
        interner.views.insert(data, view.clone());
        Ok(view)
    }

    /// Intern a buffer descriptor, returning a fresh id.
    pub fn create_buffer_id(&self, data: BufferData) -> Result<BufferId> {
        let mut interner = self.interner.lock().map_err(Error::from)?;
        let id = interner.next();
        Ok(BufferId::new(id, Arc::new(data)))
    }

    /// Intern a buffer-view descriptor. Value-equal descriptors merge.
    pub fn create_buffer_view_id(&self, data: BufferViewData) -> Result<BufferViewId> {
        let mut interner = self.interner.lock().map_err(Error::from)?;
        let data = Arc::new(data);
        if let Some(existing) = interner.buffer_views.get(&data) {
            return Ok(existing.clone());
        }
        let id = interner.next();
        let view = BufferViewId::new(id, data.clone());
        interner.buffer_views.insert(data, view.clone());
        Ok(view)
    }

    /// Get or create the `VkImage` for an id. The first call allocates
    /// device-local memory sized from the image requirements and binds it.
    pub fn create_image(&self, context: &GraphContext, image: &ImageId) -> Result<vk::Image> {
        let mut images = self.vk_images.lock().map_err(Error::from)?;
        if let Some(created) = images.get(&image.id()) {
            return Ok(created.image);
        }
        let Some(device) = context.device() else {
            images.insert(image.id(), CreatedImage {
                image: vk::Image::null(),
                allocation: None,
            });
            return Ok(vk::Image::null());
        };

        let data = image.data();
        let create_info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: data.flags,
            image_type: data.image_type,
            format: data.format,
            extent: data.extent,
            mip_levels: data.mip_levels,
            array_layers: data.array_layers,
            samples: data.samples,
            tiling: data.tiling,
            usage: data.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_index_count: 0,
            p_queue_family_indices: std::ptr::null(),
            initial_layout: vk::ImageLayout::UNDEFINED,
        };
        let handle = map_vk("Image creation", unsafe { device.create_image(&create_info, None) })?;
        let requirements = unsafe { device.get_image_memory_requirements(handle) };
        let allocation = context.with_allocator(|allocator| {
            Ok(allocator.allocate(&vk_alloc::AllocationCreateDesc {
                name: &data.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: data.tiling == vk::ImageTiling::LINEAR,
                allocation_scheme: vk_alloc::AllocationScheme::GpuAllocatorManaged,
            })?)
        })?;
        let allocation = match allocation {
            Some(allocation) => allocation,
            None => {
                unsafe { device.destroy_image(handle, None) };
                return Err(Error::VkError {
                    step: "Image memory allocation",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                }
                .into());
            }
        };
        if let Err(err) = map_vk("Image memory binding", unsafe {
            device.bind_image_memory(handle, allocation.memory(), allocation.offset())
        }) {
            unsafe { device.destroy_image(handle, None) };
            context.free_allocation(allocation);
            return Err(err.into());
        }
        images.insert(image.id(), CreatedImage {
            image: handle,
            allocation: Some(allocation),
        });
        Ok(handle)
    }

    /// Get or create the `VkImageView` for an id. Creates the image first if
    /// needed.
    pub fn create_image_view(&self, context: &GraphContext, view: &ImageViewId) -> Result<vk::ImageView> {
        if let Some(existing) = self.vk_views.lock().map_err(Error::from)?.get(&view.id()) {
            return Ok(*existing);
        }
        let image = self.create_image(context, view.image())?;
        let mut views = self.vk_views.lock().map_err(Error::from)?;
        let Some(device) = context.device() else {
            views.insert(view.id(), vk::ImageView::null());
            return Ok(vk::ImageView::null());
        };
        let data = view.data();
        let create_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::ImageViewCreateFlags::empty(),
            image,
            view_type: data.view_type,
            format: data.format,
            components: vk::ComponentMapping::default(),
            subresource_range: data.range.into(),
        };
        let handle = map_vk("ImageView creation", unsafe {
            device.create_image_view(&create_info, None)
        })?;
        views.insert(view.id(), handle);
        Ok(handle)
    }

    /// Get or create the `VkBuffer` for an id. Buffers are allocated
    /// host-visible so callers can upload geometry or uniform data directly.
    pub fn create_buffer(&self, context: &GraphContext, buffer: &BufferId) -> Result<vk::Buffer> {
        let mut buffers = self.vk_buffers.lock().map_err(Error::from)?;
        if let Some(created) = buffers.get(&buffer.id()) {
            return Ok(created.buffer);
        }
        let Some(device) = context.device() else {
            buffers.insert(buffer.id(), CreatedBuffer {
                buffer: vk::Buffer::null(),
                allocation: None,
            });
            return Ok(vk::Buffer::null());
        };
        let data = buffer.data();
        let create_info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::BufferCreateFlags::empty(),
            size: data.size,
            usage: data.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_index_count: 0,
            p_queue_family_indices: std::ptr::null(),
        };
        let handle = map_vk("Buffer creation", unsafe { device.create_buffer(&create_info, None) })?;
        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let allocation = context.with_allocator(|allocator| {
            Ok(allocator.allocate(&vk_alloc::AllocationCreateDesc {
                name: &data.name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: vk_alloc::AllocationScheme::GpuAllocatorManaged,
            })?)
        })?;
        let allocation = match allocation {
            Some(allocation) => allocation,
            None => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(Error::VkError {
                    step: "Buffer memory allocation",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                }
                .into());
            }
        };
        if let Err(err) = map_vk("Buffer memory binding", unsafe {
            device.bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        }) {
            unsafe { device.destroy_buffer(handle, None) };
            context.free_allocation(allocation);
            return Err(err.into());
        }
        buffers.insert(buffer.id(), CreatedBuffer {
            buffer: handle,
            allocation: Some(allocation),
        });
        Ok(handle)
    }

    /// Get or create the `VkBufferView` for a texel-buffer view id.
    pub fn create_buffer_view(&self, context: &GraphContext, view: &BufferViewId) -> Result<vk::BufferView> {
        if let Some(existing) = self.vk_buffer_views.lock().map_err(Error::from)?.get(&view.id()) {
            return Ok(*existing);
        }
        let buffer = self.create_buffer(context, view.buffer())?;
        let mut views = self.vk_buffer_views.lock().map_err(Error::from)?;
        let Some(device) = context.device() else {
            views.insert(view.id(), vk::BufferView::null());
            return Ok(vk::BufferView::null());
        };
        let data = view.data();
        let create_info = vk::BufferViewCreateInfo {
            s_type: vk::StructureType::BUFFER_VIEW_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::BufferViewCreateFlags::empty(),
            buffer,
            format: data.format.unwrap_or(vk::Format::UNDEFINED),
            offset: data.range.offset,
            range: data.range.size,
        };
        let handle = map_vk("BufferView creation", unsafe {
            device.create_buffer_view(&create_info, None)
        })?;
        views.insert(view.id(), handle);
        Ok(handle)
    }

    /// Write `bytes` into a mapped buffer, creating it first if needed.
    pub fn upload_buffer(&self, context: &GraphContext, buffer: &BufferId, bytes: &[u8]) -> Result<()> {
        self.create_buffer(context, buffer)?;
        let buffers = self.vk_buffers.lock().map_err(Error::from)?;
        let Some(created) = buffers.get(&buffer.id()) else {
            return Ok(());
        };
        if let Some(allocation) = &created.allocation {
            if let Some(pointer) = allocation.mapped_ptr() {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        pointer.as_ptr() as *mut u8,
                        bytes.len().min(allocation.size() as usize),
                    );
                }
            }
        }
        Ok(())
    }

    /// Destroy the Vulkan objects backing an image, keeping the id valid.
    /// Views onto the image must be destroyed first by the caller.
    pub fn destroy_image(&self, context: &GraphContext, image: &ImageId) {
        let Ok(mut images) = self.vk_images.lock() else {
            return;
        };
        if let Some(created) = images.remove(&image.id()) {
            if let Some(device) = context.device() {
                if created.image != vk::Image::null() {
                    unsafe { device.destroy_image(created.image, None) };
                }
            }
            if let Some(allocation) = created.allocation {
                context.free_allocation(allocation);
            }
        }
    }

    /// Destroy the `VkImageView` backing a view id, keeping the id valid.
    pub fn destroy_image_view(&self, context: &GraphContext, view: &ImageViewId) {
        let Ok(mut views) = self.vk_views.lock() else {
            return;
        };
        if let Some(handle) = views.remove(&view.id()) {
            if let Some(device) = context.device() {
                if handle != vk::ImageView::null() {
                    unsafe { device.destroy_image_view(handle, None) };
                }
            }
        }
    }

    /// Destroy every Vulkan object owned by the handler. Ids stay valid and
    /// objects are recreated lazily on next use.
    pub fn clear(&self, context: &GraphContext) {
        if let Ok(mut views) = self.vk_buffer_views.lock() {
            for (_, handle) in views.drain() {
                if let Some(device) = context.device() {
                    if handle != vk::BufferView::null() {
                        unsafe { device.destroy_buffer_view(handle, None) };
                    }
                }
            }
        }
        if let Ok(mut buffers) = self.vk_buffers.lock() {
            for (_, created) in buffers.drain() {
                if let Some(device) = context.device() {
                    if created.buffer != vk::Buffer::null() {
                        unsafe { device.destroy_buffer(created.buffer, None) };
                    }
                }
                if let Some(allocation) = created.allocation {
                    context.free_allocation(allocation);
                }
            }
        }
        if let Ok(mut views) = self.vk_views.lock() {
            for (_, handle) in views.drain() {
                if let Some(device) = context.device() {
                    if handle != vk::ImageView::null() {
                        unsafe { device.destroy_image_view(handle, None) };
                    }
                }
            }
        }
        if let Ok(mut images) = self.vk_images.lock() {
            for (_, created) in images.drain() {
                if let Some(device) = context.device() {
                    if created.image != vk::Image::null() {
                        unsafe { device.destroy_image(created.image, None) };
                    }
                }
                if let Some(allocation) = created.allocation {
                    context.free_allocation(allocation);
                }
            }
        }
    }

    fn live_object_count(&self) -> usize {
        let images = self.vk_images.lock().map(|map| map.len()).unwrap_or(0);
        let views = self.vk_views.lock().map(|map| map.len()).unwrap_or(0);
        let buffers = self.vk_buffers.lock().map(|map| map.len()).unwrap_or(0);
        let buffer_views = self.vk_buffer_views.lock().map(|map| map.len()).unwrap_or(0);
        images + views + buffers + buffer_views
    }
}

impl Drop for ResourceHandler {
    fn drop(&mut self) {
        let live = self.live_object_count();
        if live != 0 {
            error!("ResourceHandler dropped with {live} live Vulkan objects; leaking their handles");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::image::ImageSubresourceRange;

    fn handler_and_image() -> (ResourceHandler, ImageId) {
        let handler = ResourceHandler::new();
        let image = handler
            .create_image_id(ImageData::new_2d(
                "target",
                vk::Format::R8G8B8A8_UNORM,
                64,
                64,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ))
            .unwrap();
        (handler, image)
    }

    #[test]
    fn ids_are_monotonic() {
        let (handler, image) = handler_and_image();
        let other = handler
            .create_image_id(ImageData::new_2d(
                "other",
                vk::Format::R8G8B8A8_UNORM,
                64,
                64,
                vk::ImageUsageFlags::SAMPLED,
            ))
            .unwrap();
        assert!(other.id() > image.id());
    }

    #[test]
    fn equal_view_descriptors_intern_to_one_id() {
        let (handler, image) = handler_and_image();
        let data = ImageViewData::new(
            image.clone(),
            vk::ImageViewType::TYPE_2D,
            vk::Format::R8G8B8A8_UNORM,
            ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 0, 0),
        );
        let a = handler.create_view_id(data.clone()).unwrap();
        let b = handler.create_view_id(data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_view_descriptors_get_distinct_ids() {
        let (handler, image) = handler_and_image();
        let a = handler
            .create_view_id(ImageViewData::new(
                image.clone(),
                vk::ImageViewType::TYPE_2D,
                vk::Format::R8G8B8A8_UNORM,
                ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 0, 0),
            ))
            .unwrap();
        let b = handler
            .create_view_id(ImageViewData::new(
                image,
                vk::ImageViewType::TYPE_2D,
                vk::Format::R8G8B8A8_UNORM,
                ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 1, 0),
            ))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn headless_create_returns_null_and_caches() {
        let (handler, image) = handler_and_image();
        let context = GraphContext::headless();
        let first = handler.create_image(&context, &image).unwrap();
        let second = handler.create_image(&context, &image).unwrap();
        assert_eq!(first, vk::Image::null());
        assert_eq!(first, second);
        handler.clear(&context);
    }
}
