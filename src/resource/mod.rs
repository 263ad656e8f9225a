//! Resource identity and ownership: images, image views, buffers, buffer
//! views, and the handler that interns their descriptors and owns the backing
//! Vulkan objects.

pub mod buffer;
pub mod handler;
pub mod image;

pub use buffer::{BufferData, BufferId, BufferSubresourceRange, BufferViewData, BufferViewId};
pub use handler::ResourceHandler;
pub use image::{
    ImageData, ImageId, ImageSubresourceRange, ImageViewData, ImageViewId,
};
