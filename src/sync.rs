//! Semaphore and fence wrappers used to chain pass submissions.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::error::map_vk;

/// A semaphore to wait on, together with the stages that must wait.
/// Returned by every pass submission and fed to the next one.
#[derive(Debug, Copy, Clone)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub dst_stage_mask: vk::PipelineStageFlags,
}

impl SemaphoreWait {
    /// No wait; the first submission of a frame starts from this.
    pub fn none() -> Self {
        Self {
            semaphore: vk::Semaphore::null(),
            dst_stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
        }
    }

    pub fn is_none(&self) -> bool {
        self.semaphore == vk::Semaphore::null()
    }
}

/// Owned binary semaphore. Null in a headless context.
pub struct Semaphore {
    context: Arc<GraphContext>,
    handle: vk::Semaphore,
}

impl Semaphore {
    pub fn new(context: Arc<GraphContext>) -> Result<Self> {
        let handle = match context.device() {
            None => vk::Semaphore::null(),
            Some(device) => {
                let create_info = vk::SemaphoreCreateInfo::default();
                map_vk("Semaphore creation", unsafe {
                    device.create_semaphore(&create_info, None)
                })?
            }
        };
        Ok(Self {
            context,
            handle,
        })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if self.handle != vk::Semaphore::null() {
            if let Some(device) = self.context.device() {
                unsafe { device.destroy_semaphore(self.handle, None) };
            }
        }
    }
}

/// Owned fence. Null in a headless context, where waits return immediately.
pub struct Fence {
    context: Arc<GraphContext>,
    handle: vk::Fence,
}

impl Fence {
    pub fn new(context: Arc<GraphContext>, signaled: bool) -> Result<Self> {
        let handle = match context.device() {
            None => vk::Fence::null(),
            Some(device) => {
                let create_info = vk::FenceCreateInfo {
                    s_type: vk::StructureType::FENCE_CREATE_INFO,
                    p_next: std::ptr::null(),
                    flags: if signaled {
                        vk::FenceCreateFlags::SIGNALED
                    } else {
                        vk::FenceCreateFlags::empty()
                    },
                };
                map_vk("Fence creation", unsafe { device.create_fence(&create_info, None) })?
            }
        };
        Ok(Self {
            context,
            handle,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn reset(&self) -> Result<()> {
        if self.handle == vk::Fence::null() {
            return Ok(());
        }
        if let Some(device) = self.context.device() {
            map_vk("Fence reset", unsafe { device.reset_fences(&[self.handle]) })?;
        }
        Ok(())
    }

    /// Block until the fence signals or `timeout` nanoseconds elapse. Waiting
    /// counts as a frame tick for the context's retirement ledger.
    pub fn wait(&self, timeout: u64) -> Result<()> {
        if self.handle != vk::Fence::null() {
            if let Some(device) = self.context.device() {
                map_vk("Fence wait", unsafe {
                    device.wait_for_fences(&[self.handle], true, timeout)
                })?;
            }
        }
        self.context.next_frame();
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if self.handle != vk::Fence::null() {
            if let Some(device) = self.context.device() {
                unsafe { device.destroy_fence(self.handle, None) };
            }
        }
    }
}
