//! The Vulkan façade consumed by the graph.
//!
//! [`GraphContext`] bundles everything the compiler and runtime need from the
//! surrounding Vulkan application: the logical device, the memory allocator,
//! a pipeline cache and a couple of device properties. The device is optional
//! so a graph can be built, compiled and recorded without a GPU; every
//! Vulkan-touching operation degrades to a no-op returning null handles in
//! that case, while layout and access bookkeeping still runs. This is how the
//! test suite exercises the solver and the barrier engine.
//!
//! The context also owns the retirement ledger for Vulkan objects that cannot
//! be destroyed inline. `reset_pipeline` and render-pass recreation replace
//! objects that earlier frames may still be executing; those handles are
//! retired through [`GraphContext::defer_destroy`] and only destroyed once
//! enough frame ticks ([`GraphContext::next_frame`]) have passed, or when a
//! caller asserts the device is idle via [`GraphContext::flush_deferred`].

use std::sync::Mutex;

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan as vk_alloc;

use crate::error::Error;

/// Frame ticks an object stays in the retirement ledger before destruction.
/// Generous enough to outlive any frames-in-flight setup the caller runs.
const RETIRE_GRACE_FRAMES: u32 = 4;

/// A Vulkan object whose destruction was deferred because it may still be
/// referenced by an in-flight command buffer.
#[derive(Debug)]
pub enum DeferredResource {
    Pipeline(vk::Pipeline),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    ImageView(vk::ImageView),
}

/// Retirement ledger: every entry counts down the frame ticks left in its
/// grace period, and is handed back for destruction when it reaches zero.
#[derive(Debug, Default)]
struct RetiredObjects {
    entries: Vec<(DeferredResource, u32)>,
}

impl RetiredObjects {
    fn retire(&mut self, resource: DeferredResource) {
        self.entries.push((resource, RETIRE_GRACE_FRAMES));
    }

    /// Count one frame tick down on every entry; entries whose grace period
    /// ended come back ready for destruction.
    fn tick(&mut self) -> Vec<DeferredResource> {
        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        for (resource, frames_left) in self.entries.drain(..) {
            if frames_left <= 1 {
                ready.push(resource);
            } else {
                waiting.push((resource, frames_left - 1));
            }
        }
        self.entries = waiting;
        ready
    }

    /// Hand back everything, grace periods ignored. Only valid once the
    /// device is known idle.
    fn drain(&mut self) -> Vec<DeferredResource> {
        self.entries.drain(..).map(|(resource, _)| resource).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Everything the graph consumes from the surrounding Vulkan application.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct GraphContext {
    #[derivative(Debug = "ignore")]
    device: Option<ash::Device>,
    #[derivative(Debug = "ignore")]
    allocator: Option<Mutex<vk_alloc::Allocator>>,
    pipeline_cache: vk::PipelineCache,
    separate_depth_stencil_layouts: bool,
    queue_family_index: u32,
    #[derivative(Debug = "ignore")]
    retired: Mutex<RetiredObjects>,
}

impl GraphContext {
    /// Create a context backed by a real device.
    pub fn new(
        device: ash::Device,
        allocator: vk_alloc::Allocator,
        pipeline_cache: vk::PipelineCache,
        separate_depth_stencil_layouts: bool,
    ) -> Self {
        Self {
            device: Some(device),
            allocator: Some(Mutex::new(allocator)),
            pipeline_cache,
            separate_depth_stencil_layouts,
            queue_family_index: 0,
            retired: Mutex::new(RetiredObjects::default()),
        }
    }

    /// Set the queue family command pools are created against.
    pub fn with_queue_family_index(mut self, queue_family_index: u32) -> Self {
        self.queue_family_index = queue_family_index;
        self
    }

    /// Create a context without a device. Compilation, scheduling and barrier
    /// planning all work; every Vulkan object comes back null.
    pub fn headless() -> Self {
        Self {
            device: None,
            allocator: None,
            pipeline_cache: vk::PipelineCache::null(),
            separate_depth_stencil_layouts: false,
            queue_family_index: 0,
            retired: Mutex::new(RetiredObjects::default()),
        }
    }

    /// Same as [`GraphContext::headless`], but reporting support for separate
    /// depth/stencil layouts.
    pub fn headless_with_separate_depth_stencil() -> Self {
        let mut context = Self::headless();
        context.separate_depth_stencil_layouts = true;
        context
    }

    /// The logical device, if one was provided.
    pub fn device(&self) -> Option<&ash::Device> {
        self.device.as_ref()
    }

    /// The pipeline cache handed to every pipeline creation call.
    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    /// The queue family command pools are created against.
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Whether the device advertises `separateDepthStencilLayouts`. When it
    /// does not, depth-only and stencil-only barriers on combined formats are
    /// widened to cover both aspects.
    pub fn separate_depth_stencil_layouts(&self) -> bool {
        self.separate_depth_stencil_layouts
    }

    /// Run `f` with the memory allocator. Returns `Ok(None)` when the context
    /// is headless.
    pub fn with_allocator<T>(
        &self,
        f: impl FnOnce(&mut vk_alloc::Allocator) -> Result<T>,
    ) -> Result<Option<T>> {
        match &self.allocator {
            None => Ok(None),
            Some(allocator) => {
                let mut allocator = allocator.lock().map_err(Error::from)?;
                f(&mut allocator).map(Some)
            }
        }
    }

    /// Hand back an allocation for freeing. No-op when headless.
    pub fn free_allocation(&self, allocation: vk_alloc::Allocation) {
        if let Some(allocator) = &self.allocator {
            if let Ok(mut allocator) = allocator.lock() {
                let _ = allocator.free(allocation);
            }
        }
    }

    /// Retire a Vulkan object: it stays alive for a few more frame ticks in
    /// case in-flight command buffers still reference it, then gets
    /// destroyed by [`GraphContext::next_frame`].
    pub fn defer_destroy(&self, resource: DeferredResource) {
        if let Ok(mut retired) = self.retired.lock() {
            retired.retire(resource);
        }
    }

    /// Number of objects currently waiting in the retirement ledger.
    pub fn deferred_len(&self) -> usize {
        self.retired.lock().map(|retired| retired.len()).unwrap_or(0)
    }

    /// Advance the retirement clock by one frame and destroy every object
    /// whose grace period ended. Call once per frame tick; fence waits do
    /// this as well.
    pub fn next_frame(&self) {
        let ready = match self.retired.lock() {
            Ok(mut retired) => retired.tick(),
            Err(_) => return,
        };
        self.destroy_retired(ready);
    }

    /// Destroy every retired object, regardless of age. Only valid once the
    /// device is idle or all owning fences have been waited on.
    pub fn flush_deferred(&self) {
        let ready = match self.retired.lock() {
            Ok(mut retired) => retired.drain(),
            Err(_) => return,
        };
        self.destroy_retired(ready);
    }

    fn destroy_retired(&self, resources: Vec<DeferredResource>) {
        let Some(device) = self.device() else {
            return;
        };
        for resource in resources {
            unsafe {
                match resource {
                    DeferredResource::Pipeline(pipeline) => {
                        device.destroy_pipeline(pipeline, None)
                    }
                    DeferredResource::RenderPass(render_pass) => {
                        device.destroy_render_pass(render_pass, None)
                    }
                    DeferredResource::Framebuffer(framebuffer) => {
                        device.destroy_framebuffer(framebuffer, None)
                    }
                    DeferredResource::ImageView(view) => device.destroy_image_view(view, None),
                }
            }
        }
    }
}

impl Drop for GraphContext {
    fn drop(&mut self) {
        self.flush_deferred();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retired_objects_survive_the_grace_period() {
        let mut retired = RetiredObjects::default();
        retired.retire(DeferredResource::Pipeline(vk::Pipeline::null()));
        for _ in 1..RETIRE_GRACE_FRAMES {
            assert!(retired.tick().is_empty());
        }
        assert_eq!(retired.tick().len(), 1);
        assert_eq!(retired.len(), 0);
    }

    #[test]
    fn entries_age_independently() {
        let mut retired = RetiredObjects::default();
        retired.retire(DeferredResource::RenderPass(vk::RenderPass::null()));
        assert!(retired.tick().is_empty());
        retired.retire(DeferredResource::Framebuffer(vk::Framebuffer::null()));
        for _ in 2..RETIRE_GRACE_FRAMES {
            assert!(retired.tick().is_empty());
        }
        assert_eq!(retired.tick().len(), 1);
        assert_eq!(retired.tick().len(), 1);
    }

    #[test]
    fn drain_ignores_grace_periods() {
        let mut retired = RetiredObjects::default();
        retired.retire(DeferredResource::Pipeline(vk::Pipeline::null()));
        retired.retire(DeferredResource::ImageView(vk::ImageView::null()));
        assert_eq!(retired.drain().len(), 2);
        assert_eq!(retired.len(), 0);
    }

    #[test]
    fn context_ledger_is_observable() {
        let context = GraphContext::headless();
        context.defer_destroy(DeferredResource::Pipeline(vk::Pipeline::null()));
        assert_eq!(context.deferred_len(), 1);
        for _ in 0..RETIRE_GRACE_FRAMES {
            context.next_frame();
        }
        assert_eq!(context.deferred_len(), 0);
    }
}
