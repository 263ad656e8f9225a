//! The recordable form of a pass, and the lifecycle shared by all pass kinds.
//!
//! A [`RunnablePass`] owns the Vulkan objects of one declared pass: its
//! command pool, one enabled (and optionally one disabled) command buffer per
//! pass index, a semaphore and a fence. The per-kind behaviour — what
//! commands to record — is supplied through the [`PassExecutor`] trait, with
//! a blanket implementation for plain closures so simple passes don't need a
//! type of their own.
//!
//! At record time the base walks the pass's attachments and asks the
//! [`RecordContext`] for the `from → needed` barrier of every view before
//! invoking the executor, then emits `needed → to` barriers for outputs whose
//! consumers (or the graph boundary) expect a different layout.

pub mod compute;
pub mod copy;
pub mod graph;
pub mod mesh;
pub mod mipmaps;
pub mod pipeline;
pub mod quad;
pub mod render_pass;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::error::map_vk;
use crate::graph::attachment::Attachment;
use crate::graph::pass::FramePass;
use crate::record::{
    make_layout_state, AccessState, ImplicitAction, LayoutState, PipelineState, RecordContext,
};
use crate::resource::buffer::BufferSubresourceRange;
use crate::resource::image::ImageViewId;
use crate::sync::{Fence, Semaphore, SemaphoreWait};

pub use self::graph::RunnableGraph;

/// Layout journey of one view through one pass: the layout it arrives in,
/// the layout the pass needs, and the layout the next consumer expects.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LayoutTransition {
    pub from: LayoutState,
    pub needed: LayoutState,
    pub to: LayoutState,
}

/// Access journey of one buffer range through one pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessTransition {
    pub from: AccessState,
    pub needed: AccessState,
    pub to: AccessState,
}

/// Per-kind behaviour of a runnable pass: the callback bundle invoked by the
/// base lifecycle.
pub trait PassExecutor {
    /// Called once, after the base resources exist. Create pipelines and
    /// descriptor sets here.
    fn initialise(&mut self) -> Result<()> {
        Ok(())
    }

    /// Record the pass's commands. Pre-pass barriers have already been
    /// emitted.
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()>;

    /// Record the disabled variant. Implicit actions have already run.
    fn record_disabled(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let _ = (record, command_buffer, index);
        Ok(())
    }

    /// Whether the executor wraps its work in a `VkRenderPass`. The base
    /// then leaves colour/depth/stencil target transitions to the render
    /// pass itself.
    fn uses_render_pass(&self) -> bool {
        false
    }

    /// Layout journeys are forwarded here as they are registered, for
    /// executors that bake layouts into their own objects.
    fn register_layout_transition(
        &mut self,
        pass_index: u32,
        view: &ImageViewId,
        transition: LayoutTransition,
    ) {
        let _ = (pass_index, view, transition);
    }
}

impl<F> PassExecutor for F
where
    F: FnMut(&mut RecordContext, vk::CommandBuffer, u32) -> Result<()>,
{
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        self(record, command_buffer, index)
    }
}

/// An executor that records nothing. Used for pure synchronization points.
pub struct EmptyExecutor;

impl PassExecutor for EmptyExecutor {
    fn record(&mut self, _: &mut RecordContext, _: vk::CommandBuffer, _: u32) -> Result<()> {
        Ok(())
    }
}

/// Construction-time configuration of a runnable pass.
pub struct Config {
    /// Number of pass indices (command buffers, descriptor sets, resolved
    /// views) this pass cycles through.
    pub max_pass_count: u32,
    /// Allocate a disabled command buffer per index and allow re-recording.
    pub resettable: bool,
    /// Callback deciding the current pass index each frame.
    pub pass_index: Option<Box<dyn Fn() -> u32>>,
    /// Callback deciding whether the pass runs this frame.
    pub enabled: Option<Box<dyn Fn() -> bool>>,
    /// Deferred actions that must still happen when the pass is disabled.
    pub implicit_actions: Vec<(ImageViewId, ImplicitAction)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_pass_count: 1,
            resettable: false,
            pass_index: None,
            enabled: None,
            implicit_actions: Vec::new(),
        }
    }
}

impl Config {
    pub fn with_max_pass_count(mut self, max_pass_count: u32) -> Self {
        self.max_pass_count = max_pass_count.max(1);
        self
    }

    pub fn resettable(mut self) -> Self {
        self.resettable = true;
        self
    }

    pub fn with_pass_index(mut self, pass_index: impl Fn() -> u32 + 'static) -> Self {
        self.pass_index = Some(Box::new(pass_index));
        self
    }

    pub fn with_enabled(mut self, enabled: impl Fn() -> bool + 'static) -> Self {
        self.enabled = Some(Box::new(enabled));
        self
    }

    pub fn with_implicit_action(mut self, view: ImageViewId, action: ImplicitAction) -> Self {
        self.implicit_actions.push((view, action));
        self
    }
}

/// Builds the runnable form of a pass once the graph is compiled.
pub type RunnableCreator =
    Box<dyn FnOnce(Arc<FramePass>, Arc<GraphContext>, &mut RunnableGraph) -> Result<RunnablePass>>;

struct CommandBuffer {
    handle: vk::CommandBuffer,
    recorded: bool,
}

/// The recordable form of a declared pass.
pub struct RunnablePass {
    pass: Arc<FramePass>,
    context: Arc<GraphContext>,
    executor: Box<dyn PassExecutor>,
    pipeline_state: PipelineState,
    is_compute: bool,
    config: Config,
    command_pool: vk::CommandPool,
    command_buffers: Vec<CommandBuffer>,
    disabled_command_buffers: Vec<CommandBuffer>,
    semaphore: Option<Semaphore>,
    fence: Option<Fence>,
    submitted: bool,
    layout_transitions: Vec<HashMap<u32, LayoutTransition>>,
    access_transitions: Vec<HashMap<u32, AccessTransition>>,
}

impl RunnablePass {
    pub fn new(
        pass: Arc<FramePass>,
        context: Arc<GraphContext>,
        executor: impl PassExecutor + 'static,
        pipeline_state: PipelineState,
        is_compute: bool,
        config: Config,
    ) -> Self {
        let max = config.max_pass_count.max(1) as usize;
        Self {
            pass,
            context,
            executor: Box::new(executor),
            pipeline_state,
            is_compute,
            config,
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            disabled_command_buffers: Vec::new(),
            semaphore: None,
            fence: None,
            submitted: false,
            layout_transitions: vec![HashMap::new(); max],
            access_transitions: vec![HashMap::new(); max],
        }
    }

    /// Creator for a pass that records no commands of its own.
    pub fn empty_creator() -> RunnableCreator {
        Box::new(|pass, context, _graph| {
            Ok(RunnablePass::new(
                pass,
                context,
                EmptyExecutor,
                crate::record::make_pipeline_state(vk::PipelineStageFlags::BOTTOM_OF_PIPE),
                false,
                Config::default(),
            ))
        })
    }

    /// Creator wrapping a plain record closure.
    pub fn creator_from_fn(
        stage: vk::PipelineStageFlags,
        record: impl FnMut(&mut RecordContext, vk::CommandBuffer, u32) -> Result<()> + 'static,
    ) -> RunnableCreator {
        Box::new(move |pass, context, _graph| {
            Ok(RunnablePass::new(
                pass,
                context,
                record,
                crate::record::make_pipeline_state(stage),
                stage.contains(vk::PipelineStageFlags::COMPUTE_SHADER),
                Config::default(),
            ))
        })
    }

    pub fn pass(&self) -> &Arc<FramePass> {
        &self.pass
    }

    pub fn max_pass_count(&self) -> u32 {
        self.config.max_pass_count.max(1)
    }

    /// The pipeline state this pass's work runs under, used for subpass
    /// dependencies and semaphore wait masks.
    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline_state
    }

    pub fn is_compute(&self) -> bool {
        self.is_compute
    }

    /// The pass index recorded and submitted this frame.
    pub fn pass_index(&self) -> u32 {
        match &self.config.pass_index {
            Some(callback) => callback().min(self.max_pass_count() - 1),
            None => 0,
        }
    }

    /// Whether the pass runs this frame. Disabled passes submit their
    /// disabled command buffer instead.
    pub fn is_enabled(&self) -> bool {
        match &self.config.enabled {
            Some(callback) => callback(),
            None => true,
        }
    }

    pub(crate) fn implicit_actions(&self) -> &[(ImageViewId, ImplicitAction)] {
        &self.config.implicit_actions
    }

    /// Store the layout journey of `view` at `pass_index`.
    pub fn register_layout_transition(
        &mut self,
        pass_index: u32,
        view: &ImageViewId,
        transition: LayoutTransition,
    ) {
        self.layout_transitions[pass_index as usize].insert(view.id(), transition);
        self.executor
            .register_layout_transition(pass_index, view, transition);
    }

    /// Store the access journey of a buffer at `pass_index`.
    pub fn register_access_transition(
        &mut self,
        pass_index: u32,
        buffer: u32,
        transition: AccessTransition,
    ) {
        self.access_transitions[pass_index as usize].insert(buffer, transition);
    }

    /// The layout journey of `view` at `pass_index`, falling back to the
    /// attachment-derived wanted state.
    pub fn layout_transition(&self, pass_index: u32, view: &ImageViewId) -> Option<LayoutTransition> {
        self.layout_transitions
            .get(pass_index as usize)
            .and_then(|map| map.get(&view.id()))
            .copied()
    }

    pub fn access_transition(&self, pass_index: u32, buffer: u32) -> Option<AccessTransition> {
        self.access_transitions
            .get(pass_index as usize)
            .and_then(|map| map.get(&buffer))
            .copied()
    }

    /// Create the command pool, command buffers, semaphore and fence, then
    /// let the executor create its own resources.
    pub fn initialise(&mut self) -> Result<()> {
        let max = self.max_pass_count();
        if let Some(device) = self.context.device() {
            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                p_next: std::ptr::null(),
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                queue_family_index: self.context.queue_family_index(),
            };
            self.command_pool = map_vk("CommandPool creation", unsafe {
                device.create_command_pool(&pool_info, None)
            })?;
            let allocate = |count: u32| -> Result<Vec<vk::CommandBuffer>> {
                let info = vk::CommandBufferAllocateInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                    p_next: std::ptr::null(),
                    command_pool: self.command_pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: count,
                };
                Ok(map_vk("CommandBuffer allocation", unsafe {
                    device.allocate_command_buffers(&info)
                })?)
            };
            self.command_buffers = allocate(max)?
                .into_iter()
                .map(|handle| CommandBuffer {
                    handle,
                    recorded: false,
                })
                .collect();
            if self.wants_disabled_buffers() {
                self.disabled_command_buffers = allocate(max)?
                    .into_iter()
                    .map(|handle| CommandBuffer {
                        handle,
                        recorded: false,
                    })
                    .collect();
            }
        } else {
            self.command_buffers = (0..max)
                .map(|_| CommandBuffer {
                    handle: vk::CommandBuffer::null(),
                    recorded: false,
                })
                .collect();
            if self.wants_disabled_buffers() {
                self.disabled_command_buffers = (0..max)
                    .map(|_| CommandBuffer {
                        handle: vk::CommandBuffer::null(),
                        recorded: false,
                    })
                    .collect();
            }
        }
        self.semaphore = Some(Semaphore::new(self.context.clone())?);
        self.fence = Some(Fence::new(self.context.clone(), false)?);
        self.executor.initialise()
    }

    fn wants_disabled_buffers(&self) -> bool {
        self.config.resettable
            || !self.config.implicit_actions.is_empty()
            || self.config.enabled.is_some()
    }

    /// Record the active variant (enabled or disabled) for the current pass
    /// index.
    pub fn record_current(&mut self, record: &mut RecordContext) -> Result<()> {
        let index = self.pass_index();
        let enabled = self.is_enabled();
        record.set_pass_enabled(self.pass.id(), enabled);
        if enabled {
            self.record_enabled(record, index)
        } else {
            self.record_disabled_variant(record, index)
        }
    }

    /// Record the enabled command buffers of every pass index. Used for
    /// ahead-of-time recording of all variants.
    pub fn record_all(&mut self, record: &mut RecordContext) -> Result<()> {
        record.set_pass_enabled(self.pass.id(), true);
        for index in 0..self.max_pass_count() {
            self.record_enabled(record, index)?;
        }
        Ok(())
    }

    fn record_enabled(&mut self, record: &mut RecordContext, index: u32) -> Result<()> {
        let handle = self.command_buffers[index as usize].handle;
        self.begin(handle)?;
        self.record_into(record, handle, index)?;
        self.end(handle)?;
        self.command_buffers[index as usize].recorded = true;
        Ok(())
    }

    fn record_disabled_variant(&mut self, record: &mut RecordContext, index: u32) -> Result<()> {
        // A pass can only report disabled through an enabled callback, and
        // any pass carrying one gets its disabled buffers at initialise time.
        let handle = self.disabled_command_buffers[index as usize].handle;
        self.begin(handle)?;
        let views: Vec<ImageViewId> = self
            .config
            .implicit_actions
            .iter()
            .map(|(view, _)| view.resolve(index))
            .collect();
        for view in views {
            record.run_implicit_transition(handle, index, &view)?;
        }
        self.executor.record_disabled(record, handle, index)?;
        self.end(handle)?;
        self.disabled_command_buffers[index as usize].recorded = true;
        Ok(())
    }

    /// The pre-barrier walk, the executor's record callback, and the
    /// post-pass barriers, recorded into an externally managed command
    /// buffer.
    pub fn record_into(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let separate = self.context.separate_depth_stencil_layouts();
        let render_pass_targets = self.executor.uses_render_pass();
        let attachments: Vec<Attachment> = self.pass.attachments().to_vec();

        for attachment in &attachments {
            if let Some(view) = attachment.view(index) {
                record.run_implicit_transition(command_buffer, index, &view)?;
            }
        }

        for attachment in &attachments {
            if attachment.is_image() {
                let Some(view) = attachment.view(index) else {
                    continue;
                };
                let is_target = attachment.flags.is_colour()
                    || attachment.flags.is_depth()
                    || attachment.flags.is_stencil();
                if is_target && render_pass_targets {
                    // The render pass transitions its own targets through
                    // initial/final layouts.
                    continue;
                }
                if attachment.flags.is_clearable() {
                    self.clear_image(record, command_buffer, attachment, &view)?;
                }
                let transition = self
                    .layout_transition(index, &view)
                    .unwrap_or_else(|| self.default_transition(attachment, separate));
                record.memory_barrier_from(
                    command_buffer,
                    &view,
                    transition.from.layout,
                    transition.needed,
                )?;
            } else {
                let Some(view) = attachment.buffer_view(index) else {
                    continue;
                };
                if attachment.flags.is_clearable() {
                    self.clear_buffer(record, command_buffer, &view)?;
                }
                let wanted = self
                    .access_transition(index, view.buffer().id())
                    .map(|transition| transition.needed)
                    .unwrap_or_else(|| attachment.wanted_access());
                record.buffer_memory_barrier(command_buffer, view.buffer(), &view.range(), wanted)?;
            }
        }

        self.executor.record(record, command_buffer, index)?;

        for attachment in &attachments {
            if !attachment.flags.is_output() || !attachment.is_image() {
                continue;
            }
            let Some(view) = attachment.view(index) else {
                continue;
            };
            let is_target = attachment.flags.is_colour()
                || attachment.flags.is_depth()
                || attachment.flags.is_stencil();
            if is_target && render_pass_targets {
                continue;
            }
            if let Some(transition) = self.layout_transition(index, &view) {
                if transition.to != transition.needed
                    && transition.to.layout != vk::ImageLayout::UNDEFINED
                {
                    record.memory_barrier(command_buffer, &view, transition.to)?;
                }
            }
        }
        Ok(())
    }

    fn default_transition(&self, attachment: &Attachment, separate: bool) -> LayoutTransition {
        let needed = attachment.wanted_state(separate);
        LayoutTransition {
            from: make_layout_state(vk::ImageLayout::UNDEFINED),
            needed,
            to: needed,
        }
    }

    fn clear_image(
        &self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        attachment: &Attachment,
        view: &ImageViewId,
    ) -> Result<()> {
        record.memory_barrier(
            command_buffer,
            view,
            make_layout_state(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
        )?;
        if let Some(device) = self.context.device() {
            let image = record.handler().create_image(record.context(), view.image())?;
            let clear = attachment
                .image_attachment()
                .map(|image| image.clear_value)
                .unwrap_or_default();
            let range: vk::ImageSubresourceRange = view.virtual_range().into();
            unsafe {
                device.cmd_clear_color_image(
                    command_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear.to_vk_colour(),
                    &[range],
                );
            }
        }
        Ok(())
    }

    fn clear_buffer(
        &self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        view: &crate::resource::buffer::BufferViewId,
    ) -> Result<()> {
        let range: BufferSubresourceRange = view.range();
        record.buffer_memory_barrier(
            command_buffer,
            view.buffer(),
            &range,
            AccessState {
                access: vk::AccessFlags::TRANSFER_WRITE,
                stage: vk::PipelineStageFlags::TRANSFER,
            },
        )?;
        if let Some(device) = self.context.device() {
            let buffer = record.handler().create_buffer(record.context(), view.buffer())?;
            unsafe {
                device.cmd_fill_buffer(command_buffer, buffer, range.offset, range.size, 0);
            }
        }
        Ok(())
    }

    fn begin(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        if let Some(device) = self.context.device() {
            let info = vk::CommandBufferBeginInfo::default();
            map_vk("CommandBuffer begin", unsafe {
                device.begin_command_buffer(command_buffer, &info)
            })?;
        }
        Ok(())
    }

    fn end(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        if let Some(device) = self.context.device() {
            map_vk("CommandBuffer end", unsafe { device.end_command_buffer(command_buffer) })?;
        }
        Ok(())
    }

    /// Submit the current pass index's command buffer, waiting on `to_wait`
    /// and signaling this pass's semaphore.
    pub fn run(&mut self, to_wait: SemaphoreWait, queue: vk::Queue) -> Result<SemaphoreWait> {
        let index = self.pass_index() as usize;
        let enabled = self.is_enabled();
        let buffer = if enabled {
            &self.command_buffers[index]
        } else {
            &self.disabled_command_buffers[index]
        };
        let semaphore = self
            .semaphore
            .as_ref()
            .map(|semaphore| semaphore.handle())
            .unwrap_or_else(vk::Semaphore::null);
        if let Some(device) = self.context.device() {
            let wait_count = u32::from(!to_wait.is_none());
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                p_next: std::ptr::null(),
                wait_semaphore_count: wait_count,
                p_wait_semaphores: &to_wait.semaphore,
                p_wait_dst_stage_mask: &to_wait.dst_stage_mask,
                command_buffer_count: 1,
                p_command_buffers: &buffer.handle,
                signal_semaphore_count: 1,
                p_signal_semaphores: &semaphore,
            };
            let fence = self
                .fence
                .as_ref()
                .map(|fence| fence.handle())
                .unwrap_or_else(vk::Fence::null);
            map_vk("Queue submit", unsafe {
                device.queue_submit(queue, &[submit], fence)
            })?;
            self.submitted = true;
        }
        Ok(SemaphoreWait {
            semaphore,
            dst_stage_mask: if self.is_compute {
                vk::PipelineStageFlags::COMPUTE_SHADER
            } else if self.pipeline_state.stage.is_empty() {
                vk::PipelineStageFlags::TOP_OF_PIPE
            } else {
                self.pipeline_state.stage
            },
        })
    }

    /// Invalidate all recordings; the next `record_*` call re-records. Waits
    /// on the pass's fence first when work was submitted.
    pub fn reset_command_buffer(&mut self) -> Result<()> {
        if self.submitted {
            if let Some(fence) = &self.fence {
                fence.wait(u64::MAX)?;
                fence.reset()?;
            }
            self.submitted = false;
        }
        for buffer in &mut self.command_buffers {
            buffer.recorded = false;
        }
        for buffer in &mut self.disabled_command_buffers {
            buffer.recorded = false;
        }
        Ok(())
    }

    /// Whether the current index's active variant has been recorded.
    pub fn is_recorded(&self) -> bool {
        let index = self.pass_index() as usize;
        if self.is_enabled() {
            self.command_buffers
                .get(index)
                .map(|buffer| buffer.recorded)
                .unwrap_or(false)
        } else {
            self.disabled_command_buffers
                .get(index)
                .map(|buffer| buffer.recorded)
                .unwrap_or(false)
        }
    }
}

impl Drop for RunnablePass {
    fn drop(&mut self) {
        if self.command_pool != vk::CommandPool::null() {
            if let Some(device) = self.context.device() {
                unsafe { device.destroy_command_pool(self.command_pool, None) };
            }
        }
    }
}
