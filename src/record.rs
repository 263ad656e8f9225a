//! The per-record state machine that tracks image layouts and buffer access
//! states, and emits the minimum set of pipeline barriers.
//!
//! A [`RecordContext`] lives for one `record()` sweep over the graph. It
//! tracks, per `(image, layer, mip)` subresource, the `(layout, access,
//! stage)` triple established by the last emitted barrier, and per buffer the
//! `(access, stage)` pair. [`RecordContext::memory_barrier`] compares the
//! tracked state with the wanted one and only emits a `vkCmdPipelineBarrier`
//! when they differ; the tracked state is updated either way, so the maps are
//! always the single source of truth for "what layout is this subresource in
//! right now".
//!
//! State bookkeeping also runs without a device, which keeps the whole
//! barrier plan observable in headless tests; only the actual Vulkan call is
//! skipped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::graph::pass::PassId;
use crate::resource::buffer::{BufferId, BufferSubresourceRange, BufferViewId};
use crate::resource::handler::ResourceHandler;
use crate::resource::image::{
    is_colour_format, is_depth_stencil_format, virtual_range, ImageId, ImageSubresourceRange,
    ImageViewId,
};

/// Running `(layout, access, stage)` state of an image subresource.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LayoutState {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

impl Default for LayoutState {
    fn default() -> Self {
        make_layout_state(vk::ImageLayout::UNDEFINED)
    }
}

/// Running `(access, stage)` state of a buffer range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessState {
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

impl Default for AccessState {
    fn default() -> Self {
        Self {
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }
    }
}

/// The synchronization profile of a pass: what it writes and where in the
/// pipeline it does so. Used to gate subpass dependencies and semaphore
/// waits between neighbouring passes.
pub type PipelineState = AccessState;

/// Derive the access mask a layout implies.
pub fn layout_access_mask(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::PRESENT_SRC_KHR | vk::ImageLayout::SHARED_PRESENT_KHR => {
            vk::AccessFlags::MEMORY_READ
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::GENERAL => {
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
        }
        vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        _ => vk::AccessFlags::empty(),
    }
}

/// Derive the pipeline stage a layout is naturally used in.
pub fn layout_stage_mask(layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags::HOST,
        vk::ImageLayout::GENERAL => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        vk::ImageLayout::PRESENT_SRC_KHR | vk::ImageLayout::SHARED_PRESENT_KHR => {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        }
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        _ => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
    }
}

/// Build a full [`LayoutState`] from a layout, deriving access and stage.
pub fn make_layout_state(layout: vk::ImageLayout) -> LayoutState {
    LayoutState {
        layout,
        access: layout_access_mask(layout),
        stage: layout_stage_mask(layout),
    }
}

/// Derive a [`PipelineState`] from the stage a pass runs in.
pub fn make_pipeline_state(stage: vk::PipelineStageFlags) -> PipelineState {
    let access = if stage.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT) {
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE
    } else if stage.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
        || stage.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
    {
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
    } else if stage.contains(vk::PipelineStageFlags::COMPUTE_SHADER) {
        vk::AccessFlags::SHADER_WRITE
    } else if stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER)
        || stage.contains(vk::PipelineStageFlags::VERTEX_SHADER)
    {
        vk::AccessFlags::SHADER_READ
    } else if stage.contains(vk::PipelineStageFlags::TRANSFER) {
        vk::AccessFlags::TRANSFER_WRITE
    } else {
        vk::AccessFlags::empty()
    };
    PipelineState {
        access,
        stage,
    }
}

/// Per-mip layout states of one array layer.
pub type MipLayoutStates = BTreeMap<u32, LayoutState>;
/// Per-layer, per-mip layout table of one image.
pub type LayerLayoutStates = BTreeMap<u32, MipLayoutStates>;

/// Write `state` into every `(layer, mip)` cell covered by `range`.
pub fn add_subresource_range_layout(
    layers: &mut LayerLayoutStates,
    range: &ImageSubresourceRange,
    state: LayoutState,
) {
    for layer in range.base_array_layer..range.base_array_layer + range.layer_count {
        let mips = layers.entry(layer).or_default();
        for level in range.base_mip_level..range.base_mip_level + range.level_count {
            mips.insert(level, state);
        }
    }
}

/// Query the combined state of a range. Cells sharing a layout OR their
/// access masks together; when the range spans several layouts the first one
/// wins. An untouched range reports `UNDEFINED`.
pub fn get_subresource_range_layout(
    layers: &LayerLayoutStates,
    range: &ImageSubresourceRange,
) -> LayoutState {
    let mut states: BTreeMap<i32, LayoutState> = BTreeMap::new();
    for layer in range.base_array_layer..range.base_array_layer + range.layer_count {
        let Some(mips) = layers.get(&layer) else {
            continue;
        };
        for level in range.base_mip_level..range.base_mip_level + range.level_count {
            if let Some(state) = mips.get(&level) {
                states
                    .entry(state.layout.as_raw())
                    .and_modify(|existing| existing.access |= state.access)
                    .or_insert(*state);
            }
        }
    }
    match states.into_values().next() {
        Some(state) => state,
        None => make_layout_state(vk::ImageLayout::UNDEFINED),
    }
}

/// A deferred command registered against a pass, executed only if that pass
/// is disabled for the frame.
pub type ImplicitAction = Arc<dyn Fn(&mut RecordContext, vk::CommandBuffer, u32) -> Result<()>>;

struct ImplicitTransition {
    pass: PassId,
    view: ImageViewId,
    action: ImplicitAction,
}

/// Per-record mutable state used to decide and emit pipeline barriers.
pub struct RecordContext {
    handler: Arc<ResourceHandler>,
    context: Arc<GraphContext>,
    images: HashMap<u32, LayerLayoutStates>,
    buffers: HashMap<u32, AccessState>,
    implicit_transitions: Vec<ImplicitTransition>,
    enabled_passes: HashMap<PassId, bool>,
    prev_pipeline_state: PipelineState,
    curr_pipeline_state: PipelineState,
    next_pipeline_state: PipelineState,
    image_barriers: u32,
    buffer_barriers: u32,
}

impl RecordContext {
    pub fn new(handler: Arc<ResourceHandler>, context: Arc<GraphContext>) -> Self {
        Self {
            handler,
            context,
            images: HashMap::new(),
            buffers: HashMap::new(),
            implicit_transitions: Vec::new(),
            enabled_passes: HashMap::new(),
            prev_pipeline_state: PipelineState::default(),
            curr_pipeline_state: PipelineState::default(),
            next_pipeline_state: PipelineState::default(),
            image_barriers: 0,
            buffer_barriers: 0,
        }
    }

    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    pub fn handler(&self) -> &Arc<ResourceHandler> {
        &self.handler
    }

    /// Number of image barriers emitted so far in this record.
    pub fn image_barrier_count(&self) -> u32 {
        self.image_barriers
    }

    /// Number of buffer barriers emitted so far in this record.
    pub fn buffer_barrier_count(&self) -> u32 {
        self.buffer_barriers
    }

    /// The pipeline states of the previous, current and next pass in the
    /// schedule, updated by the runnable graph as it walks the order.
    pub fn pipeline_states(&self) -> (PipelineState, PipelineState, PipelineState) {
        (
            self.prev_pipeline_state,
            self.curr_pipeline_state,
            self.next_pipeline_state,
        )
    }

    pub fn prev_pipeline_state(&self) -> PipelineState {
        self.prev_pipeline_state
    }

    pub fn next_pipeline_state(&self) -> PipelineState {
        self.next_pipeline_state
    }

    pub(crate) fn set_pipeline_states(
        &mut self,
        prev: PipelineState,
        curr: PipelineState,
        next: PipelineState,
    ) {
        self.prev_pipeline_state = prev;
        self.curr_pipeline_state = curr;
        self.next_pipeline_state = next;
    }

    /// Mark a pass as enabled or disabled for this record. Implicit
    /// transitions consult this when deciding whether to fire.
    pub fn set_pass_enabled(&mut self, pass: PassId, enabled: bool) {
        self.enabled_passes.insert(pass, enabled);
    }

    /// Whether a pass is enabled this record. Unknown passes count as enabled.
    pub fn is_pass_enabled(&self, pass: PassId) -> bool {
        self.enabled_passes.get(&pass).copied().unwrap_or(true)
    }

    /// Prime the tracked layout of a view, without emitting a barrier.
    pub fn set_layout_state(&mut self, view: &ImageViewId, state: LayoutState) {
        let data = view.data();
        self.set_image_layout_state(&data.image, data.view_type, &data.range, state);
    }

    /// Prime the tracked layout of an image range, without emitting a barrier.
    pub fn set_image_layout_state(
        &mut self,
        image: &ImageId,
        view_type: vk::ImageViewType,
        range: &ImageSubresourceRange,
        state: LayoutState,
    ) {
        let range = virtual_range(image.data(), view_type, range);
        let layers = self.images.entry(image.id()).or_default();
        add_subresource_range_layout(layers, &range, state);
    }

    /// The tracked layout of a view.
    pub fn layout_state(&self, view: &ImageViewId) -> LayoutState {
        let data = view.data();
        self.image_layout_state(&data.image, data.view_type, &data.range)
    }

    /// The tracked layout of an image range.
    pub fn image_layout_state(
        &self,
        image: &ImageId,
        view_type: vk::ImageViewType,
        range: &ImageSubresourceRange,
    ) -> LayoutState {
        match self.images.get(&image.id()) {
            Some(layers) => {
                let range = virtual_range(image.data(), view_type, range);
                get_subresource_range_layout(layers, &range)
            }
            None => make_layout_state(vk::ImageLayout::UNDEFINED),
        }
    }

    /// Prime the tracked access state of a buffer range.
    pub fn set_access_state(
        &mut self,
        buffer: &BufferId,
        _range: &BufferSubresourceRange,
        state: AccessState,
    ) {
        self.buffers.insert(buffer.id(), state);
    }

    /// The tracked access state of a buffer range.
    pub fn access_state(&self, buffer: &BufferId, _range: &BufferSubresourceRange) -> AccessState {
        self.buffers.get(&buffer.id()).copied().unwrap_or_default()
    }

    /// Transition a view to `wanted`, if it is not already there.
    pub fn memory_barrier(
        &mut self,
        command_buffer: vk::CommandBuffer,
        view: &ImageViewId,
        wanted: LayoutState,
    ) -> Result<()> {
        let data = view.data();
        self.image_memory_barrier(
            command_buffer,
            &data.image,
            data.view_type,
            &data.range,
            vk::ImageLayout::UNDEFINED,
            wanted,
            false,
        )
    }

    /// Transition a view to `wanted`. `initial_layout` is used as the source
    /// state when the view was never seen before in this record.
    pub fn memory_barrier_from(
        &mut self,
        command_buffer: vk::CommandBuffer,
        view: &ImageViewId,
        initial_layout: vk::ImageLayout,
        wanted: LayoutState,
    ) -> Result<()> {
        let data = view.data();
        self.image_memory_barrier(
            command_buffer,
            &data.image,
            data.view_type,
            &data.range,
            initial_layout,
            wanted,
            false,
        )
    }

    /// Transition an image range to `wanted`.
    ///
    /// When the tracked state is `UNDEFINED`, `initial_layout` (or, failing
    /// that, the state derived from the wanted layout) supplies the source
    /// side of the barrier. With `force` the barrier is emitted even when the
    /// computed transition is an identity.
    #[allow(clippy::too_many_arguments)]
    pub fn image_memory_barrier(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image: &ImageId,
        view_type: vk::ImageViewType,
        range: &ImageSubresourceRange,
        initial_layout: vk::ImageLayout,
        wanted: LayoutState,
        force: bool,
    ) -> Result<()> {
        let range = self.adapt_range(image.data().format, &virtual_range(image.data(), view_type, range));
        let mut from = match self.images.get(&image.id()) {
            Some(layers) => get_subresource_range_layout(layers, &range),
            None => make_layout_state(vk::ImageLayout::UNDEFINED),
        };
        if from.layout == vk::ImageLayout::UNDEFINED && initial_layout != vk::ImageLayout::UNDEFINED {
            from = make_layout_state(initial_layout);
        }
        if wanted.layout == vk::ImageLayout::UNDEFINED {
            return Ok(());
        }
        let identity = from.layout == wanted.layout
            && from.access == wanted.access
            && from.stage == wanted.stage;
        if !identity || force {
            self.image_barriers += 1;
            trace!(
                "image barrier `{}`: {:?} -> {:?}",
                image.data().name,
                from.layout,
                wanted.layout
            );
            if let Some(device) = self.context.device() {
                let handle = self.handler.create_image(&self.context, image)?;
                let barrier = vk::ImageMemoryBarrier {
                    s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                    p_next: std::ptr::null(),
                    src_access_mask: from.access,
                    dst_access_mask: wanted.access,
                    old_layout: from.layout,
                    new_layout: wanted.layout,
                    src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    image: handle,
                    subresource_range: range.into(),
                };
                unsafe {
                    device.cmd_pipeline_barrier(
                        command_buffer,
                        normalized_stage(from.stage),
                        normalized_stage(wanted.stage),
                        vk::DependencyFlags::BY_REGION,
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }
        }
        let layers = self.images.entry(image.id()).or_default();
        add_subresource_range_layout(layers, &range, wanted);
        Ok(())
    }

    /// Transition a buffer view's range to `wanted`.
    pub fn buffer_view_memory_barrier(
        &mut self,
        command_buffer: vk::CommandBuffer,
        view: &BufferViewId,
        wanted: AccessState,
    ) -> Result<()> {
        self.buffer_memory_barrier(command_buffer, view.buffer(), &view.range(), wanted)
    }

    /// Transition a buffer range to `wanted`, if it is not already there.
    pub fn buffer_memory_barrier(
        &mut self,
        command_buffer: vk::CommandBuffer,
        buffer: &BufferId,
        range: &BufferSubresourceRange,
        wanted: AccessState,
    ) -> Result<()> {
        self.buffer_memory_barrier_from(command_buffer, buffer, range, AccessState::default(), wanted)
    }

    /// Transition a buffer range to `wanted`, seeding the source side with
    /// `initial` when the buffer was never seen before in this record.
    pub fn buffer_memory_barrier_from(
        &mut self,
        command_buffer: vk::CommandBuffer,
        buffer: &BufferId,
        range: &BufferSubresourceRange,
        initial: AccessState,
        wanted: AccessState,
    ) -> Result<()> {
        let mut from = self.access_state(buffer, range);
        if from.stage == vk::PipelineStageFlags::BOTTOM_OF_PIPE {
            from = initial;
        }
        if from == wanted {
            self.buffers.insert(buffer.id(), wanted);
            return Ok(());
        }
        self.buffer_barriers += 1;
        if let Some(device) = self.context.device() {
            let handle = self.handler.create_buffer(&self.context, buffer)?;
            let barrier = vk::BufferMemoryBarrier {
                s_type: vk::StructureType::BUFFER_MEMORY_BARRIER,
                p_next: std::ptr::null(),
                src_access_mask: from.access,
                dst_access_mask: wanted.access,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                buffer: handle,
                offset: range.offset,
                size: range.size,
            };
            unsafe {
                device.cmd_pipeline_barrier(
                    command_buffer,
                    normalized_stage(from.stage),
                    normalized_stage(wanted.stage),
                    vk::DependencyFlags::BY_REGION,
                    &[],
                    &[barrier],
                    &[],
                );
            }
        }
        self.buffers.insert(buffer.id(), wanted);
        Ok(())
    }

    /// Register a deferred command against `pass`. If the pass turns out to
    /// be disabled this frame, the action runs when the next pass touching
    /// `view` records.
    pub fn register_implicit_transition(
        &mut self,
        pass: PassId,
        view: ImageViewId,
        action: ImplicitAction,
    ) {
        self.implicit_transitions.push(ImplicitTransition {
            pass,
            view,
            action,
        });
    }

    /// Fire the implicit transition registered for `view`, if any, and only
    /// if its owning pass is disabled. One-shot: the registration is removed
    /// whether or not the action ran.
    pub fn run_implicit_transition(
        &mut self,
        command_buffer: vk::CommandBuffer,
        index: u32,
        view: &ImageViewId,
    ) -> Result<()> {
        let position = self
            .implicit_transitions
            .iter()
            .position(|transition| &transition.view == view);
        let Some(position) = position else {
            return Ok(());
        };
        let transition = self.implicit_transitions.remove(position);
        if !self.is_pass_enabled(transition.pass) {
            (transition.action.as_ref())(self, command_buffer, index)?;
        }
        Ok(())
    }

    /// Whether an implicit transition is currently registered for `view`.
    pub fn has_implicit_transition(&self, view: &ImageViewId) -> bool {
        self.implicit_transitions
            .iter()
            .any(|transition| &transition.view == view)
    }

    /// Widen depth-only / stencil-only aspects to both when the device does
    /// not support separate depth/stencil layouts.
    fn adapt_range(&self, format: vk::Format, range: &ImageSubresourceRange) -> ImageSubresourceRange {
        let mut result = *range;
        if !self.context.separate_depth_stencil_layouts()
            && is_depth_stencil_format(format)
            && (result.aspect_mask == vk::ImageAspectFlags::DEPTH
                || result.aspect_mask == vk::ImageAspectFlags::STENCIL)
        {
            result.aspect_mask = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;
        }
        result
    }

    /// Deferred image copy. Transitions both sides to transfer layouts,
    /// copies, then moves the destination to `final_layout`.
    pub fn copy_image(
        src: ImageViewId,
        dst: ImageViewId,
        extent: vk::Extent2D,
        final_layout: vk::ImageLayout,
    ) -> ImplicitAction {
        Arc::new(move |record: &mut RecordContext, command_buffer, index| {
            record.run_implicit_transition(command_buffer, index, &src)?;
            record.memory_barrier(
                command_buffer,
                &src,
                make_layout_state(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            )?;
            record.memory_barrier(
                command_buffer,
                &dst,
                make_layout_state(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            )?;
            if let Some(device) = record.context.device() {
                let src_range = src.data().range;
                let dst_range = dst.data().range;
                let region = vk::ImageCopy {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: src_range.aspect_mask,
                        mip_level: src_range.base_mip_level,
                        base_array_layer: src_range.base_array_layer,
                        layer_count: 1,
                    },
                    src_offset: vk::Offset3D::default(),
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: dst_range.aspect_mask,
                        mip_level: dst_range.base_mip_level,
                        base_array_layer: dst_range.base_array_layer,
                        layer_count: 1,
                    },
                    dst_offset: vk::Offset3D::default(),
                    extent: vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    },
                };
                let src_image = record.handler.create_image(&record.context, src.image())?;
                let dst_image = record.handler.create_image(&record.context, dst.image())?;
                unsafe {
                    device.cmd_copy_image(
                        command_buffer,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
            record.memory_barrier(command_buffer, &dst, make_layout_state(final_layout))
        })
    }

    /// Deferred image blit with explicit source and destination boxes.
    pub fn blit_image(
        src: ImageViewId,
        dst: ImageViewId,
        src_offsets: [vk::Offset3D; 2],
        dst_offsets: [vk::Offset3D; 2],
        filter: vk::Filter,
        final_layout: vk::ImageLayout,
    ) -> ImplicitAction {
        Arc::new(move |record: &mut RecordContext, command_buffer, index| {
            record.run_implicit_transition(command_buffer, index, &src)?;
            record.memory_barrier(
                command_buffer,
                &src,
                make_layout_state(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            )?;
            record.memory_barrier(
                command_buffer,
                &dst,
                make_layout_state(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            )?;
            if let Some(device) = record.context.device() {
                let src_range = src.data().range;
                let dst_range = dst.data().range;
                let region = vk::ImageBlit {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: src_range.aspect_mask,
                        mip_level: src_range.base_mip_level,
                        base_array_layer: src_range.base_array_layer,
                        layer_count: 1,
                    },
                    src_offsets,
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: dst_range.aspect_mask,
                        mip_level: dst_range.base_mip_level,
                        base_array_layer: dst_range.base_array_layer,
                        layer_count: 1,
                    },
                    dst_offsets,
                };
                let src_image = record.handler.create_image(&record.context, src.image())?;
                let dst_image = record.handler.create_image(&record.context, dst.image())?;
                unsafe {
                    device.cmd_blit_image(
                        command_buffer,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                        filter,
                    );
                }
            }
            record.memory_barrier(command_buffer, &dst, make_layout_state(final_layout))
        })
    }

    /// Deferred attachment clear, leaving the view in `final_layout`.
    pub fn clear_attachment(
        view: ImageViewId,
        clear_value: ClearValue,
        final_layout: vk::ImageLayout,
    ) -> ImplicitAction {
        Arc::new(move |record: &mut RecordContext, command_buffer, _index| {
            record.memory_barrier(
                command_buffer,
                &view,
                make_layout_state(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            )?;
            if let Some(device) = record.context.device() {
                let image = record.handler.create_image(&record.context, view.image())?;
                let range: vk::ImageSubresourceRange = view.virtual_range().into();
                unsafe {
                    if is_colour_format(view.data().format) {
                        device.cmd_clear_color_image(
                            command_buffer,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &clear_value.to_vk_colour(),
                            &[range],
                        );
                    } else {
                        device.cmd_clear_depth_stencil_image(
                            command_buffer,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &clear_value.to_vk_depth_stencil(),
                            &[range],
                        );
                    }
                }
            }
            record.memory_barrier(command_buffer, &view, make_layout_state(final_layout))
        })
    }
}

/// `vkCmdPipelineBarrier` rejects empty stage masks.
fn normalized_stage(stage: vk::PipelineStageFlags) -> vk::PipelineStageFlags {
    if stage.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        stage
    }
}

/// Clear value for an attachment, hashable unlike the raw Vulkan union.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Colour([f32; 4]),
    ColourInt([i32; 4]),
    ColourUint([u32; 4]),
    DepthStencil {
        depth: f32,
        stencil: u32,
    },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Colour([0.0; 4])
    }
}

impl ClearValue {
    pub fn to_vk(&self) -> vk::ClearValue {
        match *self {
            ClearValue::Colour(_) | ClearValue::ColourInt(_) | ClearValue::ColourUint(_) => {
                vk::ClearValue {
                    color: self.to_vk_colour(),
                }
            }
            ClearValue::DepthStencil {
                ..
            } => vk::ClearValue {
                depth_stencil: self.to_vk_depth_stencil(),
            },
        }
    }

    pub fn to_vk_colour(&self) -> vk::ClearColorValue {
        match *self {
            ClearValue::Colour(float32) => vk::ClearColorValue {
                float32,
            },
            ClearValue::ColourInt(int32) => vk::ClearColorValue {
                int32,
            },
            ClearValue::ColourUint(uint32) => vk::ClearColorValue {
                uint32,
            },
            ClearValue::DepthStencil {
                ..
            } => vk::ClearColorValue::default(),
        }
    }

    pub fn to_vk_depth_stencil(&self) -> vk::ClearDepthStencilValue {
        match *self {
            ClearValue::DepthStencil {
                depth,
                stencil,
            } => vk::ClearDepthStencilValue {
                depth,
                stencil,
            },
            _ => vk::ClearDepthStencilValue::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::image::ImageData;

    fn record_context() -> (RecordContext, ImageViewId) {
        let handler = Arc::new(ResourceHandler::new());
        let context = Arc::new(GraphContext::headless());
        let image = handler
            .create_image_id(
                ImageData::new_2d("img", vk::Format::R8G8B8A8_UNORM, 16, 16, vk::ImageUsageFlags::SAMPLED)
                    .with_mip_levels(4)
                    .with_array_layers(2),
            )
            .unwrap();
        let view = handler
            .create_view_id(crate::resource::image::ImageViewData::whole(image))
            .unwrap();
        (RecordContext::new(handler, context), view)
    }

    #[test]
    fn untouched_subresource_is_undefined() {
        let (record, view) = record_context();
        assert_eq!(record.layout_state(&view).layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn barrier_updates_tracked_state() {
        let (mut record, view) = record_context();
        record
            .memory_barrier(
                vk::CommandBuffer::null(),
                &view,
                make_layout_state(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            )
            .unwrap();
        assert_eq!(
            record.layout_state(&view).layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(record.image_barrier_count(), 1);
    }

    #[test]
    fn identity_transition_is_elided() {
        let (mut record, view) = record_context();
        let wanted = make_layout_state(vk::ImageLayout::GENERAL);
        record.memory_barrier(vk::CommandBuffer::null(), &view, wanted).unwrap();
        record.memory_barrier(vk::CommandBuffer::null(), &view, wanted).unwrap();
        assert_eq!(record.image_barrier_count(), 1);
    }

    #[test]
    fn forced_identity_transition_is_emitted() {
        let (mut record, view) = record_context();
        let data = view.data().clone();
        let wanted = make_layout_state(vk::ImageLayout::GENERAL);
        record.memory_barrier(vk::CommandBuffer::null(), &view, wanted).unwrap();
        record
            .image_memory_barrier(
                vk::CommandBuffer::null(),
                &data.image,
                data.view_type,
                &data.range,
                vk::ImageLayout::UNDEFINED,
                wanted,
                true,
            )
            .unwrap();
        assert_eq!(record.image_barrier_count(), 2);
    }

    #[test]
    fn range_query_merges_access_per_layout() {
        let (mut record, view) = record_context();
        let image = view.image().clone();
        let mut state = make_layout_state(vk::ImageLayout::GENERAL);
        state.access = vk::AccessFlags::SHADER_READ;
        record.set_image_layout_state(
            &image,
            vk::ImageViewType::TYPE_2D,
            &ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 0, 0),
            state,
        );
        state.access = vk::AccessFlags::SHADER_WRITE;
        record.set_image_layout_state(
            &image,
            vk::ImageViewType::TYPE_2D,
            &ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 1, 0),
            state,
        );
        let combined = record.image_layout_state(
            &image,
            vk::ImageViewType::TYPE_2D_ARRAY,
            &ImageSubresourceRange::new(vk::ImageAspectFlags::COLOR, 0, 2, 0, 1),
        );
        assert_eq!(combined.layout, vk::ImageLayout::GENERAL);
        assert!(combined.access.contains(vk::AccessFlags::SHADER_READ));
        assert!(combined.access.contains(vk::AccessFlags::SHADER_WRITE));
    }

    #[test]
    fn buffer_barrier_tracks_state() {
        let (mut record, _) = record_context();
        let buffer = record
            .handler()
            .create_buffer_id(crate::resource::buffer::BufferData::new(
                "buf",
                256,
                vk::BufferUsageFlags::STORAGE_BUFFER,
            ))
            .unwrap();
        let range = BufferSubresourceRange::new(0, 256);
        let wanted = AccessState {
            access: vk::AccessFlags::SHADER_WRITE,
            stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        };
        record
            .buffer_memory_barrier(vk::CommandBuffer::null(), &buffer, &range, wanted)
            .unwrap();
        assert_eq!(record.access_state(&buffer, &range), wanted);
        record
            .buffer_memory_barrier(vk::CommandBuffer::null(), &buffer, &range, wanted)
            .unwrap();
        assert_eq!(record.buffer_barrier_count(), 1);
    }

    #[test]
    fn implicit_transition_fires_once_for_disabled_pass() {
        let (mut record, view) = record_context();
        let fired = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let observed = fired.clone();
        let pass = PassId(7);
        record.set_pass_enabled(pass, false);
        record.register_implicit_transition(
            pass,
            view.clone(),
            Arc::new(move |_, _, _| {
                observed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }),
        );
        record
            .run_implicit_transition(vk::CommandBuffer::null(), 0, &view)
            .unwrap();
        record
            .run_implicit_transition(vk::CommandBuffer::null(), 0, &view)
            .unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn implicit_transition_skipped_for_enabled_pass() {
        let (mut record, view) = record_context();
        let fired = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let observed = fired.clone();
        let pass = PassId(3);
        record.set_pass_enabled(pass, true);
        record.register_implicit_transition(
            pass,
            view.clone(),
            Arc::new(move |_, _, _| {
                observed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }),
        );
        record
            .run_implicit_transition(vk::CommandBuffer::null(), 0, &view)
            .unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(!record.has_implicit_transition(&view));
    }
}
