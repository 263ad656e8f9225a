//! `VkRenderPass` wrapping for passes that draw to colour and depth/stencil
//! targets.
//!
//! The holder bakes each target's current layout as the render pass's
//! `initialLayout` and the registered transition's outgoing layout as
//! `finalLayout`, so the render pass itself performs the transitions. Two
//! external subpass dependencies gate the pass on the previous pass's
//! pipeline state and expose it to the next one. When the layouts the holder
//! baked no longer match the tracked state at record time, the render pass
//! and framebuffers are recreated.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::{DeferredResource, GraphContext};
use crate::error::map_vk;
use crate::graph::attachment::Attachment;
use crate::graph::pass::FramePass;
use crate::record::{make_layout_state, make_pipeline_state, RecordContext};
use crate::resource::handler::ResourceHandler;
use crate::resource::image::{is_depth_format, is_stencil_format, ImageViewId};
use crate::runnable::{Config, LayoutTransition, PassExecutor, RunnableCreator, RunnablePass};

/// Owns the `VkRenderPass` and one framebuffer per pass index.
pub struct RenderPassHolder {
    context: Arc<GraphContext>,
    handler: Arc<ResourceHandler>,
    pass: Arc<FramePass>,
    max_pass_count: u32,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    transitions: Vec<HashMap<u32, LayoutTransition>>,
    baked_layouts: HashMap<u32, vk::ImageLayout>,
    render_area: vk::Extent2D,
}

impl RenderPassHolder {
    pub fn new(
        context: Arc<GraphContext>,
        handler: Arc<ResourceHandler>,
        pass: Arc<FramePass>,
        max_pass_count: u32,
    ) -> Self {
        let max = max_pass_count.max(1) as usize;
        Self {
            context,
            handler,
            pass,
            max_pass_count: max as u32,
            render_pass: vk::RenderPass::null(),
            framebuffers: vec![vk::Framebuffer::null(); max],
            transitions: vec![HashMap::new(); max],
            baked_layouts: HashMap::new(),
            render_area: vk::Extent2D::default(),
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn render_area(&self) -> vk::Extent2D {
        self.render_area
    }

    pub fn register_layout_transition(
        &mut self,
        pass_index: u32,
        view: &ImageViewId,
        transition: LayoutTransition,
    ) {
        self.transitions[pass_index.min(self.max_pass_count - 1) as usize]
            .insert(view.id(), transition);
    }

    /// The pass's framebuffer targets: colour attachments first, then the
    /// depth/stencil one.
    fn targets(&self) -> Vec<Attachment> {
        let mut colours = Vec::new();
        let mut depth = Vec::new();
        for attachment in self.pass.attachments() {
            if attachment.flags.is_colour() {
                colours.push(attachment.clone());
            } else if attachment.flags.is_depth() || attachment.flags.is_stencil() {
                depth.push(attachment.clone());
            }
        }
        colours.extend(depth);
        colours
    }

    fn transition_for(&self, index: u32, view: &ImageViewId, attachment: &Attachment) -> LayoutTransition {
        let slot = index.min(self.max_pass_count - 1) as usize;
        match self.transitions[slot].get(&view.id()) {
            Some(transition) => *transition,
            None => {
                let needed = attachment
                    .wanted_state(self.context.separate_depth_stencil_layouts());
                LayoutTransition {
                    from: make_layout_state(vk::ImageLayout::UNDEFINED),
                    needed,
                    to: needed,
                }
            }
        }
    }

    /// True when the tracked layout of any target no longer matches what the
    /// render pass was built against.
    fn layouts_drifted(&self, record: &RecordContext, index: u32) -> bool {
        for attachment in self.targets() {
            let Some(view) = attachment.view(index) else {
                continue;
            };
            if let Some(&baked) = self.baked_layouts.get(&view.id()) {
                let current = record.layout_state(&view).layout;
                if current != baked && current != vk::ImageLayout::UNDEFINED {
                    return true;
                }
            }
        }
        false
    }

    fn destroy(&mut self) {
        if self.render_pass != vk::RenderPass::null() {
            self.context
                .defer_destroy(DeferredResource::RenderPass(self.render_pass));
            self.render_pass = vk::RenderPass::null();
        }
        for framebuffer in &mut self.framebuffers {
            if *framebuffer != vk::Framebuffer::null() {
                self.context
                    .defer_destroy(DeferredResource::Framebuffer(*framebuffer));
                *framebuffer = vk::Framebuffer::null();
            }
        }
        self.baked_layouts.clear();
    }

    fn create(&mut self, record: &RecordContext, index: u32) -> Result<()> {
        let targets = self.targets();
        self.baked_layouts.clear();

        let mut descriptions = Vec::new();
        let mut colour_refs = Vec::new();
        let mut depth_ref = None;
        for (slot, attachment) in targets.iter().enumerate() {
            let Some(view) = attachment.view(index) else {
                continue;
            };
            let transition = self.transition_for(index, &view, attachment);
            let mut initial = record.layout_state(&view).layout;
            if initial == vk::ImageLayout::UNDEFINED {
                initial = transition.from.layout;
            }
            self.baked_layouts.insert(view.id(), initial);
            let Some(image) = attachment.image_attachment() else {
                continue;
            };
            let format = view.data().format;
            descriptions.push(vk::AttachmentDescription {
                flags: vk::AttachmentDescriptionFlags::empty(),
                format,
                samples: view.image().data().samples,
                load_op: image.load_op,
                store_op: image.store_op,
                stencil_load_op: image.stencil_load_op,
                stencil_store_op: image.stencil_store_op,
                initial_layout: initial,
                final_layout: transition.to.layout,
            });
            if is_depth_format(format) || is_stencil_format(format) {
                depth_ref = Some(vk::AttachmentReference {
                    attachment: slot as u32,
                    layout: transition.needed.layout,
                });
            } else {
                colour_refs.push(vk::AttachmentReference {
                    attachment: slot as u32,
                    layout: transition.needed.layout,
                });
            }
        }

        let subpass = vk::SubpassDescription {
            flags: vk::SubpassDescriptionFlags::empty(),
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            input_attachment_count: 0,
            p_input_attachments: std::ptr::null(),
            color_attachment_count: colour_refs.len() as u32,
            p_color_attachments: colour_refs.as_ptr(),
            p_resolve_attachments: std::ptr::null(),
            p_depth_stencil_attachment: depth_ref
                .as_ref()
                .map(|reference| reference as *const _)
                .unwrap_or(std::ptr::null()),
            preserve_attachment_count: 0,
            p_preserve_attachments: std::ptr::null(),
        };

        let pass_state = make_pipeline_state(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | if depth_ref.is_some() {
                    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                } else {
                    vk::PipelineStageFlags::empty()
                },
        );
        let prev = record.prev_pipeline_state();
        let next = record.next_pipeline_state();
        let dependencies = [
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: non_empty_stage(prev.stage),
                dst_stage_mask: non_empty_stage(pass_state.stage),
                src_access_mask: prev.access,
                dst_access_mask: pass_state.access,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: non_empty_stage(pass_state.stage),
                dst_stage_mask: non_empty_stage(next.stage),
                src_access_mask: pass_state.access,
                dst_access_mask: next.access,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ];

        if let Some(device) = self.context.device() {
            let create_info = vk::RenderPassCreateInfo {
                s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
                p_next: std::ptr::null(),
                flags: vk::RenderPassCreateFlags::empty(),
                attachment_count: descriptions.len() as u32,
                p_attachments: descriptions.as_ptr(),
                subpass_count: 1,
                p_subpasses: &subpass,
                dependency_count: dependencies.len() as u32,
                p_dependencies: dependencies.as_ptr(),
            };
            self.render_pass = map_vk("RenderPass creation", unsafe {
                device.create_render_pass(&create_info, None)
            })?;
        }
        Ok(())
    }

    fn framebuffer(&mut self, index: u32) -> Result<vk::Framebuffer> {
        let slot = index.min(self.max_pass_count - 1) as usize;
        if self.framebuffers[slot] != vk::Framebuffer::null() {
            return Ok(self.framebuffers[slot]);
        }
        let targets = self.targets();
        let mut views = Vec::new();
        let mut extent = vk::Extent2D::default();
        for attachment in &targets {
            let Some(view) = attachment.view(index) else {
                continue;
            };
            views.push(self.handler.create_image_view(&self.context, &view)?);
            let image = view.image().data();
            let mip = view.data().range.base_mip_level;
            extent.width = extent.width.max((image.extent.width >> mip).max(1));
            extent.height = extent.height.max((image.extent.height >> mip).max(1));
        }
        self.render_area = extent;
        if let Some(device) = self.context.device() {
            let create_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                p_next: std::ptr::null(),
                flags: vk::FramebufferCreateFlags::empty(),
                render_pass: self.render_pass,
                attachment_count: views.len() as u32,
                p_attachments: views.as_ptr(),
                width: extent.width.max(1),
                height: extent.height.max(1),
                layers: 1,
            };
            self.framebuffers[slot] = map_vk("Framebuffer creation", unsafe {
                device.create_framebuffer(&create_info, None)
            })?;
        }
        Ok(self.framebuffers[slot])
    }

    /// Begin the render pass for a pass index, recreating baked state when
    /// the tracked layouts drifted, and account for the transitions the
    /// render pass performs on its own.
    pub fn begin(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        if !self.baked_layouts.is_empty() && self.layouts_drifted(record, index) {
            self.destroy();
        }
        if self.baked_layouts.is_empty()
            || (self.context.device().is_some() && self.render_pass == vk::RenderPass::null())
        {
            self.create(record, index)?;
        }
        let framebuffer = self.framebuffer(index)?;

        let targets = self.targets();
        let clear_values: Vec<vk::ClearValue> = targets
            .iter()
            .filter_map(|attachment| attachment.image_attachment())
            .map(|image| image.clear_value.to_vk())
            .collect();
        if let Some(device) = self.context.device() {
            let begin_info = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                p_next: std::ptr::null(),
                render_pass: self.render_pass,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: self.render_area,
                },
                clear_value_count: clear_values.len() as u32,
                p_clear_values: clear_values.as_ptr(),
            };
            unsafe {
                device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE)
            };
        }

        // The render pass transitions its targets to their final layouts;
        // reflect that in the tracked state.
        for attachment in &targets {
            let Some(view) = attachment.view(index) else {
                continue;
            };
            let transition = self.transition_for(index, &view, attachment);
            record.set_layout_state(&view, transition.to);
        }
        Ok(())
    }

    pub fn end(&self, command_buffer: vk::CommandBuffer) {
        if let Some(device) = self.context.device() {
            unsafe { device.cmd_end_render_pass(command_buffer) };
        }
    }
}

impl Drop for RenderPassHolder {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn non_empty_stage(stage: vk::PipelineStageFlags) -> vk::PipelineStageFlags {
    if stage.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        stage
    }
}

/// A pass that records arbitrary draw commands inside a render pass.
pub struct RenderPass {
    holder: RenderPassHolder,
    record_fn: Box<dyn FnMut(&mut RecordContext, vk::CommandBuffer, u32) -> Result<()>>,
}

impl RenderPass {
    /// Creator for a render pass with a user-supplied draw callback.
    pub fn creator(
        record_fn: impl FnMut(&mut RecordContext, vk::CommandBuffer, u32) -> Result<()> + 'static,
        config: Config,
    ) -> RunnableCreator {
        Box::new(move |pass, context, graph| {
            let holder = RenderPassHolder::new(
                context.clone(),
                graph.handler().clone(),
                pass.clone(),
                config.max_pass_count,
            );
            let executor = RenderPass {
                holder,
                record_fn: Box::new(record_fn),
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                false,
                config,
            ))
        })
    }
}

impl PassExecutor for RenderPass {
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        self.holder.begin(record, command_buffer, index)?;
        (self.record_fn)(record, command_buffer, index)?;
        self.holder.end(command_buffer);
        Ok(())
    }

    fn uses_render_pass(&self) -> bool {
        true
    }

    fn register_layout_transition(
        &mut self,
        pass_index: u32,
        view: &ImageViewId,
        transition: LayoutTransition,
    ) {
        self.holder.register_layout_transition(pass_index, view, transition);
    }
}
