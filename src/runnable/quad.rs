//! Fullscreen quad pass: a render pass drawing a four-vertex triangle strip
//! covering the viewport, typically for post-process chains.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::graph::attachment::BlendState;
use crate::record::{make_pipeline_state, RecordContext};
use crate::resource::buffer::{BufferData, BufferId, BufferViewId};
use crate::resource::handler::ResourceHandler;
use crate::resource::image::ImageViewId;
use crate::runnable::pipeline::{
    create_graphics_pipeline, DepthStencilConfig, PipelineConfig, PipelineHolder,
};
use crate::runnable::render_pass::RenderPassHolder;
use crate::runnable::{Config, LayoutTransition, PassExecutor, RunnableCreator, RunnablePass};

/// Configuration of a fullscreen quad pass.
#[derive(Default)]
pub struct QuadConfig {
    pub pipeline: PipelineConfig,
    /// Instance count for the draw; zero draws one instance.
    pub instances: u32,
    /// Flip texture coordinates horizontally.
    pub flip_u: bool,
    /// Flip texture coordinates vertically.
    pub flip_v: bool,
    pub depth_stencil: Option<DepthStencilConfig>,
    /// Issue the draw through `vkCmdDrawIndirect` against this buffer.
    pub indirect: Option<BufferViewId>,
    /// Still begin/end the render pass when the pass is disabled, so load
    /// and store ops keep applying.
    pub record_when_disabled: bool,
    pub base: Config,
}

/// A render pass drawing one fullscreen triangle strip.
pub struct RenderQuad {
    context: Arc<GraphContext>,
    handler: Arc<ResourceHandler>,
    pass: Arc<crate::graph::pass::FramePass>,
    render_holder: RenderPassHolder,
    pipeline_holder: PipelineHolder,
    instances: u32,
    flip_u: bool,
    flip_v: bool,
    depth_stencil: Option<DepthStencilConfig>,
    indirect: Option<BufferViewId>,
    record_when_disabled: bool,
    vertex_buffer: Option<BufferId>,
}

impl RenderQuad {
    pub fn creator(config: QuadConfig) -> RunnableCreator {
        Box::new(move |pass, context, graph| {
            let render_holder = RenderPassHolder::new(
                context.clone(),
                graph.handler().clone(),
                pass.clone(),
                config.base.max_pass_count,
            );
            let pipeline_holder = PipelineHolder::new(
                context.clone(),
                graph.handler().clone(),
                pass.clone(),
                graph.samplers(),
                vk::PipelineBindPoint::GRAPHICS,
                config.base.max_pass_count,
                config.pipeline,
            );
            let executor = RenderQuad {
                context: context.clone(),
                handler: graph.handler().clone(),
                pass: pass.clone(),
                render_holder,
                pipeline_holder,
                instances: config.instances.max(1),
                flip_u: config.flip_u,
                flip_v: config.flip_v,
                depth_stencil: config.depth_stencil,
                indirect: config.indirect,
                record_when_disabled: config.record_when_disabled,
                vertex_buffer: None,
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                false,
                config.base,
            ))
        })
    }

    fn vertex_data(&self) -> [f32; 16] {
        let (u0, u1) = if self.flip_u { (1.0, 0.0) } else { (0.0, 1.0) };
        let (v0, v1) = if self.flip_v { (1.0, 0.0) } else { (0.0, 1.0) };
        [
            -1.0, -1.0, u0, v0, //
            1.0, -1.0, u1, v0, //
            -1.0, 1.0, u0, v1, //
            1.0, 1.0, u1, v1,
        ]
    }

    fn blend_states(&self) -> Vec<BlendState> {
        self.pass
            .attachments()
            .iter()
            .filter(|attachment| attachment.flags.is_colour() && attachment.flags.is_output())
            .map(|attachment| {
                attachment
                    .image_attachment()
                    .map(|image| image.blend_state)
                    .unwrap_or(BlendState::NONE)
            })
            .collect()
    }

    fn ensure_pipeline(&mut self, index: u32) -> Result<()> {
        if self.pipeline_holder.pipeline(index) != vk::Pipeline::null() {
            return Ok(());
        }
        let program = self.pipeline_holder.program(index);
        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: (4 * std::mem::size_of::<f32>()) as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: (2 * std::mem::size_of::<f32>()) as u32,
            },
        ];
        let pipeline = create_graphics_pipeline(
            &self.context,
            self.pipeline_holder.pipeline_layout(),
            self.render_holder.render_pass(),
            &program,
            &bindings,
            &attributes,
            vk::PrimitiveTopology::TRIANGLE_STRIP,
            vk::CullModeFlags::NONE,
            &self.blend_states(),
            self.depth_stencil,
        )?;
        self.pipeline_holder.set_pipeline(index, pipeline);
        Ok(())
    }

    fn set_viewport(&self, command_buffer: vk::CommandBuffer) {
        let Some(device) = self.context.device() else {
            return;
        };
        let area = self.render_holder.render_area();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: area.width.max(1) as f32,
            height: area.height.max(1) as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: area,
        };
        unsafe {
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }
}

impl PassExecutor for RenderQuad {
    fn initialise(&mut self) -> Result<()> {
        self.pipeline_holder.initialise()?;
        let buffer = self.handler.create_buffer_id(BufferData::new(
            format!("{}/quad", self.pass.full_name()),
            std::mem::size_of::<[f32; 16]>() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        ))?;
        let data = self.vertex_data();
        let bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(&data))
        };
        self.handler.upload_buffer(&self.context, &buffer, bytes)?;
        self.vertex_buffer = Some(buffer);
        Ok(())
    }

    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        self.render_holder.begin(record, command_buffer, index)?;
        self.ensure_pipeline(index)?;
        self.pipeline_holder.bind(command_buffer, index)?;
        self.set_viewport(command_buffer);
        if let Some(device) = self.context.device() {
            if let Some(buffer) = &self.vertex_buffer {
                let handle = self.handler.create_buffer(&self.context, buffer)?;
                unsafe { device.cmd_bind_vertex_buffers(command_buffer, 0, &[handle], &[0]) };
            }
            match &self.indirect {
                Some(view) => {
                    let handle = self.handler.create_buffer(&self.context, view.buffer())?;
                    unsafe {
                        device.cmd_draw_indirect(command_buffer, handle, view.range().offset, 1, 0)
                    };
                }
                None => unsafe { device.cmd_draw(command_buffer, 4, self.instances, 0, 0) },
            }
        }
        self.render_holder.end(command_buffer);
        Ok(())
    }

    fn record_disabled(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        if self.record_when_disabled {
            self.render_holder.begin(record, command_buffer, index)?;
            self.render_holder.end(command_buffer);
        }
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
        self.render_holder
            .register_layout_transition(pass_index, view, transition);
    }
}
