//! Mesh pass: like the fullscreen quad, but drawing caller-supplied
//! geometry, optionally indexed or indirect.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::graph::attachment::BlendState;
use crate::record::{make_pipeline_state, RecordContext};
use crate::resource::buffer::BufferViewId;
use crate::resource::handler::ResourceHandler;
use crate::resource::image::ImageViewId;
use crate::runnable::pipeline::{
    create_graphics_pipeline, DepthStencilConfig, PipelineConfig, PipelineHolder,
};
use crate::runnable::render_pass::RenderPassHolder;
use crate::runnable::{Config, LayoutTransition, PassExecutor, RunnableCreator, RunnablePass};

/// Configuration of a mesh pass.
pub struct MeshConfig {
    pub pipeline: PipelineConfig,
    pub vertex_buffer: Option<BufferViewId>,
    pub index_buffer: Option<BufferViewId>,
    pub index_type: vk::IndexType,
    pub vertex_count: u32,
    pub index_count: u32,
    pub instances: u32,
    pub cull_mode: vk::CullModeFlags,
    pub topology: vk::PrimitiveTopology,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Issue the draw through an indirect buffer (`vkCmdDrawIndirect` or
    /// `vkCmdDrawIndexedIndirect` when an index buffer is present).
    pub indirect: Option<BufferViewId>,
    pub depth_stencil: Option<DepthStencilConfig>,
    pub base: Config,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            vertex_buffer: None,
            index_buffer: None,
            index_type: vk::IndexType::UINT32,
            vertex_count: 0,
            index_count: 0,
            instances: 1,
            cull_mode: vk::CullModeFlags::BACK,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            indirect: None,
            depth_stencil: Some(DepthStencilConfig::default()),
            base: Config::default(),
        }
    }
}

/// A render pass drawing caller-supplied geometry.
pub struct RenderMesh {
    context: Arc<GraphContext>,
    handler: Arc<ResourceHandler>,
    pass: Arc<crate::graph::pass::FramePass>,
    render_holder: RenderPassHolder,
    pipeline_holder: PipelineHolder,
    config: MeshStatic,
}

struct MeshStatic {
    vertex_buffer: Option<BufferViewId>,
    index_buffer: Option<BufferViewId>,
    index_type: vk::IndexType,
    vertex_count: u32,
    index_count: u32,
    instances: u32,
    cull_mode: vk::CullModeFlags,
    topology: vk::PrimitiveTopology,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    indirect: Option<BufferViewId>,
    depth_stencil: Option<DepthStencilConfig>,
}

impl RenderMesh {
    pub fn creator(config: MeshConfig) -> RunnableCreator {
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
            let executor = RenderMesh {
                context: context.clone(),
                handler: graph.handler().clone(),
                pass: pass.clone(),
                render_holder,
                pipeline_holder,
                config: MeshStatic {
                    vertex_buffer: config.vertex_buffer,
                    index_buffer: config.index_buffer,
                    index_type: config.index_type,
                    vertex_count: config.vertex_count,
                    index_count: config.index_count,
                    instances: config.instances.max(1),
                    cull_mode: config.cull_mode,
                    topology: config.topology,
                    vertex_bindings: config.vertex_bindings,
                    vertex_attributes: config.vertex_attributes,
                    indirect: config.indirect,
                    depth_stencil: config.depth_stencil,
                },
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                ),
                false,
                config.base,
            ))
        })
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
        let pipeline = create_graphics_pipeline(
            &self.context,
            self.pipeline_holder.pipeline_layout(),
            self.render_holder.render_pass(),
            &program,
            &self.config.vertex_bindings,
            &self.config.vertex_attributes,
            self.config.topology,
            self.config.cull_mode,
            &self.blend_states(),
            self.config.depth_stencil,
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

    fn draw(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let Some(device) = self.context.device() else {
            return Ok(());
        };
        let config = &self.config;
        if let Some(vertex) = &config.vertex_buffer {
            let handle = self.handler.create_buffer(&self.context, vertex.buffer())?;
            unsafe {
                device.cmd_bind_vertex_buffers(
                    command_buffer,
                    0,
                    &[handle],
                    &[vertex.range().offset],
                )
            };
        }
        match (&config.index_buffer, &config.indirect) {
            (Some(index), None) => {
                let handle = self.handler.create_buffer(&self.context, index.buffer())?;
                unsafe {
                    device.cmd_bind_index_buffer(
                        command_buffer,
                        handle,
                        index.range().offset,
                        config.index_type,
                    );
                    device.cmd_draw_indexed(
                        command_buffer,
                        config.index_count,
                        config.instances,
                        0,
                        0,
                        0,
                    );
                }
            }
            (Some(index), Some(indirect)) => {
                let index_handle = self.handler.create_buffer(&self.context, index.buffer())?;
                let indirect_handle =
                    self.handler.create_buffer(&self.context, indirect.buffer())?;
                unsafe {
                    device.cmd_bind_index_buffer(
                        command_buffer,
                        index_handle,
                        index.range().offset,
                        config.index_type,
                    );
                    device.cmd_draw_indexed_indirect(
                        command_buffer,
                        indirect_handle,
                        indirect.range().offset,
                        1,
                        0,
                    );
                }
            }
            (None, Some(indirect)) => {
                let handle = self.handler.create_buffer(&self.context, indirect.buffer())?;
                unsafe {
                    device.cmd_draw_indirect(command_buffer, handle, indirect.range().offset, 1, 0)
                };
            }
            (None, None) => unsafe {
                device.cmd_draw(command_buffer, config.vertex_count, config.instances, 0, 0);
            },
        }
        Ok(())
    }
}

impl PassExecutor for RenderMesh {
    fn initialise(&mut self) -> Result<()> {
        self.pipeline_holder.initialise()
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
        self.draw(command_buffer)?;
        self.render_holder.end(command_buffer);
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
