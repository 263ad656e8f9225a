//! Transfer passes: image copies, buffer copies, buffer⇄image copies and
//! blits.
//!
//! Each executor relies on the base pre-pass barriers to put transfer inputs
//! in `TRANSFER_SRC_OPTIMAL` and outputs in `TRANSFER_DST_OPTIMAL` (those are
//! the wanted layouts of transfer attachments), then records the copy
//! command. An optional final layout moves the destination on afterwards.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::graph::attachment::Attachment;
use crate::record::{make_layout_state, make_pipeline_state, RecordContext};
use crate::resource::image::ImageViewId;
use crate::runnable::{Config, PassExecutor, RunnableCreator, RunnablePass};

fn subresource_layers(view: &ImageViewId) -> vk::ImageSubresourceLayers {
    let range = view.virtual_range();
    vk::ImageSubresourceLayers {
        aspect_mask: range.aspect_mask,
        mip_level: view.data().range.base_mip_level,
        base_array_layer: range.base_array_layer,
        layer_count: range.layer_count,
    }
}

fn transfer_inputs(attachments: &[Attachment]) -> Vec<&Attachment> {
    attachments
        .iter()
        .filter(|attachment| {
            attachment.flags.is_transfer()
                && attachment.flags.is_input()
                && attachment.is_image()
        })
        .collect()
}

fn transfer_outputs(attachments: &[Attachment]) -> Vec<&Attachment> {
    attachments
        .iter()
        .filter(|attachment| {
            attachment.flags.is_transfer()
                && attachment.flags.is_output()
                && attachment.is_image()
        })
        .collect()
}

/// `vkCmdCopyImage` over the pass's transfer attachments. Supports
/// one-to-one, many-to-one and one-to-many pairings.
pub struct ImageCopy {
    context: Arc<GraphContext>,
    pass: Arc<crate::graph::pass::FramePass>,
    extent: vk::Extent3D,
    final_layout: Option<vk::ImageLayout>,
}

impl ImageCopy {
    pub fn creator(
        extent: vk::Extent3D,
        final_layout: Option<vk::ImageLayout>,
        config: Config,
    ) -> RunnableCreator {
        Box::new(move |pass, context, _graph| {
            let executor = ImageCopy {
                context: context.clone(),
                pass: pass.clone(),
                extent,
                final_layout,
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::TRANSFER),
                false,
                config,
            ))
        })
    }

    fn copy_one(
        &self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        src: &ImageViewId,
        dst: &ImageViewId,
    ) -> Result<()> {
        let Some(device) = self.context.device() else {
            return Ok(());
        };
        let src_image = record.handler().create_image(record.context(), src.image())?;
        let dst_image = record.handler().create_image(record.context(), dst.image())?;
        let region = vk::ImageCopy {
            src_subresource: subresource_layers(src),
            src_offset: vk::Offset3D::default(),
            dst_subresource: subresource_layers(dst),
            dst_offset: vk::Offset3D::default(),
            extent: self.extent,
        };
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
        Ok(())
    }
}

impl PassExecutor for ImageCopy {
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let attachments = self.pass.attachments().to_vec();
        let inputs: Vec<ImageViewId> = transfer_inputs(&attachments)
            .iter()
            .filter_map(|attachment| attachment.view(index))
            .collect();
        let outputs: Vec<ImageViewId> = transfer_outputs(&attachments)
            .iter()
            .filter_map(|attachment| attachment.view(index))
            .collect();

        if inputs.len() == outputs.len() {
            for (src, dst) in inputs.iter().zip(outputs.iter()) {
                self.copy_one(record, command_buffer, src, dst)?;
            }
        } else if outputs.len() == 1 {
            let dst = &outputs[0];
            for src in &inputs {
                self.copy_one(record, command_buffer, src, dst)?;
            }
        } else if inputs.len() == 1 {
            let src = &inputs[0];
            for dst in &outputs {
                self.copy_one(record, command_buffer, src, dst)?;
            }
        }

        if let Some(final_layout) = self.final_layout {
            for dst in &outputs {
                record.memory_barrier(command_buffer, dst, make_layout_state(final_layout))?;
            }
        }
        Ok(())
    }
}

/// `vkCmdBlitImage` with explicit source and destination boxes.
pub struct ImageBlit {
    context: Arc<GraphContext>,
    pass: Arc<crate::graph::pass::FramePass>,
    src_offsets: [vk::Offset3D; 2],
    dst_offsets: [vk::Offset3D; 2],
    filter: vk::Filter,
    final_layout: Option<vk::ImageLayout>,
}

impl ImageBlit {
    #[allow(clippy::too_many_arguments)]
    pub fn creator(
        src_offsets: [vk::Offset3D; 2],
        dst_offsets: [vk::Offset3D; 2],
        filter: vk::Filter,
        final_layout: Option<vk::ImageLayout>,
        config: Config,
    ) -> RunnableCreator {
        Box::new(move |pass, context, _graph| {
            let executor = ImageBlit {
                context: context.clone(),
                pass: pass.clone(),
                src_offsets,
                dst_offsets,
                filter,
                final_layout,
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::TRANSFER),
                false,
                config,
            ))
        })
    }
}

impl PassExecutor for ImageBlit {
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let attachments = self.pass.attachments().to_vec();
        let inputs: Vec<ImageViewId> = transfer_inputs(&attachments)
            .iter()
            .filter_map(|attachment| attachment.view(index))
            .collect();
        let outputs: Vec<ImageViewId> = transfer_outputs(&attachments)
            .iter()
            .filter_map(|attachment| attachment.view(index))
            .collect();
        if let Some(device) = self.context.device() {
            for (src, dst) in inputs.iter().zip(outputs.iter()) {
                let src_image = record.handler().create_image(record.context(), src.image())?;
                let dst_image = record.handler().create_image(record.context(), dst.image())?;
                let region = vk::ImageBlit {
                    src_subresource: subresource_layers(src),
                    src_offsets: self.src_offsets,
                    dst_subresource: subresource_layers(dst),
                    dst_offsets: self.dst_offsets,
                };
                unsafe {
                    device.cmd_blit_image(
                        command_buffer,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                        self.filter,
                    );
                }
            }
        }
        if let Some(final_layout) = self.final_layout {
            for dst in &outputs {
                record.memory_barrier(command_buffer, dst, make_layout_state(final_layout))?;
            }
        }
        Ok(())
    }
}

/// `vkCmdCopyBuffer` between the pass's transfer buffer attachments.
pub struct BufferCopy {
    context: Arc<GraphContext>,
    pass: Arc<crate::graph::pass::FramePass>,
}

impl BufferCopy {
    pub fn creator(config: Config) -> RunnableCreator {
        Box::new(move |pass, context, _graph| {
            let executor = BufferCopy {
                context: context.clone(),
                pass: pass.clone(),
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::TRANSFER),
                false,
                config,
            ))
        })
    }
}

impl PassExecutor for BufferCopy {
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let attachments = self.pass.attachments().to_vec();
        let inputs: Vec<_> = attachments
            .iter()
            .filter(|a| a.flags.is_transfer() && a.flags.is_input() && a.is_buffer())
            .filter_map(|a| a.buffer_view(index))
            .collect();
        let outputs: Vec<_> = attachments
            .iter()
            .filter(|a| a.flags.is_transfer() && a.flags.is_output() && a.is_buffer())
            .filter_map(|a| a.buffer_view(index))
            .collect();
        let Some(device) = self.context.device() else {
            return Ok(());
        };
        for (src, dst) in inputs.iter().zip(outputs.iter()) {
            let src_buffer = record.handler().create_buffer(record.context(), src.buffer())?;
            let dst_buffer = record.handler().create_buffer(record.context(), dst.buffer())?;
            let region = vk::BufferCopy {
                src_offset: src.range().offset,
                dst_offset: dst.range().offset,
                size: src.range().size.min(dst.range().size),
            };
            unsafe { device.cmd_copy_buffer(command_buffer, src_buffer, dst_buffer, &[region]) };
        }
        Ok(())
    }
}

/// `vkCmdCopyBufferToImage`: the pass's transfer buffer input feeds its
/// transfer image output.
pub struct BufferToImageCopy {
    context: Arc<GraphContext>,
    pass: Arc<crate::graph::pass::FramePass>,
    final_layout: Option<vk::ImageLayout>,
}

impl BufferToImageCopy {
    pub fn creator(final_layout: Option<vk::ImageLayout>, config: Config) -> RunnableCreator {
        Box::new(move |pass, context, _graph| {
            let executor = BufferToImageCopy {
                context: context.clone(),
                pass: pass.clone(),
                final_layout,
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::TRANSFER),
                false,
                config,
            ))
        })
    }
}

impl PassExecutor for BufferToImageCopy {
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let attachments = self.pass.attachments().to_vec();
        let buffers: Vec<_> = attachments
            .iter()
            .filter(|a| a.flags.is_transfer() && a.flags.is_input() && a.is_buffer())
            .filter_map(|a| a.buffer_view(index))
            .collect();
        let images: Vec<ImageViewId> = transfer_outputs(&attachments)
            .iter()
            .filter_map(|attachment| attachment.view(index))
            .collect();
        if let Some(device) = self.context.device() {
            for (src, dst) in buffers.iter().zip(images.iter()) {
                let buffer = record.handler().create_buffer(record.context(), src.buffer())?;
                let image = record.handler().create_image(record.context(), dst.image())?;
                let extent = dst.image().data().extent;
                let mip = dst.data().range.base_mip_level;
                let region = vk::BufferImageCopy {
                    buffer_offset: src.range().offset,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: subresource_layers(dst),
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D {
                        width: (extent.width >> mip).max(1),
                        height: (extent.height >> mip).max(1),
                        depth: extent.depth.max(1),
                    },
                };
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        command_buffer,
                        buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
        }
        if let Some(final_layout) = self.final_layout {
            for dst in &images {
                record.memory_barrier(command_buffer, dst, make_layout_state(final_layout))?;
            }
        }
        Ok(())
    }
}

/// `vkCmdCopyImageToBuffer`: the pass's transfer image input feeds its
/// transfer buffer output.
pub struct ImageToBufferCopy {
    context: Arc<GraphContext>,
    pass: Arc<crate::graph::pass::FramePass>,
}

impl ImageToBufferCopy {
    pub fn creator(config: Config) -> RunnableCreator {
        Box::new(move |pass, context, _graph| {
            let executor = ImageToBufferCopy {
                context: context.clone(),
                pass: pass.clone(),
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::TRANSFER),
                false,
                config,
            ))
        })
    }
}

impl PassExecutor for ImageToBufferCopy {
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let attachments = self.pass.attachments().to_vec();
        let images: Vec<ImageViewId> = transfer_inputs(&attachments)
            .iter()
            .filter_map(|attachment| attachment.view(index))
            .collect();
        let buffers: Vec<_> = attachments
            .iter()
            .filter(|a| a.flags.is_transfer() && a.flags.is_output() && a.is_buffer())
            .filter_map(|a| a.buffer_view(index))
            .collect();
        let Some(device) = self.context.device() else {
            return Ok(());
        };
        for (src, dst) in images.iter().zip(buffers.iter()) {
            let image = record.handler().create_image(record.context(), src.image())?;
            let buffer = record.handler().create_buffer(record.context(), dst.buffer())?;
            let extent = src.image().data().extent;
            let mip = src.data().range.base_mip_level;
            let region = vk::BufferImageCopy {
                buffer_offset: dst.range().offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: subresource_layers(src),
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: (extent.width >> mip).max(1),
                    height: (extent.height >> mip).max(1),
                    depth: extent.depth.max(1),
                },
            };
            unsafe {
                device.cmd_copy_image_to_buffer(
                    command_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    buffer,
                    &[region],
                );
            }
        }
        Ok(())
    }
}
