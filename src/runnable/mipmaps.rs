//! Mipmap generation: iteratively blit each level into the next, finishing
//! with the whole chain in the requested output layout.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::record::{make_layout_state, make_pipeline_state, RecordContext};
use crate::resource::image::{aspect_mask, ImageSubresourceRange, ImageViewId};
use crate::runnable::{Config, PassExecutor, RunnableCreator, RunnablePass};

fn mip_dimension(extent: u32, level: u32) -> i32 {
    ((extent >> level).max(1)) as i32
}

/// Blits level `k` into level `k + 1` for every in-out image view of the
/// pass, leaving all levels in `output_layout`.
pub struct GenerateMipmaps {
    context: Arc<GraphContext>,
    pass: Arc<crate::graph::pass::FramePass>,
    output_layout: vk::ImageLayout,
    filter: vk::Filter,
}

impl GenerateMipmaps {
    pub fn creator(output_layout: vk::ImageLayout, config: Config) -> RunnableCreator {
        Self::creator_with_filter(output_layout, vk::Filter::LINEAR, config)
    }

    pub fn creator_with_filter(
        output_layout: vk::ImageLayout,
        filter: vk::Filter,
        config: Config,
    ) -> RunnableCreator {
        Box::new(move |pass, context, _graph| {
            let executor = GenerateMipmaps {
                context: context.clone(),
                pass: pass.clone(),
                output_layout,
                filter,
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

    fn process_view(
        &self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        view: &ImageViewId,
    ) -> Result<()> {
        let image = view.image().clone();
        let data = image.data().clone();
        let mip_levels = data.mip_levels;
        if mip_levels < 2 {
            record.memory_barrier(command_buffer, view, make_layout_state(self.output_layout))?;
            return Ok(());
        }
        let aspect = aspect_mask(data.format);
        let range = view.virtual_range();
        let view_type = view.data().view_type;
        let output_state = make_layout_state(self.output_layout);
        let image_handle = record.handler().create_image(record.context(), &image)?;

        for layer_offset in 0..range.layer_count {
            let layer = range.base_array_layer + layer_offset;
            let level_range =
                |level: u32| ImageSubresourceRange::level_layer(aspect, level, layer);

            // Level 0 feeds the first blit.
            record.image_memory_barrier(
                command_buffer,
                &image,
                view_type,
                &level_range(0),
                vk::ImageLayout::UNDEFINED,
                make_layout_state(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
                false,
            )?;

            for level in 1..mip_levels {
                record.image_memory_barrier(
                    command_buffer,
                    &image,
                    view_type,
                    &level_range(level),
                    vk::ImageLayout::UNDEFINED,
                    make_layout_state(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                    false,
                )?;

                if let Some(device) = self.context.device() {
                    let blit = vk::ImageBlit {
                        src_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: aspect,
                            mip_level: level - 1,
                            base_array_layer: layer,
                            layer_count: 1,
                        },
                        src_offsets: [
                            vk::Offset3D::default(),
                            vk::Offset3D {
                                x: mip_dimension(data.extent.width, level - 1),
                                y: mip_dimension(data.extent.height, level - 1),
                                z: mip_dimension(data.extent.depth, level - 1),
                            },
                        ],
                        dst_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: aspect,
                            mip_level: level,
                            base_array_layer: layer,
                            layer_count: 1,
                        },
                        dst_offsets: [
                            vk::Offset3D::default(),
                            vk::Offset3D {
                                x: mip_dimension(data.extent.width, level),
                                y: mip_dimension(data.extent.height, level),
                                z: mip_dimension(data.extent.depth, level),
                            },
                        ],
                    };
                    unsafe {
                        device.cmd_blit_image(
                            command_buffer,
                            image_handle,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            image_handle,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[blit],
                            self.filter,
                        );
                    }
                }

                // The level just read is done; move it to the output layout.
                record.image_memory_barrier(
                    command_buffer,
                    &image,
                    view_type,
                    &level_range(level - 1),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    output_state,
                    false,
                )?;

                if level == mip_levels - 1 {
                    record.image_memory_barrier(
                        command_buffer,
                        &image,
                        view_type,
                        &level_range(level),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        output_state,
                        false,
                    )?;
                } else {
                    // Becomes the source of the next iteration.
                    record.image_memory_barrier(
                        command_buffer,
                        &image,
                        view_type,
                        &level_range(level),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        make_layout_state(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
                        false,
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl PassExecutor for GenerateMipmaps {
    fn record(
        &mut self,
        record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        let views: Vec<ImageViewId> = self
            .pass
            .inout_attachments()
            .iter()
            .filter_map(|attachment| attachment.view(index))
            .collect();
        for view in views {
            self.process_view(record, command_buffer, &view)?;
        }
        Ok(())
    }
}
