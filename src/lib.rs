//! Vulkan frame graph compiler and runtime
//!
//! Deimos lets an application declare its rendering work as a directed
//! acyclic graph of passes operating on named image and buffer resources.
//! Compiling the graph produces a concrete execution schedule, the pipeline
//! barriers that satisfy Vulkan's read/write/layout ordering rules, and
//! recordable passes that replay the work each frame.
//!
//! The heart of the crate is the declaration → solve → record pipeline:
//! passes publish [`Attachment`]s describing how they touch each resource,
//! the dependency solver pairs writers with readers of overlapping
//! subresources, the graph builder linearizes the resulting DAG, and the
//! per-frame [`RecordContext`] tracks every subresource's
//! `(layout, access, stage)` state to emit the minimum set of barriers.
//!
//! # Example
//!
//! A two-pass chain: one pass clears and draws into a colour target, the
//! next samples it. The compiled graph schedules `draw` before `present` and
//! plans the `UNDEFINED → COLOR_ATTACHMENT_OPTIMAL → SHADER_READ_ONLY_OPTIMAL`
//! journey for the image. With a headless context, the whole pipeline (and
//! this example) runs without a GPU.
//!
//! ```
//! use std::sync::Arc;
//!
//! use ash::vk;
//! use deimos::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let handler = Arc::new(ResourceHandler::new());
//!     let mut graph = FrameGraph::new(handler.clone(), "frame");
//!
//!     let colour = graph.create_image(ImageData::new_2d(
//!         "colour",
//!         vk::Format::R8G8B8A8_UNORM,
//!         1280,
//!         720,
//!         vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
//!     ))?;
//!     let view = graph.create_view(ImageViewData::whole(colour))?;
//!
//!     let draw = graph.create_pass(
//!         "draw",
//!         RunnablePass::creator_from_fn(
//!             vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
//!             |_record, _command_buffer, _index| Ok(()),
//!         ),
//!     )?;
//!     graph.pass_mut(draw).add_output_colour_target(
//!         view.clone(),
//!         vk::AttachmentLoadOp::CLEAR,
//!         Some(ClearValue::Colour([0.0; 4])),
//!     )?;
//!
//!     let present = graph.create_pass(
//!         "present",
//!         RunnablePass::creator_from_fn(
//!             vk::PipelineStageFlags::FRAGMENT_SHADER,
//!             |_record, _command_buffer, _index| Ok(()),
//!         ),
//!     )?;
//!     graph
//!         .pass_mut(present)
//!         .add_input_sampled_image(view, 0, SamplerDesc::default());
//!
//!     let context = Arc::new(GraphContext::headless());
//!     let mut runnable = graph.compile(context)?;
//!     runnable.record()?;
//!     Ok(())
//! }
//! ```
//!
//! For further reading, check out the following modules:
//! - [`graph`] for declaring passes, attachments and pass groups.
//! - [`resource`] for image/buffer descriptors and the resource handler.
//! - [`record`] for the barrier engine and layout-state tracking.
//! - [`runnable`] for the recordable pass kinds and the compiled graph.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod context;
pub mod error;
pub mod graph;
pub mod record;
pub mod resource;
pub mod runnable;
pub mod sampler;
pub mod sync;
