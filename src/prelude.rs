//! Re-exports the crate's commonly used types.
//!
//! ```
//! use deimos::prelude::*;
//! ```

pub use crate::context::{DeferredResource, GraphContext};
pub use crate::error::Error;
pub use crate::graph::attachment::{
    Attachment, AttachmentData, AttachmentFlags, BlendState, BufferAttachment, ImageAttachment,
};
pub use crate::graph::dependency::FramePassDependencies;
pub use crate::graph::node::{BuiltGraph, GraphNode};
pub use crate::graph::pass::{
    BufferViewIdArray, FramePass, GroupId, ImageViewIdArray, PassId,
};
pub use crate::graph::transition::{AttachmentPasses, AttachmentTransition};
pub use crate::graph::FrameGraph;
pub use crate::record::{
    layout_access_mask, layout_stage_mask, make_layout_state, make_pipeline_state, AccessState,
    ClearValue, ImplicitAction, LayerLayoutStates, LayoutState, MipLayoutStates, PipelineState,
    RecordContext,
};
pub use crate::resource::buffer::{
    BufferData, BufferId, BufferSubresourceRange, BufferViewData, BufferViewId,
};
pub use crate::resource::handler::ResourceHandler;
pub use crate::resource::image::{
    aspect_mask, is_colour_format, is_depth_format, is_depth_stencil_format, is_stencil_format,
    ImageData, ImageId, ImageSubresourceRange, ImageViewData, ImageViewId,
};
pub use crate::runnable::compute::{ComputeConfig, ComputePass, Dispatch};
pub use crate::runnable::copy::{
    BufferCopy, BufferToImageCopy, ImageBlit, ImageCopy, ImageToBufferCopy,
};
pub use crate::runnable::graph::BoundaryState;
pub use crate::runnable::mesh::{MeshConfig, RenderMesh};
pub use crate::runnable::mipmaps::GenerateMipmaps;
pub use crate::runnable::pipeline::{
    DepthStencilConfig, PipelineConfig, PipelineHolder, Program, ProgramCreator, ProgramStage,
};
pub use crate::runnable::quad::{QuadConfig, RenderQuad};
pub use crate::runnable::render_pass::{RenderPass, RenderPassHolder};
pub use crate::runnable::{
    AccessTransition, Config, EmptyExecutor, LayoutTransition, PassExecutor, RunnableCreator,
    RunnableGraph, RunnablePass,
};
pub use crate::sampler::SamplerDesc;
pub use crate::sync::{Fence, Semaphore, SemaphoreWait};
