#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;

use deimos::{
    ClearValue, FrameGraph, GraphContext, ImageData, ImageId, ImageViewData, ImageViewId, PassId,
    ResourceHandler, RunnableCreator, RunnablePass, SamplerDesc,
};

/// Headless graph environment ready for automated tests: no device, full
/// compile/record pipeline.
pub struct Context {
    pub handler: Arc<ResourceHandler>,
    pub context: Arc<GraphContext>,
}

pub fn make_context() -> Context {
    let _ = pretty_env_logger::try_init();
    Context {
        handler: Arc::new(ResourceHandler::new()),
        context: Arc::new(GraphContext::headless()),
    }
}

impl Context {
    pub fn graph(&self, name: &str) -> FrameGraph {
        FrameGraph::new(self.handler.clone(), name)
    }

    /// A 2-D colour image usable as render target and texture.
    pub fn colour_image(&self, name: &str) -> ImageId {
        self.handler
            .create_image_id(ImageData::new_2d(
                name,
                vk::Format::R8G8B8A8_UNORM,
                64,
                64,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            ))
            .expect("intern image")
    }

    pub fn whole_view(&self, image: &ImageId) -> ImageViewId {
        self.handler
            .create_view_id(ImageViewData::whole(image.clone()))
            .expect("intern view")
    }

    pub fn colour_view(&self, name: &str) -> ImageViewId {
        let image = self.colour_image(name);
        self.whole_view(&image)
    }
}

/// Creator recording no commands, running in the fragment stage.
pub fn sample_pass() -> RunnableCreator {
    RunnablePass::creator_from_fn(vk::PipelineStageFlags::FRAGMENT_SHADER, |_, _, _| Ok(()))
}

/// Creator recording no commands, running in the colour-output stage.
pub fn draw_pass() -> RunnableCreator {
    RunnablePass::creator_from_fn(
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        |_, _, _| Ok(()),
    )
}

/// Creator recording no commands, running in the compute stage.
pub fn compute_pass() -> RunnableCreator {
    RunnablePass::creator_from_fn(vk::PipelineStageFlags::COMPUTE_SHADER, |_, _, _| Ok(()))
}

pub fn clear_colour() -> Option<ClearValue> {
    Some(ClearValue::Colour([0.0; 4]))
}

pub fn default_sampler() -> SamplerDesc {
    SamplerDesc::default()
}

/// Position of a pass in an execution order.
pub fn position(order: &[PassId], pass: PassId) -> usize {
    order
        .iter()
        .position(|&candidate| candidate == pass)
        .expect("pass missing from execution order")
}
