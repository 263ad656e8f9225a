//! Compute pass: a [`PipelineHolder`] bound to the compute pipeline, plus a
//! dispatch mode.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::record::{make_pipeline_state, RecordContext};
use crate::resource::buffer::BufferViewId;
use crate::resource::handler::ResourceHandler;
use crate::runnable::pipeline::{PipelineConfig, PipelineHolder};
use crate::runnable::{Config, PassExecutor, RunnableCreator, RunnablePass};

/// How a compute pass decides its workgroup counts.
pub enum Dispatch {
    /// A fixed `(x, y, z)` group count.
    Fixed(u32, u32, u32),
    /// A callback invoked with the pass index each record.
    Callback(Box<dyn Fn(u32) -> (u32, u32, u32)>),
    /// `vkCmdDispatchIndirect` against a buffer holding the group counts.
    Indirect(BufferViewId),
}

impl Default for Dispatch {
    fn default() -> Self {
        Dispatch::Fixed(1, 1, 1)
    }
}

/// Configuration of a compute pass.
#[derive(Default)]
pub struct ComputeConfig {
    pub pipeline: PipelineConfig,
    pub dispatch: Dispatch,
    pub base: Config,
}

impl ComputeConfig {
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_base(mut self, base: Config) -> Self {
        self.base = base;
        self
    }
}

/// The compute pass executor.
pub struct ComputePass {
    context: Arc<GraphContext>,
    handler: Arc<ResourceHandler>,
    holder: PipelineHolder,
    dispatch: Dispatch,
}

impl ComputePass {
    /// Creator plugging a compute pass into a declared frame pass.
    pub fn creator(config: ComputeConfig) -> RunnableCreator {
        Box::new(move |pass, context, graph| {
            let holder = PipelineHolder::new(
                context.clone(),
                graph.handler().clone(),
                pass.clone(),
                graph.samplers(),
                vk::PipelineBindPoint::COMPUTE,
                config.base.max_pass_count,
                config.pipeline,
            );
            let executor = ComputePass {
                context: context.clone(),
                handler: graph.handler().clone(),
                holder,
                dispatch: config.dispatch,
            };
            Ok(RunnablePass::new(
                pass,
                context,
                executor,
                make_pipeline_state(vk::PipelineStageFlags::COMPUTE_SHADER),
                true,
                config.base,
            ))
        })
    }
}

impl PassExecutor for ComputePass {
    fn initialise(&mut self) -> Result<()> {
        self.holder.initialise()
    }

    fn record(
        &mut self,
        _record: &mut RecordContext,
        command_buffer: vk::CommandBuffer,
        index: u32,
    ) -> Result<()> {
        self.holder.compute_pipeline(index)?;
        self.holder.bind(command_buffer, index)?;
        let Some(device) = self.context.device() else {
            return Ok(());
        };
        match &self.dispatch {
            Dispatch::Fixed(x, y, z) => unsafe {
                device.cmd_dispatch(command_buffer, *x, *y, *z);
            },
            Dispatch::Callback(callback) => {
                let (x, y, z) = callback(index);
                unsafe { device.cmd_dispatch(command_buffer, x, y, z) };
            }
            Dispatch::Indirect(view) => {
                let buffer = self.handler.create_buffer(&self.context, view.buffer())?;
                unsafe {
                    device.cmd_dispatch_indirect(command_buffer, buffer, view.range().offset)
                };
            }
        }
        Ok(())
    }
}
