//! The compiled, runnable form of a frame graph.
//!
//! Produced by [`FrameGraph::compile`](crate::graph::FrameGraph::compile).
//! Owns the runnable passes in execution order, resolves view aliases per
//! pass index, plans each pass's layout journeys from the dependency edges
//! and the externally declared boundary layouts, records command buffers, and
//! submits them chained through semaphores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::error::Error;
use crate::graph::attachment::Attachment;
use crate::graph::dependency::FramePassDependencies;
use crate::graph::node::BuiltGraph;
use crate::graph::pass::{FramePass, PassId};
use crate::record::{make_layout_state, LayoutState, PipelineState, RecordContext};
use crate::resource::handler::ResourceHandler;
use crate::resource::image::{ImageId, ImageSubresourceRange, ImageViewId};
use crate::runnable::pipeline::{cached_sampler, SamplerCache};
use crate::runnable::{AccessTransition, LayoutTransition, RunnableCreator, RunnablePass};
use crate::sampler::SamplerDesc;
use crate::sync::SemaphoreWait;

/// An externally declared layout for an image range at the graph boundary.
#[derive(Debug, Clone)]
pub struct BoundaryState {
    pub image: ImageId,
    pub view_type: vk::ImageViewType,
    pub range: ImageSubresourceRange,
    pub state: LayoutState,
}

impl BoundaryState {
    fn matches(&self, view: &ImageViewId) -> bool {
        self.image == *view.image()
            && crate::resource::image::virtual_range(self.image.data(), self.view_type, &self.range)
                .intersects(&view.virtual_range())
    }
}

/// Top-level orchestrator driving initialise, per-frame record and submit.
pub struct RunnableGraph {
    context: Arc<GraphContext>,
    handler: Arc<ResourceHandler>,
    passes: Vec<Arc<FramePass>>,
    built: BuiltGraph,
    dependencies: Vec<FramePassDependencies>,
    runnables: Vec<RunnablePass>,
    samplers: SamplerCache,
    input_states: Vec<BoundaryState>,
    output_states: Vec<BoundaryState>,
    record_state: RecordContext,
}

impl std::fmt::Debug for RunnableGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableGraph")
            .field("passes", &self.passes.len())
            .finish()
    }
}

impl RunnableGraph {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compile(
        context: Arc<GraphContext>,
        handler: Arc<ResourceHandler>,
        passes: Vec<Arc<FramePass>>,
        mut creators: Vec<Option<RunnableCreator>>,
        input_states: Vec<BoundaryState>,
        output_states: Vec<BoundaryState>,
    ) -> Result<RunnableGraph> {
        let dependencies = crate::graph::dependency::build_pass_attach_dependencies(&passes)?;
        let built = crate::graph::node::build_graph(&passes, &dependencies)?;
        let record_state = RecordContext::new(handler.clone(), context.clone());
        let mut graph = RunnableGraph {
            context: context.clone(),
            handler,
            passes,
            built,
            dependencies,
            runnables: Vec::new(),
            samplers: Arc::new(Mutex::new(HashMap::new())),
            input_states,
            output_states,
            record_state,
        };

        for pass_id in graph.built.order().to_vec() {
            let pass = graph.passes[pass_id.index()].clone();
            let creator = creators[pass_id.index()]
                .take()
                .ok_or_else(|| Error::NoRunnableCreator(pass.full_name().to_string()))?;
            let mut runnable = creator(pass, context.clone(), &mut graph)?;
            graph.plan_transitions(&mut runnable);
            runnable.initialise()?;
            graph.runnables.push(runnable);
        }
        Ok(graph)
    }

    /// Compute and register the `{from, needed, to}` journey of every view
    /// and buffer the pass touches, for every pass index.
    fn plan_transitions(&self, runnable: &mut RunnablePass) {
        let separate = self.context.separate_depth_stencil_layouts();
        let pass = runnable.pass().clone();
        for index in 0..runnable.max_pass_count() {
            for attachment in pass.attachments() {
                if attachment.is_image() {
                    let Some(view) = attachment.view(index) else {
                        continue;
                    };
                    let needed = attachment.wanted_state(separate);
                    let from = self.incoming_state(attachment, &view);
                    let to = self.outgoing_state(attachment, &view, needed);
                    runnable.register_layout_transition(
                        index,
                        &view,
                        LayoutTransition {
                            from,
                            needed,
                            to,
                        },
                    );
                } else {
                    let Some(view) = attachment.buffer_view(index) else {
                        continue;
                    };
                    let needed = attachment.wanted_access();
                    let from = self
                        .producer_of(attachment)
                        .map(|producer| producer.wanted_access())
                        .unwrap_or_default();
                    runnable.register_access_transition(
                        index,
                        view.buffer().id(),
                        AccessTransition {
                            from,
                            needed,
                            to: needed,
                        },
                    );
                }
            }
        }
    }

    /// The producing attachment feeding `attachment`, excluding the in-out
    /// self pairing.
    fn producer_of(&self, attachment: &Attachment) -> Option<&Attachment> {
        for transition in self.built.transitions() {
            if &transition.dst_input.attachment != attachment {
                continue;
            }
            for output in &transition.src_outputs {
                if output.attachment == *attachment {
                    continue;
                }
                if !output.passes.is_empty() {
                    return Some(&output.attachment);
                }
            }
        }
        None
    }

    /// The layout a view arrives in at a consuming attachment: the producer's
    /// layout, or the graph's declared input layout, or undefined.
    fn incoming_state(&self, attachment: &Attachment, view: &ImageViewId) -> LayoutState {
        let separate = self.context.separate_depth_stencil_layouts();
        if let Some(producer) = self.producer_of(attachment) {
            return producer.wanted_state(separate);
        }
        for boundary in &self.input_states {
            if boundary.matches(view) {
                return boundary.state;
            }
        }
        make_layout_state(vk::ImageLayout::UNDEFINED)
    }

    /// The layout a view must be left in by a producing attachment. Internal
    /// consumers transition on their own side, so producers only move the
    /// view when the graph boundary declared a final layout.
    fn outgoing_state(
        &self,
        attachment: &Attachment,
        view: &ImageViewId,
        needed: LayoutState,
    ) -> LayoutState {
        if !attachment.flags.is_output() {
            return needed;
        }
        let has_consumer = self.built.transitions().iter().any(|transition| {
            transition.dst_input.attachment != *attachment
                && !transition.dst_input.passes.is_empty()
                && transition
                    .src_outputs
                    .iter()
                    .any(|output| output.attachment == *attachment)
        });
        if has_consumer {
            return needed;
        }
        for boundary in &self.output_states {
            if boundary.matches(view) {
                return boundary.state;
            }
        }
        needed
    }

    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    pub fn handler(&self) -> &Arc<ResourceHandler> {
        &self.handler
    }

    pub fn samplers(&self) -> SamplerCache {
        self.samplers.clone()
    }

    /// The DFS execution order.
    pub fn order(&self) -> &[PassId] {
        self.built.order()
    }

    pub fn graph(&self) -> &BuiltGraph {
        &self.built
    }

    pub fn dependencies(&self) -> &[FramePassDependencies] {
        &self.dependencies
    }

    pub fn pass(&self, id: PassId) -> &Arc<FramePass> {
        &self.passes[id.index()]
    }

    pub fn runnable(&self, id: PassId) -> Option<&RunnablePass> {
        self.runnables
            .iter()
            .find(|runnable| runnable.pass().id() == id)
    }

    pub fn runnable_mut(&mut self, id: PassId) -> Option<&mut RunnablePass> {
        self.runnables
            .iter_mut()
            .find(|runnable| runnable.pass().id() == id)
    }

    /// The record state of the last `record()` sweep, holding the tracked
    /// layout of every touched subresource.
    pub fn last_record(&self) -> &RecordContext {
        &self.record_state
    }

    /// Resolve an attachment's physical image view for a pass index.
    pub fn get_image_view(&self, attachment: &Attachment, index: u32) -> Result<vk::ImageView> {
        let view = attachment
            .view(index)
            .ok_or_else(|| Error::NoResourceBound(attachment.name.clone()))?;
        self.handler.create_image_view(&self.context, &view)
    }

    /// Get or create the image behind an id.
    pub fn create_image(&self, image: &ImageId) -> Result<vk::Image> {
        self.handler.create_image(&self.context, image)
    }

    /// Get or create a sampler, cached by description.
    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler> {
        cached_sampler(&self.samplers, &self.context, desc)
    }

    /// The tracked layout of an image range after the last record.
    pub fn get_current_layout_state(
        &self,
        image: &ImageId,
        view_type: vk::ImageViewType,
        range: &ImageSubresourceRange,
    ) -> LayoutState {
        self.record_state.image_layout_state(image, view_type, range)
    }

    /// The layout a view ends the frame in, for a pass index: the externally
    /// declared final layout when one matches, otherwise the layout its last
    /// consumer needs.
    pub fn get_final_layout_state(&self, view: &ImageViewId, index: u32) -> LayoutState {
        let resolved = view.resolve(index);
        for boundary in &self.output_states {
            if boundary.matches(&resolved) {
                return boundary.state;
            }
        }
        let separate = self.context.separate_depth_stencil_layouts();
        let mut last: Option<(usize, LayoutState)> = None;
        for transition in self.built.transitions() {
            let input = &transition.dst_input.attachment;
            let touches = input
                .view(index)
                .map(|candidate| {
                    candidate.image() == resolved.image()
                        && candidate.virtual_range().intersects(&resolved.virtual_range())
                })
                .unwrap_or(false);
            if !touches {
                continue;
            }
            let position = transition
                .dst_input
                .passes
                .iter()
                .filter_map(|pass| self.built.order().iter().position(|p| p == pass))
                .max();
            if let Some(position) = position {
                let state = input.wanted_state(separate);
                if last.map(|(best, _)| position > best).unwrap_or(true) {
                    last = Some((position, state));
                }
            }
        }
        last.map(|(_, state)| state)
            .unwrap_or_else(|| make_layout_state(vk::ImageLayout::UNDEFINED))
    }

    fn seed_record_context(&self) -> RecordContext {
        let mut record = RecordContext::new(self.handler.clone(), self.context.clone());
        for boundary in &self.input_states {
            record.set_image_layout_state(
                &boundary.image,
                boundary.view_type,
                &boundary.range,
                boundary.state,
            );
        }
        for runnable in &self.runnables {
            record.set_pass_enabled(runnable.pass().id(), runnable.is_enabled());
            let index = runnable.pass_index();
            for (view, action) in runnable.implicit_actions() {
                record.register_implicit_transition(
                    runnable.pass().id(),
                    view.resolve(index),
                    action.clone(),
                );
            }
        }
        record
    }

    fn neighbour_states(&self, position: usize) -> (PipelineState, PipelineState, PipelineState) {
        let prev = position
            .checked_sub(1)
            .map(|p| self.runnables[p].pipeline_state())
            .unwrap_or_default();
        let curr = self.runnables[position].pipeline_state();
        let next = self
            .runnables
            .get(position + 1)
            .map(|runnable| runnable.pipeline_state())
            .unwrap_or_default();
        (prev, curr, next)
    }

    /// Record every pass's active command buffer for this frame, walking the
    /// execution order with a fresh record context.
    pub fn record(&mut self) -> Result<()> {
        let mut record = self.seed_record_context();
        for position in 0..self.runnables.len() {
            let (prev, curr, next) = self.neighbour_states(position);
            record.set_pipeline_states(prev, curr, next);
            self.runnables[position].record_current(&mut record)?;
        }
        self.record_state = record;
        Ok(())
    }

    /// Record the whole graph into one externally managed command buffer.
    pub fn record_into(&mut self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let mut record = self.seed_record_context();
        for position in 0..self.runnables.len() {
            let (prev, curr, next) = self.neighbour_states(position);
            record.set_pipeline_states(prev, curr, next);
            let runnable = &mut self.runnables[position];
            let index = runnable.pass_index();
            if runnable.is_enabled() {
                runnable.record_into(&mut record, command_buffer, index)?;
            } else {
                let views: Vec<ImageViewId> = runnable
                    .implicit_actions()
                    .iter()
                    .map(|(view, _)| view.resolve(index))
                    .collect();
                for view in views {
                    record.run_implicit_transition(command_buffer, index, &view)?;
                }
            }
        }
        self.record_state = record;
        Ok(())
    }

    /// Submit every pass in execution order, chaining their semaphores.
    /// Returns the wait for the last pass.
    pub fn run(&mut self, to_wait: SemaphoreWait, queue: vk::Queue) -> Result<SemaphoreWait> {
        let mut wait = to_wait;
        for runnable in &mut self.runnables {
            wait = runnable.run(wait, queue)?;
        }
        Ok(wait)
    }

    /// Invalidate every pass's recordings.
    pub fn reset_command_buffers(&mut self) -> Result<()> {
        for runnable in &mut self.runnables {
            runnable.reset_command_buffer()?;
        }
        Ok(())
    }
}
