//! The frame graph front end: pass and resource registry, pass groups,
//! boundary layout declarations, and compilation into a
//! [`RunnableGraph`](crate::runnable::RunnableGraph).

pub mod attachment;
pub mod dependency;
pub mod node;
pub mod pass;
pub mod transition;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::error::Error;
use crate::record::LayoutState;
use crate::resource::buffer::{BufferData, BufferId, BufferViewData, BufferViewId};
use crate::resource::handler::ResourceHandler;
use crate::resource::image::{ImageData, ImageId, ImageSubresourceRange, ImageViewData, ImageViewId};
use crate::runnable::graph::BoundaryState;
use crate::runnable::{RunnableCreator, RunnableGraph};

use self::pass::{FramePass, GroupId, PassId};

struct GroupData {
    #[allow(dead_code)]
    name: String,
    #[allow(dead_code)]
    parent: Option<GroupId>,
    full_name: String,
}

/// Front-end registry: declares resources, groups and passes, then compiles
/// them into a runnable graph.
///
/// Pass names must be unique within one graph. Resources are interned through
/// the shared [`ResourceHandler`], so ids are valid across graphs sharing a
/// handler.
pub struct FrameGraph {
    handler: Arc<ResourceHandler>,
    name: String,
    groups: Vec<GroupData>,
    passes: Vec<FramePass>,
    creators: Vec<Option<RunnableCreator>>,
    names: HashSet<String>,
    input_states: Vec<BoundaryState>,
    output_states: Vec<BoundaryState>,
}

impl FrameGraph {
    pub fn new(handler: Arc<ResourceHandler>, name: impl Into<String>) -> Self {
        let name = name.into();
        let root = GroupData {
            name: name.clone(),
            parent: None,
            full_name: name.clone(),
        };
        Self {
            handler,
            name,
            groups: vec![root],
            passes: Vec::new(),
            creators: Vec::new(),
            names: HashSet::new(),
            input_states: Vec::new(),
            output_states: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<ResourceHandler> {
        &self.handler
    }

    /// Intern an image descriptor.
    pub fn create_image(&self, data: ImageData) -> Result<ImageId> {
        self.handler.create_image_id(data)
    }

    /// Intern a view descriptor. Value-equal descriptors merge to one id.
    pub fn create_view(&self, data: ImageViewData) -> Result<ImageViewId> {
        self.handler.create_view_id(data)
    }

    /// Intern a buffer descriptor.
    pub fn create_buffer(&self, data: BufferData) -> Result<BufferId> {
        self.handler.create_buffer_id(data)
    }

    /// Intern a buffer-view descriptor.
    pub fn create_buffer_view(&self, data: BufferViewData) -> Result<BufferViewId> {
        self.handler.create_buffer_view_id(data)
    }

    /// The root pass group, named after the graph.
    pub fn root_group(&self) -> GroupId {
        GroupId(0)
    }

    /// Create a pass group under the root.
    pub fn create_pass_group(&mut self, name: impl Into<String>) -> GroupId {
        self.create_pass_group_in(self.root_group(), name)
    }

    /// Create a pass group nested under another group.
    pub fn create_pass_group_in(&mut self, parent: GroupId, name: impl Into<String>) -> GroupId {
        let name = name.into();
        let full_name = format!("{}/{}", self.groups[parent.0 as usize].full_name, name);
        self.groups.push(GroupData {
            name,
            parent: Some(parent),
            full_name,
        });
        GroupId(self.groups.len() as u32 - 1)
    }

    /// Create a pass under the root group.
    pub fn create_pass(
        &mut self,
        name: impl Into<String>,
        creator: RunnableCreator,
    ) -> Result<PassId> {
        self.create_pass_in(self.root_group(), name, creator)
    }

    /// Create a pass in a group. Duplicate pass names within the graph are
    /// rejected.
    pub fn create_pass_in(
        &mut self,
        group: GroupId,
        name: impl Into<String>,
        creator: RunnableCreator,
    ) -> Result<PassId> {
        let name = name.into();
        if !self.names.insert(name.clone()) {
            return Err(Error::DuplicatePassName(name).into());
        }
        let id = PassId(self.passes.len() as u32);
        let full_name = format!("{}/{}", self.groups[group.0 as usize].full_name, name);
        self.passes.push(FramePass::new(id, group, name, full_name));
        self.creators.push(Some(creator));
        Ok(id)
    }

    pub fn pass(&self, id: PassId) -> &FramePass {
        &self.passes[id.index()]
    }

    /// Mutable access for attachment declaration.
    pub fn pass_mut(&mut self, id: PassId) -> &mut FramePass {
        &mut self.passes[id.index()]
    }

    /// Declare the layout a view is in when the graph starts.
    pub fn add_input(&mut self, view: &ImageViewId, state: LayoutState) {
        let data = view.data();
        self.add_input_image(&data.image, data.view_type, &data.range, state);
    }

    /// Declare the layout an image range is in when the graph starts.
    pub fn add_input_image(
        &mut self,
        image: &ImageId,
        view_type: vk::ImageViewType,
        range: &ImageSubresourceRange,
        state: LayoutState,
    ) {
        self.input_states.push(BoundaryState {
            image: image.clone(),
            view_type,
            range: *range,
            state,
        });
    }

    /// Declare the layout a view must end the graph in.
    pub fn add_output(&mut self, view: &ImageViewId, state: LayoutState) {
        let data = view.data();
        self.add_output_image(&data.image, data.view_type, &data.range, state);
    }

    /// Declare the layout an image range must end the graph in.
    pub fn add_output_image(
        &mut self,
        image: &ImageId,
        view_type: vk::ImageViewType,
        range: &ImageSubresourceRange,
        state: LayoutState,
    ) {
        self.output_states.push(BoundaryState {
            image: image.clone(),
            view_type,
            range: *range,
            state,
        });
    }

    /// Solve dependencies, linearize, create every pass's runnable form and
    /// plan its transitions. Consumes the graph.
    pub fn compile(self, context: Arc<GraphContext>) -> Result<RunnableGraph> {
        if self.passes.is_empty() {
            return Err(Error::EmptyGraph.into());
        }
        debug!(
            "compiling frame graph `{}` with {} passes",
            self.name,
            self.passes.len()
        );
        let passes: Vec<Arc<FramePass>> = self.passes.into_iter().map(Arc::new).collect();
        RunnableGraph::compile(
            context,
            self.handler,
            passes,
            self.creators,
            self.input_states,
            self.output_states,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::RunnablePass;

    #[test]
    fn duplicate_pass_names_are_rejected() {
        let handler = Arc::new(ResourceHandler::new());
        let mut graph = FrameGraph::new(handler, "test");
        graph.create_pass("draw", RunnablePass::empty_creator()).unwrap();
        let result = graph.create_pass("draw", RunnablePass::empty_creator());
        assert!(matches!(
            result.unwrap_err().downcast_ref::<Error>(),
            Some(Error::DuplicatePassName(_))
        ));
    }

    #[test]
    fn duplicate_names_rejected_across_groups() {
        let handler = Arc::new(ResourceHandler::new());
        let mut graph = FrameGraph::new(handler, "test");
        let group = graph.create_pass_group("effects");
        graph
            .create_pass_in(group, "draw", RunnablePass::empty_creator())
            .unwrap();
        assert!(graph.create_pass("draw", RunnablePass::empty_creator()).is_err());
    }

    #[test]
    fn group_paths_qualify_pass_names() {
        let handler = Arc::new(ResourceHandler::new());
        let mut graph = FrameGraph::new(handler, "frame");
        let outer = graph.create_pass_group("post");
        let inner = graph.create_pass_group_in(outer, "bloom");
        let pass = graph
            .create_pass_in(inner, "blur_x", RunnablePass::empty_creator())
            .unwrap();
        assert_eq!(graph.pass(pass).full_name(), "frame/post/bloom/blur_x");
    }

    #[test]
    fn empty_graph_cannot_compile() {
        let handler = Arc::new(ResourceHandler::new());
        let graph = FrameGraph::new(handler, "test");
        let context = Arc::new(GraphContext::headless());
        let result = graph.compile(context);
        assert!(matches!(
            result.unwrap_err().downcast_ref::<Error>(),
            Some(Error::EmptyGraph)
        ));
    }
}
