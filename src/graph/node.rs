//! The compiled pass DAG and its execution order.
//!
//! Dependency edges become a [`petgraph`] graph rooted at a sentinel
//! [`GraphNode::Root`]. The execution order is a depth-first linearization of
//! that DAG: reverse postorder from the root, visiting children in edge
//! declaration order, so a pass never precedes a pass it depends on.

use std::sync::Arc;

use anyhow::Result;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::Error;
use crate::graph::dependency::FramePassDependencies;
use crate::graph::pass::{FramePass, PassId};
use crate::graph::transition::{build_transitions, merge_all, AttachmentTransition};

/// A node in the compiled graph: the sentinel root, or one frame pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphNode {
    Root,
    Pass(PassId),
}

/// The compiled DAG plus its linearized execution order and the merged
/// transition list.
#[derive(Debug)]
pub struct BuiltGraph {
    pub(crate) graph: Graph<GraphNode, Vec<AttachmentTransition>>,
    pub(crate) root: NodeIndex,
    order: Vec<PassId>,
    transitions: Vec<AttachmentTransition>,
}

impl BuiltGraph {
    /// The sentinel root node everything hangs off.
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// The DFS execution order. Root is implicit and not part of the list.
    pub fn order(&self) -> &[PassId] {
        &self.order
    }

    /// All merged attachment transitions of the graph.
    pub fn transitions(&self) -> &[AttachmentTransition] {
        &self.transitions
    }

    /// The transitions crossing the edges into `pass`.
    pub fn transitions_into(&self, pass: PassId) -> Vec<&AttachmentTransition> {
        self.transitions
            .iter()
            .filter(|transition| transition.dst_input.passes.contains(&pass))
            .collect()
    }

    /// The transitions leaving `pass`.
    pub fn transitions_from(&self, pass: PassId) -> Vec<&AttachmentTransition> {
        self.transitions
            .iter()
            .filter(|transition| {
                transition
                    .src_outputs
                    .iter()
                    .any(|output| output.passes.contains(&pass))
            })
            .collect()
    }

    /// True when `from` reaches `to` through graph edges.
    pub fn reaches(&self, from: PassId, to: PassId) -> bool {
        let Some(start) = self.node_of(from) else {
            return false;
        };
        let Some(goal) = self.node_of(to) else {
            return false;
        };
        petgraph::algo::has_path_connecting(&self.graph, start, goal, None)
    }

    fn node_of(&self, pass: PassId) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&node| self.graph[node] == GraphNode::Pass(pass))
    }
}

/// Build the DAG from the dependency edges, check it for roots, leaves and
/// cycles, and linearize it.
pub fn build_graph(
    passes: &[Arc<FramePass>],
    dependencies: &[FramePassDependencies],
) -> Result<BuiltGraph> {
    if passes.is_empty() {
        return Err(Error::EmptyGraph.into());
    }

    let internal: Vec<&FramePassDependencies> = dependencies
        .iter()
        .filter(|dep| dep.is_internal() && !dep.is_self_edge())
        .collect();

    let is_consumer =
        |pass: &Arc<FramePass>| internal.iter().any(|dep| dep.dst_pass == Some(pass.id()));
    let is_producer =
        |pass: &Arc<FramePass>| internal.iter().any(|dep| dep.src_pass == Some(pass.id()));

    let roots: Vec<PassId> = passes
        .iter()
        .filter(|pass| !is_consumer(pass))
        .map(|pass| pass.id())
        .collect();
    if roots.is_empty() {
        return Err(Error::NoRoot.into());
    }
    let leaves: Vec<PassId> = passes
        .iter()
        .filter(|pass| !is_producer(pass))
        .map(|pass| pass.id())
        .collect();
    if leaves.is_empty() {
        return Err(Error::NoLeaf.into());
    }

    let mut graph = Graph::new();
    let root = graph.add_node(GraphNode::Root);
    let mut nodes = Vec::with_capacity(passes.len());
    for pass in passes {
        nodes.push(graph.add_node(GraphNode::Pass(pass.id())));
    }
    for id in &roots {
        graph.add_edge(root, nodes[id.index()], Vec::new());
    }
    for dep in &internal {
        let (Some(src), Some(dst)) = (dep.src_pass, dep.dst_pass) else {
            continue;
        };
        let transitions =
            build_transitions(&dep.src_outputs, &dep.dst_inputs, Some(src), Some(dst));
        graph.add_edge(nodes[src.index()], nodes[dst.index()], transitions);
    }

    if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
        let name = match graph[cycle.node_id()] {
            GraphNode::Pass(pass) => passes[pass.index()].full_name().to_string(),
            GraphNode::Root => "root".to_string(),
        };
        return Err(Error::CyclicDependency(name.clone(), name).into());
    }

    // Reverse postorder from the root, visiting children in declaration
    // order, yields the DFS execution order.
    let mut postorder = Vec::new();
    let mut visited = vec![false; graph.node_count()];
    fn visit(
        graph: &Graph<GraphNode, Vec<AttachmentTransition>>,
        node: NodeIndex,
        visited: &mut [bool],
        postorder: &mut Vec<NodeIndex>,
    ) {
        if visited[node.index()] {
            return;
        }
        visited[node.index()] = true;
        // petgraph iterates edges most-recent-first; restore insertion order.
        let mut children: Vec<NodeIndex> = graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| edge.target())
            .collect();
        children.reverse();
        for child in children {
            visit(graph, child, visited, postorder);
        }
        postorder.push(node);
    }
    visit(&graph, root, &mut visited, &mut postorder);
    let order: Vec<PassId> = postorder
        .into_iter()
        .rev()
        .filter_map(|node| match graph[node] {
            GraphNode::Pass(pass) => Some(pass),
            GraphNode::Root => None,
        })
        .collect();

    // Merge every internal edge's transitions (self-edges included) into the
    // graph-wide list. Boundary half-edges have no output/input pairing and
    // carry their layout promises through the graph's boundary declarations.
    let mut all = Vec::new();
    for dep in dependencies.iter().filter(|dep| dep.is_internal()) {
        all.extend(build_transitions(
            &dep.src_outputs,
            &dep.dst_inputs,
            dep.src_pass,
            dep.dst_pass,
        ));
    }
    let transitions = merge_all(all, passes);

    Ok(BuiltGraph {
        graph,
        root,
        order,
        transitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    use crate::graph::dependency::build_pass_attach_dependencies;
    use crate::graph::pass::GroupId;
    use crate::record::ClearValue;
    use crate::resource::handler::ResourceHandler;
    use crate::resource::image::{ImageData, ImageViewData, ImageViewId};
    use crate::sampler::SamplerDesc;

    fn colour_view(handler: &ResourceHandler, name: &str) -> ImageViewId {
        let image = handler
            .create_image_id(ImageData::new_2d(
                name,
                vk::Format::R8G8B8A8_UNORM,
                16,
                16,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ))
            .unwrap();
        handler.create_view_id(ImageViewData::whole(image)).unwrap()
    }

    #[test]
    fn empty_graph_is_rejected() {
        let result = build_graph(&[], &[]);
        assert!(matches!(
            result.unwrap_err().downcast_ref::<Error>(),
            Some(Error::EmptyGraph)
        ));
    }

    #[test]
    fn chain_orders_producer_first() {
        let handler = ResourceHandler::new();
        let target = colour_view(&handler, "t");
        let mut a = FramePass::new(PassId(0), GroupId(0), "a".into(), "a".into());
        a.add_output_colour_target(target.clone(), vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let mut b = FramePass::new(PassId(1), GroupId(0), "b".into(), "b".into());
        b.add_input_sampled_image(target, 0, SamplerDesc::default());
        let passes = vec![Arc::new(a), Arc::new(b)];
        let deps = build_pass_attach_dependencies(&passes).unwrap();
        let built = build_graph(&passes, &deps).unwrap();
        assert_eq!(built.order(), &[PassId(0), PassId(1)]);
        assert!(built.reaches(PassId(0), PassId(1)));
    }

    #[test]
    fn diamond_respects_all_parents() {
        let handler = ResourceHandler::new();
        let left = colour_view(&handler, "left");
        let right = colour_view(&handler, "right");
        let mut a = FramePass::new(PassId(0), GroupId(0), "a".into(), "a".into());
        a.add_output_colour_target(left.clone(), vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let mut b = FramePass::new(PassId(1), GroupId(0), "b".into(), "b".into());
        b.add_output_colour_target(right.clone(), vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let mut c = FramePass::new(PassId(2), GroupId(0), "c".into(), "c".into());
        c.add_input_sampled_image(left, 0, SamplerDesc::default());
        c.add_input_sampled_image(right, 1, SamplerDesc::default());
        let passes = vec![Arc::new(a), Arc::new(b), Arc::new(c)];
        let deps = build_pass_attach_dependencies(&passes).unwrap();
        let built = build_graph(&passes, &deps).unwrap();
        let order = built.order();
        let position =
            |pass: PassId| order.iter().position(|&p| p == pass).unwrap();
        assert!(position(PassId(0)) < position(PassId(2)));
        assert!(position(PassId(1)) < position(PassId(2)));
    }

    #[test]
    fn single_inout_pass_builds() {
        let handler = ResourceHandler::new();
        let image = handler
            .create_image_id(ImageData::new_2d(
                "storage",
                vk::Format::R8G8B8A8_UNORM,
                16,
                16,
                vk::ImageUsageFlags::STORAGE,
            ))
            .unwrap();
        let view = handler.create_view_id(ImageViewData::whole(image)).unwrap();
        let mut p = FramePass::new(PassId(0), GroupId(0), "p".into(), "p".into());
        p.add_inout_storage_image(view, 0);
        let passes = vec![Arc::new(p)];
        let deps = build_pass_attach_dependencies(&passes).unwrap();
        let built = build_graph(&passes, &deps).unwrap();
        assert_eq!(built.order(), &[PassId(0)]);
    }
}
