//! The dependency builder: pairs writers and readers of overlapping
//! subresources into producer→consumer edges.
//!
//! Attachments are classified into sampled consumers, input consumers and
//! output producers. Every producer whose subresource overlaps a consumer's
//! yields an edge carrying the `(output, input)` attachment pair. Inputs
//! chained from an upstream attachment pair with their parent directly.
//! Consumers without a producer and producers without a consumer become
//! half-edges against the graph boundary, which carry the externally declared
//! layout promises. A pairing whose producer already transitively depends on
//! its consumer is a programming error and fails the build.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;

use crate::error::Error;
use crate::graph::attachment::Attachment;
use crate::graph::pass::{FramePass, PassId};

/// Edge record: one directional producer→consumer coupling. `None` on either
/// side is the graph boundary.
#[derive(Debug, Clone, Default)]
pub struct FramePassDependencies {
    pub src_pass: Option<PassId>,
    pub dst_pass: Option<PassId>,
    pub src_outputs: Vec<Attachment>,
    pub dst_inputs: Vec<Attachment>,
}

impl FramePassDependencies {
    /// True for edges connecting two real passes (including self-edges).
    pub fn is_internal(&self) -> bool {
        self.src_pass.is_some() && self.dst_pass.is_some()
    }

    pub fn is_self_edge(&self) -> bool {
        self.is_internal() && self.src_pass == self.dst_pass
    }
}

/// True when two attachments touch an overlapping subresource of the same
/// resource.
pub fn attachments_overlap(lhs: &Attachment, rhs: &Attachment) -> bool {
    match (lhs.image_attachment(), rhs.image_attachment()) {
        (Some(lhs_image), Some(rhs_image)) => {
            for lhs_view in &lhs_image.views {
                for rhs_view in &rhs_image.views {
                    if lhs_view.image() == rhs_view.image()
                        && lhs_view.virtual_range().intersects(&rhs_view.virtual_range())
                    {
                        return true;
                    }
                }
            }
            false
        }
        (None, None) => {
            let (Some(lhs_buffer), Some(rhs_buffer)) =
                (lhs.buffer_attachment(), rhs.buffer_attachment())
            else {
                return false;
            };
            for lhs_view in &lhs_buffer.buffers {
                for rhs_view in &rhs_buffer.buffers {
                    if lhs_view.buffer() == rhs_view.buffer()
                        && lhs_view.range().intersects(&rhs_view.range())
                    {
                        return true;
                    }
                }
            }
            false
        }
        _ => false,
    }
}

/// Reachability over the edges emitted so far. Edges only ever get added, so
/// positive answers are cached; negative ones are re-derived.
#[derive(Debug, Default)]
struct DependsCache {
    // src -> set of dst: dst depends on src
    successors: HashMap<PassId, BTreeSet<PassId>>,
    known_true: HashMap<(PassId, PassId), bool>,
}

impl DependsCache {
    fn add_edge(&mut self, src: PassId, dst: PassId) {
        self.successors.entry(src).or_default().insert(dst);
    }

    /// Whether `pass` transitively depends on `on`: a path `on → … → pass`
    /// exists.
    fn depends_on(&mut self, pass: PassId, on: PassId) -> bool {
        if pass == on {
            return false;
        }
        if let Some(&cached) = self.known_true.get(&(pass, on)) {
            if cached {
                return true;
            }
        }
        let mut pending = vec![on];
        let mut visited = BTreeSet::new();
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            if current == pass {
                self.known_true.insert((pass, on), true);
                return true;
            }
            if let Some(successors) = self.successors.get(&current) {
                pending.extend(successors.iter().copied());
            }
        }
        false
    }
}

struct EdgeSet {
    edges: Vec<FramePassDependencies>,
    cache: DependsCache,
}

impl EdgeSet {
    fn new() -> Self {
        Self {
            edges: Vec::new(),
            cache: DependsCache::default(),
        }
    }

    fn add_pair(
        &mut self,
        src: PassId,
        dst: PassId,
        output: &Attachment,
        input: &Attachment,
        passes: &[Arc<FramePass>],
    ) -> Result<()> {
        if src != dst && self.cache.depends_on(src, dst) {
            return Err(Error::CyclicDependency(
                passes[src.index()].full_name().to_string(),
                passes[dst.index()].full_name().to_string(),
            )
            .into());
        }
        self.cache.add_edge(src, dst);
        let position = self
            .edges
            .iter()
            .position(|edge| edge.src_pass == Some(src) && edge.dst_pass == Some(dst))
            .unwrap_or_else(|| {
                self.edges.push(FramePassDependencies {
                    src_pass: Some(src),
                    dst_pass: Some(dst),
                    ..Default::default()
                });
                self.edges.len() - 1
            });
        let edge = &mut self.edges[position];
        let known = edge
            .src_outputs
            .iter()
            .zip(edge.dst_inputs.iter())
            .any(|(out, inp)| out == output && inp == input);
        if !known {
            edge.src_outputs.push(output.clone());
            edge.dst_inputs.push(input.clone());
        }
        Ok(())
    }

    fn add_boundary_input(&mut self, dst: PassId, input: &Attachment) {
        let position = self
            .edges
            .iter()
            .position(|edge| edge.src_pass.is_none() && edge.dst_pass == Some(dst))
            .unwrap_or_else(|| {
                self.edges.push(FramePassDependencies {
                    src_pass: None,
                    dst_pass: Some(dst),
                    ..Default::default()
                });
                self.edges.len() - 1
            });
        self.edges[position].dst_inputs.push(input.clone());
    }

    fn add_boundary_output(&mut self, src: PassId, output: &Attachment) {
        let position = self
            .edges
            .iter()
            .position(|edge| edge.dst_pass.is_none() && edge.src_pass == Some(src))
            .unwrap_or_else(|| {
                self.edges.push(FramePassDependencies {
                    src_pass: Some(src),
                    dst_pass: None,
                    ..Default::default()
                });
                self.edges.len() - 1
            });
        self.edges[position].src_outputs.push(output.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Sampled,
    Input,
    Output,
}

fn classify(attachment: &Attachment) -> Vec<Class> {
    let mut classes = Vec::new();
    let flags = attachment.flags;
    if flags.is_sampled() || flags.is_uniform() {
        classes.push(Class::Sampled);
    } else if flags.is_input() {
        classes.push(Class::Input);
    }
    if flags.is_output() {
        classes.push(Class::Output);
    }
    classes
}

/// Walk all declared attachments and produce the dependency edges.
pub fn build_pass_attach_dependencies(
    passes: &[Arc<FramePass>],
) -> Result<Vec<FramePassDependencies>> {
    // (pass, attachment, classes) in declaration order.
    let mut sampled: Vec<(PassId, &Attachment)> = Vec::new();
    let mut inputs: Vec<(PassId, &Attachment)> = Vec::new();
    let mut outputs: Vec<(PassId, &Attachment)> = Vec::new();
    for pass in passes {
        for attachment in pass.attachments() {
            for class in classify(attachment) {
                match class {
                    Class::Sampled => sampled.push((pass.id(), attachment)),
                    Class::Input => inputs.push((pass.id(), attachment)),
                    Class::Output => outputs.push((pass.id(), attachment)),
                }
            }
        }
    }

    let mut edges = EdgeSet::new();
    let mut paired_inputs: Vec<(PassId, &Attachment)> = Vec::new();
    let mut paired_outputs: Vec<(PassId, &Attachment)> = Vec::new();

    // Explicitly chained inputs pair with their parent attachment first;
    // the declared chain is authoritative over overlap scanning.
    for &(dst, input) in inputs.iter().chain(sampled.iter()) {
        let Some(parent) = input.parent() else {
            continue;
        };
        edges.add_pair(parent.pass(), dst, parent, input, passes)?;
        paired_inputs.push((dst, input));
        if let Some(&(src, output)) = outputs
            .iter()
            .find(|(_, output)| *output == parent)
        {
            paired_outputs.push((src, output));
        }
    }

    // Overlap pairing: producers against consumers of the same subresource.
    for &(src, output) in &outputs {
        for &(dst, input) in inputs.iter().chain(sampled.iter()) {
            if paired_inputs.contains(&(dst, input)) {
                continue;
            }
            // An attachment never pairs with itself here; in-out self-edges
            // are resolved below, once real producers had their chance.
            if std::ptr::eq(output, input) {
                continue;
            }
            if !attachments_overlap(output, input) {
                continue;
            }
            edges.add_pair(src, dst, output, input, passes)?;
            paired_outputs.push((src, output));
            paired_inputs.push((dst, input));
        }
    }

    // In-out attachments with no upstream producer rewrite the resource in
    // place: that becomes a self-edge.
    for &(src, output) in &outputs {
        if !output.flags.is_inout() || paired_inputs.contains(&(src, output)) {
            continue;
        }
        edges.add_pair(src, src, output, output, passes)?;
        paired_outputs.push((src, output));
        paired_inputs.push((src, output));
    }

    // Whatever found no counterpart couples to the graph boundary.
    for &(dst, input) in inputs.iter().chain(sampled.iter()) {
        if !paired_inputs.contains(&(dst, input)) {
            edges.add_boundary_input(dst, input);
        }
    }
    for &(src, output) in &outputs {
        if !paired_outputs.contains(&(src, output)) {
            edges.add_boundary_output(src, output);
        }
    }

    Ok(edges.edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    use crate::graph::pass::GroupId;
    use crate::record::ClearValue;
    use crate::resource::handler::ResourceHandler;
    use crate::resource::image::{ImageData, ImageViewData, ImageViewId};
    use crate::sampler::SamplerDesc;

    fn view(handler: &ResourceHandler, name: &str) -> ImageViewId {
        let image = handler
            .create_image_id(ImageData::new_2d(
                name,
                vk::Format::R8G8B8A8_UNORM,
                32,
                32,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ))
            .unwrap();
        handler.create_view_id(ImageViewData::whole(image)).unwrap()
    }

    fn pass(id: u32, name: &str) -> FramePass {
        FramePass::new(PassId(id), GroupId(0), name.into(), name.into())
    }

    #[test]
    fn writer_and_reader_pair_into_an_edge() {
        let handler = ResourceHandler::new();
        let target = view(&handler, "target");
        let mut writer = pass(0, "writer");
        writer
            .add_output_colour_target(target.clone(), vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let mut reader = pass(1, "reader");
        reader.add_input_sampled_image(target, 0, SamplerDesc::default());

        let passes = vec![Arc::new(writer), Arc::new(reader)];
        let deps = build_pass_attach_dependencies(&passes).unwrap();
        let edge = deps
            .iter()
            .find(|edge| edge.src_pass == Some(PassId(0)) && edge.dst_pass == Some(PassId(1)))
            .expect("missing edge");
        assert_eq!(edge.src_outputs.len(), 1);
        assert_eq!(edge.dst_inputs.len(), 1);
    }

    #[test]
    fn disjoint_mip_ranges_do_not_pair() {
        let handler = ResourceHandler::new();
        let image = handler
            .create_image_id(
                ImageData::new_2d(
                    "mips",
                    vk::Format::R8G8B8A8_UNORM,
                    32,
                    32,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                )
                .with_mip_levels(4),
            )
            .unwrap();
        let level0 = handler
            .create_view_id(ImageViewData::new(
                image.clone(),
                vk::ImageViewType::TYPE_2D,
                vk::Format::R8G8B8A8_UNORM,
                crate::resource::image::ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 0, 0),
            ))
            .unwrap();
        let level2 = handler
            .create_view_id(ImageViewData::new(
                image,
                vk::ImageViewType::TYPE_2D,
                vk::Format::R8G8B8A8_UNORM,
                crate::resource::image::ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 2, 0),
            ))
            .unwrap();
        let mut writer = pass(0, "writer");
        writer
            .add_output_colour_target(level0, vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let mut reader = pass(1, "reader");
        reader.add_input_sampled_image(level2, 0, SamplerDesc::default());

        let passes = vec![Arc::new(writer), Arc::new(reader)];
        let deps = build_pass_attach_dependencies(&passes).unwrap();
        assert!(deps.iter().all(|edge| !edge.is_internal()));
    }

    #[test]
    fn inout_attachment_emits_self_edge() {
        let handler = ResourceHandler::new();
        let target = view(&handler, "pingpong");
        let mut p = pass(0, "p");
        p.add_inout_storage_image(target, 0);
        let passes = vec![Arc::new(p)];
        let deps = build_pass_attach_dependencies(&passes).unwrap();
        assert!(deps.iter().any(|edge| edge.is_self_edge()));
    }

    #[test]
    fn mutual_consumption_is_a_cycle() {
        let handler = ResourceHandler::new();
        let x = view(&handler, "x");
        let y = view(&handler, "y");
        let mut a = pass(0, "a");
        a.add_output_colour_target(x.clone(), vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        a.add_input_sampled_image(y.clone(), 0, SamplerDesc::default());
        let mut b = pass(1, "b");
        b.add_output_colour_target(y, vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        b.add_input_sampled_image(x, 0, SamplerDesc::default());

        let passes = vec![Arc::new(a), Arc::new(b)];
        let result = build_pass_attach_dependencies(&passes);
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CyclicDependency(_, _))
        ));
    }

    #[test]
    fn unpaired_attachments_couple_to_the_boundary() {
        let handler = ResourceHandler::new();
        let input = view(&handler, "external_in");
        let output = view(&handler, "external_out");
        let mut p = pass(0, "p");
        p.add_input_sampled_image(input, 0, SamplerDesc::default());
        p.add_output_colour_target(output, vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let passes = vec![Arc::new(p)];
        let deps = build_pass_attach_dependencies(&passes).unwrap();
        assert!(deps
            .iter()
            .any(|edge| edge.src_pass.is_none() && edge.dst_pass == Some(PassId(0))));
        assert!(deps
            .iter()
            .any(|edge| edge.dst_pass.is_none() && edge.src_pass == Some(PassId(0))));
    }
}
