//! Flattened per-transition records and their merge passes.
//!
//! After pairing, every edge contributes one [`AttachmentTransition`] per
//! `(output, input)` attachment couple. The merge pipeline collapses
//! duplicates, folds transitions that share an input into one record with
//! several sources, and drops sampled transitions whose destination never
//! actually samples the view. Merging is idempotent.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::graph::attachment::Attachment;
use crate::graph::pass::{FramePass, PassId};

/// An attachment together with the passes it stands for on one side of a
/// transition.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPasses {
    pub attachment: Attachment,
    pub passes: BTreeSet<PassId>,
}

impl AttachmentPasses {
    pub fn new(attachment: Attachment, pass: Option<PassId>) -> Self {
        Self {
            attachment,
            passes: pass.into_iter().collect(),
        }
    }
}

/// One resolved transition: the outputs feeding a consumed input.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentTransition {
    pub src_outputs: Vec<AttachmentPasses>,
    pub dst_input: AttachmentPasses,
}

/// Zip the output/input couples of one dependency edge into transitions.
pub fn build_transitions(
    src_outputs: &[Attachment],
    dst_inputs: &[Attachment],
    src_pass: Option<PassId>,
    dst_pass: Option<PassId>,
) -> Vec<AttachmentTransition> {
    debug_assert_eq!(src_outputs.len(), dst_inputs.len());
    let result = src_outputs
        .iter()
        .zip(dst_inputs.iter())
        .map(|(output, input)| AttachmentTransition {
            src_outputs: vec![AttachmentPasses::new(output.clone(), src_pass)],
            dst_input: AttachmentPasses::new(input.clone(), dst_pass),
        })
        .collect();
    merge_identical_transitions(result)
}

/// Merge transitions whose first output and input attachments are the same,
/// folding their pass sets together.
pub fn merge_identical_transitions(
    transitions: Vec<AttachmentTransition>,
) -> Vec<AttachmentTransition> {
    let mut result: Vec<AttachmentTransition> = Vec::new();
    for transition in transitions {
        let found = result.iter_mut().find(|lookup| {
            lookup.src_outputs.first().map(|output| &output.attachment)
                == transition.src_outputs.first().map(|output| &output.attachment)
                && lookup.dst_input.attachment == transition.dst_input.attachment
        });
        match found {
            Some(existing) => {
                if let (Some(into), Some(from)) =
                    (existing.src_outputs.first_mut(), transition.src_outputs.first())
                {
                    into.passes.extend(from.passes.iter().copied());
                }
                existing
                    .dst_input
                    .passes
                    .extend(transition.dst_input.passes.iter().copied());
            }
            None => result.push(transition),
        }
    }
    result
}

/// Merge transitions sharing an input attachment, concatenating their source
/// sets.
pub fn merge_transitions_per_input(
    transitions: Vec<AttachmentTransition>,
) -> Vec<AttachmentTransition> {
    let mut result: Vec<AttachmentTransition> = Vec::new();
    for transition in transitions {
        let found = result
            .iter_mut()
            .find(|lookup| lookup.dst_input.attachment == transition.dst_input.attachment);
        match found {
            Some(existing) => {
                for output in transition.src_outputs {
                    if !existing.src_outputs.contains(&output) {
                        existing.src_outputs.push(output);
                    }
                }
                existing
                    .dst_input
                    .passes
                    .extend(transition.dst_input.passes.iter().copied());
            }
            None => result.push(transition),
        }
    }
    result
}

/// Drop, from sampled transitions, destination passes that do not actually
/// declare the sampled attachment.
pub fn reduce_direct_paths(
    mut transitions: Vec<AttachmentTransition>,
    passes: &[Arc<FramePass>],
) -> Vec<AttachmentTransition> {
    for transition in &mut transitions {
        if !transition.dst_input.attachment.flags.is_sampled() {
            continue;
        }
        let attachment = transition.dst_input.attachment.clone();
        transition.dst_input.passes.retain(|pass| {
            passes
                .get(pass.index())
                .map(|pass| pass.attachments().contains(&attachment))
                .unwrap_or(false)
        });
    }
    transitions
}

/// The full merge pipeline, run over the concatenated per-edge transitions.
pub fn merge_all(
    transitions: Vec<AttachmentTransition>,
    passes: &[Arc<FramePass>],
) -> Vec<AttachmentTransition> {
    let transitions = merge_identical_transitions(transitions);
    let transitions = merge_transitions_per_input(transitions);
    reduce_direct_paths(transitions, passes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    use crate::graph::pass::GroupId;
    use crate::record::ClearValue;
    use crate::resource::handler::ResourceHandler;
    use crate::resource::image::{ImageData, ImageViewData};
    use crate::sampler::SamplerDesc;

    fn transitions_fixture() -> (Vec<AttachmentTransition>, Vec<Arc<FramePass>>) {
        let handler = ResourceHandler::new();
        let image = handler
            .create_image_id(ImageData::new_2d(
                "img",
                vk::Format::R8G8B8A8_UNORM,
                8,
                8,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            ))
            .unwrap();
        let view = handler.create_view_id(ImageViewData::whole(image)).unwrap();
        let mut writer = FramePass::new(PassId(0), GroupId(0), "w".into(), "w".into());
        let out = writer
            .add_output_colour_target(view.clone(), vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let mut reader_b = FramePass::new(PassId(1), GroupId(0), "b".into(), "b".into());
        reader_b.add_input_sampled_image(view.clone(), 0, SamplerDesc::default());
        let input_b = reader_b.attachments()[0].clone();
        let mut reader_c = FramePass::new(PassId(2), GroupId(0), "c".into(), "c".into());
        reader_c.add_input_sampled_image(view, 0, SamplerDesc::default());
        let input_c = reader_c.attachments()[0].clone();

        let transitions = vec![
            build_transitions(
                std::slice::from_ref(&out),
                std::slice::from_ref(&input_b),
                Some(PassId(0)),
                Some(PassId(1)),
            ),
            build_transitions(
                std::slice::from_ref(&out),
                std::slice::from_ref(&input_b),
                Some(PassId(0)),
                Some(PassId(1)),
            ),
            build_transitions(
                std::slice::from_ref(&out),
                std::slice::from_ref(&input_c),
                Some(PassId(0)),
                Some(PassId(2)),
            ),
        ]
        .into_iter()
        .flatten()
        .collect();
        let passes = vec![Arc::new(writer), Arc::new(reader_b), Arc::new(reader_c)];
        (transitions, passes)
    }

    #[test]
    fn identical_transitions_collapse() {
        let (transitions, _) = transitions_fixture();
        let merged = merge_identical_transitions(transitions);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merging_is_idempotent() {
        let (transitions, passes) = transitions_fixture();
        let once = merge_all(transitions, &passes);
        let twice = merge_all(once.clone(), &passes);
        assert_eq!(once, twice);
    }

    #[test]
    fn reduce_keeps_actual_samplers() {
        let (transitions, passes) = transitions_fixture();
        let merged = merge_identical_transitions(transitions);
        let reduced = reduce_direct_paths(merged, &passes);
        for transition in &reduced {
            if transition.dst_input.attachment.flags.is_sampled() {
                assert!(!transition.dst_input.passes.is_empty());
            }
        }
    }
}
