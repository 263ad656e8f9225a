//! Solver-level behaviour observed through whole-graph compilation.

use anyhow::Result;
use ash::vk;

use deimos::{ClearValue, ImageViewData};

mod framework;
use framework::{clear_colour, default_sampler, draw_pass, make_context, position, sample_pass};

#[test]
pub fn declaration_order_does_not_dictate_execution_order() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("reversed");
    let target = env.colour_view("target");

    // The consumer is declared first; the solver still schedules the
    // producer ahead of it.
    let reader = graph.create_pass("reader", sample_pass())?;
    graph.pass_mut(reader).add_input_sampled_image(target.clone(), 0, default_sampler());
    let writer = graph.create_pass("writer", draw_pass())?;
    graph
        .pass_mut(writer)
        .add_output_colour_target(target, vk::AttachmentLoadOp::CLEAR, clear_colour())?;

    let runnable = graph.compile(env.context.clone())?;
    assert!(position(runnable.order(), writer) < position(runnable.order(), reader));
    Ok(())
}

#[test]
pub fn chained_attachments_pair_with_their_parent() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("chained");
    let target = env.colour_view("target");

    let writer = graph.create_pass("writer", draw_pass())?;
    let output = graph.pass_mut(writer).add_output_colour_target(
        target,
        vk::AttachmentLoadOp::CLEAR,
        clear_colour(),
    )?;
    let reader = graph.create_pass("reader", sample_pass())?;
    graph.pass_mut(reader).add_input_sampled(&output, 0, default_sampler());

    let runnable = graph.compile(env.context.clone())?;
    let edge = runnable
        .dependencies()
        .iter()
        .find(|dep| dep.src_pass == Some(writer) && dep.dst_pass == Some(reader))
        .expect("missing producer edge");
    assert_eq!(edge.src_outputs[0], output);
    assert_eq!(edge.dst_inputs[0].parent(), Some(&output));
    Ok(())
}

#[test]
pub fn overlapping_layer_ranges_couple_array_passes() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("layers");
    let image = env.handler.create_image_id(
        deimos::ImageData::new_2d(
            "array",
            vk::Format::R8G8B8A8_UNORM,
            32,
            32,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
        .with_array_layers(6),
    )?;
    let layers_0_2 = env.handler.create_view_id(ImageViewData::new(
        image.clone(),
        vk::ImageViewType::TYPE_2D_ARRAY,
        vk::Format::R8G8B8A8_UNORM,
        deimos::ImageSubresourceRange::new(vk::ImageAspectFlags::COLOR, 0, 1, 0, 3),
    ))?;
    let layers_2_5 = env.handler.create_view_id(ImageViewData::new(
        image.clone(),
        vk::ImageViewType::TYPE_2D_ARRAY,
        vk::Format::R8G8B8A8_UNORM,
        deimos::ImageSubresourceRange::new(vk::ImageAspectFlags::COLOR, 0, 1, 2, 4),
    ))?;
    let layers_3_5 = env.handler.create_view_id(ImageViewData::new(
        image,
        vk::ImageViewType::TYPE_2D_ARRAY,
        vk::Format::R8G8B8A8_UNORM,
        deimos::ImageSubresourceRange::new(vk::ImageAspectFlags::COLOR, 0, 1, 3, 3),
    ))?;

    let writer = graph.create_pass("writer", draw_pass())?;
    graph.pass_mut(writer).add_output_colour_target(
        layers_0_2,
        vk::AttachmentLoadOp::CLEAR,
        Some(ClearValue::Colour([0.0; 4])),
    )?;
    // Overlaps the written layers through layer 2.
    let overlapping = graph.create_pass("overlapping", sample_pass())?;
    graph
        .pass_mut(overlapping)
        .add_input_sampled_image(layers_2_5, 0, default_sampler());
    // Disjoint from the written layers.
    let disjoint = graph.create_pass("disjoint", sample_pass())?;
    graph
        .pass_mut(disjoint)
        .add_input_sampled_image(layers_3_5, 0, default_sampler());

    let runnable = graph.compile(env.context.clone())?;
    assert!(runnable
        .dependencies()
        .iter()
        .any(|dep| dep.src_pass == Some(writer) && dep.dst_pass == Some(overlapping)));
    assert!(!runnable
        .dependencies()
        .iter()
        .any(|dep| dep.src_pass == Some(writer) && dep.dst_pass == Some(disjoint)));
    Ok(())
}

#[test]
pub fn view_interning_is_stable_across_graphs() {
    let env = make_context();
    let image = env.colour_image("shared");
    let first = env.handler.create_view_id(ImageViewData::whole(image.clone())).unwrap();
    let second = env.handler.create_view_id(ImageViewData::whole(image)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.id(), second.id());
}
