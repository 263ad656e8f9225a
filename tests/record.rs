//! Barrier-engine behaviour across whole graphs: buffer access tracking,
//! clearable outputs, boundary layout seeding and ordering-only attachments.

use anyhow::Result;
use ash::vk;

use deimos::{
    make_layout_state, BufferData, BufferSubresourceRange, BufferViewData, ClearValue,
};

mod framework;
use framework::{compute_pass, default_sampler, draw_pass, make_context, sample_pass};

#[test]
pub fn storage_buffer_write_then_read() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("buffers");
    let buffer = env.handler.create_buffer_id(BufferData::new(
        "counters",
        1024,
        vk::BufferUsageFlags::STORAGE_BUFFER,
    ))?;
    let view = env.handler.create_buffer_view_id(BufferViewData::whole(buffer.clone()))?;

    let writer = graph.create_pass("writer", compute_pass())?;
    graph.pass_mut(writer).add_output_storage_buffer(view.clone(), 0);
    let reader = graph.create_pass("reader", compute_pass())?;
    graph.pass_mut(reader).add_input_storage_buffer(view.clone(), 0);

    let mut runnable = graph.compile(env.context.clone())?;
    assert_eq!(runnable.order(), &[writer, reader]);

    runnable.record()?;
    let record = runnable.last_record();
    let state = record.access_state(&buffer, &BufferSubresourceRange::whole());
    assert_eq!(state.access, vk::AccessFlags::SHADER_READ);
    assert_eq!(state.stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    assert_eq!(record.buffer_barrier_count(), 2);
    Ok(())
}

#[test]
pub fn clearable_storage_buffer_fills_before_use() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("clear_buffer");
    let buffer = env.handler.create_buffer_id(BufferData::new(
        "scratch",
        256,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
    ))?;
    let view = env.handler.create_buffer_view_id(BufferViewData::whole(buffer.clone()))?;

    let p = graph.create_pass("p", compute_pass())?;
    graph.pass_mut(p).add_clearable_output_storage_buffer(view, 0);

    let mut runnable = graph.compile(env.context.clone())?;
    runnable.record()?;
    let record = runnable.last_record();
    // One barrier into the transfer-write state for the fill, one into the
    // shader-write state for the dispatch.
    assert_eq!(record.buffer_barrier_count(), 2);
    let state = record.access_state(&buffer, &BufferSubresourceRange::whole());
    assert_eq!(state.access, vk::AccessFlags::SHADER_WRITE);
    Ok(())
}

#[test]
pub fn clearable_storage_image_ends_general() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("clear_image");
    let target = env.colour_view("scratch");

    let p = graph.create_pass("p", compute_pass())?;
    graph
        .pass_mut(p)
        .add_clearable_output_storage_image(target.clone(), 0, ClearValue::Colour([0.0; 4]));

    let mut runnable = graph.compile(env.context.clone())?;
    runnable.record()?;
    let record = runnable.last_record();
    assert_eq!(record.layout_state(&target).layout, vk::ImageLayout::GENERAL);
    // Transfer-destination for the clear, then the storage layout.
    assert_eq!(record.image_barrier_count(), 2);
    Ok(())
}

#[test]
pub fn declared_input_layout_elides_the_entry_barrier() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("seeded");
    let texture = env.colour_view("uploaded");

    let p = graph.create_pass("p", sample_pass())?;
    graph.pass_mut(p).add_input_sampled_image(texture.clone(), 0, default_sampler());
    graph.add_input(
        &texture,
        make_layout_state(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
    );

    let mut runnable = graph.compile(env.context.clone())?;
    runnable.record()?;
    assert_eq!(runnable.last_record().image_barrier_count(), 0);
    Ok(())
}

#[test]
pub fn implicit_attachment_forces_a_layout() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("implicit");
    let target = env.colour_view("exported");

    let a = graph.create_pass("a", draw_pass())?;
    graph.pass_mut(a).add_output_colour_target(
        target.clone(),
        vk::AttachmentLoadOp::CLEAR,
        Some(ClearValue::Colour([0.0; 4])),
    )?;
    // Ordering-only constraint: a later pass hands the image to a transfer
    // queue and needs it as a transfer source, without binding a descriptor.
    let handoff = graph.create_pass(
        "handoff",
        deimos::RunnablePass::creator_from_fn(vk::PipelineStageFlags::TRANSFER, |_, _, _| Ok(())),
    )?;
    graph
        .pass_mut(handoff)
        .add_implicit(target.clone(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

    let mut runnable = graph.compile(env.context.clone())?;
    assert_eq!(runnable.order(), &[a, handoff]);
    runnable.record()?;
    assert_eq!(
        runnable.last_record().layout_state(&target).layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    );
    Ok(())
}

#[test]
pub fn rerecording_starts_from_a_fresh_state() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("rerecord");
    let target = env.colour_view("target");

    let a = graph.create_pass("a", draw_pass())?;
    graph.pass_mut(a).add_output_colour_target(
        target.clone(),
        vk::AttachmentLoadOp::CLEAR,
        Some(ClearValue::Colour([0.0; 4])),
    )?;
    let b = graph.create_pass("b", sample_pass())?;
    graph.pass_mut(b).add_input_sampled_image(target.clone(), 0, default_sampler());

    let mut runnable = graph.compile(env.context.clone())?;
    runnable.record()?;
    let first = runnable.last_record().image_barrier_count();
    runnable.record()?;
    let second = runnable.last_record().image_barrier_count();
    assert_eq!(first, second);
    Ok(())
}
