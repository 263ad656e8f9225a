//! End-to-end scenarios driving declaration, compilation and recording
//! against a headless context.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use deimos::{
    make_layout_state, make_pipeline_state, ClearValue, Config, EmptyExecutor, Error,
    GenerateMipmaps, ImageSubresourceRange, ImageViewData, RecordContext, RunnableCreator,
    RunnablePass,
};

mod framework;
use framework::{clear_colour, compute_pass, default_sampler, draw_pass, make_context, position, sample_pass};

#[test]
pub fn linear_chain_orders_and_transitions() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("s1");
    let target = env.colour_view("target");

    let a = graph.create_pass("a", draw_pass())?;
    graph
        .pass_mut(a)
        .add_output_colour_target(target.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
    let b = graph.create_pass("b", sample_pass())?;
    graph.pass_mut(b).add_input_sampled_image(target.clone(), 0, default_sampler());
    let c = graph.create_pass("c", sample_pass())?;
    graph.pass_mut(c).add_input_sampled_image(target.clone(), 0, default_sampler());

    let mut runnable = graph.compile(env.context.clone())?;

    let order = runnable.order().to_vec();
    assert_eq!(order.len(), 3);
    assert_eq!(order[0], a);
    assert!(runnable.graph().reaches(a, b));
    assert!(runnable.graph().reaches(a, c));

    runnable.record()?;
    let record = runnable.last_record();
    assert_eq!(
        record.layout_state(&target).layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    // One barrier into the colour layout before the writer, one into the
    // sampled layout before the first reader; the second reader needs none.
    assert_eq!(record.image_barrier_count(), 2);
    Ok(())
}

#[test]
pub fn producer_consumer_layouts_agree_across_edges() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("p2");
    let target = env.colour_view("target");

    let a = graph.create_pass("a", draw_pass())?;
    graph
        .pass_mut(a)
        .add_output_colour_target(target.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
    let b = graph.create_pass("b", sample_pass())?;
    graph.pass_mut(b).add_input_sampled_image(target.clone(), 0, default_sampler());

    let runnable = graph.compile(env.context.clone())?;
    let src = runnable.runnable(a).unwrap().layout_transition(0, &target).unwrap();
    let dst = runnable.runnable(b).unwrap().layout_transition(0, &target).unwrap();
    assert_eq!(src.to.layout, dst.from.layout);
    assert_eq!(src.needed.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    assert_eq!(dst.needed.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    Ok(())
}

#[test]
pub fn self_inout_storage_pass() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("s2");
    let target = env.colour_view("pingpong");

    let p = graph.create_pass("p", compute_pass())?;
    graph.pass_mut(p).add_inout_storage_image(target.clone(), 0);

    let mut runnable = graph.compile(env.context.clone())?;
    assert_eq!(runnable.order(), &[p]);
    assert!(runnable.dependencies().iter().any(|dep| dep.is_self_edge()));

    runnable.record()?;
    let record = runnable.last_record();
    assert_eq!(record.layout_state(&target).layout, vk::ImageLayout::GENERAL);
    // The entry transition is the only one; the in-place rewrite needs no
    // further barrier.
    assert_eq!(record.image_barrier_count(), 1);
    Ok(())
}

#[test]
pub fn disabled_pass_still_clears_through_implicit_action() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("s3");
    let target = env.colour_view("cleared");

    let action_view = target.clone();
    let creator: RunnableCreator = Box::new(move |pass, context, _graph| {
        let config = Config::default()
            .with_enabled(|| false)
            .with_implicit_action(
                action_view.clone(),
                RecordContext::clear_attachment(
                    action_view.clone(),
                    ClearValue::Colour([0.0; 4]),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
            );
        Ok(RunnablePass::new(
            pass,
            context,
            EmptyExecutor,
            make_pipeline_state(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
            false,
            config,
        ))
    });
    let a = graph.create_pass("a", creator)?;
    graph
        .pass_mut(a)
        .add_output_colour_target(target.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
    let b = graph.create_pass("b", sample_pass())?;
    graph.pass_mut(b).add_input_sampled_image(target.clone(), 0, default_sampler());

    let mut runnable = graph.compile(env.context.clone())?;
    runnable.record()?;
    let record = runnable.last_record();
    // The clear moved the image through the transfer layout into the sampled
    // layout even though the producing pass was disabled.
    assert_eq!(
        record.layout_state(&target).layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
    assert_eq!(record.image_barrier_count(), 2);
    assert!(!record.has_implicit_transition(&target));
    Ok(())
}

#[test]
pub fn mipmap_generation_leaves_chain_sampled() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("s4");
    let image = env.handler.create_image_id(
        deimos::ImageData::new_2d(
            "mips",
            vk::Format::R8G8B8A8_UNORM,
            64,
            64,
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )
        .with_mip_levels(4),
    )?;
    let whole = env.whole_view(&image);
    let level3 = env.handler.create_view_id(ImageViewData::new(
        image.clone(),
        vk::ImageViewType::TYPE_2D,
        vk::Format::R8G8B8A8_UNORM,
        ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, 3, 0),
    ))?;

    let m = graph.create_pass(
        "mips",
        GenerateMipmaps::creator(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, Config::default()),
    )?;
    graph.pass_mut(m).add_inout_transfer_image(whole.clone());
    let s = graph.create_pass("sample", sample_pass())?;
    graph.pass_mut(s).add_input_sampled_image(level3, 0, default_sampler());
    graph.add_input(&whole, make_layout_state(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));

    let mut runnable = graph.compile(env.context.clone())?;
    assert_eq!(position(runnable.order(), m), 0);

    runnable.record()?;
    let record = runnable.last_record();
    for level in 0..4 {
        let state = record.image_layout_state(
            &image,
            vk::ImageViewType::TYPE_2D,
            &ImageSubresourceRange::level_layer(vk::ImageAspectFlags::COLOR, level, 0),
        );
        assert_eq!(
            state.layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            "level {level} must end in the sampled layout"
        );
    }
    Ok(())
}

#[test]
pub fn aliased_views_track_per_pass_index() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("s5");
    let v0 = env.colour_view("ping");
    let v1 = env.colour_view("pong");

    let index = Arc::new(AtomicU32::new(0));
    let chooser = index.clone();
    let creator: RunnableCreator = Box::new(move |pass, context, _graph| {
        let chooser = chooser.clone();
        let config = Config::default()
            .with_max_pass_count(2)
            .with_pass_index(move || chooser.load(Ordering::SeqCst));
        Ok(RunnablePass::new(
            pass,
            context,
            EmptyExecutor,
            make_pipeline_state(vk::PipelineStageFlags::COMPUTE_SHADER),
            true,
            config,
        ))
    });
    let p = graph.create_pass("p", creator)?;
    let attach = graph
        .pass_mut(p)
        .add_output_storage_image(vec![v0.clone(), v1.clone()], 0);

    // The alias resolves stably per index.
    assert_eq!(attach.view(0), Some(v0.clone()));
    assert_eq!(attach.view(0), Some(v0.clone()));
    assert_eq!(attach.view(1), Some(v1.clone()));

    let mut runnable = graph.compile(env.context.clone())?;

    runnable.record()?;
    assert_eq!(
        runnable.last_record().layout_state(&v0).layout,
        vk::ImageLayout::GENERAL
    );
    assert_eq!(
        runnable.last_record().layout_state(&v1).layout,
        vk::ImageLayout::UNDEFINED
    );

    index.store(1, Ordering::SeqCst);
    runnable.record()?;
    assert_eq!(
        runnable.last_record().layout_state(&v1).layout,
        vk::ImageLayout::GENERAL
    );
    assert_eq!(
        runnable.last_record().layout_state(&v0).layout,
        vk::ImageLayout::UNDEFINED
    );
    Ok(())
}

#[test]
pub fn mutual_consumption_fails_compilation() {
    let env = make_context();
    let mut graph = env.graph("s6");
    let x = env.colour_view("x");
    let y = env.colour_view("y");

    let a = graph.create_pass("a", draw_pass()).unwrap();
    graph
        .pass_mut(a)
        .add_output_colour_target(x.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())
        .unwrap();
    graph.pass_mut(a).add_input_sampled_image(y.clone(), 0, default_sampler());
    let b = graph.create_pass("b", draw_pass()).unwrap();
    graph
        .pass_mut(b)
        .add_output_colour_target(y, vk::AttachmentLoadOp::CLEAR, clear_colour())
        .unwrap();
    graph.pass_mut(b).add_input_sampled_image(x, 0, default_sampler());

    let result = graph.compile(env.context.clone());
    assert!(matches!(
        result.unwrap_err().downcast_ref::<Error>(),
        Some(Error::CyclicDependency(_, _))
    ));
}

#[test]
pub fn execution_order_never_runs_a_consumer_early() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("p1");
    let left = env.colour_view("left");
    let right = env.colour_view("right");
    let merged = env.colour_view("merged");

    let a = graph.create_pass("a", draw_pass())?;
    graph
        .pass_mut(a)
        .add_output_colour_target(left.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
    let b = graph.create_pass("b", draw_pass())?;
    graph
        .pass_mut(b)
        .add_output_colour_target(right.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
    let c = graph.create_pass("c", draw_pass())?;
    graph.pass_mut(c).add_input_sampled_image(left, 0, default_sampler());
    graph.pass_mut(c).add_input_sampled_image(right, 1, default_sampler());
    graph
        .pass_mut(c)
        .add_output_colour_target(merged.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
    let d = graph.create_pass("d", sample_pass())?;
    graph.pass_mut(d).add_input_sampled_image(merged, 0, default_sampler());

    let runnable = graph.compile(env.context.clone())?;
    let order = runnable.order();
    for (earlier_position, &earlier) in order.iter().enumerate() {
        for &later in &order[earlier_position + 1..] {
            assert!(
                !runnable.graph().reaches(later, earlier),
                "{later:?} precedes {earlier:?} but depends on it"
            );
        }
    }
    Ok(())
}

#[test]
pub fn isomorphic_graphs_compile_identically() -> Result<()> {
    fn build(env: &framework::Context) -> Result<(Vec<deimos::PassId>, Vec<deimos::LayoutTransition>)> {
        let mut graph = env.graph("roundtrip");
        let target = env.colour_view("target");
        let a = graph.create_pass("a", draw_pass())?;
        graph
            .pass_mut(a)
            .add_output_colour_target(target.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
        let b = graph.create_pass("b", sample_pass())?;
        graph.pass_mut(b).add_input_sampled_image(target.clone(), 0, default_sampler());
        let runnable = graph.compile(env.context.clone())?;
        let transitions = vec![
            runnable.runnable(a).unwrap().layout_transition(0, &target).unwrap(),
            runnable.runnable(b).unwrap().layout_transition(0, &target).unwrap(),
        ];
        Ok((runnable.order().to_vec(), transitions))
    }

    let first_env = make_context();
    let second_env = make_context();
    let (first_order, first_transitions) = build(&first_env)?;
    let (second_order, second_transitions) = build(&second_env)?;
    let as_indices = |order: &[deimos::PassId]| -> Vec<usize> {
        order.iter().map(|pass| pass.index()).collect()
    };
    assert_eq!(as_indices(&first_order), as_indices(&second_order));
    assert_eq!(first_transitions, second_transitions);
    Ok(())
}

#[test]
pub fn pass_without_attachments_records() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("empty_pass");
    graph.create_pass("noop", RunnablePass::empty_creator())?;
    let mut runnable = graph.compile(env.context.clone())?;
    runnable.record()?;
    assert_eq!(runnable.last_record().image_barrier_count(), 0);
    Ok(())
}

#[test]
pub fn declared_final_layout_is_honoured() -> Result<()> {
    let env = make_context();
    let mut graph = env.graph("final");
    let target = env.colour_view("exported");

    let a = graph.create_pass("a", draw_pass())?;
    graph
        .pass_mut(a)
        .add_output_colour_target(target.clone(), vk::AttachmentLoadOp::CLEAR, clear_colour())?;
    graph.add_output(&target, make_layout_state(vk::ImageLayout::TRANSFER_SRC_OPTIMAL));

    let mut runnable = graph.compile(env.context.clone())?;
    assert_eq!(
        runnable.get_final_layout_state(&target, 0).layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    );
    runnable.record()?;
    let record = runnable.last_record();
    assert_eq!(
        record.layout_state(&target).layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    );
    // Entry barrier plus the final-layout barrier after the pass.
    assert_eq!(record.image_barrier_count(), 2);
    Ok(())
}
