//! Descriptor and pipeline plumbing shared by graphics and compute passes.
//!
//! A [`PipelineHolder`] owns the descriptor set layout, pipeline layout and
//! descriptor pool of one pass, plus one `VkPipeline` per pass index (or a
//! single shared one when only one program was supplied). Descriptor bindings
//! are derived from the pass's descriptor-bearing attachments. Descriptor
//! sets are allocated and written lazily, the first time a pass index is
//! used. Pipelines dropped through [`PipelineHolder::reset_pipeline`] go
//! through the context's retirement ledger, since they may still be
//! referenced by in-flight command buffers.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;

use crate::context::{DeferredResource, GraphContext};
use crate::error::{map_vk, Error};
use crate::graph::attachment::Attachment;
use crate::graph::pass::FramePass;
use crate::resource::handler::ResourceHandler;
use crate::sampler::{create_sampler, SamplerDesc};

/// One shader stage of a program.
#[derive(Debug, Clone)]
pub struct ProgramStage {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    pub entry: CString,
}

impl ProgramStage {
    pub fn new(module: vk::ShaderModule, stage: vk::ShaderStageFlags) -> Self {
        Self {
            module,
            stage,
            entry: CString::new("main").unwrap(),
        }
    }
}

/// The shader stages of one pipeline.
pub type Program = Vec<ProgramStage>;

/// Lazily sources the program for a pass index.
pub type ProgramCreator = Box<dyn FnMut(u32) -> Program>;

/// Shared sampler cache, keyed by description.
pub type SamplerCache = Arc<Mutex<HashMap<SamplerDesc, vk::Sampler>>>;

/// Get or create the sampler for a description.
pub fn cached_sampler(
    cache: &SamplerCache,
    context: &GraphContext,
    desc: &SamplerDesc,
) -> Result<vk::Sampler> {
    let mut cache = cache.lock().map_err(Error::from)?;
    if let Some(&sampler) = cache.get(desc) {
        return Ok(sampler);
    }
    let sampler = create_sampler(context, desc)?;
    cache.insert(*desc, sampler);
    Ok(sampler)
}

/// Pipeline-level configuration of a pass.
#[derive(Default)]
pub struct PipelineConfig {
    /// One program per pass index, or a single shared program.
    pub programs: Vec<Program>,
    /// Lazy program source, overriding `programs` when present.
    pub program_creator: Option<ProgramCreator>,
    pub push_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineConfig {
    pub fn with_program(mut self, program: Program) -> Self {
        self.programs.push(program);
        self
    }

    pub fn with_programs(mut self, programs: Vec<Program>) -> Self {
        self.programs = programs;
        self
    }

    pub fn with_program_creator(mut self, creator: ProgramCreator) -> Self {
        self.program_creator = Some(creator);
        self
    }

    pub fn with_push_range(mut self, range: vk::PushConstantRange) -> Self {
        self.push_ranges.push(range);
        self
    }
}

/// Owns descriptor machinery and pipelines for one pass.
pub struct PipelineHolder {
    context: Arc<GraphContext>,
    handler: Arc<ResourceHandler>,
    pass: Arc<FramePass>,
    samplers: SamplerCache,
    bind_point: vk::PipelineBindPoint,
    max_pass_count: u32,
    config: PipelineConfig,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<Option<vk::DescriptorSet>>,
    pipelines: Vec<vk::Pipeline>,
}

impl PipelineHolder {
    pub fn new(
        context: Arc<GraphContext>,
        handler: Arc<ResourceHandler>,
        pass: Arc<FramePass>,
        samplers: SamplerCache,
        bind_point: vk::PipelineBindPoint,
        max_pass_count: u32,
        config: PipelineConfig,
    ) -> Self {
        let max = max_pass_count.max(1) as usize;
        Self {
            context,
            handler,
            pass,
            samplers,
            bind_point,
            max_pass_count: max as u32,
            config,
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: vec![None; max],
            pipelines: vec![vk::Pipeline::null(); max],
        }
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn max_pass_count(&self) -> u32 {
        self.max_pass_count
    }

    fn descriptor_type(&self, attachment: &Attachment) -> vk::DescriptorType {
        if attachment.is_image() {
            if attachment.flags.is_sampled() {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            } else {
                vk::DescriptorType::STORAGE_IMAGE
            }
        } else {
            let texel = attachment
                .buffer_attachment()
                .map(|buffer| buffer.buffers.iter().any(|view| view.data().format.is_some()))
                .unwrap_or(false);
            match (attachment.flags.is_uniform(), texel) {
                (true, true) => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
                (true, false) => vk::DescriptorType::UNIFORM_BUFFER,
                (false, true) => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
                (false, false) => vk::DescriptorType::STORAGE_BUFFER,
            }
        }
    }

    fn stage_flags(&self) -> vk::ShaderStageFlags {
        if self.bind_point == vk::PipelineBindPoint::COMPUTE {
            vk::ShaderStageFlags::COMPUTE
        } else {
            vk::ShaderStageFlags::ALL_GRAPHICS
        }
    }

    /// Create the set layout, pipeline layout and descriptor pool.
    pub fn initialise(&mut self) -> Result<()> {
        let Some(device) = self.context.device() else {
            return Ok(());
        };
        let descriptors = self.pass.descriptor_attachments();
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = descriptors
            .iter()
            .map(|attachment| vk::DescriptorSetLayoutBinding {
                binding: attachment.binding,
                descriptor_type: self.descriptor_type(attachment),
                descriptor_count: 1,
                stage_flags: self.stage_flags(),
                p_immutable_samplers: std::ptr::null(),
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::DescriptorSetLayoutCreateFlags::empty(),
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
        };
        self.descriptor_set_layout = map_vk("DescriptorSetLayout creation", unsafe {
            device.create_descriptor_set_layout(&layout_info, None)
        })?;

        let pipeline_layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::PipelineLayoutCreateFlags::empty(),
            set_layout_count: 1,
            p_set_layouts: &self.descriptor_set_layout,
            push_constant_range_count: self.config.push_ranges.len() as u32,
            p_push_constant_ranges: if self.config.push_ranges.is_empty() {
                std::ptr::null()
            } else {
                self.config.push_ranges.as_ptr()
            },
        };
        self.pipeline_layout = map_vk("PipelineLayout creation", unsafe {
            device.create_pipeline_layout(&pipeline_layout_info, None)
        })?;

        if !bindings.is_empty() {
            let sizes: Vec<vk::DescriptorPoolSize> = bindings
                .iter()
                .map(|binding| vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: binding.descriptor_count * self.max_pass_count,
                })
                .collect();
            let pool_info = vk::DescriptorPoolCreateInfo {
                s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
                p_next: std::ptr::null(),
                flags: vk::DescriptorPoolCreateFlags::empty(),
                max_sets: self.max_pass_count,
                pool_size_count: sizes.len() as u32,
                p_pool_sizes: sizes.as_ptr(),
            };
            self.descriptor_pool = map_vk("DescriptorPool creation", unsafe {
                device.create_descriptor_pool(&pool_info, None)
            })?;
        }
        Ok(())
    }

    /// Get or create the descriptor set for a pass index, writing every
    /// descriptor-bearing attachment resolved for that index.
    pub fn descriptor_set(&mut self, index: u32) -> Result<vk::DescriptorSet> {
        let slot = index.min(self.max_pass_count - 1) as usize;
        if let Some(set) = self.descriptor_sets[slot] {
            return Ok(set);
        }
        let Some(device) = self.context.device() else {
            self.descriptor_sets[slot] = Some(vk::DescriptorSet::null());
            return Ok(vk::DescriptorSet::null());
        };
        if self.descriptor_pool == vk::DescriptorPool::null() {
            self.descriptor_sets[slot] = Some(vk::DescriptorSet::null());
            return Ok(vk::DescriptorSet::null());
        }
        let allocate_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            p_next: std::ptr::null(),
            descriptor_pool: self.descriptor_pool,
            descriptor_set_count: 1,
            p_set_layouts: &self.descriptor_set_layout,
        };
        let set = map_vk("DescriptorSet allocation", unsafe {
            device.allocate_descriptor_sets(&allocate_info)
        })?[0];

        let descriptors: Vec<Attachment> = self
            .pass
            .descriptor_attachments()
            .into_iter()
            .cloned()
            .collect();
        let mut image_infos: Vec<Box<vk::DescriptorImageInfo>> = Vec::new();
        let mut buffer_infos: Vec<Box<vk::DescriptorBufferInfo>> = Vec::new();
        let mut texel_views: Vec<Box<vk::BufferView>> = Vec::new();
        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();
        for attachment in &descriptors {
            let descriptor_type = self.descriptor_type(attachment);
            let mut write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                p_next: std::ptr::null(),
                dst_set: set,
                dst_binding: attachment.binding,
                dst_array_element: 0,
                descriptor_count: 1,
                descriptor_type,
                p_image_info: std::ptr::null(),
                p_buffer_info: std::ptr::null(),
                p_texel_buffer_view: std::ptr::null(),
            };
            match descriptor_type {
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER | vk::DescriptorType::STORAGE_IMAGE => {
                    let Some(view) = attachment.view(index) else {
                        continue;
                    };
                    let image_view = self.handler.create_image_view(&self.context, &view)?;
                    let sampler = match attachment
                        .image_attachment()
                        .and_then(|image| image.sampler.as_ref())
                    {
                        Some(desc) => cached_sampler(&self.samplers, &self.context, desc)?,
                        None => vk::Sampler::null(),
                    };
                    let info = Box::new(vk::DescriptorImageInfo {
                        sampler,
                        image_view,
                        image_layout: attachment
                            .wanted_layout(self.context.separate_depth_stencil_layouts()),
                    });
                    write.p_image_info = info.as_ref();
                    image_infos.push(info);
                }
                vk::DescriptorType::UNIFORM_TEXEL_BUFFER
                | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
                    let Some(view) = attachment.buffer_view(index) else {
                        continue;
                    };
                    let texel_view = self.handler.create_buffer_view(&self.context, &view)?;
                    let info = Box::new(texel_view);
                    write.p_texel_buffer_view = info.as_ref();
                    texel_views.push(info);
                }
                _ => {
                    let Some(view) = attachment.buffer_view(index) else {
                        continue;
                    };
                    let buffer = self.handler.create_buffer(&self.context, view.buffer())?;
                    let info = Box::new(vk::DescriptorBufferInfo {
                        buffer,
                        offset: view.range().offset,
                        range: view.range().size,
                    });
                    write.p_buffer_info = info.as_ref();
                    buffer_infos.push(info);
                }
            }
            writes.push(write);
        }
        unsafe { device.update_descriptor_sets(&writes, &[]) };
        self.descriptor_sets[slot] = Some(set);
        Ok(set)
    }

    /// The program for a pass index: the creator wins, otherwise the program
    /// list (clamped, so a single program is shared by every index).
    pub fn program(&mut self, index: u32) -> Program {
        if let Some(creator) = &mut self.config.program_creator {
            return creator(index);
        }
        if self.config.programs.is_empty() {
            return Vec::new();
        }
        let slot = (index as usize).min(self.config.programs.len() - 1);
        self.config.programs[slot].clone()
    }

    pub fn pipeline(&self, index: u32) -> vk::Pipeline {
        let slot = index.min(self.max_pass_count - 1) as usize;
        self.pipelines[slot]
    }

    pub(crate) fn set_pipeline(&mut self, index: u32, pipeline: vk::Pipeline) {
        let slot = index.min(self.max_pass_count - 1) as usize;
        self.pipelines[slot] = pipeline;
    }

    /// Drop the cached pipeline for `index` (retired, destroyed after its
    /// grace period) and install a
    /// replacement program; the next record re-creates the pipeline.
    pub fn reset_pipeline(&mut self, program: Program, index: u32) {
        let slot = index.min(self.max_pass_count - 1) as usize;
        let old = std::mem::replace(&mut self.pipelines[slot], vk::Pipeline::null());
        if old != vk::Pipeline::null() {
            self.context.defer_destroy(DeferredResource::Pipeline(old));
        }
        if self.config.programs.len() <= slot {
            self.config.programs.resize(slot + 1, Vec::new());
        }
        self.config.programs[slot] = program;
    }

    /// Get or create the compute pipeline for a pass index.
    pub fn compute_pipeline(&mut self, index: u32) -> Result<vk::Pipeline> {
        let existing = self.pipeline(index);
        if existing != vk::Pipeline::null() {
            return Ok(existing);
        }
        let program = self.program(index);
        let Some(device) = self.context.device() else {
            return Ok(vk::Pipeline::null());
        };
        let Some(stage) = program.first() else {
            return Ok(vk::Pipeline::null());
        };
        let stage_info = vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::PipelineShaderStageCreateFlags::empty(),
            stage: vk::ShaderStageFlags::COMPUTE,
            module: stage.module,
            p_name: stage.entry.as_ptr(),
            p_specialization_info: std::ptr::null(),
        };
        let create_info = vk::ComputePipelineCreateInfo {
            s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::PipelineCreateFlags::empty(),
            stage: stage_info,
            layout: self.pipeline_layout,
            base_pipeline_handle: vk::Pipeline::null(),
            base_pipeline_index: -1,
        };
        let pipelines = unsafe {
            device.create_compute_pipelines(self.context.pipeline_cache(), &[create_info], None)
        }
        .map_err(|(_, result)| Error::VkError {
            step: "Compute pipeline creation",
            result,
        })?;
        let pipeline = pipelines[0];
        self.set_pipeline(index, pipeline);
        Ok(pipeline)
    }

    /// Bind the pipeline and descriptor set for a pass index.
    pub fn bind(&mut self, command_buffer: vk::CommandBuffer, index: u32) -> Result<()> {
        let set = self.descriptor_set(index)?;
        let pipeline = self.pipeline(index);
        if let Some(device) = self.context.device() {
            unsafe {
                if pipeline != vk::Pipeline::null() {
                    device.cmd_bind_pipeline(command_buffer, self.bind_point, pipeline);
                }
                if set != vk::DescriptorSet::null() {
                    device.cmd_bind_descriptor_sets(
                        command_buffer,
                        self.bind_point,
                        self.pipeline_layout,
                        0,
                        &[set],
                        &[],
                    );
                }
            }
        }
        Ok(())
    }
}

/// Depth/stencil behaviour of a graphics pipeline.
#[derive(Debug, Copy, Clone)]
pub struct DepthStencilConfig {
    pub test: bool,
    pub write: bool,
    pub compare: vk::CompareOp,
}

impl Default for DepthStencilConfig {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare: vk::CompareOp::LESS_OR_EQUAL,
        }
    }
}

/// Build a graphics pipeline against a render pass. Viewport and scissor are
/// dynamic, so pipelines survive resizes and render pass recreation.
#[allow(clippy::too_many_arguments)]
pub fn create_graphics_pipeline(
    context: &GraphContext,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    program: &Program,
    vertex_bindings: &[vk::VertexInputBindingDescription],
    vertex_attributes: &[vk::VertexInputAttributeDescription],
    topology: vk::PrimitiveTopology,
    cull_mode: vk::CullModeFlags,
    blend_states: &[crate::graph::attachment::BlendState],
    depth_stencil: Option<DepthStencilConfig>,
) -> Result<vk::Pipeline> {
    let Some(device) = context.device() else {
        return Ok(vk::Pipeline::null());
    };
    if render_pass == vk::RenderPass::null() || program.is_empty() {
        return Ok(vk::Pipeline::null());
    }

    let stages: Vec<vk::PipelineShaderStageCreateInfo> = program
        .iter()
        .map(|stage| vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            p_next: std::ptr::null(),
            flags: vk::PipelineShaderStageCreateFlags::empty(),
            stage: stage.stage,
            module: stage.module,
            p_name: stage.entry.as_ptr(),
            p_specialization_info: std::ptr::null(),
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineVertexInputStateCreateFlags::empty(),
        vertex_binding_description_count: vertex_bindings.len() as u32,
        p_vertex_binding_descriptions: vertex_bindings.as_ptr(),
        vertex_attribute_description_count: vertex_attributes.len() as u32,
        p_vertex_attribute_descriptions: vertex_attributes.as_ptr(),
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineInputAssemblyStateCreateFlags::empty(),
        topology,
        primitive_restart_enable: vk::FALSE,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineViewportStateCreateFlags::empty(),
        viewport_count: 1,
        p_viewports: std::ptr::null(),
        scissor_count: 1,
        p_scissors: std::ptr::null(),
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineRasterizationStateCreateFlags::empty(),
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        depth_bias_constant_factor: 0.0,
        depth_bias_clamp: 0.0,
        depth_bias_slope_factor: 0.0,
        line_width: 1.0,
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineMultisampleStateCreateFlags::empty(),
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        min_sample_shading: 0.0,
        p_sample_mask: std::ptr::null(),
        alpha_to_coverage_enable: vk::FALSE,
        alpha_to_one_enable: vk::FALSE,
    };
    let depth_config = depth_stencil.unwrap_or(DepthStencilConfig {
        test: false,
        write: false,
        compare: vk::CompareOp::ALWAYS,
    });
    let depth_state = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineDepthStencilStateCreateFlags::empty(),
        depth_test_enable: depth_config.test.into(),
        depth_write_enable: depth_config.write.into(),
        depth_compare_op: depth_config.compare,
        depth_bounds_test_enable: vk::FALSE,
        stencil_test_enable: vk::FALSE,
        front: vk::StencilOpState::default(),
        back: vk::StencilOpState::default(),
        min_depth_bounds: 0.0,
        max_depth_bounds: 1.0,
    };
    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = blend_states
        .iter()
        .map(|blend| vk::PipelineColorBlendAttachmentState {
            blend_enable: blend.enable.into(),
            src_color_blend_factor: blend.src_colour_factor,
            dst_color_blend_factor: blend.dst_colour_factor,
            color_blend_op: blend.colour_op,
            src_alpha_blend_factor: blend.src_alpha_factor,
            dst_alpha_blend_factor: blend.dst_alpha_factor,
            alpha_blend_op: blend.alpha_op,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        })
        .collect();
    let blend_state = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineColorBlendStateCreateFlags::empty(),
        logic_op_enable: vk::FALSE,
        logic_op: vk::LogicOp::COPY,
        attachment_count: blend_attachments.len() as u32,
        p_attachments: blend_attachments.as_ptr(),
        blend_constants: [0.0; 4],
    };
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineDynamicStateCreateFlags::empty(),
        dynamic_state_count: dynamic_states.len() as u32,
        p_dynamic_states: dynamic_states.as_ptr(),
    };

    let create_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::PipelineCreateFlags::empty(),
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_tessellation_state: std::ptr::null(),
        p_viewport_state: &viewport_state,
        p_rasterization_state: &rasterization,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_state,
        p_color_blend_state: &blend_state,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        base_pipeline_handle: vk::Pipeline::null(),
        base_pipeline_index: -1,
    };
    let pipelines = unsafe {
        device.create_graphics_pipelines(context.pipeline_cache(), &[create_info], None)
    }
    .map_err(|(_, result)| Error::VkError {
        step: "Graphics pipeline creation",
        result,
    })?;
    Ok(pipelines[0])
}

impl Drop for PipelineHolder {
    fn drop(&mut self) {
        let Some(device) = self.context.device() else {
            return;
        };
        unsafe {
            for pipeline in &self.pipelines {
                if *pipeline != vk::Pipeline::null() {
                    device.destroy_pipeline(*pipeline, None);
                }
            }
            if self.descriptor_pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            }
        }
    }
}
