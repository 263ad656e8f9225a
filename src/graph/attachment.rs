//! Attachments: typed edges between a pass and a view.
//!
//! Every way a pass can consume or produce a resource — sampling it, writing
//! it as a colour target, copying out of it — is declared up front as an
//! [`Attachment`]. The dependency solver pairs producer and consumer
//! attachments of overlapping subresources; the runnable layer derives
//! descriptor bindings and barriers from them.

use ash::vk;
use bitflags::bitflags;

use crate::graph::pass::PassId;
use crate::record::{
    layout_stage_mask, make_layout_state, AccessState, ClearValue, LayoutState,
};
use crate::resource::buffer::BufferViewId;
use crate::resource::image::ImageViewId;
use crate::sampler::SamplerDesc;

bitflags! {
    /// How a pass uses an attachment. Direction bits combine with usage bits;
    /// an in-out attachment carries both `INPUT` and `OUTPUT`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct AttachmentFlags: u32 {
        const INPUT = 1 << 0;
        const OUTPUT = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const UNIFORM = 1 << 4;
        const TRANSFER = 1 << 5;
        const COLOUR = 1 << 6;
        const DEPTH = 1 << 7;
        const STENCIL = 1 << 8;
        /// Ordering-only constraint, no descriptor.
        const IMPLICIT = 1 << 9;
        /// The pass clears the resource at record time before using it.
        const CLEARABLE = 1 << 10;
    }
}

impl AttachmentFlags {
    pub fn is_input(&self) -> bool {
        self.contains(AttachmentFlags::INPUT)
    }

    pub fn is_output(&self) -> bool {
        self.contains(AttachmentFlags::OUTPUT)
    }

    pub fn is_inout(&self) -> bool {
        self.contains(AttachmentFlags::INPUT | AttachmentFlags::OUTPUT)
    }

    pub fn is_sampled(&self) -> bool {
        self.contains(AttachmentFlags::SAMPLED)
    }

    pub fn is_storage(&self) -> bool {
        self.contains(AttachmentFlags::STORAGE)
    }

    pub fn is_uniform(&self) -> bool {
        self.contains(AttachmentFlags::UNIFORM)
    }

    pub fn is_transfer(&self) -> bool {
        self.contains(AttachmentFlags::TRANSFER)
    }

    pub fn is_colour(&self) -> bool {
        self.contains(AttachmentFlags::COLOUR)
    }

    pub fn is_depth(&self) -> bool {
        self.contains(AttachmentFlags::DEPTH)
    }

    pub fn is_stencil(&self) -> bool {
        self.contains(AttachmentFlags::STENCIL)
    }

    pub fn is_implicit(&self) -> bool {
        self.contains(AttachmentFlags::IMPLICIT)
    }

    pub fn is_clearable(&self) -> bool {
        self.contains(AttachmentFlags::CLEARABLE)
    }
}

/// Per-attachment colour blend configuration baked into graphics pipelines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enable: bool,
    pub src_colour_factor: vk::BlendFactor,
    pub dst_colour_factor: vk::BlendFactor,
    pub colour_op: vk::BlendOp,
    pub src_alpha_factor: vk::BlendFactor,
    pub dst_alpha_factor: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
}

impl Default for BlendState {
    fn default() -> Self {
        Self::NONE
    }
}

impl BlendState {
    /// Blending disabled.
    pub const NONE: BlendState = BlendState {
        enable: false,
        src_colour_factor: vk::BlendFactor::ONE,
        dst_colour_factor: vk::BlendFactor::ZERO,
        colour_op: vk::BlendOp::ADD,
        src_alpha_factor: vk::BlendFactor::ONE,
        dst_alpha_factor: vk::BlendFactor::ZERO,
        alpha_op: vk::BlendOp::ADD,
    };

    /// Pure additive blending.
    pub const ADDITIVE: BlendState = BlendState {
        enable: true,
        src_colour_factor: vk::BlendFactor::ONE,
        dst_colour_factor: vk::BlendFactor::ONE,
        colour_op: vk::BlendOp::ADD,
        src_alpha_factor: vk::BlendFactor::ONE,
        dst_alpha_factor: vk::BlendFactor::ONE,
        alpha_op: vk::BlendOp::ADD,
    };

    /// Classic source-alpha blending.
    pub const ALPHA: BlendState = BlendState {
        enable: true,
        src_colour_factor: vk::BlendFactor::SRC_ALPHA,
        dst_colour_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        colour_op: vk::BlendOp::ADD,
        src_alpha_factor: vk::BlendFactor::ONE,
        dst_alpha_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_op: vk::BlendOp::ADD,
    };
}

/// Image-specific attachment payload.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    /// One view per pass index; resolution takes `views[min(i, len - 1)]`.
    pub views: Vec<ImageViewId>,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    /// Layout the pass wants the view in at entry; `UNDEFINED` means
    /// "derive from the usage flags".
    pub wanted_layout: vk::ImageLayout,
    pub clear_value: ClearValue,
    pub blend_state: BlendState,
    pub sampler: Option<SamplerDesc>,
}

impl ImageAttachment {
    fn new(views: Vec<ImageViewId>) -> Self {
        Self {
            views,
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            wanted_layout: vk::ImageLayout::UNDEFINED,
            clear_value: ClearValue::default(),
            blend_state: BlendState::NONE,
            sampler: None,
        }
    }
}

/// Buffer-specific attachment payload.
#[derive(Debug, Clone)]
pub struct BufferAttachment {
    /// One buffer view per pass index; resolution takes
    /// `buffers[min(i, len - 1)]`.
    pub buffers: Vec<BufferViewId>,
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

/// The resource side of an attachment.
#[derive(Debug, Clone)]
pub enum AttachmentData {
    Image(ImageAttachment),
    Buffer(BufferAttachment),
}

/// A typed declaration by a pass of how it uses an image or buffer
/// subresource.
///
/// Output and in-out attachments produce a new logical state of the
/// underlying subresource; inputs consume one. Attachments compare by
/// `(pass, name, views, flags)`; the `parent` link records which upstream
/// attachment an input was chained from and does not participate in equality.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub(crate) pass: PassId,
    pub name: String,
    pub binding: u32,
    pub flags: AttachmentFlags,
    pub data: AttachmentData,
    pub(crate) parent: Option<Box<Attachment>>,
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        self.pass == other.pass
            && self.name == other.name
            && self.flags == other.flags
            && self.view_ids() == other.view_ids()
    }
}

impl Eq for Attachment {}

impl Attachment {
    pub(crate) fn image(
        pass: PassId,
        name: impl Into<String>,
        binding: u32,
        flags: AttachmentFlags,
        views: Vec<ImageViewId>,
    ) -> Self {
        Self {
            pass,
            name: name.into(),
            binding,
            flags,
            data: AttachmentData::Image(ImageAttachment::new(views)),
            parent: None,
        }
    }

    pub(crate) fn buffer(
        pass: PassId,
        name: impl Into<String>,
        binding: u32,
        flags: AttachmentFlags,
        buffers: Vec<BufferViewId>,
        access: vk::AccessFlags,
        stage: vk::PipelineStageFlags,
    ) -> Self {
        Self {
            pass,
            name: name.into(),
            binding,
            flags,
            data: AttachmentData::Buffer(BufferAttachment {
                buffers,
                access,
                stage,
            }),
            parent: None,
        }
    }

    /// The pass owning this attachment.
    pub fn pass(&self) -> PassId {
        self.pass
    }

    /// The attachment this one was chained from, for in/out chains.
    pub fn parent(&self) -> Option<&Attachment> {
        self.parent.as_deref()
    }

    pub fn is_image(&self) -> bool {
        matches!(self.data, AttachmentData::Image(_))
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.data, AttachmentData::Buffer(_))
    }

    pub fn image_attachment(&self) -> Option<&ImageAttachment> {
        match &self.data {
            AttachmentData::Image(image) => Some(image),
            AttachmentData::Buffer(_) => None,
        }
    }

    pub(crate) fn image_attachment_mut(&mut self) -> Option<&mut ImageAttachment> {
        match &mut self.data {
            AttachmentData::Image(image) => Some(image),
            AttachmentData::Buffer(_) => None,
        }
    }

    pub fn buffer_attachment(&self) -> Option<&BufferAttachment> {
        match &self.data {
            AttachmentData::Buffer(buffer) => Some(buffer),
            AttachmentData::Image(_) => None,
        }
    }

    /// Whether this attachment becomes a descriptor binding (as opposed to a
    /// framebuffer attachment, a transfer operand or an ordering constraint).
    pub fn is_descriptor(&self) -> bool {
        !self.flags.is_implicit()
            && (self.flags.is_sampled()
                || self.flags.is_uniform()
                || (self.flags.is_storage() && !self.flags.is_transfer()))
    }

    /// Resolve the view used for a pass index: pick from the declared array,
    /// then resolve the view's own source aliases.
    pub fn view(&self, index: u32) -> Option<ImageViewId> {
        let image = self.image_attachment()?;
        if image.views.is_empty() {
            return None;
        }
        let clamped = (index as usize).min(image.views.len() - 1);
        Some(image.views[clamped].resolve(index))
    }

    /// Resolve the buffer view used for a pass index.
    pub fn buffer_view(&self, index: u32) -> Option<BufferViewId> {
        let buffer = self.buffer_attachment()?;
        if buffer.buffers.is_empty() {
            return None;
        }
        let clamped = (index as usize).min(buffer.buffers.len() - 1);
        Some(buffer.buffers[clamped].resolve(index))
    }

    /// All declared view ids (unresolved), image or buffer side.
    pub fn view_ids(&self) -> Vec<u32> {
        match &self.data {
            AttachmentData::Image(image) => image.views.iter().map(|view| view.id()).collect(),
            AttachmentData::Buffer(buffer) => {
                buffer.buffers.iter().map(|view| view.id()).collect()
            }
        }
    }

    /// The layout this pass needs the view in, derived from the usage flags
    /// unless the declaration pinned one explicitly.
    pub fn wanted_layout(&self, separate_depth_stencil: bool) -> vk::ImageLayout {
        if let Some(image) = self.image_attachment() {
            if image.wanted_layout != vk::ImageLayout::UNDEFINED {
                return image.wanted_layout;
            }
        }
        let flags = self.flags;
        if flags.is_storage() && !flags.is_transfer() {
            vk::ImageLayout::GENERAL
        } else if flags.is_sampled() || flags.is_uniform() {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else if flags.is_transfer() {
            if flags.is_output() {
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            } else {
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL
            }
        } else if flags.is_colour() {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else if flags.is_depth() || flags.is_stencil() {
            if flags.is_output() {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else if separate_depth_stencil && flags.is_depth() && !flags.is_stencil() {
                vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            }
        } else {
            vk::ImageLayout::GENERAL
        }
    }

    /// Full wanted layout state at pass entry.
    pub fn wanted_state(&self, separate_depth_stencil: bool) -> LayoutState {
        let layout = self.wanted_layout(separate_depth_stencil);
        let mut state = make_layout_state(layout);
        // Reads through descriptors happen in the shader stage, not in the
        // attachment-output stage the layout alone would suggest.
        if self.flags.is_storage() && !self.flags.is_transfer() {
            state.access = if self.flags.is_inout() {
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
            } else if self.flags.is_output() {
                vk::AccessFlags::SHADER_WRITE
            } else {
                vk::AccessFlags::SHADER_READ
            };
            state.stage = vk::PipelineStageFlags::COMPUTE_SHADER;
        } else if self.flags.is_sampled() {
            state.stage = layout_stage_mask(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
        state
    }

    /// Wanted access state for buffer attachments.
    pub fn wanted_access(&self) -> AccessState {
        match self.buffer_attachment() {
            Some(buffer) => AccessState {
                access: buffer.access,
                stage: buffer.stage,
            },
            None => AccessState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_predicates() {
        let flags = AttachmentFlags::INPUT | AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE;
        assert!(flags.is_inout());
        assert!(flags.is_storage());
        assert!(!flags.is_sampled());
    }

    #[test]
    fn storage_wants_general() {
        let flags = AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE;
        let attach = Attachment {
            pass: PassId(0),
            name: "out".into(),
            binding: 0,
            flags,
            data: AttachmentData::Image(ImageAttachment::new(vec![])),
            parent: None,
        };
        assert_eq!(attach.wanted_layout(false), vk::ImageLayout::GENERAL);
        assert_eq!(attach.wanted_state(false).access, vk::AccessFlags::SHADER_WRITE);
    }

    #[test]
    fn transfer_direction_picks_layout() {
        let input = Attachment {
            pass: PassId(0),
            name: "in".into(),
            binding: 0,
            flags: AttachmentFlags::INPUT | AttachmentFlags::TRANSFER,
            data: AttachmentData::Image(ImageAttachment::new(vec![])),
            parent: None,
        };
        let output = Attachment {
            flags: AttachmentFlags::OUTPUT | AttachmentFlags::TRANSFER,
            ..input.clone()
        };
        assert_eq!(input.wanted_layout(false), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(output.wanted_layout(false), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
