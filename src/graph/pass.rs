//! Frame pass declaration.
//!
//! A [`FramePass`] is the declarative node of the graph: a name, a set of
//! [`Attachment`]s describing every resource the pass touches, and a creator
//! closure that builds the recordable form once the graph is compiled.
//! Passes are created through [`FrameGraph`](crate::graph::FrameGraph) and
//! its pass groups; attachments are declared through the builder methods
//! below.

use anyhow::Result;
use ash::vk;

use crate::graph::attachment::{Attachment, AttachmentFlags, BlendState};
use crate::record::ClearValue;
use crate::resource::buffer::BufferViewId;
use crate::resource::image::ImageViewId;
use crate::sampler::SamplerDesc;

/// Identifies a pass within its graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Identifies a pass group within its graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub(crate) u32);

/// A list of views, one per pass index. Single views convert implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageViewIdArray(pub(crate) Vec<ImageViewId>);

impl From<ImageViewId> for ImageViewIdArray {
    fn from(view: ImageViewId) -> Self {
        Self(vec![view])
    }
}

impl From<Vec<ImageViewId>> for ImageViewIdArray {
    fn from(views: Vec<ImageViewId>) -> Self {
        Self(views)
    }
}

impl From<&[ImageViewId]> for ImageViewIdArray {
    fn from(views: &[ImageViewId]) -> Self {
        Self(views.to_vec())
    }
}

/// A list of buffer views, one per pass index. Single views convert
/// implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferViewIdArray(pub(crate) Vec<BufferViewId>);

impl From<BufferViewId> for BufferViewIdArray {
    fn from(view: BufferViewId) -> Self {
        Self(vec![view])
    }
}

impl From<Vec<BufferViewId>> for BufferViewIdArray {
    fn from(views: Vec<BufferViewId>) -> Self {
        Self(views)
    }
}

/// Declarative pass node. Owns its attachments.
pub struct FramePass {
    pub(crate) id: PassId,
    pub(crate) group: GroupId,
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) attachments: Vec<Attachment>,
}

impl std::fmt::Debug for FramePass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePass")
            .field("id", &self.id)
            .field("name", &self.full_name)
            .field("attachments", &self.attachments.len())
            .finish()
    }
}

impl FramePass {
    pub(crate) fn new(id: PassId, group: GroupId, name: String, full_name: String) -> Self {
        Self {
            id,
            group,
            name,
            full_name,
            attachments: Vec::new(),
        }
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    /// The pass's own name, without the group path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group-qualified name, unique within the graph.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// All declared attachments, in declaration order.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Attachments that become descriptor bindings, ordered by binding slot.
    pub fn descriptor_attachments(&self) -> Vec<&Attachment> {
        let mut result: Vec<&Attachment> = self
            .attachments
            .iter()
            .filter(|attach| attach.is_descriptor())
            .collect();
        result.sort_by_key(|attach| attach.binding);
        result
    }

    /// In-out image attachments, used by passes that rewrite a resource in
    /// place (mipmap generation, in-place transfers).
    pub fn inout_attachments(&self) -> Vec<&Attachment> {
        self.attachments
            .iter()
            .filter(|attach| attach.flags.is_inout() && attach.is_image())
            .collect()
    }

    fn intern(&mut self, attachment: Attachment) -> Attachment {
        self.attachments.push(attachment.clone());
        attachment
    }

    fn image_attachment(
        &mut self,
        name: &str,
        binding: u32,
        flags: AttachmentFlags,
        views: ImageViewIdArray,
    ) -> Attachment {
        let attachment = Attachment::image(self.id, format!("{}/{name}", self.full_name), binding, flags, views.0);
        self.intern(attachment)
    }

    fn buffer_attachment(
        &mut self,
        name: &str,
        binding: u32,
        flags: AttachmentFlags,
        buffers: BufferViewIdArray,
        access: vk::AccessFlags,
        stage: vk::PipelineStageFlags,
    ) -> Attachment {
        let attachment = Attachment::buffer(
            self.id,
            format!("{}/{name}", self.full_name),
            binding,
            flags,
            buffers.0,
            access,
            stage,
        );
        self.intern(attachment)
    }

    /// Chain an upstream attachment into this pass: same views, new flags,
    /// parent link kept.
    fn chained(&mut self, source: &Attachment, binding: u32, flags: AttachmentFlags) -> Attachment {
        let mut attachment = source.clone();
        attachment.pass = self.id;
        attachment.binding = binding;
        attachment.flags = flags;
        attachment.parent = Some(Box::new(source.clone()));
        if let Some(image) = attachment.image_attachment_mut() {
            image.sampler = None;
        }
        self.intern(attachment)
    }

    // ------------------------------------------------------------------
    // Uniform / sampled
    // ------------------------------------------------------------------

    /// Bind a uniform buffer.
    pub fn add_input_uniform_buffer(&mut self, buffers: impl Into<BufferViewIdArray>, binding: u32) {
        self.buffer_attachment(
            "uniform",
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::UNIFORM,
            buffers.into(),
            vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
    }

    /// Bind a combined image sampler. The view must reach
    /// `SHADER_READ_ONLY_OPTIMAL` (or a compatible layout) before the pass.
    pub fn add_input_sampled_image(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        binding: u32,
        sampler: SamplerDesc,
    ) {
        let mut attachment = self.image_attachment(
            "sampled",
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::SAMPLED,
            views.into(),
        );
        if let Some(image) = attachment.image_attachment_mut() {
            image.sampler = Some(sampler);
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment;
    }

    /// Chain an upstream output into this pass as a sampled image.
    pub fn add_input_sampled(&mut self, source: &Attachment, binding: u32, sampler: SamplerDesc) {
        let mut attachment = self.chained(
            source,
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::SAMPLED,
        );
        if let Some(image) = attachment.image_attachment_mut() {
            image.sampler = Some(sampler);
            image.wanted_layout = vk::ImageLayout::UNDEFINED;
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment;
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    /// Bind a storage image for reading. Layout is `GENERAL`.
    pub fn add_input_storage_image(&mut self, views: impl Into<ImageViewIdArray>, binding: u32) {
        self.image_attachment(
            "storage",
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::STORAGE,
            views.into(),
        );
    }

    /// Bind a storage image for reading and writing in place.
    pub fn add_inout_storage_image(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        binding: u32,
    ) -> Attachment {
        self.image_attachment(
            "storage",
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE,
            views.into(),
        )
    }

    /// Bind a storage image for writing.
    pub fn add_output_storage_image(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        binding: u32,
    ) -> Attachment {
        self.image_attachment(
            "storage",
            binding,
            AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE,
            views.into(),
        )
    }

    /// Bind a storage image for writing, cleared to `clear_value` when the
    /// pass records.
    pub fn add_clearable_output_storage_image(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        binding: u32,
        clear_value: ClearValue,
    ) -> Attachment {
        let mut attachment = self.image_attachment(
            "storage",
            binding,
            AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE | AttachmentFlags::CLEARABLE,
            views.into(),
        );
        if let Some(image) = attachment.image_attachment_mut() {
            image.clear_value = clear_value;
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment.clone();
        attachment
    }

    /// Chain an upstream output into this pass as a read storage image.
    pub fn add_input_storage(&mut self, source: &Attachment, binding: u32) {
        self.chained(
            source,
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::STORAGE,
        );
    }

    /// Chain an upstream output into this pass as an in-out storage image.
    pub fn add_inout_storage(&mut self, source: &Attachment, binding: u32) -> Attachment {
        self.chained(
            source,
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE,
        )
    }

    /// Bind a storage buffer for reading.
    pub fn add_input_storage_buffer(&mut self, buffers: impl Into<BufferViewIdArray>, binding: u32) {
        self.buffer_attachment(
            "storage",
            binding,
            AttachmentFlags::INPUT | AttachmentFlags::STORAGE,
            buffers.into(),
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        );
    }

    /// Bind a storage buffer for writing.
    pub fn add_output_storage_buffer(
        &mut self,
        buffers: impl Into<BufferViewIdArray>,
        binding: u32,
    ) -> Attachment {
        self.buffer_attachment(
            "storage",
            binding,
            AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE,
            buffers.into(),
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        )
    }

    /// Bind a storage buffer for writing, filled with zero at record time.
    pub fn add_clearable_output_storage_buffer(
        &mut self,
        buffers: impl Into<BufferViewIdArray>,
        binding: u32,
    ) -> Attachment {
        self.buffer_attachment(
            "storage",
            binding,
            AttachmentFlags::OUTPUT | AttachmentFlags::STORAGE | AttachmentFlags::CLEARABLE,
            buffers.into(),
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        )
    }

    // ------------------------------------------------------------------
    // Transfer
    // ------------------------------------------------------------------

    /// Declare an image as a transfer source.
    pub fn add_input_transfer_image(&mut self, views: impl Into<ImageViewIdArray>) {
        self.image_attachment(
            "transfer",
            0,
            AttachmentFlags::INPUT | AttachmentFlags::TRANSFER,
            views.into(),
        );
    }

    /// Declare an image as a transfer destination.
    pub fn add_output_transfer_image(&mut self, views: impl Into<ImageViewIdArray>) -> Attachment {
        self.image_attachment(
            "transfer",
            0,
            AttachmentFlags::OUTPUT | AttachmentFlags::TRANSFER,
            views.into(),
        )
    }

    /// Declare an image as both transfer source and destination (in-place
    /// rewrites such as mipmap generation).
    pub fn add_inout_transfer_image(&mut self, views: impl Into<ImageViewIdArray>) -> Attachment {
        self.image_attachment(
            "transfer",
            0,
            AttachmentFlags::INPUT | AttachmentFlags::OUTPUT | AttachmentFlags::TRANSFER,
            views.into(),
        )
    }

    /// Chain an upstream output into this pass as a transfer source.
    pub fn add_input_transfer(&mut self, source: &Attachment) {
        self.chained(source, 0, AttachmentFlags::INPUT | AttachmentFlags::TRANSFER);
    }

    /// Declare a buffer as a transfer source.
    pub fn add_input_transfer_buffer(&mut self, buffers: impl Into<BufferViewIdArray>) {
        self.buffer_attachment(
            "transfer",
            0,
            AttachmentFlags::INPUT | AttachmentFlags::TRANSFER,
            buffers.into(),
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        );
    }

    /// Declare a buffer as a transfer destination.
    pub fn add_output_transfer_buffer(
        &mut self,
        buffers: impl Into<BufferViewIdArray>,
    ) -> Attachment {
        self.buffer_attachment(
            "transfer",
            0,
            AttachmentFlags::OUTPUT | AttachmentFlags::TRANSFER,
            buffers.into(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        )
    }

    // ------------------------------------------------------------------
    // Colour targets
    // ------------------------------------------------------------------

    /// Read-only colour input attachment.
    pub fn add_input_colour_target(&mut self, views: impl Into<ImageViewIdArray>) {
        let mut attachment = self.image_attachment(
            "colour",
            0,
            AttachmentFlags::INPUT | AttachmentFlags::COLOUR,
            views.into(),
        );
        if let Some(image) = attachment.image_attachment_mut() {
            image.load_op = vk::AttachmentLoadOp::LOAD;
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment;
    }

    /// Colour target loaded and stored, for passes drawing over existing
    /// contents.
    pub fn add_inout_colour_target(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        blend_state: BlendState,
    ) -> Attachment {
        let mut attachment = self.image_attachment(
            "colour",
            0,
            AttachmentFlags::INPUT | AttachmentFlags::OUTPUT | AttachmentFlags::COLOUR,
            views.into(),
        );
        if let Some(image) = attachment.image_attachment_mut() {
            image.load_op = vk::AttachmentLoadOp::LOAD;
            image.store_op = vk::AttachmentStoreOp::STORE;
            image.blend_state = blend_state;
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment.clone();
        attachment
    }

    /// Colour target written by the pass. A `CLEAR` load op requires a clear
    /// value.
    pub fn add_output_colour_target(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        load_op: vk::AttachmentLoadOp,
        clear_value: Option<ClearValue>,
    ) -> Result<Attachment> {
        if load_op == vk::AttachmentLoadOp::CLEAR && clear_value.is_none() {
            return Err(crate::Error::NoClearValue.into());
        }
        let mut attachment = self.image_attachment(
            "colour",
            0,
            AttachmentFlags::OUTPUT | AttachmentFlags::COLOUR,
            views.into(),
        );
        if let Some(image) = attachment.image_attachment_mut() {
            image.load_op = load_op;
            image.store_op = vk::AttachmentStoreOp::STORE;
            image.clear_value = clear_value.unwrap_or_default();
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment.clone();
        Ok(attachment)
    }

    // ------------------------------------------------------------------
    // Depth / stencil targets
    // ------------------------------------------------------------------

    fn depth_stencil_attachment(
        &mut self,
        flags: AttachmentFlags,
        views: ImageViewIdArray,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        stencil_load_op: vk::AttachmentLoadOp,
        stencil_store_op: vk::AttachmentStoreOp,
        clear_value: Option<ClearValue>,
    ) -> Attachment {
        let mut attachment = self.image_attachment("depth", 0, flags, views);
        if let Some(image) = attachment.image_attachment_mut() {
            image.load_op = load_op;
            image.store_op = store_op;
            image.stencil_load_op = stencil_load_op;
            image.stencil_store_op = stencil_store_op;
            image.clear_value = clear_value.unwrap_or(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            });
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment.clone();
        attachment
    }

    /// Depth attachment read by the pass (depth test without write).
    pub fn add_input_depth_target(&mut self, views: impl Into<ImageViewIdArray>) {
        self.depth_stencil_attachment(
            AttachmentFlags::INPUT | AttachmentFlags::DEPTH,
            views.into(),
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::DONT_CARE,
            vk::AttachmentLoadOp::DONT_CARE,
            vk::AttachmentStoreOp::DONT_CARE,
            None,
        );
    }

    /// Depth attachment written by the pass.
    pub fn add_output_depth_target(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        load_op: vk::AttachmentLoadOp,
        clear_value: Option<ClearValue>,
    ) -> Attachment {
        self.depth_stencil_attachment(
            AttachmentFlags::OUTPUT | AttachmentFlags::DEPTH,
            views.into(),
            load_op,
            vk::AttachmentStoreOp::STORE,
            vk::AttachmentLoadOp::DONT_CARE,
            vk::AttachmentStoreOp::DONT_CARE,
            clear_value,
        )
    }

    /// Depth/stencil attachment loaded and stored.
    pub fn add_inout_depth_stencil_target(
        &mut self,
        views: impl Into<ImageViewIdArray>,
    ) -> Attachment {
        self.depth_stencil_attachment(
            AttachmentFlags::INPUT
                | AttachmentFlags::OUTPUT
                | AttachmentFlags::DEPTH
                | AttachmentFlags::STENCIL,
            views.into(),
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::STORE,
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::STORE,
            None,
        )
    }

    /// Depth/stencil attachment written by the pass, with separate ops per
    /// aspect.
    pub fn add_output_depth_stencil_target(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        depth_load_op: vk::AttachmentLoadOp,
        stencil_load_op: vk::AttachmentLoadOp,
        clear_value: Option<ClearValue>,
    ) -> Attachment {
        self.depth_stencil_attachment(
            AttachmentFlags::OUTPUT | AttachmentFlags::DEPTH | AttachmentFlags::STENCIL,
            views.into(),
            depth_load_op,
            vk::AttachmentStoreOp::STORE,
            stencil_load_op,
            vk::AttachmentStoreOp::STORE,
            clear_value,
        )
    }

    /// Stencil attachment read by the pass.
    pub fn add_input_stencil_target(&mut self, views: impl Into<ImageViewIdArray>) {
        self.depth_stencil_attachment(
            AttachmentFlags::INPUT | AttachmentFlags::STENCIL,
            views.into(),
            vk::AttachmentLoadOp::DONT_CARE,
            vk::AttachmentStoreOp::DONT_CARE,
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::DONT_CARE,
            None,
        );
    }

    /// Stencil attachment written by the pass.
    pub fn add_output_stencil_target(
        &mut self,
        views: impl Into<ImageViewIdArray>,
        load_op: vk::AttachmentLoadOp,
        clear_value: Option<ClearValue>,
    ) -> Attachment {
        self.depth_stencil_attachment(
            AttachmentFlags::OUTPUT | AttachmentFlags::STENCIL,
            views.into(),
            vk::AttachmentLoadOp::DONT_CARE,
            vk::AttachmentStoreOp::DONT_CARE,
            load_op,
            vk::AttachmentStoreOp::STORE,
            clear_value,
        )
    }

    // ------------------------------------------------------------------
    // Implicit
    // ------------------------------------------------------------------

    /// Declare an ordering-only constraint: the pass touches `views` in
    /// `layout` but binds no descriptor for them.
    pub fn add_implicit(&mut self, views: impl Into<ImageViewIdArray>, layout: vk::ImageLayout) {
        let mut attachment = self.image_attachment(
            "implicit",
            0,
            AttachmentFlags::INPUT | AttachmentFlags::IMPLICIT,
            views.into(),
        );
        if let Some(image) = attachment.image_attachment_mut() {
            image.wanted_layout = layout;
        }
        let index = self.attachments.len() - 1;
        self.attachments[index] = attachment;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::handler::ResourceHandler;
    use crate::resource::image::{ImageData, ImageViewData};

    fn pass_and_view() -> (FramePass, ImageViewId) {
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
        let pass = FramePass::new(PassId(0), GroupId(0), "draw".into(), "draw".into());
        (pass, view)
    }

    #[test]
    fn clear_without_value_is_rejected() {
        let (mut pass, view) = pass_and_view();
        let result = pass.add_output_colour_target(view, vk::AttachmentLoadOp::CLEAR, None);
        assert!(result.is_err());
    }

    #[test]
    fn chained_input_keeps_parent() {
        let (mut pass, view) = pass_and_view();
        let out = pass
            .add_output_colour_target(view, vk::AttachmentLoadOp::CLEAR, Some(ClearValue::default()))
            .unwrap();
        let mut consumer = FramePass::new(PassId(1), GroupId(0), "sample".into(), "sample".into());
        consumer.add_input_sampled(&out, 0, SamplerDesc::default());
        let attach = &consumer.attachments()[0];
        assert!(attach.flags.is_sampled());
        assert_eq!(attach.parent().unwrap(), &out);
        assert_eq!(attach.view_ids(), out.view_ids());
    }

    #[test]
    fn descriptor_attachments_sorted_by_binding() {
        let (mut pass, view) = pass_and_view();
        pass.add_input_storage_image(view.clone(), 2);
        pass.add_input_sampled_image(view, 0, SamplerDesc::default());
        let bindings: Vec<u32> = pass
            .descriptor_attachments()
            .iter()
            .map(|attach| attach.binding)
            .collect();
        assert_eq!(bindings, vec![0, 2]);
    }

    #[test]
    fn multi_view_attachment_resolves_by_index() {
        let handler = ResourceHandler::new();
        let image_a = handler
            .create_image_id(ImageData::new_2d(
                "a",
                vk::Format::R8G8B8A8_UNORM,
                8,
                8,
                vk::ImageUsageFlags::STORAGE,
            ))
            .unwrap();
        let image_b = handler
            .create_image_id(ImageData::new_2d(
                "b",
                vk::Format::R8G8B8A8_UNORM,
                8,
                8,
                vk::ImageUsageFlags::STORAGE,
            ))
            .unwrap();
        let view_a = handler.create_view_id(ImageViewData::whole(image_a)).unwrap();
        let view_b = handler.create_view_id(ImageViewData::whole(image_b)).unwrap();
        let mut pass = FramePass::new(PassId(0), GroupId(0), "p".into(), "p".into());
        let attach = pass.add_output_storage_image(vec![view_a.clone(), view_b.clone()], 0);
        assert_eq!(attach.view(0), Some(view_a));
        assert_eq!(attach.view(1), Some(view_b.clone()));
        // Past the end of the array, the last view sticks.
        assert_eq!(attach.view(5), Some(view_b));
    }
}
