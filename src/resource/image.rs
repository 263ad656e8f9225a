//! Image and image-view descriptors.
//!
//! Images and views are referred to by opaque ids ([`ImageId`],
//! [`ImageViewId`]) assigned by the [`ResourceHandler`](crate::resource::handler::ResourceHandler).
//! An id carries an `Arc` to its immutable descriptor so graph code can
//! inspect formats, extents and subresource ranges without going back to the
//! handler. Ids compare and hash by their numeric value only.

use std::sync::Arc;

use ash::vk;

/// Sentinel for "all remaining mip levels", mirroring `VK_REMAINING_MIP_LEVELS`.
pub const REMAINING_MIP_LEVELS: u32 = vk::REMAINING_MIP_LEVELS;
/// Sentinel for "all remaining array layers", mirroring `VK_REMAINING_ARRAY_LAYERS`.
pub const REMAINING_ARRAY_LAYERS: u32 = vk::REMAINING_ARRAY_LAYERS;

/// The `(aspect, mip range, layer range)` slice of an image.
///
/// This is the crate-owned, hashable equivalent of
/// [`vk::ImageSubresourceRange`], used for interning view descriptors and for
/// overlap arithmetic in the dependency solver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ImageSubresourceRange {
    pub fn new(
        aspect_mask: vk::ImageAspectFlags,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
    ) -> Self {
        Self {
            aspect_mask,
            base_mip_level,
            level_count,
            base_array_layer,
            layer_count,
        }
    }

    /// The whole-image range for the given aspect.
    pub fn whole(aspect_mask: vk::ImageAspectFlags) -> Self {
        Self::new(aspect_mask, 0, REMAINING_MIP_LEVELS, 0, REMAINING_ARRAY_LAYERS)
    }

    /// A single mip level of a single layer.
    pub fn level_layer(aspect_mask: vk::ImageAspectFlags, level: u32, layer: u32) -> Self {
        Self::new(aspect_mask, level, 1, layer, 1)
    }

    /// True when both the mip windows and the layer windows intersect.
    pub fn intersects(&self, rhs: &ImageSubresourceRange) -> bool {
        ranges_intersect(
            self.base_mip_level,
            self.level_count,
            rhs.base_mip_level,
            rhs.level_count,
        ) && ranges_intersect(
            self.base_array_layer,
            self.layer_count,
            rhs.base_array_layer,
            rhs.layer_count,
        )
    }
}

impl From<ImageSubresourceRange> for vk::ImageSubresourceRange {
    fn from(range: ImageSubresourceRange) -> Self {
        vk::ImageSubresourceRange {
            aspect_mask: range.aspect_mask,
            base_mip_level: range.base_mip_level,
            level_count: range.level_count,
            base_array_layer: range.base_array_layer,
            layer_count: range.layer_count,
        }
    }
}

fn in_range(value: u32, left: u32, count: u32) -> bool {
    value >= left && value - left < count
}

fn ranges_intersect(lhs_base: u32, lhs_count: u32, rhs_base: u32, rhs_count: u32) -> bool {
    in_range(lhs_base, rhs_base, rhs_count) || in_range(rhs_base, lhs_base, lhs_count)
}

/// Immutable descriptor for an image. Created through
/// [`FrameGraph::create_image`](crate::graph::FrameGraph::create_image), never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageData {
    pub name: String,
    pub flags: vk::ImageCreateFlags,
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

impl ImageData {
    /// A 2-D single-mip, single-layer image.
    pub fn new_2d(
        name: impl Into<String>,
        format: vk::Format,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name: name.into(),
            flags: vk::ImageCreateFlags::empty(),
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
        }
    }

    /// A 3-D image.
    pub fn new_3d(
        name: impl Into<String>,
        format: vk::Format,
        extent: vk::Extent3D,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_3D,
            extent,
            ..Self::new_2d(name, format, 0, 0, usage)
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }
}

/// Opaque image handle. Compares and hashes by its numeric id; the descriptor
/// rides along for convenience.
#[derive(Debug, Clone)]
pub struct ImageId {
    pub(crate) id: u32,
    pub(crate) data: Arc<ImageData>,
}

impl ImageId {
    pub(crate) fn new(id: u32, data: Arc<ImageData>) -> Self {
        Self {
            id,
            data,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &ImageData {
        &self.data
    }
}

impl PartialEq for ImageId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageId {}

impl PartialOrd for ImageId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for ImageId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Immutable descriptor for an image view.
///
/// `source` holds the per-pass-index aliases: a view with a non-empty source
/// list is a logical view that resolves to `source[i]` for pass index `i`
/// (and to itself past the end of the list).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageViewData {
    pub image: ImageId,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub range: ImageSubresourceRange,
    pub source: Vec<ImageViewId>,
}

impl ImageViewData {
    pub fn new(
        image: ImageId,
        view_type: vk::ImageViewType,
        format: vk::Format,
        range: ImageSubresourceRange,
    ) -> Self {
        Self {
            image,
            view_type,
            format,
            range,
            source: Vec::new(),
        }
    }

    /// A view covering the whole image, with the view type implied by the
    /// image type and the aspect implied by the format.
    pub fn whole(image: ImageId) -> Self {
        let data = image.data().clone();
        let view_type = match data.image_type {
            vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
            vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
            _ => {
                if data.array_layers > 1 {
                    vk::ImageViewType::TYPE_2D_ARRAY
                } else {
                    vk::ImageViewType::TYPE_2D
                }
            }
        };
        let range = ImageSubresourceRange::new(
            aspect_mask(data.format),
            0,
            data.mip_levels,
            0,
            data.array_layers,
        );
        Self::new(image, view_type, data.format, range)
    }

    pub fn with_source(mut self, source: Vec<ImageViewId>) -> Self {
        self.source = source;
        self
    }
}

/// Opaque image-view handle. Interned by value equality of its descriptor:
/// two `create_view` calls with the same [`ImageViewData`] return the same id.
#[derive(Debug, Clone)]
pub struct ImageViewId {
    pub(crate) id: u32,
    pub(crate) data: Arc<ImageViewData>,
}

impl ImageViewId {
    pub(crate) fn new(id: u32, data: Arc<ImageViewData>) -> Self {
        Self {
            id,
            data,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &ImageViewData {
        &self.data
    }

    pub fn image(&self) -> &ImageId {
        &self.data.image
    }

    /// Resolve the per-pass-index alias: `source[index]` when the index is
    /// covered by the source list, the view itself otherwise.
    pub fn resolve(&self, index: u32) -> ImageViewId {
        let source = &self.data.source;
        match source.get(index as usize) {
            Some(view) => view.clone(),
            None => self.clone(),
        }
    }

    /// The view's subresource range with sentinel counts resolved and, for
    /// 3-D images bound through 2-D array views, depth slices mapped to
    /// layers. All overlap arithmetic runs on this range.
    pub fn virtual_range(&self) -> ImageSubresourceRange {
        virtual_range(self.image().data(), self.data.view_type, &self.data.range)
    }
}

impl PartialEq for ImageViewId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageViewId {}

impl PartialOrd for ImageViewId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageViewId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for ImageViewId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Resolve sentinel counts against the image, and map 3-D depth slices to
/// layers when the view interprets a 3-D image as a (array of) 2-D slices or
/// covers its full mip chain.
pub fn virtual_range(
    image: &ImageData,
    view_type: vk::ImageViewType,
    range: &ImageSubresourceRange,
) -> ImageSubresourceRange {
    let mut result = *range;
    if result.level_count == REMAINING_MIP_LEVELS {
        result.level_count = image.mip_levels.saturating_sub(result.base_mip_level);
    }
    if result.layer_count == REMAINING_ARRAY_LAYERS {
        result.layer_count = image.array_layers.saturating_sub(result.base_array_layer);
    }
    if image.image_type == vk::ImageType::TYPE_3D
        && (view_type == vk::ImageViewType::TYPE_2D
            || view_type == vk::ImageViewType::TYPE_2D_ARRAY
            || result.level_count == image.mip_levels)
    {
        result.base_array_layer = 0;
        result.layer_count = image.extent.depth;
    }
    result
}

/// True for formats with a depth aspect (including combined depth/stencil).
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// True for formats with a stencil aspect (including combined depth/stencil).
pub fn is_stencil_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// True for combined depth/stencil formats.
pub fn is_depth_stencil_format(format: vk::Format) -> bool {
    is_depth_format(format) && is_stencil_format(format)
}

/// True for formats with neither depth nor stencil aspect.
pub fn is_colour_format(format: vk::Format) -> bool {
    !is_depth_format(format) && !is_stencil_format(format)
}

/// The full aspect mask implied by a format.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_stencil_format(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if is_depth_format(format) {
        vk::ImageAspectFlags::DEPTH
    } else if is_stencil_format(format) {
        vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colour_range(base_mip: u32, levels: u32, base_layer: u32, layers: u32) -> ImageSubresourceRange {
        ImageSubresourceRange::new(vk::ImageAspectFlags::COLOR, base_mip, levels, base_layer, layers)
    }

    #[test]
    fn mip_windows_intersect() {
        assert!(colour_range(0, 4, 0, 1).intersects(&colour_range(3, 1, 0, 1)));
        assert!(colour_range(3, 1, 0, 1).intersects(&colour_range(0, 4, 0, 1)));
        assert!(!colour_range(0, 2, 0, 1).intersects(&colour_range(2, 2, 0, 1)));
    }

    #[test]
    fn layer_windows_intersect() {
        assert!(colour_range(0, 1, 2, 3).intersects(&colour_range(0, 1, 4, 1)));
        assert!(!colour_range(0, 1, 0, 2).intersects(&colour_range(0, 1, 2, 1)));
    }

    #[test]
    fn virtual_range_resolves_sentinels() {
        let image = ImageData::new_2d("t", vk::Format::R8G8B8A8_UNORM, 16, 16, vk::ImageUsageFlags::SAMPLED)
            .with_mip_levels(5)
            .with_array_layers(6);
        let range = virtual_range(
            &image,
            vk::ImageViewType::TYPE_2D_ARRAY,
            &ImageSubresourceRange::whole(vk::ImageAspectFlags::COLOR),
        );
        assert_eq!(range.level_count, 5);
        assert_eq!(range.layer_count, 6);
    }

    #[test]
    fn virtual_range_treats_depth_slices_as_layers() {
        let image = ImageData::new_3d(
            "vol",
            vk::Format::R16_SFLOAT,
            vk::Extent3D {
                width: 32,
                height: 32,
                depth: 8,
            },
            vk::ImageUsageFlags::STORAGE,
        );
        let range = virtual_range(
            &image,
            vk::ImageViewType::TYPE_3D,
            &ImageSubresourceRange::whole(vk::ImageAspectFlags::COLOR),
        );
        assert_eq!(range.base_array_layer, 0);
        assert_eq!(range.layer_count, 8);
    }

    #[test]
    fn aspect_from_format() {
        assert_eq!(aspect_mask(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_mask(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_mask(vk::Format::S8_UINT), vk::ImageAspectFlags::STENCIL);
    }
}
