//! Sampler descriptions for sampled-image attachments.
//!
//! A [`SamplerDesc`] travels with the attachment declaration; the runnable
//! graph creates and caches one `VkSampler` per distinct description.

use anyhow::Result;
use ash::vk;

use crate::context::GraphContext;
use crate::error::map_vk;

/// Description of a sampler, hashable so the runnable graph can cache created
/// samplers by value.
#[derive(Debug, Copy, Clone)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    /// Linear filtering, clamp to edge, full lod range.
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            mip_lod_bias: 0.0,
            min_lod: -1000.0,
            max_lod: 1000.0,
        }
    }
}

impl SamplerDesc {
    pub fn nearest() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            ..Self::default()
        }
    }

    pub fn with_address_modes(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode_u = mode;
        self.address_mode_v = mode;
        self.address_mode_w = mode;
        self
    }

    pub fn with_lod(mut self, min_lod: f32, max_lod: f32) -> Self {
        self.min_lod = min_lod;
        self.max_lod = max_lod;
        self
    }
}

impl PartialEq for SamplerDesc {
    fn eq(&self, other: &Self) -> bool {
        self.mag_filter == other.mag_filter
            && self.min_filter == other.min_filter
            && self.mipmap_mode == other.mipmap_mode
            && self.address_mode_u == other.address_mode_u
            && self.address_mode_v == other.address_mode_v
            && self.address_mode_w == other.address_mode_w
            && self.mip_lod_bias.to_bits() == other.mip_lod_bias.to_bits()
            && self.min_lod.to_bits() == other.min_lod.to_bits()
            && self.max_lod.to_bits() == other.max_lod.to_bits()
    }
}

impl Eq for SamplerDesc {}

impl std::hash::Hash for SamplerDesc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.mag_filter.hash(state);
        self.min_filter.hash(state);
        self.mipmap_mode.hash(state);
        self.address_mode_u.hash(state);
        self.address_mode_v.hash(state);
        self.address_mode_w.hash(state);
        self.mip_lod_bias.to_bits().hash(state);
        self.min_lod.to_bits().hash(state);
        self.max_lod.to_bits().hash(state);
    }
}

/// Create a `VkSampler` from a description. Returns a null handle in a
/// headless context.
pub fn create_sampler(context: &GraphContext, desc: &SamplerDesc) -> Result<vk::Sampler> {
    let Some(device) = context.device() else {
        return Ok(vk::Sampler::null());
    };
    let create_info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        p_next: std::ptr::null(),
        flags: vk::SamplerCreateFlags::empty(),
        mag_filter: desc.mag_filter,
        min_filter: desc.min_filter,
        mipmap_mode: desc.mipmap_mode,
        address_mode_u: desc.address_mode_u,
        address_mode_v: desc.address_mode_v,
        address_mode_w: desc.address_mode_w,
        mip_lod_bias: desc.mip_lod_bias,
        anisotropy_enable: vk::FALSE,
        max_anisotropy: 0.0,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: desc.min_lod,
        max_lod: desc.max_lod,
        border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        unnormalized_coordinates: vk::FALSE,
    };
    let sampler = map_vk("Sampler creation", unsafe {
        device.create_sampler(&create_info, None)
    })?;
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn descriptions_hash_by_value() {
        let mut cache = HashMap::new();
        cache.insert(SamplerDesc::default(), 1u32);
        assert_eq!(cache.get(&SamplerDesc::default()), Some(&1));
        assert_eq!(cache.get(&SamplerDesc::nearest()), None);
    }
}
