//! Buffer and buffer-view descriptors, mirroring the image side.

use std::sync::Arc;

use ash::vk;

/// The `(offset, size)` slice of a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferSubresourceRange {
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl BufferSubresourceRange {
    pub fn new(offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        Self {
            offset,
            size,
        }
    }

    /// The whole-buffer range, mirroring `VK_WHOLE_SIZE`.
    pub fn whole() -> Self {
        Self::new(0, vk::WHOLE_SIZE)
    }

    /// True when the two byte windows intersect.
    pub fn intersects(&self, rhs: &BufferSubresourceRange) -> bool {
        let lhs_end = self.offset.saturating_add(self.size);
        let rhs_end = rhs.offset.saturating_add(rhs.size);
        self.offset < rhs_end && rhs.offset < lhs_end
    }
}

/// Immutable descriptor for a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferData {
    pub name: String,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl BufferData {
    pub fn new(name: impl Into<String>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            name: name.into(),
            size,
            usage,
        }
    }
}

/// Opaque buffer handle, compared and hashed by numeric id.
#[derive(Debug, Clone)]
pub struct BufferId {
    pub(crate) id: u32,
    pub(crate) data: Arc<BufferData>,
}

impl BufferId {
    pub(crate) fn new(id: u32, data: Arc<BufferData>) -> Self {
        Self {
            id,
            data,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &BufferData {
        &self.data
    }
}

impl PartialEq for BufferId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BufferId {}

impl PartialOrd for BufferId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufferId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for BufferId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Immutable descriptor for a buffer view.
///
/// `format` is only set for texel-buffer views (the ones that create an
/// actual `VkBufferView`); plain ranges used for uniform/storage descriptors
/// leave it `None`. `source` carries the per-pass-index aliases, like the
/// image side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferViewData {
    pub buffer: BufferId,
    pub format: Option<vk::Format>,
    pub range: BufferSubresourceRange,
    pub source: Vec<BufferViewId>,
}

impl BufferViewData {
    pub fn new(buffer: BufferId, range: BufferSubresourceRange) -> Self {
        Self {
            buffer,
            format: None,
            range,
            source: Vec::new(),
        }
    }

    /// A view covering the whole buffer.
    pub fn whole(buffer: BufferId) -> Self {
        let size = buffer.data().size;
        Self::new(buffer, BufferSubresourceRange::new(0, size))
    }

    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_source(mut self, source: Vec<BufferViewId>) -> Self {
        self.source = source;
        self
    }
}

/// Opaque buffer-view handle, interned by value equality of its descriptor.
#[derive(Debug, Clone)]
pub struct BufferViewId {
    pub(crate) id: u32,
    pub(crate) data: Arc<BufferViewData>,
}

impl BufferViewId {
    pub(crate) fn new(id: u32, data: Arc<BufferViewData>) -> Self {
        Self {
            id,
            data,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &BufferViewData {
        &self.data
    }

    pub fn buffer(&self) -> &BufferId {
        &self.data.buffer
    }

    pub fn range(&self) -> BufferSubresourceRange {
        self.data.range
    }

    /// Resolve the per-pass-index alias: `source[index]` when the index is
    /// covered by the source list, the view itself otherwise.
    pub fn resolve(&self, index: u32) -> BufferViewId {
        let source = &self.data.source;
        match source.get(index as usize) {
            Some(view) => view.clone(),
            None => self.clone(),
        }
    }
}

impl PartialEq for BufferViewId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BufferViewId {}

impl PartialOrd for BufferViewId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufferViewId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for BufferViewId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_windows_intersect() {
        let a = BufferSubresourceRange::new(0, 64);
        let b = BufferSubresourceRange::new(32, 64);
        let c = BufferSubresourceRange::new(64, 64);
        assert!(a.intersects(&b));
        assert!(b.intersects(&c));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn whole_range_intersects_everything() {
        let whole = BufferSubresourceRange::whole();
        assert!(whole.intersects(&BufferSubresourceRange::new(1024, 16)));
    }
}
