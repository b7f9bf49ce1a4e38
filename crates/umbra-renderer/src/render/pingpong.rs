//! Two HDR color targets used alternately as source and destination.
//!
//! The lighting pass writes the first one; each post effect that is not
//! last reads the target written before it and writes the other one.

use ash::vk;

use crate::error::Result;
use crate::vulkan::memory::ImageDesc;
use crate::vulkan::{MemoryManager, TrackedImage, VulkanContext};

pub const HDR_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Write cursor over two slots. Starts unwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingPongCursor {
    cursor: Option<usize>,
}

impl PingPongCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the other slot and return it. The first call yields 0.
    pub fn advance(&mut self) -> usize {
        let next = self.cursor.map_or(0, |c| (c + 1) % 2);
        self.cursor = Some(next);
        next
    }

    pub fn has_been_rendered_to(&self) -> bool {
        self.cursor.is_some()
    }

    /// Slot most recently returned by [`Self::advance`].
    ///
    /// # Panics
    /// If nothing has been written yet.
    pub fn current(&self) -> usize {
        self.try_current()
            .unwrap_or_else(|| panic!("ping-pong target read before it was rendered to"))
    }

    pub fn try_current(&self) -> Option<usize> {
        self.cursor
    }

    /// The slot that is not current.
    pub fn last(&self) -> usize {
        1 - self.current()
    }

    pub fn reset(&mut self) {
        self.cursor = None;
    }
}

/// Pair of identically shaped HDR images plus their cursor.
pub struct PingPongTarget {
    images: [TrackedImage; 2],
    cursor: PingPongCursor,
}

impl PingPongTarget {
    pub unsafe fn new(ctx: &VulkanContext, memory: &MemoryManager, extent: vk::Extent2D) -> Result<Self> {
        let first = memory.create_image(&ImageDesc::color_target("HDRImage", extent, HDR_FORMAT))?;
        let second = match memory.create_image(&ImageDesc::color_target("HDRImage", extent, HDR_FORMAT)) {
            Ok(image) => image,
            Err(e) => {
                memory.destroy_image(first);
                return Err(e);
            }
        };
        for image in [&first, &second] {
            ctx.debug.name_object(image.handle, &image.name);
        }
        Ok(Self {
            images: [first, second],
            cursor: PingPongCursor::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_images(images: [TrackedImage; 2]) -> Self {
        Self {
            images,
            cursor: PingPongCursor::new(),
        }
    }

    /// Flip to the other image and return it for writing.
    pub fn acquire_next(&mut self) -> &mut TrackedImage {
        let index = self.cursor.advance();
        &mut self.images[index]
    }

    /// The image most recently acquired for writing.
    pub fn acquire_current(&mut self) -> &mut TrackedImage {
        let index = self.cursor.current();
        &mut self.images[index]
    }

    /// What the previous pass produced. Panics if nothing was rendered.
    pub fn acquire_last_rendered_to(&mut self) -> &mut TrackedImage {
        assert!(
            self.cursor.has_been_rendered_to(),
            "acquire_last_rendered_to before any pass wrote the HDR target"
        );
        self.acquire_current()
    }

    pub fn current_index(&self) -> usize {
        self.cursor.current()
    }

    pub fn last_image_index(&self) -> usize {
        self.cursor.last()
    }

    pub fn has_been_rendered_to(&self) -> bool {
        self.cursor.has_been_rendered_to()
    }

    /// Views in slot order, for the `hdr[2]` descriptor array.
    pub fn views(&self) -> [vk::ImageView; 2] {
        [self.images[0].view, self.images[1].view]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.images[0].extent
    }

    /// Start a frame with nothing written.
    pub fn begin_frame(&mut self) {
        self.cursor.reset();
    }

    pub unsafe fn destroy(self, memory: &MemoryManager) {
        for image in self.images {
            memory.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // PingPongCursor
    // ============================================================

    #[test]
    fn test_advance_alternates() {
        for n in 1..=9usize {
            let mut cursor = PingPongCursor::new();
            let mut last = 0;
            for _ in 0..n {
                last = cursor.advance();
                assert_eq!(cursor.current(), last);
                assert_eq!(cursor.last(), 1 - cursor.current());
            }
            assert_eq!(last, (n - 1) % 2, "after {n} advances");
        }
    }

    #[test]
    fn test_unwritten_has_no_current() {
        let cursor = PingPongCursor::new();
        assert!(!cursor.has_been_rendered_to());
        assert_eq!(cursor.try_current(), None);
    }

    #[test]
    #[should_panic(expected = "before it was rendered to")]
    fn test_unwritten_read_panics() {
        PingPongCursor::new().current();
    }

    #[test]
    #[should_panic(expected = "before it was rendered to")]
    fn test_unwritten_last_index_panics() {
        PingPongCursor::new().last();
    }

    #[test]
    fn test_reset_returns_to_unwritten() {
        let mut cursor = PingPongCursor::new();
        cursor.advance();
        cursor.advance();
        cursor.reset();
        assert!(!cursor.has_been_rendered_to());
        assert_eq!(cursor.advance(), 0);
    }
}
