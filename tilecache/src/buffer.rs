use tracing::trace;

use crate::image::ImageDesc;
use crate::rect::Rect;
use crate::tracked::{TrackedAlloc, TrackedBlock};
use crate::CacheResult;

/// One reusable pixel block together with the image region it currently
/// covers and its sharing state. Owned by a `BufferCache` arena slot; the
/// outside world only sees `BufferId` handles.
#[derive(Debug)]
pub(crate) struct Buffer {
    pub(crate) area: Rect,
    pub(crate) block: Option<TrackedBlock>,
    /// None exactly while the buffer is parked in the reserve pool.
    pub(crate) image: Option<ImageDesc>,
    pub(crate) ref_count: u32,
    pub(crate) published: bool,
    #[cfg(feature = "diagnostics")]
    pub(crate) serial: u64,
}

impl Buffer {
    pub(crate) fn new_empty(image: ImageDesc) -> Buffer {
        Buffer {
            area: Rect::default(),
            block: None,
            image: Some(image),
            ref_count: 1,
            published: false,
            #[cfg(feature = "diagnostics")]
            serial: crate::diag::register(),
        }
    }

    /// Bytes the current area needs at the current pixel layout.
    pub(crate) fn required_bytes(&self) -> usize {
        match self.image {
            Some(image) => self
                .area
                .num_pixels()
                .checked_mul(image.sizeof_pel())
                .unwrap_or(usize::MAX),
            None => 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.block.as_ref().map_or(0, TrackedBlock::capacity)
    }

    /// Retargets the buffer to `area`, reallocating only when the current
    /// block is too small. The caller must hold the only reference and must
    /// have unpublished the buffer first.
    pub(crate) fn move_to(&mut self, area: Rect, alloc: &TrackedAlloc) -> CacheResult<()> {
        assert_eq!(self.ref_count, 1, "moving a shared buffer");
        assert!(!self.published, "moving a published buffer");
        debug_assert!(self.image.is_some(), "moving a detached buffer");

        self.area = area;

        let new_size = self.required_bytes();
        if self.capacity() < new_size || self.block.is_none() {
            // Free the old block first; no point keeping both alive while
            // growing.
            self.block = None;
            self.block = Some(alloc.allocate(new_size)?);
        }

        trace!(
            left = area.left,
            top = area.top,
            width = area.width,
            height = area.height,
            capacity = self.capacity(),
            "moved buffer"
        );

        #[cfg(feature = "diagnostics")]
        crate::diag::update(self.serial, self.capacity(), false);

        Ok(())
    }

    /// Strips the image binding and geometry, keeping the allocated block for
    /// reuse. Only valid once the last reference is gone.
    pub(crate) fn detach(&mut self) {
        debug_assert_eq!(self.ref_count, 0);
        debug_assert!(!self.published);

        self.image = None;
        self.area = Rect::default();

        #[cfg(feature = "diagnostics")]
        crate::diag::update(self.serial, self.capacity(), true);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.image.is_none()
    }
}

#[cfg(feature = "diagnostics")]
impl Drop for Buffer {
    fn drop(&mut self) {
        crate::diag::unregister(self.serial);
    }
}
