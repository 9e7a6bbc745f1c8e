use std::thread::ThreadId;

use hashbrown::HashMap;
use tracing::{debug, trace};

use common::is_debug;

use crate::buffer::Buffer;
use crate::image::{ImageDesc, ImageId};
use crate::rect::Rect;
use crate::tracked::TrackedAlloc;
use crate::CacheResult;

/// Most buffers a cache keeps in reserve for reuse. Enough to stop allocator
/// cycling in convolution-heavy pipelines.
pub const MAX_RESERVE: usize = 40;

/// Handle to a buffer owned by one thread's `BufferCache`: arena slot index
/// plus generation. A generation mismatch means the buffer was permanently
/// released; using such a handle is a deterministic panic instead of silent
/// aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    buffer: Option<Buffer>,
}

/// Published buffers of one image on one thread. Membership mirrors the
/// published flag; buffer lifetime is governed by ref counts alone.
#[derive(Debug)]
struct CacheList {
    image: ImageId,
    buffers: Vec<BufferId>,
}

/// Per-worker-thread buffer cache. Every operation must run on the thread
/// that created the instance; with that confinement there is no shared
/// mutable state and no locking anywhere on the lookup or recycle paths.
#[derive(Debug)]
pub struct BufferCache {
    slots: Vec<Slot>,
    free: Vec<u32>,
    lists: HashMap<ImageId, CacheList>,
    /// Detached buffers kept for reuse, most recently freed last.
    reserve: Vec<BufferId>,
    alloc: TrackedAlloc,
    thread: ThreadId,
}

impl BufferCache {
    pub fn new() -> BufferCache {
        debug!("created thread buffer cache");
        BufferCache {
            slots: Vec::new(),
            free: Vec::new(),
            lists: HashMap::new(),
            reserve: Vec::new(),
            alloc: TrackedAlloc::new(),
            thread: std::thread::current().id(),
        }
    }

    /// Returns a referenced buffer whose area encloses `area`: a published
    /// one when this thread already has it, otherwise a recycled or fresh
    /// buffer sized for exactly this request.
    pub fn acquire(&mut self, image: &ImageDesc, area: Rect) -> CacheResult<BufferId> {
        self.assert_owner();

        if let Some(id) = self.find_published(image.id, area) {
            return Ok(id);
        }
        self.new_buffer(image, area)
    }

    /// Drops `old` and returns a buffer for `area` in one step, reusing
    /// whatever it can. The cheap cases come first: a stage walking tiles of
    /// one image pays nothing at all when its current buffer still covers
    /// the request.
    pub fn swap_reference(
        &mut self,
        old: Option<BufferId>,
        image: &ImageDesc,
        area: Rect,
    ) -> CacheResult<BufferId> {
        self.assert_owner();

        if let Some(old_id) = old {
            debug_assert_eq!(
                self.buffer(old_id).image.map(|desc| desc.id),
                Some(image.id),
                "swapping a buffer across images"
            );

            if self.buffer(old_id).area.encloses(&area) {
                return Ok(old_id);
            }
        }

        // Did a sibling stage on this thread already compute an enclosing
        // region?
        if let Some(found) = self.find_published(image.id, area) {
            if let Some(old_id) = old {
                self.release(old_id);
            }
            return Ok(found);
        }

        // Exclusively held: retarget the block in place.
        if let Some(old_id) = old {
            if self.buffer(old_id).ref_count == 1 {
                self.move_buffer(old_id, area)?;
                return Ok(old_id);
            }
            self.release(old_id);
        }

        self.new_buffer(image, area)
    }

    /// Pixels are computed: make the buffer discoverable to the rest of this
    /// thread. Idempotent.
    pub fn publish(&mut self, id: BufferId) {
        self.assert_owner();

        let buffer = self.buffer(id);
        if buffer.published {
            return;
        }
        debug_assert!(buffer.ref_count > 0);
        let image = buffer.image.expect("publishing a detached buffer").id;

        let list = self.lists.entry(image).or_insert_with(|| CacheList {
            image,
            buffers: Vec::new(),
        });
        debug_assert!(!list.buffers.contains(&id));
        list.buffers.push(id);

        self.buffer_mut(id).published = true;
        trace!(%image, "published buffer");
    }

    /// Takes the buffer off its image list. Idempotent. The area is zeroed
    /// either way so stale geometry can never match a future lookup.
    pub fn unpublish(&mut self, id: BufferId) {
        self.assert_owner();

        let buffer = self.buffer(id);
        if buffer.published {
            let image = buffer.image.expect("published buffer with no image").id;
            let list = self
                .lists
                .get_mut(&image)
                .expect("published buffer missing its image list");
            let pos = list
                .buffers
                .iter()
                .position(|&member| member == id)
                .expect("published buffer missing from its image list");
            list.buffers.remove(pos);

            self.buffer_mut(id).published = false;
            trace!(%image, "unpublished buffer");
        }

        self.buffer_mut(id).area = Rect::default();
    }

    /// Drops one reference. On the last one the buffer is unpublished and
    /// either parked in the reserve pool or permanently freed.
    pub fn release(&mut self, id: BufferId) {
        self.assert_owner();

        let buffer = self.buffer_mut(id);
        assert!(buffer.ref_count > 0, "releasing a buffer with no references");
        buffer.ref_count -= 1;
        if buffer.ref_count > 0 {
            return;
        }

        self.unpublish(id);

        if self.reserve.len() < MAX_RESERVE {
            self.buffer_mut(id).detach();
            self.reserve.push(id);
            trace!(reserve = self.reserve.len(), "parked buffer in reserve");
        } else {
            trace!("reserve full, freeing buffer");
            self.free_slot(id);
        }

        if is_debug() {
            self.validate();
        }
    }

    /// Tears everything down: image lists are marked unpublished, reserve
    /// and remaining buffers are permanently freed. A handle that survives
    /// this is a scheduler bug and fails loudly on its next use.
    pub fn clear(&mut self) {
        self.assert_owner();

        let slots = &mut self.slots;
        for list in self.lists.values() {
            for &id in &list.buffers {
                if let Some(buffer) = slots[id.index as usize].buffer.as_mut() {
                    buffer.published = false;
                }
            }
        }
        self.lists.clear();
        self.reserve.clear();
        self.free.clear();
        self.slots.clear();

        debug!("cleared thread buffer cache");
    }

    pub fn area(&self, id: BufferId) -> Rect {
        self.buffer(id).area
    }

    pub fn ref_count(&self, id: BufferId) -> u32 {
        self.buffer(id).ref_count
    }

    pub fn is_published(&self, id: BufferId) -> bool {
        self.buffer(id).published
    }

    pub fn image_id(&self, id: BufferId) -> ImageId {
        self.buffer(id).image.expect("buffer has no target image").id
    }

    /// Block capacity, which may exceed what the current area needs.
    pub fn capacity(&self, id: BufferId) -> usize {
        self.buffer(id).capacity()
    }

    /// Pixel bytes of the current area.
    pub fn bytes(&self, id: BufferId) -> &[u8] {
        let buffer = self.buffer(id);
        let len = buffer.required_bytes();
        let block = buffer.block.as_ref().expect("buffer has no pixel block");
        &block.as_slice()[..len]
    }

    /// Pixel bytes of the current area, writable. This is where a producing
    /// stage puts its output before `publish`.
    pub fn bytes_mut(&mut self, id: BufferId) -> &mut [u8] {
        self.assert_owner();

        let buffer = self.buffer_mut(id);
        let len = buffer.required_bytes();
        let block = buffer.block.as_mut().expect("buffer has no pixel block");
        &mut block.as_mut_slice()[..len]
    }

    pub fn reserve_len(&self) -> usize {
        self.reserve.len()
    }

    pub fn allocator(&self) -> &TrackedAlloc {
        &self.alloc
    }

    /// First published buffer enclosing `area`, newest publish first. A
    /// larger enclosing buffer further down the list loses on purpose:
    /// lookup speed over tight footprint.
    fn find_published(&mut self, image: ImageId, area: Rect) -> Option<BufferId> {
        let list = self.lists.get(&image)?;
        let found = list
            .buffers
            .iter()
            .rev()
            .copied()
            .find(|&id| self.buffer(id).area.encloses(&area))?;

        let buffer = self.buffer_mut(found);
        buffer.ref_count += 1;
        trace!(ref_count = buffer.ref_count, "reusing published buffer");
        Some(found)
    }

    /// A referenced, unpublished buffer sized for `area`: recycled from
    /// reserve when possible, freshly constructed otherwise.
    fn new_buffer(&mut self, image: &ImageDesc, area: Rect) -> CacheResult<BufferId> {
        let id = match self.reserve.pop() {
            Some(id) => {
                let buffer = self.buffer_mut(id);
                debug_assert!(buffer.is_detached());
                debug_assert_eq!(buffer.ref_count, 0);
                debug_assert!(!buffer.published);

                buffer.ref_count = 1;
                buffer.image = Some(*image);
                id
            }
            None => self.insert_buffer(Buffer::new_empty(*image)),
        };

        self.move_buffer(id, area)?;
        Ok(id)
    }

    fn move_buffer(&mut self, id: BufferId, area: Rect) -> CacheResult<()> {
        self.unpublish(id);

        let alloc = self.alloc.clone();
        if let Err(err) = self.buffer_mut(id).move_to(area, &alloc) {
            // Nothing half-built may stay behind: no reserve slot, no index
            // entry, no handle.
            self.free_slot(id);
            return Err(err);
        }
        Ok(())
    }

    fn insert_buffer(&mut self, buffer: Buffer) -> BufferId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.buffer.is_none());
                slot.buffer = Some(buffer);
                BufferId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    buffer: Some(buffer),
                });
                BufferId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn free_slot(&mut self, id: BufferId) {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale buffer handle");
        let buffer = slot.buffer.take().expect("stale buffer handle");
        debug_assert!(!buffer.published);

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    fn buffer(&self, id: BufferId) -> &Buffer {
        let slot = &self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale buffer handle");
        slot.buffer.as_ref().expect("stale buffer handle")
    }

    fn buffer_mut(&mut self, id: BufferId) -> &mut Buffer {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale buffer handle");
        slot.buffer.as_mut().expect("stale buffer handle")
    }

    fn assert_owner(&self) {
        debug_assert_eq!(
            self.thread,
            std::thread::current().id(),
            "buffer cache used off its owning thread"
        );
    }

    fn validate(&self) {
        for &id in &self.reserve {
            let buffer = self.buffer(id);
            assert!(buffer.is_detached());
            assert_eq!(buffer.ref_count, 0);
            assert!(!buffer.published);
        }
        for (image, list) in &self.lists {
            assert_eq!(list.image, *image);
            for &id in &list.buffers {
                let buffer = self.buffer(id);
                assert!(buffer.published);
                assert_eq!(buffer.image.map(|desc| desc.id), Some(*image));
                assert!(buffer.required_bytes() <= buffer.capacity());
            }
        }
    }
}

impl Default for BufferCache {
    fn default() -> BufferCache {
        BufferCache::new()
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        self.clear();
    }
}
