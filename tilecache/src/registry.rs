use std::cell::RefCell;
use std::sync::OnceLock;

use tracing::debug;

use crate::cache::{BufferCache, MAX_RESERVE};

static PROCESS_INIT: OnceLock<()> = OnceLock::new();

thread_local! {
    static THREAD_CACHE: RefCell<Option<BufferCache>> = const { RefCell::new(None) };
}

/// Process-wide setup. Idempotent; must run before the first `with_cache`
/// on any thread.
pub fn process_init() {
    PROCESS_INIT.get_or_init(|| {
        debug!(max_reserve = MAX_RESERVE, "buffer cache registry initialized");
    });
}

pub fn is_initialized() -> bool {
    PROCESS_INIT.get().is_some()
}

/// Runs `f` with the calling thread's cache, creating it on first access.
/// The cache never leaves its thread; nothing published here is visible to
/// any other thread.
pub fn with_cache<R>(f: impl FnOnce(&mut BufferCache) -> R) -> R {
    debug_assert!(
        is_initialized(),
        "process_init must run before the buffer cache is used"
    );

    THREAD_CACHE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let cache = slot.get_or_insert_with(BufferCache::new);
        f(cache)
    })
}

/// Tears down the calling thread's cache only; its reserve blocks are
/// permanently freed. Threads that never call this are cleaned up by the
/// thread-local destructor on exit.
pub fn thread_shutdown() {
    THREAD_CACHE.with(|cell| {
        if cell.borrow_mut().take().is_some() {
            debug!("thread buffer cache shut down");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::{process_init, thread_shutdown, with_cache};
    use crate::image::{ImageDesc, PixelLayout};
    use crate::rect::Rect;

    #[test]
    fn process_init_is_idempotent() {
        process_init();
        process_init();
        assert!(super::is_initialized());
    }

    #[test]
    fn with_cache_reuses_the_thread_cache() {
        process_init();
        let image = ImageDesc::new(PixelLayout::RGBA_U8);

        let id = with_cache(|cache| {
            let id = cache.acquire(&image, Rect::new(0, 0, 10, 10)).unwrap();
            cache.publish(id);
            id
        });

        // A later call on the same thread sees the same cache and buffer.
        with_cache(|cache| {
            let again = cache.acquire(&image, Rect::new(2, 2, 4, 4)).unwrap();
            assert_eq!(again, id);
            assert_eq!(cache.ref_count(id), 2);
            cache.release(id);
            cache.release(id);
        });
    }

    #[test]
    fn shutdown_discards_the_thread_cache() {
        process_init();
        let image = ImageDesc::new(PixelLayout::RGBA_U8);

        with_cache(|cache| {
            let id = cache.acquire(&image, Rect::new(0, 0, 10, 10)).unwrap();
            cache.release(id);
            assert_eq!(cache.reserve_len(), 1);
        });

        thread_shutdown();

        with_cache(|cache| {
            assert_eq!(cache.reserve_len(), 0);
        });
    }

    #[test]
    fn published_buffers_stay_thread_confined() {
        process_init();
        let image = ImageDesc::new(PixelLayout::RGBA_U8);

        with_cache(|cache| {
            let id = cache.acquire(&image, Rect::new(0, 0, 20, 20)).unwrap();
            cache.publish(id);
        });

        // Another thread gets its own cache and cannot see the published
        // buffer; it has to allocate.
        let allocations = std::thread::spawn(move || {
            with_cache(|cache| {
                let id = cache.acquire(&image, Rect::new(2, 2, 4, 4)).unwrap();
                cache.release(id);
                cache.allocator().stats().total_allocations
            })
        })
        .join()
        .unwrap();
        assert_eq!(allocations, 1);

        // While the owning thread still shares it.
        with_cache(|cache| {
            let again = cache.acquire(&image, Rect::new(2, 2, 4, 4)).unwrap();
            assert_eq!(cache.ref_count(again), 2);
            assert_eq!(cache.allocator().stats().total_allocations, 1);
        });
    }
}
