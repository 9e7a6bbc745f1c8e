use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::info;

// Every buffer in the process, regardless of owning thread. This is the one
// cross-thread structure here and it sits entirely off the hot path.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);
static BUFFERS_ALL: Mutex<Option<HashMap<u64, BufferStat>>> = Mutex::new(None);

#[derive(Debug, Clone, Copy)]
struct BufferStat {
    bytes: usize,
    in_reserve: bool,
}

/// Aggregate picture of every live buffer in the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpTotals {
    pub buffers: usize,
    pub alive_bytes: usize,
    pub reserve_bytes: usize,
}

pub(crate) fn register() -> u64 {
    let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
    BUFFERS_ALL
        .lock()
        .get_or_insert_with(HashMap::new)
        .insert(
            serial,
            BufferStat {
                bytes: 0,
                in_reserve: false,
            },
        );
    serial
}

pub(crate) fn update(serial: u64, bytes: usize, in_reserve: bool) {
    let mut all = BUFFERS_ALL.lock();
    let stat = all
        .get_or_insert_with(HashMap::new)
        .get_mut(&serial)
        .expect("untracked buffer");
    *stat = BufferStat { bytes, in_reserve };
}

pub(crate) fn unregister(serial: u64) {
    let removed = BUFFERS_ALL
        .lock()
        .get_or_insert_with(HashMap::new)
        .remove(&serial);
    debug_assert!(removed.is_some(), "untracked buffer");
}

/// Logs every live buffer and returns process-wide totals.
pub fn dump_all() -> DumpTotals {
    let all = BUFFERS_ALL.lock();
    let mut totals = DumpTotals::default();

    if let Some(buffers) = all.as_ref() {
        for (serial, stat) in buffers.iter() {
            info!(
                serial = *serial,
                bytes = stat.bytes,
                in_reserve = stat.in_reserve,
                "live buffer"
            );
            totals.buffers += 1;
            if stat.in_reserve {
                totals.reserve_bytes += stat.bytes;
            } else {
                totals.alive_bytes += stat.bytes;
            }
        }
    }

    info!(
        alive_mb = totals.alive_bytes as f64 / (1024.0 * 1024.0),
        reserve_mb = totals.reserve_bytes as f64 / (1024.0 * 1024.0),
        "buffer totals"
    );

    totals
}
