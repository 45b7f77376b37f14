//! Per-thread recording state.
//!
//! Each recording thread lazily creates its own chunk writer and scratch
//! buffer; both are appended to a device-wide registry on first use so they
//! remain enumerable at shutdown. The thread-local slots are keyed by a
//! per-device token, so a capture device and a replay device in one process
//! (as happens in tests) do not share writers.

use crate::lock;
use refract_trace::ChunkWriter;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_REGISTRY_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TLS_WRITERS: RefCell<HashMap<u64, Arc<Mutex<ChunkWriter>>>> =
        RefCell::new(HashMap::new());
    static TLS_SCRATCH: RefCell<HashMap<u64, Arc<Mutex<Vec<u8>>>>> =
        RefCell::new(HashMap::new());
}

/// Registry of per-thread chunk writers.
pub(crate) struct ThreadWriters {
    token: u64,
    debug_text: bool,
    registry: Mutex<Vec<Arc<Mutex<ChunkWriter>>>>,
}

impl ThreadWriters {
    pub fn new(debug_text: bool) -> Self {
        Self {
            token: NEXT_REGISTRY_TOKEN.fetch_add(1, Ordering::Relaxed),
            debug_text,
            registry: Mutex::new(Vec::new()),
        }
    }

    /// The calling thread's writer, created and registered on first use.
    pub fn get(&self) -> Arc<Mutex<ChunkWriter>> {
        TLS_WRITERS.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(writer) = slot.get(&self.token) {
                return Arc::clone(writer);
            }
            // slow path, but rare
            let writer = Arc::new(Mutex::new(ChunkWriter::new(self.debug_text)));
            slot.insert(self.token, Arc::clone(&writer));
            lock(&self.registry).push(Arc::clone(&writer));
            writer
        })
    }

    pub fn registered(&self) -> usize {
        lock(&self.registry).len()
    }
}

/// Registry of per-thread scratch buffers for staging variable-sized data.
pub(crate) struct ThreadScratch {
    token: u64,
    registry: Mutex<Vec<Arc<Mutex<Vec<u8>>>>>,
}

impl ThreadScratch {
    pub fn new() -> Self {
        Self {
            token: NEXT_REGISTRY_TOKEN.fetch_add(1, Ordering::Relaxed),
            registry: Mutex::new(Vec::new()),
        }
    }

    /// Run `f` with this thread's scratch buffer grown to at least
    /// `min_len` bytes. Contents are unspecified on entry.
    pub fn with<R>(&self, min_len: usize, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let scratch = TLS_SCRATCH.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(buf) = slot.get(&self.token) {
                return Arc::clone(buf);
            }
            let buf = Arc::new(Mutex::new(Vec::new()));
            slot.insert(self.token, Arc::clone(&buf));
            lock(&self.registry).push(Arc::clone(&buf));
            buf
        });
        let mut buf = lock(&scratch);
        if buf.len() < min_len {
            buf.resize(min_len, 0);
        }
        f(&mut buf)
    }

    pub fn registered(&self) -> usize {
        lock(&self.registry).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_thread_registers_one_writer() {
        let writers = Arc::new(ThreadWriters::new(false));
        let a = writers.get();
        let b = writers.get();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(writers.registered(), 1);

        let shared = Arc::clone(&writers);
        std::thread::spawn(move || {
            shared.get();
        })
        .join()
        .unwrap();
        assert_eq!(writers.registered(), 2);
    }

    #[test]
    fn devices_do_not_share_thread_slots() {
        let a = ThreadWriters::new(false);
        let b = ThreadWriters::new(false);
        let wa = a.get();
        let wb = b.get();
        assert!(!Arc::ptr_eq(&wa, &wb));
    }

    #[test]
    fn scratch_grows_to_fit() {
        let scratch = ThreadScratch::new();
        scratch.with(16, |buf| assert!(buf.len() >= 16));
        scratch.with(4, |buf| assert!(buf.len() >= 16));
        assert_eq!(scratch.registered(), 1);
    }
}
