//! Process-wide capture configuration.
//!
//! The embedding host initialises these once at load; the capture layer only
//! reads them. They are singletons on purpose: one process is either a
//! capture host or a replay host, never both.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Options consumed by the capture layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaptureOptions {
    /// Collect and serialize a callstack with every recorded chunk.
    pub capture_callstacks: bool,
}

static OPTIONS: Mutex<CaptureOptions> = Mutex::new(CaptureOptions {
    capture_callstacks: false,
});

pub fn set_capture_options(options: CaptureOptions) {
    *OPTIONS.lock().unwrap_or_else(|e| e.into_inner()) = options;
}

pub fn capture_options() -> CaptureOptions {
    *OPTIONS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Which API the current capture belongs to. Set when a capture starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ApiKind {
    Unknown = 0,
    ExplicitGpu = 1,
}

static CURRENT_API: AtomicU32 = AtomicU32::new(ApiKind::Unknown as u32);

pub fn set_current_api(api: ApiKind) {
    CURRENT_API.store(api as u32, Ordering::Relaxed);
}

pub fn current_api() -> ApiKind {
    match CURRENT_API.load(Ordering::Relaxed) {
        1 => ApiKind::ExplicitGpu,
        _ => ApiKind::Unknown,
    }
}

/// Callstack collector installed by the embedding host.
///
/// The core never walks stacks itself; platforms that can produce return
/// addresses register a collector here and the capture layer attaches its
/// output to chunks when [`CaptureOptions::capture_callstacks`] is set.
pub type CallstackFn = fn() -> Vec<u64>;

static COLLECTOR: Mutex<Option<CallstackFn>> = Mutex::new(None);

pub fn set_callstack_collector(collector: Option<CallstackFn>) {
    *COLLECTOR.lock().unwrap_or_else(|e| e.into_inner()) = collector;
}

/// Collect a callstack if callstack capture is enabled and a collector is
/// registered. Returns `None` otherwise.
pub fn collect_callstack() -> Option<Vec<u64>> {
    if !capture_options().capture_callstacks {
        return None;
    }
    let collector = (*COLLECTOR.lock().unwrap_or_else(|e| e.into_inner()))?;
    Some(collector())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_stack() -> Vec<u64> {
        vec![0x1000, 0x2000]
    }

    #[test]
    fn callstacks_gated_on_option_and_collector() {
        set_callstack_collector(Some(fake_stack));
        set_capture_options(CaptureOptions {
            capture_callstacks: false,
        });
        assert!(collect_callstack().is_none());

        set_capture_options(CaptureOptions {
            capture_callstacks: true,
        });
        assert_eq!(collect_callstack(), Some(vec![0x1000, 0x2000]));

        set_callstack_collector(None);
        assert!(collect_callstack().is_none());
        set_capture_options(CaptureOptions::default());
    }
}
