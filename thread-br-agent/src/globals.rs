//! Process-wide handles reachable from contexts that can't be threaded an
//! argument: the panic hook and the `SIGTERM`/`SIGINT` handler.
//!
//! The original keeps a handful of raw global pointers for this
//! (`sDnssdPlatform`, `sSrplDnssd` and friends in the agent's `main.cpp`),
//! set once at startup and read from signal handlers and cleanup paths.
//! Here the equivalent state is collected into one `CoreHandles` struct
//! behind a `OnceLock`, written exactly once from `main` before the reactor
//! starts — a `'static`, safely-shared handle without a raw pointer, at the
//! cost of the handles it carries being restricted to `Send + Sync` types
//! (the reactor's own `Rc`-based state stays owned by `main` and is never
//! reachable from here).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub struct CoreHandles {
    terminate: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
}

static GLOBAL: OnceLock<CoreHandles> = OnceLock::new();

/// Called exactly once from `main`, before the reactor runs. Panics if
/// called twice — a programming error, not a runtime condition.
pub fn init(terminate: Arc<AtomicBool>, reset_requested: Arc<AtomicBool>) {
    GLOBAL
        .set(CoreHandles { terminate, reset_requested })
        .unwrap_or_else(|_| panic!("globals::init called more than once"));
}

fn handles() -> &'static CoreHandles {
    GLOBAL.get().expect("globals::init was never called")
}

/// Requests a clean shutdown; checked by the reactor between iterations.
/// Safe to call from a signal handler.
pub fn request_terminate() {
    handles().terminate.store(true, Ordering::Relaxed);
}

/// Requests an NCP reset from outside the reactor loop (e.g. a supervisory
/// IPC command).
pub fn request_reset() {
    handles().reset_requested.store(true, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    // `GLOBAL` is process-wide and `OnceLock`-guarded, so only one test in
    // this binary may touch `init` — exercised instead through `main`'s own
    // startup path.
}
