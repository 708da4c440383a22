//! A plain OS-thread execution backend.
//!
//! Ground truth: spec §5's "threads acceptable for I/O-bound tasks" and
//! `SPEC_FULL.md` §5. The simplest backend that satisfies
//! [`ExecutionBackend`](dagger_core::backend::ExecutionBackend): every
//! submitted job gets its own `std::thread`.

use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use dagger_core::backend::ExecutionBackend;
use tracing::warn;

/// Runs every submitted job on a dedicated `std::thread`.
///
/// `shutdown(wait, kill)`: a native OS thread can't be forcefully killed
/// from safe Rust, so `kill` is honored on a best-effort basis — outstanding
/// handles are simply dropped (detached) rather than joined, and a
/// `tracing::warn!` records the gap (spec §6: "should do the closest safe
/// approximation and document the gap"). `wait` joins every outstanding
/// handle, which is the real cooperative-shutdown path.
#[derive(Default)]
pub struct ThreadBackend {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ThreadBackend {
    /// A fresh backend with no outstanding jobs.
    pub fn new() -> Self {
        ThreadBackend::default()
    }
}

impl ExecutionBackend for ThreadBackend {
    type Handle = ();

    fn submit(&self, job: Box<dyn FnOnce() + Send>) -> Self::Handle {
        let handle = thread::spawn(job);
        self.handles.lock().expect("handle list poisoned").push(handle);
    }

    fn shutdown(&self, wait: bool, kill: bool) {
        let mut handles = self.handles.lock().expect("handle list poisoned");
        if kill && !wait {
            warn!(
                outstanding = handles.len(),
                "ThreadBackend cannot forcefully kill native threads; detaching instead"
            );
            handles.clear();
            return;
        }
        for handle in handles.drain(..) {
            if let Err(panic) = handle.join() {
                warn!(?panic, "a submitted job panicked during shutdown");
            }
        }
    }
}
