//! Tracing setup shared by every binary built on top of `dagger_core`.
//!
//! `falconeri_common/src/lib.rs` declares `pub mod tracing_support;` and
//! depends on `tracing` + `tracing-subscriber` (with the `env-filter`
//! feature), so every Falconeri binary has some such module to call first
//! thing in `main` — but that module's body isn't present in this repo's
//! retrieval pack, so this isn't a port of its actual contents. This is the
//! ordinary shape an `env-filter`-driven subscriber takes with that
//! dependency set: read `RUST_LOG`, defaulting to `info` when it's unset.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `tracing` subscriber reading its filter from `RUST_LOG`
/// (falling back to `info`). Call once, as early as possible in `main`.
///
/// Safe to call more than once in tests; later calls are silently ignored
/// (`tracing_subscriber::fmt().try_init()` returns `Err` rather than
/// panicking if a subscriber is already installed).
pub fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
