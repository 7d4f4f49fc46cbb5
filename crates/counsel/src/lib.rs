//! Public SDK surface for Counsel.
//!
//! This crate re-exports the building blocks and provides a small
//! initialization helper to keep consumer setup consistent. Embedding
//! callers construct a system through [`core::StartupCoordinator`] and
//! keep the returned handle.

/// Re-export for convenience.
pub use counsel_config as config;
pub use counsel_core as core;
/// Re-export for convenience.
pub use counsel_index as index;
/// Re-export for convenience.
pub use counsel_protocol as protocol;
/// Re-export for convenience.
pub use counsel_service as service;

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// This is a no-op if the feature is not enabled. Binaries are still expected
/// to call this early in startup to ensure log output is wired up.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
}
