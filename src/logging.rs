//! Log output setup.
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them install a subscriber once with [`init`].

use tracing::Level;

/// Installs a `fmt` subscriber writing events at `level` and above to stdout.
///
/// Returns `false` if a global subscriber was already installed, in which case
/// nothing changes. Safe to call from every test.
pub fn init(level: Level) -> bool {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(true)
    .with_thread_ids(true)
    .try_init()
    .is_ok()
}
