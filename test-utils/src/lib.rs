//! Test helpers for the LCOW crates.
//!
//! [`FakeUtilityVm`] stands in for a running utility VM: it records every
//! call made to it and answers process and SCSI requests from a script.

mod fake_uvm;
mod image;

pub use fake_uvm::{FakeUtilityVm, GuestCall, ProcessScript};
pub use image::{FailingImageCreator, MarkerImageCreator};

use tracing::Level;
use tracing::subscriber::DefaultGuard;

/// Route DEBUG-level events on this thread to the test output.
///
/// Diagnostics only run when DEBUG is enabled, so tests exercising them
/// hold this guard for their duration.
pub fn debug_logging() -> DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}
