//! Disk image copies.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Copy `src` to `dst`, replacing `dst` if it exists.
///
/// Reflinks when the filesystem supports it and falls back to a byte copy.
/// With `durable`, the destination is synced to stable storage before
/// returning.
pub fn copy_file(src: &Path, dst: &Path, durable: bool) -> io::Result<()> {
    if let Some(parent) = dst.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    // reflink refuses to clone over an existing file
    if dst.exists() {
        fs::remove_file(dst)?;
    }

    match reflink_copy::reflink_or_copy(src, dst)? {
        None => tracing::debug!("Reflinked {} to {}", src.display(), dst.display()),
        Some(bytes) => tracing::debug!(
            "Copied {} to {} ({} bytes)",
            src.display(),
            dst.display(),
            bytes
        ),
    }

    if durable {
        OpenOptions::new().write(true).open(dst)?.sync_all()?;
    }

    Ok(())
}
