//! Empty disk image creation.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Bytes in one gigabyte of disk capacity.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Creates an empty, unformatted disk image on the host.
pub trait ImageCreator: Send + Sync {
    /// Create (or replace) the image at `path` with `size_gb` of capacity.
    fn create_image(&self, path: &Path, size_gb: u32, block_size_mb: u32) -> io::Result<()>;
}

/// Creates raw sparse images: the file length is the capacity, no blocks
/// are allocated until the guest writes them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseImageCreator;

impl ImageCreator for SparseImageCreator {
    fn create_image(&self, path: &Path, size_gb: u32, block_size_mb: u32) -> io::Result<()> {
        if size_gb == 0 || block_size_mb == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid disk geometry: {size_gb}GB with {block_size_mb}MB blocks"),
            ));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        file.set_len(u64::from(size_gb) * GIB)?;

        tracing::debug!(
            "Created sparse disk image: {} ({}GB, {}MB blocks)",
            path.display(),
            size_gb,
            block_size_mb
        );
        Ok(())
    }
}
