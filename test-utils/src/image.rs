use std::fs;
use std::io;
use std::path::Path;

use lcow::disk::ImageCreator;

/// Writes a small text marker instead of a full-size image.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerImageCreator;

impl MarkerImageCreator {
    /// Contents written for an image of `size_gb`.
    pub fn marker(size_gb: u32, block_size_mb: u32) -> String {
        format!("scratch image {size_gb}GB/{block_size_mb}MB\n")
    }
}

impl ImageCreator for MarkerImageCreator {
    fn create_image(&self, path: &Path, size_gb: u32, block_size_mb: u32) -> io::Result<()> {
        fs::write(path, Self::marker(size_gb, block_size_mb))
    }
}

/// Always fails with `PermissionDenied`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingImageCreator;

impl ImageCreator for FailingImageCreator {
    fn create_image(&self, _path: &Path, _size_gb: u32, _block_size_mb: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "image creation denied",
        ))
    }
}
