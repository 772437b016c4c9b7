//! Local disk image operations.
//!
//! This module provides the host-side file work around scratch disks:
//! - `ImageCreator` - creates an empty disk image of a given capacity
//! - `SparseImageCreator` - default raw sparse-file implementation
//! - `copy_file` - plain or durable (synced) image copies

mod copy;
mod image;

pub use copy::copy_file;
pub use image::{GIB, ImageCreator, SparseImageCreator};
