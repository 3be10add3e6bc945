use crate::error::Result;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Map a file read-only. Backend output files and text recordings are read
/// through this instead of being copied into a `String`.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // Safety: files handed here are written once by a finished backend or
    // supplied by the caller, and are not truncated while the map is alive.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}
