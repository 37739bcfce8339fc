//! Memory-mapped file regions.
//!
//! A mapping owns both the map and the file handle; dropping it unmaps
//! before the handle is closed (field order). Only the offset-adjusted
//! voxel slice is exposed to the rest of the crate, so unmapping always
//! operates on the full region.

use crate::error::{NiftiError, Result};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// A read-only mapping of a volume's data file.
#[derive(Debug)]
pub(crate) struct MappedRegion {
    map: Mmap,
    _file: File,
    vox_offset: usize,
    len: usize,
}

impl MappedRegion {
    /// The voxel block, `len` bytes starting at the voxel offset.
    pub fn voxels(&self) -> &[u8] {
        &self.map[self.vox_offset..self.vox_offset + self.len]
    }

    /// The bytes preceding the voxel block (header and extension records,
    /// for combined storage).
    pub fn leading(&self) -> &[u8] {
        &self.map[..self.vox_offset]
    }
}

/// Attempt a read-only mapping of `path` with a voxel block of `len` bytes
/// at `vox_offset`.
///
/// Returns `Ok(None)` when the file cannot be mapped (the caller falls
/// back to buffered reading); a file too short for the declared voxel
/// block is a hard `ShortRead` instead, detected before the map is used.
pub(crate) fn map_readonly(
    path: &Path,
    vox_offset: usize,
    len: usize,
) -> Result<Option<MappedRegion>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };
    let file_len = match file.metadata() {
        Ok(m) => m.len(),
        Err(_) => return Ok(None),
    };
    let required = (vox_offset + len) as u64;
    if file_len < required {
        return Err(NiftiError::ShortRead(
            path.to_owned(),
            vox_offset + len,
            file_len as usize,
        ));
    }
    match unsafe { MmapOptions::new().map(&file) } {
        Ok(map) => Ok(Some(MappedRegion {
            map,
            _file: file,
            vox_offset,
            len,
        })),
        Err(_) => Ok(None),
    }
}

/// A write-enabled mapping backing an output volume.
#[derive(Debug)]
pub(crate) struct MappedRegionMut {
    map: MmapMut,
    _file: File,
    vox_offset: usize,
    len: usize,
}

impl MappedRegionMut {
    /// The writable voxel block.
    pub fn voxels_mut(&mut self) -> &mut [u8] {
        &mut self.map[self.vox_offset..self.vox_offset + self.len]
    }

    /// The read-only voxel block.
    pub fn voxels(&self) -> &[u8] {
        &self.map[self.vox_offset..self.vox_offset + self.len]
    }

    /// Flush dirty pages; the caller drops the region afterwards to unmap.
    pub fn commit(&mut self) -> io::Result<()> {
        self.map.flush()
    }
}

/// Attempt to create `path` sized `vox_offset + len` and map it writable.
///
/// Any failure returns `None` and the output volume falls back to a heap
/// buffer; nothing here is fatal.
pub(crate) fn map_writable(path: &Path, vox_offset: usize, len: usize) -> Option<MappedRegionMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .ok()?;
    file.set_len((vox_offset + len) as u64).ok()?;
    let map = unsafe { MmapOptions::new().map_mut(&file) }.ok()?;
    Some(MappedRegionMut {
        map,
        _file: file,
        vox_offset,
        len,
    })
}
