//! Crate-wide error types.

use quick_error::quick_error;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

quick_error! {
    /// Error type for all file reading and writing operations of the crate.
    ///
    /// Every variant that concerns a particular file carries its path, so
    /// that the rendered message names the offending file. All of these are
    /// unrecoverable at the point of detection; the one internal exception,
    /// a failed attempt to memory-map, is handled inside the crate by
    /// falling back to buffered I/O and never surfaces here.
    #[derive(Debug)]
    pub enum NiftiError {
        /// The file could not be opened.
        Unopenable(path: PathBuf, err: IoError) {
            display("unable to open '{}': {}", path.display(), err)
        }
        /// The file is not a NIfTI-1 file, or its magic code does not match
        /// the storage layout implied by its name.
        NotNifti(path: PathBuf) {
            display("'{}' is not a NIfTI-1 file", path.display())
        }
        /// The file was written under the opposite byte order. Foreign
        /// endianness is rejected, never silently swapped.
        UnsupportedEndianness(path: PathBuf) {
            display("'{}' has non-native byte order", path.display())
        }
        /// The image rank does not match the requested dimensionality.
        UnsupportedRank(path: PathBuf, expected: usize, got: i16) {
            display("'{}' is {}-dimensional, expected {} dimensions",
                path.display(), got, expected)
        }
        /// A declared axis extent is negative.
        InvalidExtent(path: PathBuf, axis: usize, extent: i16) {
            display("'{}' declares invalid extent {} along axis {}",
                path.display(), extent, axis)
        }
        /// The on-disk datatype code is unknown, or has no conversion to
        /// the requested element type.
        UnsupportedDataType(path: PathBuf, code: i16) {
            display("'{}' has unsupported data type code {}", path.display(), code)
        }
        /// The file ended before the declared voxel block was read.
        ShortRead(path: PathBuf, expected: usize, got: usize) {
            display("short read from '{}': expected {} bytes, got {}",
                path.display(), expected, got)
        }
        /// The sink accepted fewer bytes than the voxel block holds.
        ShortWrite(path: PathBuf) {
            display("short write to '{}'", path.display())
        }
        /// An output extent does not fit the format's 16-bit dimension field.
        ExtentTooLarge(axis: usize, extent: usize) {
            display("extent {} along axis {} exceeds the NIfTI-1 limit of {}",
                extent, axis, i16::MAX)
        }
        /// An I/O failure while committing an output volume to disk.
        Teardown(path: PathBuf, err: IoError) {
            display("failed to finalize '{}': {}", path.display(), err)
        }
        /// Other I/O error.
        Io(err: IoError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }
    }
}

impl NiftiError {
    /// Stamp `path` onto a variant raised by path-agnostic code.
    pub(crate) fn at(self, path: &Path) -> NiftiError {
        use NiftiError::*;
        match self {
            NotNifti(p) if p.as_os_str().is_empty() => NotNifti(path.to_owned()),
            UnsupportedEndianness(p) if p.as_os_str().is_empty() => {
                UnsupportedEndianness(path.to_owned())
            }
            UnsupportedRank(p, expected, got) if p.as_os_str().is_empty() => {
                UnsupportedRank(path.to_owned(), expected, got)
            }
            InvalidExtent(p, axis, extent) if p.as_os_str().is_empty() => {
                InvalidExtent(path.to_owned(), axis, extent)
            }
            UnsupportedDataType(p, code) if p.as_os_str().is_empty() => {
                UnsupportedDataType(path.to_owned(), code)
            }
            Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                NotNifti(path.to_owned())
            }
            Io(err) => Unopenable(path.to_owned(), err),
            e => e,
        }
    }
}

/// Alias for a `Result` with the crate's error type.
pub type Result<T> = ::std::result::Result<T, NiftiError>;
