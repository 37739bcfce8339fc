//! Reading and writing of NIfTI-1 volumes for diffusion MRI
//! microstructure fitting pipelines.
//!
//! The crate handles both storage arrangements of the format — combined
//! `.nii` files and `.hdr`/`.img` pairs — plain or gzip-compressed, and
//! decodes any of the registered on-disk numeric types into the caller's
//! element type, applying the header-declared affine rescale on read.
//! Uncompressed files are memory-mapped when possible and read through
//! buffers otherwise; the fallback is transparent.
//!
//! [`InputVolume`] is an immutable decoded view of an existing image.
//! [`OutputVolume`] owns a voxel buffer shaped by the caller, derives its
//! header from a "like" volume, and persists everything when dropped (or
//! when [`OutputVolume::finalize`] is called explicitly). A typical
//! fitting tool opens its inputs, checks them against each other with
//! [`InputVolume::has_equal_spatial_coords`], runs a per-voxel loop, and
//! lets the outputs commit at scope exit.
//!
//! ```no_run
//! use niivol::{InputVolume, OutputVolume};
//! # use niivol::Result;
//!
//! # fn run() -> Result<()> {
//! let dwi: InputVolume<f64, 4> = InputVolume::open("dwi.nii.gz")?;
//! let mask: InputVolume<f64, 3> = InputVolume::open("mask.nii")?;
//! assert!(dwi.has_equal_spatial_coords(&mask));
//!
//! let [nx, ny, nz, _] = dwi.shape();
//! let mut out: OutputVolume<f32, 3> = OutputVolume::create("b0.nii", &dwi, [nx, ny, nz])?;
//! for k in 0..nz {
//!     for j in 0..ny {
//!         for i in 0..nx {
//!             if mask.at([i, j, k]) > 0.0 {
//!                 *out.at_mut([i, j, k]) = dwi.at([i, j, k, 0]) as f32;
//!             }
//!         }
//!     }
//! }
//! // `out` is written to disk here
//! # Ok(())
//! # }
//! ```
#![deny(missing_debug_implementations)]
#![warn(missing_docs, unused_extern_crates, trivial_casts)]

pub mod error;
pub mod header;
mod mapped;
pub mod resolve;
pub mod typedef;
pub mod volume;

pub use crate::error::{NiftiError, Result};
pub use crate::header::NiftiHeader;
pub use crate::resolve::{resolve, VolumeLocation};
pub use crate::typedef::{DataElement, NiftiType};
pub use crate::volume::{
    InputVolume, MappingMode, OutputVolume, ReaderOptions, Slice, WriterOptions,
};
