//! Write-only NIfTI-1 volumes, persisted at destruction.

use super::{checked_linear_index, MappingMode, WriterOptions};
use crate::error::{NiftiError, Result};
use crate::header::{NiftiHeader, HEADER_EXTENDER_LEN, MAGIC_CODE_NI1, MAGIC_CODE_NIP1};
use crate::mapped::{self, MappedRegionMut};
use crate::resolve::{resolve, VolumeLocation};
use crate::typedef::DataElement;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::mem;
use std::ops::{Index, IndexMut};
use std::path::Path;

/// An owned voxel buffer of element type `T` and dimensionality `D`,
/// destined for a NIfTI-1 file.
///
/// The header is derived at construction from a "like" source (usually the
/// input volume the results correspond to) plus the caller's extents; the
/// buffer shape is fixed from then on. Uncompressed output writes through
/// a memory mapping of the destination file when one can be established,
/// and into a heap buffer otherwise; compressed output always buffers.
///
/// Nothing is durable until [`finalize`](OutputVolume::finalize) runs,
/// which the destructor does automatically; a failure to commit from the
/// destructor panics, as the data cannot be preserved.
///
/// # Examples
///
/// ```no_run
/// use niivol::{InputVolume, OutputVolume};
/// # use niivol::Result;
///
/// # fn run() -> Result<()> {
/// let dwi: InputVolume<f64, 4> = InputVolume::open("dwi.nii.gz")?;
/// let [nx, ny, nz, _] = dwi.shape();
/// let mut fit: OutputVolume<f32, 4> =
///     OutputVolume::create("fit.nii.gz", &dwi, [nx, ny, nz, 5])?;
/// *fit.at_mut([0, 0, 0, 0]) = 1.0;
/// # Ok(())
/// # }
/// ```
pub struct OutputVolume<T: DataElement, const D: usize> {
    location: VolumeLocation,
    header: NiftiHeader,
    shape: [usize; D],
    storage: Storage<T>,
}

enum Storage<T> {
    Mapped(MappedRegionMut),
    Buffered(Vec<T>),
    Closed,
}

fn derive_header<T: DataElement, const D: usize>(
    like: &NiftiHeader,
    extents: &[usize; D],
    location: &VolumeLocation,
) -> NiftiHeader {
    let mut dim = [0i16; 8];
    dim[0] = D as i16;
    for axis in 0..D {
        dim[axis + 1] = extents[axis] as i16;
    }

    let mut pixdim = like.pixdim;
    for p in pixdim.iter_mut().skip(D + 1) {
        *p = 0.;
    }

    let mut descrip = [0u8; 80];
    let text = concat!("niivol v", env!("CARGO_PKG_VERSION"));
    descrip[..text.len()].copy_from_slice(text.as_bytes());

    NiftiHeader {
        dim,
        datatype: T::DATA_TYPE as i16,
        bitpix: (mem::size_of::<T>() * 8) as i16,
        pixdim,
        vox_offset: if location.is_separate_storage {
            0.
        } else {
            HEADER_EXTENDER_LEN as f32
        },
        scl_slope: 1.,
        scl_inter: 0.,
        xyzt_units: like.xyzt_units,
        descrip,
        qform_code: like.qform_code,
        sform_code: like.sform_code,
        quatern_b: like.quatern_b,
        quatern_c: like.quatern_c,
        quatern_d: like.quatern_d,
        qoffset_x: like.qoffset_x,
        qoffset_y: like.qoffset_y,
        qoffset_z: like.qoffset_z,
        srow_x: like.srow_x,
        srow_y: like.srow_y,
        srow_z: like.srow_z,
        magic: if location.is_separate_storage {
            *MAGIC_CODE_NI1
        } else {
            *MAGIC_CODE_NIP1
        },
        // intent, slice timing, display range and the legacy fields stay zero
        ..NiftiHeader::default()
    }
}

impl<T: DataElement, const D: usize> OutputVolume<T, D> {
    /// Create an output volume at `path` with default options.
    ///
    /// `like` provides the grid and frame fields of the new header; it can
    /// be a [`NiftiHeader`] or any input volume, of any element type and
    /// rank. Each extent must fit the format's 16-bit dimension field.
    pub fn create<P, H>(path: P, like: H, extents: [usize; D]) -> Result<Self>
    where
        P: AsRef<Path>,
        H: AsRef<NiftiHeader>,
    {
        Self::create_with(path, like, extents, &WriterOptions::default())
    }

    /// Create an output volume at `path`.
    pub fn create_with<P, H>(
        path: P,
        like: H,
        extents: [usize; D],
        options: &WriterOptions,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
        H: AsRef<NiftiHeader>,
    {
        for (axis, &extent) in extents.iter().enumerate() {
            if extent > i16::MAX as usize {
                return Err(NiftiError::ExtentTooLarge(axis, extent));
            }
        }

        let location = resolve(path.as_ref());
        let header = derive_header::<T, D>(like.as_ref(), &extents, &location);

        let nvox: usize = extents.iter().product();
        let nbytes = nvox * mem::size_of::<T>();
        let vox_offset = header.vox_offset as usize;

        let storage = if !location.is_gzip && options.mapping == MappingMode::Auto {
            match mapped::map_writable(&location.data_path, vox_offset, nbytes) {
                Some(region) => Storage::Mapped(region),
                None => Storage::Buffered(bytemuck::zeroed_vec(nvox)),
            }
        } else {
            Storage::Buffered(bytemuck::zeroed_vec(nvox))
        };

        Ok(OutputVolume {
            location,
            header,
            shape: extents,
            storage,
        })
    }

    /// The derived header as it will be written.
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// The resolved storage location.
    pub fn location(&self) -> &VolumeLocation {
        &self.location
    }

    /// Whether the buffer is a mapping of the destination file.
    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Per-axis extents.
    pub fn shape(&self) -> [usize; D] {
        self.shape
    }

    /// Total number of voxels.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// The extent along `axis`.
    pub fn axis_size(&self, axis: usize) -> usize {
        assert!(axis < D, "axis {} out of range for a {}-d volume", axis, D);
        self.shape[axis]
    }

    /// Set the display-range hints recorded in the header. Stored voxel
    /// values are unaffected.
    pub fn cal(&mut self, min: f32, max: f32) {
        self.header.cal_min = min;
        self.header.cal_max = max;
    }

    /// The whole voxel buffer, in column-major order.
    pub fn as_slice(&self) -> &[T] {
        match &self.storage {
            Storage::Mapped(region) => bytemuck::cast_slice(region.voxels()),
            Storage::Buffered(data) => data,
            Storage::Closed => panic!("output volume is already finalized"),
        }
    }

    /// The whole voxel buffer, mutable. Callers running the per-voxel loop
    /// on several threads split this slice into disjoint parts; the volume
    /// itself does no locking.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.storage {
            Storage::Mapped(region) => bytemuck::cast_slice_mut(region.voxels_mut()),
            Storage::Buffered(data) => data,
            Storage::Closed => panic!("output volume is already finalized"),
        }
    }

    /// The voxel at the multi-axis index `idx`.
    pub fn at(&self, idx: [usize; D]) -> &T {
        let index = checked_linear_index(&self.shape, &idx);
        &self.as_slice()[index]
    }

    /// Mutable access to the voxel at the multi-axis index `idx`.
    pub fn at_mut(&mut self, idx: [usize; D]) -> &mut T {
        let index = checked_linear_index(&self.shape, &idx);
        &mut self.as_mut_slice()[index]
    }

    /// Commit the volume to disk: voxel data and derived header, in the
    /// order the storage arrangement requires. Idempotent; called by the
    /// destructor. After a successful call the buffer is gone and voxel
    /// access panics.
    pub fn finalize(&mut self) -> Result<()> {
        match mem::replace(&mut self.storage, Storage::Closed) {
            Storage::Closed => Ok(()),
            Storage::Mapped(region) => self.commit_mapped(region),
            Storage::Buffered(data) => self.commit_buffered(&data),
        }
    }

    /// Mapped commit: flush and unmap first, then write the header bytes
    /// (into the same file for combined storage, the header file for
    /// separate storage).
    fn commit_mapped(&self, mut region: MappedRegionMut) -> Result<()> {
        let data_path = &self.location.data_path;
        region
            .commit()
            .map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
        drop(region);

        if self.location.is_separate_storage {
            let header_path = &self.location.header_path;
            let file = File::create(header_path)
                .map_err(|e| NiftiError::Teardown(header_path.clone(), e))?;
            let mut writer = BufWriter::new(file);
            self.header
                .write_with_extender(&mut writer)
                .map_err(|e| teardown_error(header_path, e))?;
            writer
                .flush()
                .map_err(|e| NiftiError::Teardown(header_path.clone(), e))?;
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .open(data_path)
                .map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
            self.header
                .write_with_extender(&mut file)
                .map_err(|e| teardown_error(data_path, e))?;
        }
        Ok(())
    }

    fn commit_buffered(&self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let data_path = &self.location.data_path;
        let header_path = &self.location.header_path;

        if self.location.is_gzip {
            if self.location.is_separate_storage {
                // The data file goes first; the header file must exist as
                // a standalone object once written.
                {
                    let file = File::create(data_path)
                        .map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
                    let mut encoder =
                        GzEncoder::new(BufWriter::new(file), Compression::default());
                    encoder
                        .write_all(bytes)
                        .map_err(|e| io_teardown_error(data_path, e))?;
                    finish_gz(encoder, data_path)?;
                }
                let file = File::create(header_path)
                    .map_err(|e| NiftiError::Teardown(header_path.clone(), e))?;
                let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
                self.header
                    .write_with_extender(&mut encoder)
                    .map_err(|e| teardown_error(header_path, e))?;
                finish_gz(encoder, header_path)?;
            } else {
                // One compressed stream; the header must precede the data.
                let file = File::create(data_path)
                    .map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
                let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
                self.header
                    .write_with_extender(&mut encoder)
                    .map_err(|e| teardown_error(data_path, e))?;
                encoder
                    .write_all(bytes)
                    .map_err(|e| io_teardown_error(data_path, e))?;
                finish_gz(encoder, data_path)?;
            }
        } else if self.location.is_separate_storage {
            let file =
                File::create(data_path).map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(bytes)
                .map_err(|e| io_teardown_error(data_path, e))?;
            writer
                .flush()
                .map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;

            let file = File::create(header_path)
                .map_err(|e| NiftiError::Teardown(header_path.clone(), e))?;
            let mut writer = BufWriter::new(file);
            self.header
                .write_with_extender(&mut writer)
                .map_err(|e| teardown_error(header_path, e))?;
            writer
                .flush()
                .map_err(|e| NiftiError::Teardown(header_path.clone(), e))?;
        } else {
            // One bulk write of the buffer at the voxel offset, then the
            // header and extender at the start.
            let mut file =
                File::create(data_path).map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
            file.seek(SeekFrom::Start(self.header.vox_offset as u64))
                .map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
            file.write_all(bytes)
                .map_err(|e| io_teardown_error(data_path, e))?;
            file.seek(SeekFrom::Start(0))
                .map_err(|e| NiftiError::Teardown(data_path.clone(), e))?;
            self.header
                .write_with_extender(&mut file)
                .map_err(|e| teardown_error(data_path, e))?;
        }
        Ok(())
    }
}

fn io_teardown_error(path: &Path, err: io::Error) -> NiftiError {
    if err.kind() == io::ErrorKind::WriteZero {
        NiftiError::ShortWrite(path.to_owned())
    } else {
        NiftiError::Teardown(path.to_owned(), err)
    }
}

fn teardown_error(path: &Path, err: NiftiError) -> NiftiError {
    match err {
        NiftiError::Io(e) => io_teardown_error(path, e),
        other => other,
    }
}

fn finish_gz<W: Write>(encoder: GzEncoder<W>, path: &Path) -> Result<()> {
    let mut inner = encoder
        .finish()
        .map_err(|e| NiftiError::Teardown(path.to_owned(), e))?;
    inner
        .flush()
        .map_err(|e| NiftiError::Teardown(path.to_owned(), e))
}

impl<T: DataElement, const D: usize> Index<usize> for OutputVolume<T, D> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T: DataElement, const D: usize> IndexMut<usize> for OutputVolume<T, D> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<T: DataElement, const D: usize> Drop for OutputVolume<T, D> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            if !std::thread::panicking() {
                panic!("{}", e);
            }
        }
    }
}

impl<T: DataElement, const D: usize> fmt::Debug for OutputVolume<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self.storage {
            Storage::Mapped(_) => "mapped",
            Storage::Buffered(_) => "buffered",
            Storage::Closed => "closed",
        };
        f.debug_struct("OutputVolume")
            .field("location", &self.location)
            .field("shape", &self.shape)
            .field("datatype", &self.header.datatype)
            .field("storage", &state)
            .finish()
    }
}
