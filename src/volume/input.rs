//! Read-only access to a NIfTI-1 volume on disk.

use super::{checked_linear_index, linear_index, MappingMode, ReaderOptions, Slice};
use crate::error::{NiftiError, Result};
use crate::header::{self, NiftiHeader, HEADER_EXTENDER_LEN, HEADER_LEN};
use crate::mapped::{self, MappedRegion};
use crate::resolve::{resolve, VolumeLocation};
use crate::typedef::{DataElement, Decoder};
use either::Either;
use flate2::bufread::GzDecoder;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// An immutable, validated, decoded view over a NIfTI-1 image of element
/// type `T` and dimensionality `D`.
///
/// Construction opens and validates the file(s), resolves the decode
/// function once, and acquires the voxel bytes either through a read-only
/// memory mapping (uncompressed files) or into an owned buffer (gzip,
/// standard input, or whenever mapping is unavailable). A constructed
/// volume never touches the file system again; it is safe to read from
/// many threads at once.
///
/// # Examples
///
/// ```no_run
/// use niivol::InputVolume;
/// # use niivol::Result;
///
/// # fn run() -> Result<()> {
/// let dwi: InputVolume<f64, 4> = InputVolume::open("dwi.nii.gz")?;
/// let signal = dwi.at([54, 60, 31, 0]);
/// # Ok(())
/// # }
/// ```
pub struct InputVolume<T: DataElement, const D: usize> {
    location: VolumeLocation,
    header: NiftiHeader,
    shape: [usize; D],
    source: VoxelSource,
    decode: Decoder<T>,
}

enum VoxelSource {
    Mapped(MappedRegion),
    Buffered(Vec<u8>),
}

/// Everything derived from a validated header before voxel bytes are
/// acquired.
struct Prepared<T> {
    header: NiftiHeader,
    shape_raw: [i16; 8],
    nbytes: usize,
    data_offset: usize,
    decode: Decoder<T>,
}

fn prepare<T: DataElement, const D: usize>(
    header: NiftiHeader,
    location: &VolumeLocation,
) -> Result<Prepared<T>> {
    let hdr_path = &location.header_path;
    header
        .validate(D, location.is_separate_storage)
        .map_err(|e| e.at(hdr_path))?;
    let datatype = header.data_type().map_err(|e| e.at(hdr_path))?;
    let decode =
        T::decoder(datatype, header.scl_slope, header.scl_inter).map_err(|e| e.at(hdr_path))?;

    let mut nvox = 1usize;
    for axis in 0..D {
        nvox *= header.dim[axis + 1] as usize;
    }
    let nbytes = datatype.size_of() * nvox;

    // The declared offset is trusted, except that a combined file cannot
    // place voxels inside the header.
    let vox_offset = header.vox_offset.max(0.) as usize;
    let data_offset = if location.is_separate_storage {
        vox_offset
    } else {
        vox_offset.max(HEADER_EXTENDER_LEN)
    };

    Ok(Prepared {
        shape_raw: header.dim,
        header,
        nbytes,
        data_offset,
        decode,
    })
}

impl<T: DataElement, const D: usize> InputVolume<T, D> {
    /// Open the volume at `path` with default options.
    ///
    /// The path `-` reads a combined, uncompressed stream from standard
    /// input.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &ReaderOptions::default())
    }

    /// Open the volume at `path`.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        if path == Path::new("-") {
            return Self::open_stdin();
        }
        let location = resolve(path);
        let hdr_path = location.header_path.clone();

        let file =
            File::open(&hdr_path).map_err(|e| NiftiError::Unopenable(hdr_path.clone(), e))?;
        let reader = BufReader::new(file);
        let mut stream = if location.is_gzip {
            Either::Left(GzDecoder::new(reader))
        } else {
            Either::Right(reader)
        };

        let header = NiftiHeader::from_reader(&mut stream).map_err(|e| e.at(&hdr_path))?;
        let prepared = prepare::<T, D>(header, &location)?;
        let extender = header::read_extender_optional(&mut stream)?;
        if extender.is_none() && !location.is_separate_storage {
            return Err(NiftiError::ShortRead(
                hdr_path,
                HEADER_EXTENDER_LEN,
                HEADER_LEN,
            ));
        }

        let source = Self::acquire(stream, &location, &prepared, options)?;
        Ok(Self::assemble(location, prepared, source))
    }

    fn open_stdin() -> Result<Self> {
        let location = resolve("-");
        let stdin = io::stdin();
        let mut lock = stdin.lock();

        let header =
            NiftiHeader::from_reader(&mut lock).map_err(|e| e.at(&location.header_path))?;
        let prepared = prepare::<T, D>(header, &location)?;
        header::read_extender_optional(&mut lock)?.ok_or_else(|| {
            NiftiError::ShortRead(location.header_path.clone(), HEADER_EXTENDER_LEN, HEADER_LEN)
        })?;

        let data = read_block(
            lock,
            &location.data_path,
            prepared.data_offset - HEADER_EXTENDER_LEN,
            prepared.nbytes,
        )?;
        Ok(Self::assemble(
            location,
            prepared,
            VoxelSource::Buffered(data),
        ))
    }

    /// Obtain the voxel bytes: a verified read-only mapping when
    /// permitted, otherwise a buffered read consuming the stream strictly
    /// forward.
    fn acquire<R: Read>(
        header_stream: R,
        location: &VolumeLocation,
        prepared: &Prepared<T>,
        options: &ReaderOptions,
    ) -> Result<VoxelSource> {
        if !location.is_gzip && options.mapping == MappingMode::Auto {
            if let Some(region) =
                mapped::map_readonly(&location.data_path, prepared.data_offset, prepared.nbytes)?
            {
                // A combined mapping is only trusted if its header region
                // matches what the stream parse produced.
                if location.is_separate_storage
                    || region.leading()[..HEADER_LEN] == prepared.header.to_bytes()[..]
                {
                    return Ok(VoxelSource::Mapped(region));
                }
            }
        }

        let data = if location.is_separate_storage {
            let file = File::open(&location.data_path)
                .map_err(|e| NiftiError::Unopenable(location.data_path.clone(), e))?;
            let reader = BufReader::new(file);
            if location.is_gzip {
                read_block(
                    GzDecoder::new(reader),
                    &location.data_path,
                    prepared.data_offset,
                    prepared.nbytes,
                )?
            } else {
                read_block(
                    reader,
                    &location.data_path,
                    prepared.data_offset,
                    prepared.nbytes,
                )?
            }
        } else {
            // header and extender are already consumed
            read_block(
                header_stream,
                &location.data_path,
                prepared.data_offset - HEADER_EXTENDER_LEN,
                prepared.nbytes,
            )?
        };
        Ok(VoxelSource::Buffered(data))
    }

    fn assemble(location: VolumeLocation, prepared: Prepared<T>, source: VoxelSource) -> Self {
        let mut shape = [0usize; D];
        for axis in 0..D {
            shape[axis] = prepared.shape_raw[axis + 1] as usize;
        }
        InputVolume {
            location,
            header: prepared.header,
            shape,
            source,
            decode: prepared.decode,
        }
    }

    fn voxel_bytes(&self) -> &[u8] {
        match &self.source {
            VoxelSource::Mapped(region) => region.voxels(),
            VoxelSource::Buffered(data) => data,
        }
    }

    /// The parsed header.
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// The resolved storage location.
    pub fn location(&self) -> &VolumeLocation {
        &self.location
    }

    /// Whether the voxel bytes are memory-mapped rather than buffered.
    pub fn is_mapped(&self) -> bool {
        matches!(self.source, VoxelSource::Mapped(_))
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

    /// The grid spacing along `axis`.
    pub fn pixsize(&self, axis: usize) -> f32 {
        assert!(axis < D, "axis {} out of range for a {}-d volume", axis, D);
        self.header.pixdim[axis + 1]
    }

    /// The decoded voxel at linear index `index` (column-major order).
    pub fn get(&self, index: usize) -> T {
        assert!(
            index < self.size(),
            "linear index {} out of bounds for {} voxels",
            index,
            self.size()
        );
        (self.decode)(self.voxel_bytes(), index)
    }

    /// The decoded voxel at the multi-axis index `idx`.
    pub fn at(&self, idx: [usize; D]) -> T {
        let index = checked_linear_index(&self.shape, &idx);
        (self.decode)(self.voxel_bytes(), index)
    }

    /// Decode a range of voxels along the last axis at the given leading
    /// indices (one per axis before the last).
    ///
    /// The whole range must lie inside the volume; an out-of-range start,
    /// count or stride is a contract violation.
    pub fn last_axis_range(&self, leading: &[usize], range: Slice) -> Vec<T> {
        assert_eq!(
            leading.len(),
            D - 1,
            "expected {} leading indices, got {}",
            D - 1,
            leading.len()
        );
        assert!(range.stride >= 1, "range stride must be at least 1");
        if range.count > 0 {
            let end = range.start + range.stride * (range.count - 1);
            assert!(
                end < self.shape[D - 1],
                "range end {} out of bounds for last axis of extent {}",
                end,
                self.shape[D - 1]
            );
        }

        let mut idx = [0usize; D];
        for (axis, &i) in leading.iter().enumerate() {
            assert!(
                i < self.shape[axis],
                "index {} out of bounds for axis {} of extent {}",
                i,
                axis,
                self.shape[axis]
            );
            idx[axis] = i;
        }
        idx[D - 1] = range.start;

        let plane: usize = self.shape[..D - 1].iter().product();
        let base = linear_index(&self.shape, &idx);
        let bytes = self.voxel_bytes();
        (0..range.count)
            .map(|k| (self.decode)(bytes, base + k * plane * range.stride))
            .collect()
    }

    /// Whether this volume and `other` share the voxel grid and
    /// patient-space frame, regardless of element type or rank.
    pub fn has_equal_spatial_coords<U: DataElement, const E: usize>(
        &self,
        other: &InputVolume<U, E>,
    ) -> bool {
        self.header.has_equal_spatial_coords(other.header())
    }
}

impl<T: DataElement, const D: usize> AsRef<NiftiHeader> for InputVolume<T, D> {
    fn as_ref(&self) -> &NiftiHeader {
        &self.header
    }
}

impl<T: DataElement, const D: usize> fmt::Debug for InputVolume<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InputVolume")
            .field("location", &self.location)
            .field("shape", &self.shape)
            .field("datatype", &self.header.datatype)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Skip `skip` bytes strictly forward, then read exactly `nbytes`.
fn read_block<R: Read>(mut src: R, path: &Path, skip: usize, nbytes: usize) -> Result<Vec<u8>> {
    let skipped = io::copy(&mut src.by_ref().take(skip as u64), &mut io::sink())?;
    if skipped < skip as u64 {
        return Err(NiftiError::ShortRead(
            path.to_owned(),
            skip + nbytes,
            skipped as usize,
        ));
    }

    let mut data = vec![0u8; nbytes];
    let mut filled = 0;
    while filled < nbytes {
        match src.read(&mut data[filled..]) {
            Ok(0) => return Err(NiftiError::ShortRead(path.to_owned(), nbytes, filled)),
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(data)
}
