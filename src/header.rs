//! The fixed-layout NIfTI-1 header: wire codec, validation predicates and
//! the voxel-grid/frame equality check.

use crate::error::{NiftiError, Result};
use crate::typedef::NiftiType;
use approx::relative_eq;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::PathBuf;

/// Magic code for header-only NIfTI-1 files (extension ".hdr[.gz]").
pub const MAGIC_CODE_NI1: &[u8; 4] = b"ni1\0";
/// Magic code for combined NIfTI-1 files (extension ".nii[.gz]").
pub const MAGIC_CODE_NIP1: &[u8; 4] = b"n+1\0";

/// Total size of the fixed header on disk.
pub const HEADER_LEN: usize = 348;
/// Size of the header plus the 4-byte extender frame.
pub const HEADER_EXTENDER_LEN: usize = 352;

type B = NativeEndian;

/// The NIfTI-1 header. All fields are public and named after the format's
/// header file; field order is part of the wire format, which occupies
/// exactly 348 bytes.
///
/// Headers are parsed in the native byte order only. A file written under
/// the opposite order is rejected with `UnsupportedEndianness` rather than
/// byte-swapped.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiHeader {
    /// Header size, must be 348.
    pub sizeof_hdr: i32,
    /// Unused in NIFTI-1.
    pub data_type: [u8; 10],
    /// Unused in NIFTI-1.
    pub db_name: [u8; 18],
    /// Unused in NIFTI-1.
    pub extents: i32,
    /// Unused in NIFTI-1.
    pub session_error: i16,
    /// Unused in NIFTI-1.
    pub regular: u8,
    /// MRI slice ordering.
    pub dim_info: u8,
    /// Data array dimensions; `dim[0]` is the rank.
    pub dim: [i16; 8],
    /// 1st intent parameter.
    pub intent_p1: f32,
    /// 2nd intent parameter.
    pub intent_p2: f32,
    /// 3rd intent parameter.
    pub intent_p3: f32,
    /// NIFTI_INTENT_* code.
    pub intent_code: i16,
    /// On-disk datatype code.
    pub datatype: i16,
    /// Number of bits per voxel.
    pub bitpix: i16,
    /// First slice index.
    pub slice_start: i16,
    /// Grid spacings; `pixdim[0]` holds the quaternion factor.
    pub pixdim: [f32; 8],
    /// Byte offset of the voxel block within the data file.
    pub vox_offset: f32,
    /// Data scaling: slope.
    pub scl_slope: f32,
    /// Data scaling: offset.
    pub scl_inter: f32,
    /// Last slice index.
    pub slice_end: i16,
    /// Slice timing order.
    pub slice_code: u8,
    /// Units of pixdim[1..4].
    pub xyzt_units: u8,
    /// Max display intensity.
    pub cal_max: f32,
    /// Min display intensity.
    pub cal_min: f32,
    /// Time for one slice.
    pub slice_duration: f32,
    /// Time axis shift.
    pub toffset: f32,
    /// Unused in NIFTI-1.
    pub glmax: i32,
    /// Unused in NIFTI-1.
    pub glmin: i32,
    /// Free-form description.
    pub descrip: [u8; 80],
    /// Auxiliary filename.
    pub aux_file: [u8; 24],
    /// NIFTI_XFORM_* code for the quaternion transform.
    pub qform_code: i16,
    /// NIFTI_XFORM_* code for the affine transform.
    pub sform_code: i16,
    /// Quaternion b parameter.
    pub quatern_b: f32,
    /// Quaternion c parameter.
    pub quatern_c: f32,
    /// Quaternion d parameter.
    pub quatern_d: f32,
    /// Quaternion x shift.
    pub qoffset_x: f32,
    /// Quaternion y shift.
    pub qoffset_y: f32,
    /// Quaternion z shift.
    pub qoffset_z: f32,
    /// 1st row of the affine transform.
    pub srow_x: [f32; 4],
    /// 2nd row of the affine transform.
    pub srow_y: [f32; 4],
    /// 3rd row of the affine transform.
    pub srow_z: [f32; 4],
    /// Name or meaning of the data.
    pub intent_name: [u8; 16],
    /// Magic code, `b"n+1\0"` or `b"ni1\0"`.
    pub magic: [u8; 4],
}

impl Default for NiftiHeader {
    fn default() -> NiftiHeader {
        NiftiHeader {
            sizeof_hdr: HEADER_LEN as i32,
            data_type: [0; 10],
            db_name: [0; 18],
            extents: 0,
            session_error: 0,
            regular: 0,
            dim_info: 0,
            dim: [1, 0, 0, 0, 0, 0, 0, 0],
            intent_p1: 0.,
            intent_p2: 0.,
            intent_p3: 0.,
            intent_code: 0,
            datatype: 0,
            bitpix: 0,
            slice_start: 0,
            pixdim: [0.; 8],
            vox_offset: HEADER_EXTENDER_LEN as f32,
            scl_slope: 0.,
            scl_inter: 0.,
            slice_end: 0,
            slice_code: 0,
            xyzt_units: 0,
            cal_max: 0.,
            cal_min: 0.,
            slice_duration: 0.,
            toffset: 0.,
            glmax: 0,
            glmin: 0,
            descrip: [0; 80],
            aux_file: [0; 24],
            qform_code: 0,
            sform_code: 0,
            quatern_b: 0.,
            quatern_c: 0.,
            quatern_d: 0.,
            qoffset_x: 0.,
            qoffset_y: 0.,
            qoffset_z: 0.,
            srow_x: [0.; 4],
            srow_y: [0.; 4],
            srow_z: [0.; 4],
            intent_name: [0; 16],
            magic: *MAGIC_CODE_NI1,
        }
    }
}

impl NiftiHeader {
    /// Parse a header from the given byte stream, which must be positioned
    /// at its start. Exactly 348 bytes are consumed on success.
    pub fn from_reader<S: Read>(mut input: S) -> Result<NiftiHeader> {
        let mut h = NiftiHeader::default();

        h.sizeof_hdr = input.read_i32::<B>()?;
        if h.sizeof_hdr != HEADER_LEN as i32 {
            return if h.sizeof_hdr.swap_bytes() == HEADER_LEN as i32 {
                Err(NiftiError::UnsupportedEndianness(PathBuf::new()))
            } else {
                Err(NiftiError::NotNifti(PathBuf::new()))
            };
        }
        input.read_exact(&mut h.data_type)?;
        input.read_exact(&mut h.db_name)?;
        h.extents = input.read_i32::<B>()?;
        h.session_error = input.read_i16::<B>()?;
        h.regular = input.read_u8()?;
        h.dim_info = input.read_u8()?;
        for v in &mut h.dim {
            *v = input.read_i16::<B>()?;
        }
        if h.dim[0] < 1 || h.dim[0] > 7 {
            return if h.dim[0].swap_bytes() >= 1 && h.dim[0].swap_bytes() <= 7 {
                Err(NiftiError::UnsupportedEndianness(PathBuf::new()))
            } else {
                Err(NiftiError::NotNifti(PathBuf::new()))
            };
        }
        h.intent_p1 = input.read_f32::<B>()?;
        h.intent_p2 = input.read_f32::<B>()?;
        h.intent_p3 = input.read_f32::<B>()?;
        h.intent_code = input.read_i16::<B>()?;
        h.datatype = input.read_i16::<B>()?;
        h.bitpix = input.read_i16::<B>()?;
        h.slice_start = input.read_i16::<B>()?;
        for v in &mut h.pixdim {
            *v = input.read_f32::<B>()?;
        }
        h.vox_offset = input.read_f32::<B>()?;
        h.scl_slope = input.read_f32::<B>()?;
        h.scl_inter = input.read_f32::<B>()?;
        h.slice_end = input.read_i16::<B>()?;
        h.slice_code = input.read_u8()?;
        h.xyzt_units = input.read_u8()?;
        h.cal_max = input.read_f32::<B>()?;
        h.cal_min = input.read_f32::<B>()?;
        h.slice_duration = input.read_f32::<B>()?;
        h.toffset = input.read_f32::<B>()?;
        h.glmax = input.read_i32::<B>()?;
        h.glmin = input.read_i32::<B>()?;
        input.read_exact(&mut h.descrip)?;
        input.read_exact(&mut h.aux_file)?;
        h.qform_code = input.read_i16::<B>()?;
        h.sform_code = input.read_i16::<B>()?;
        h.quatern_b = input.read_f32::<B>()?;
        h.quatern_c = input.read_f32::<B>()?;
        h.quatern_d = input.read_f32::<B>()?;
        h.qoffset_x = input.read_f32::<B>()?;
        h.qoffset_y = input.read_f32::<B>()?;
        h.qoffset_z = input.read_f32::<B>()?;
        for v in &mut h.srow_x {
            *v = input.read_f32::<B>()?;
        }
        for v in &mut h.srow_y {
            *v = input.read_f32::<B>()?;
        }
        for v in &mut h.srow_z {
            *v = input.read_f32::<B>()?;
        }
        input.read_exact(&mut h.intent_name)?;
        input.read_exact(&mut h.magic)?;

        if &h.magic != MAGIC_CODE_NI1 && &h.magic != MAGIC_CODE_NIP1 {
            return Err(NiftiError::NotNifti(PathBuf::new()));
        }
        Ok(h)
    }

    /// Serialize the fixed 348-byte header to the given sink.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_i32::<B>(self.sizeof_hdr)?;
        writer.write_all(&self.data_type)?;
        writer.write_all(&self.db_name)?;
        writer.write_i32::<B>(self.extents)?;
        writer.write_i16::<B>(self.session_error)?;
        writer.write_u8(self.regular)?;
        writer.write_u8(self.dim_info)?;
        for v in &self.dim {
            writer.write_i16::<B>(*v)?;
        }
        writer.write_f32::<B>(self.intent_p1)?;
        writer.write_f32::<B>(self.intent_p2)?;
        writer.write_f32::<B>(self.intent_p3)?;
        writer.write_i16::<B>(self.intent_code)?;
        writer.write_i16::<B>(self.datatype)?;
        writer.write_i16::<B>(self.bitpix)?;
        writer.write_i16::<B>(self.slice_start)?;
        for v in &self.pixdim {
            writer.write_f32::<B>(*v)?;
        }
        writer.write_f32::<B>(self.vox_offset)?;
        writer.write_f32::<B>(self.scl_slope)?;
        writer.write_f32::<B>(self.scl_inter)?;
        writer.write_i16::<B>(self.slice_end)?;
        writer.write_u8(self.slice_code)?;
        writer.write_u8(self.xyzt_units)?;
        writer.write_f32::<B>(self.cal_max)?;
        writer.write_f32::<B>(self.cal_min)?;
        writer.write_f32::<B>(self.slice_duration)?;
        writer.write_f32::<B>(self.toffset)?;
        writer.write_i32::<B>(self.glmax)?;
        writer.write_i32::<B>(self.glmin)?;
        writer.write_all(&self.descrip)?;
        writer.write_all(&self.aux_file)?;
        writer.write_i16::<B>(self.qform_code)?;
        writer.write_i16::<B>(self.sform_code)?;
        for v in &[
            self.quatern_b,
            self.quatern_c,
            self.quatern_d,
            self.qoffset_x,
            self.qoffset_y,
            self.qoffset_z,
        ] {
            writer.write_f32::<B>(*v)?;
        }
        for v in self.srow_x.iter().chain(&self.srow_y).chain(&self.srow_z) {
            writer.write_f32::<B>(*v)?;
        }
        writer.write_all(&self.intent_name)?;
        writer.write_all(&self.magic)?;
        Ok(())
    }

    /// Serialize the header followed by an empty 4-byte extender frame.
    pub fn write_with_extender<W: Write>(&self, mut writer: W) -> Result<()> {
        self.write_to(&mut writer)?;
        writer.write_all(&[0u8; 4])?;
        Ok(())
    }

    /// The header's exact on-disk image, 348 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        self.write_to(&mut bytes)
            .expect("in-memory serialization cannot fail");
        debug_assert_eq!(bytes.len(), HEADER_LEN);
        bytes
    }

    /// The datatype code as a validated enum.
    pub fn data_type(&self) -> Result<NiftiType> {
        NiftiType::from_i16(self.datatype)
            .ok_or_else(|| NiftiError::UnsupportedDataType(PathBuf::new(), self.datatype))
    }

    /// Check the header against the storage layout it was read from and
    /// the rank the caller requested.
    pub(crate) fn validate(&self, rank: usize, separate_storage: bool) -> Result<()> {
        let required: &[u8; 4] = if separate_storage {
            MAGIC_CODE_NI1
        } else {
            MAGIC_CODE_NIP1
        };
        if &self.magic != required {
            return Err(NiftiError::NotNifti(PathBuf::new()));
        }
        if self.dim[0] as usize != rank {
            return Err(NiftiError::UnsupportedRank(PathBuf::new(), rank, self.dim[0]));
        }
        for axis in 0..rank {
            if self.dim[axis + 1] < 0 {
                return Err(NiftiError::InvalidExtent(
                    PathBuf::new(),
                    axis,
                    self.dim[axis + 1],
                ));
            }
        }
        Ok(())
    }

    /// Whether this header and `other` describe the same voxel grid and
    /// patient-space coordinate frame.
    ///
    /// Spatial extents, pixel sizes and the transform codes must match
    /// exactly; the floating-point orientation fields (quaternion, offsets
    /// and affine rows) are compared within a small relative tolerance so
    /// that values quantized by a write/read round trip still match.
    pub fn has_equal_spatial_coords(&self, other: &NiftiHeader) -> bool {
        fn close(a: f32, b: f32) -> bool {
            relative_eq!(
                a,
                b,
                epsilon = f32::EPSILON,
                max_relative = 100.0 * f32::EPSILON
            )
        }

        self.dim[1..4] == other.dim[1..4]
            && self.pixdim[..4] == other.pixdim[..4]
            && self.qform_code == other.qform_code
            && self.sform_code == other.sform_code
            && close(self.quatern_b, other.quatern_b)
            && close(self.quatern_c, other.quatern_c)
            && close(self.quatern_d, other.quatern_d)
            && close(self.qoffset_x, other.qoffset_x)
            && close(self.qoffset_y, other.qoffset_y)
            && close(self.qoffset_z, other.qoffset_z)
            && Iterator::zip(
                self.srow_x.iter().chain(&self.srow_y).chain(&self.srow_z),
                other.srow_x.iter().chain(&other.srow_y).chain(&other.srow_z),
            )
            .all(|(a, b)| close(*a, *b))
    }
}

impl AsRef<NiftiHeader> for NiftiHeader {
    fn as_ref(&self) -> &NiftiHeader {
        self
    }
}

/// Read the 4-byte extender frame that follows a header.
///
/// Returns `None` when the source ends right at the header boundary, which
/// is tolerated in bare ".hdr" files; any other I/O error is propagated.
pub(crate) fn read_extender_optional<S: Read>(mut source: S) -> Result<Option<[u8; 4]>> {
    let mut extender = [0u8; 4];
    match source.read_exact(&mut extender) {
        Ok(()) => Ok(Some(extender)),
        Err(ref e) if e.kind() == IoErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(NiftiError::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_header() -> NiftiHeader {
        NiftiHeader {
            dim: [3, 64, 64, 10, 0, 0, 0, 0],
            datatype: NiftiType::Float32 as i16,
            bitpix: 32,
            pixdim: [-1., 2., 2., 2.2, 0., 0., 0., 0.],
            qform_code: 1,
            sform_code: 1,
            quatern_b: 0.5,
            quatern_c: -0.5,
            quatern_d: 0.5,
            qoffset_x: -90.,
            qoffset_y: 126.,
            qoffset_z: -72.,
            srow_x: [2., 0., 0., -90.],
            srow_y: [0., 2., 0., 126.],
            srow_z: [0., 0., 2.2, -72.],
            magic: *MAGIC_CODE_NIP1,
            ..NiftiHeader::default()
        }
    }

    #[test]
    fn write_read_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        let reread = NiftiHeader::from_reader(&bytes[..]).unwrap();
        assert_eq!(reread, header);
    }

    #[test]
    fn corrupt_magic_is_not_nifti() {
        let mut bytes = sample_header().to_bytes();
        bytes[HEADER_LEN - 4..].copy_from_slice(b"bad\0");
        match NiftiHeader::from_reader(&bytes[..]) {
            Err(NiftiError::NotNifti(_)) => {}
            other => panic!("expected NotNifti, got {:?}", other),
        }
    }

    #[test]
    fn foreign_byte_order_is_rejected() {
        let mut bytes = sample_header().to_bytes();
        // sizeof_hdr under the opposite byte order
        let swapped = (HEADER_LEN as i32).swap_bytes().to_ne_bytes();
        bytes[..4].copy_from_slice(&swapped);
        match NiftiHeader::from_reader(&bytes[..]) {
            Err(NiftiError::UnsupportedEndianness(_)) => {}
            other => panic!("expected UnsupportedEndianness, got {:?}", other),
        }
    }

    #[test]
    fn validation_checks_rank_and_magic() {
        let header = sample_header();
        assert!(header.validate(3, false).is_ok());
        assert!(matches!(
            header.validate(4, false),
            Err(NiftiError::UnsupportedRank(_, 4, 3))
        ));
        // combined magic in a separate-storage layout
        assert!(matches!(
            header.validate(3, true),
            Err(NiftiError::NotNifti(_))
        ));

        let truncated = NiftiHeader {
            dim: [3, 64, -1, 10, 0, 0, 0, 0],
            ..sample_header()
        };
        assert!(matches!(
            truncated.validate(3, false),
            Err(NiftiError::InvalidExtent(_, 1, -1))
        ));
    }

    #[test]
    fn spatial_coords_reflexive_and_symmetric() {
        let a = sample_header();
        let b = sample_header();
        assert!(a.has_equal_spatial_coords(&a));
        assert!(a.has_equal_spatial_coords(&b));
        assert!(b.has_equal_spatial_coords(&a));
    }

    #[test]
    fn spatial_coords_tolerate_quantization() {
        let a = sample_header();
        let mut b = sample_header();
        b.qoffset_x += b.qoffset_x * 4.0 * f32::EPSILON;
        b.quatern_b += b.quatern_b * 2.0 * f32::EPSILON;
        assert!(a.has_equal_spatial_coords(&b));
    }

    #[test]
    fn spatial_coords_differ_on_grid_changes() {
        let a = sample_header();

        let mut b = sample_header();
        b.dim[2] = 65;
        assert!(!a.has_equal_spatial_coords(&b));

        let mut c = sample_header();
        c.pixdim[3] = 2.3;
        assert!(!a.has_equal_spatial_coords(&c));

        let mut d = sample_header();
        d.qoffset_z = -71.;
        assert!(!a.has_equal_spatial_coords(&d));

        let mut e = sample_header();
        e.sform_code = 2;
        assert!(!a.has_equal_spatial_coords(&e));
    }
}
