//! Write-then-reopen round trips across the four storage arrangements.

use niivol::header::MAGIC_CODE_NIP1;
use niivol::{
    InputVolume, MappingMode, NiftiHeader, OutputVolume, ReaderOptions, WriterOptions,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

/// A 3-d scanner-space header used as the "like" source throughout.
fn like_header() -> NiftiHeader {
    NiftiHeader {
        dim: [3, 4, 3, 2, 0, 0, 0, 0],
        datatype: 16,
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

fn int_roundtrip(file_name: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(file_name);
    let shape = [4usize, 3, 2];

    {
        let mut out: OutputVolume<i32, 3> =
            OutputVolume::create(&path, like_header(), shape).unwrap();
        for index in 0..out.size() {
            out[index] = index as i32 * 3 - 7;
        }
        out.cal(-7., 64.);
    }

    let vol: InputVolume<i32, 3> = InputVolume::open(&path).unwrap();
    assert_eq!(vol.shape(), shape);
    assert_eq!(vol.size(), 24);
    for index in 0..vol.size() {
        assert_eq!(vol.get(index), index as i32 * 3 - 7);
    }
    // rescale defaults and display hints as written
    assert_eq!(vol.header().scl_slope, 1.);
    assert_eq!(vol.header().scl_inter, 0.);
    assert_eq!(vol.header().cal_min, -7.);
    assert_eq!(vol.header().cal_max, 64.);
    assert_eq!(vol.pixsize(0), 2.);
    assert_eq!(vol.pixsize(2), 2.2);
}

#[test]
fn int_combined_uncompressed() {
    int_roundtrip("vol.nii");
}

#[test]
fn int_combined_compressed() {
    int_roundtrip("vol.nii.gz");
}

#[test]
fn int_separate_uncompressed() {
    int_roundtrip("vol.hdr");
}

#[test]
fn int_separate_compressed() {
    int_roundtrip("vol.hdr.gz");
}

fn float_roundtrip(file_name: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(file_name);
    let shape = [3usize, 3, 2, 4];

    {
        let mut out: OutputVolume<f32, 4> =
            OutputVolume::create(&path, like_header(), shape).unwrap();
        for index in 0..out.size() {
            out[index] = index as f32 * 0.5 - 4.25;
        }
    }

    let vol: InputVolume<f32, 4> = InputVolume::open(&path).unwrap();
    assert_eq!(vol.shape(), shape);
    for index in 0..vol.size() {
        assert_eq!(vol.get(index), index as f32 * 0.5 - 4.25);
    }
}

#[test]
fn float_combined_uncompressed() {
    float_roundtrip("vol.nii");
}

#[test]
fn float_combined_compressed() {
    float_roundtrip("vol.nii.gz");
}

#[test]
fn float_separate_uncompressed() {
    float_roundtrip("vol.img");
}

#[test]
fn float_separate_compressed() {
    float_roundtrip("vol.img.gz");
}

#[test]
fn wide_type_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vol.nii");

    {
        let mut out: OutputVolume<f64, 3> =
            OutputVolume::create(&path, like_header(), [2, 2, 2]).unwrap();
        for index in 0..out.size() {
            out[index] = (index as f64).exp();
        }
    }

    let vol: InputVolume<f64, 3> = InputVolume::open(&path).unwrap();
    for index in 0..vol.size() {
        assert_eq!(vol.get(index), (index as f64).exp());
    }
}

/// The voxel sequence must be identical whether the file is mapped or
/// read through a buffer.
#[test]
fn mapped_and_buffered_reads_agree() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vol.nii");

    {
        let mut out: OutputVolume<i16, 3> =
            OutputVolume::create(&path, like_header(), [4, 3, 2]).unwrap();
        for index in 0..out.size() {
            out[index] = (index as i16).wrapping_mul(257);
        }
    }

    let mapped: InputVolume<i16, 3> = InputVolume::open(&path).unwrap();
    let buffered: InputVolume<i16, 3> = InputVolume::open_with(
        &path,
        &ReaderOptions::new().mapping(MappingMode::Never),
    )
    .unwrap();

    assert!(!buffered.is_mapped());
    let a: Vec<i16> = (0..mapped.size()).map(|i| mapped.get(i)).collect();
    let b: Vec<i16> = (0..buffered.size()).map(|i| buffered.get(i)).collect();
    assert_eq!(a, b);
}

/// The mapped and heap-buffered write paths must produce equivalent files.
#[test]
fn mapped_and_buffered_writes_agree() {
    let dir = tempdir().unwrap();
    let mapped_path = dir.path().join("mapped.nii");
    let buffered_path = dir.path().join("buffered.nii");

    let fill = |out: &mut OutputVolume<u16, 3>| {
        for index in 0..out.size() {
            out[index] = index as u16 * 11;
        }
    };

    {
        let mut out =
            OutputVolume::<u16, 3>::create(&mapped_path, like_header(), [4, 3, 2]).unwrap();
        fill(&mut out);
    }
    {
        let mut out = OutputVolume::<u16, 3>::create_with(
            &buffered_path,
            like_header(),
            [4, 3, 2],
            &WriterOptions::new().mapping(MappingMode::Never),
        )
        .unwrap();
        assert!(!out.is_mapped());
        fill(&mut out);
    }

    let a: InputVolume<u16, 3> = InputVolume::open(&mapped_path).unwrap();
    let b: InputVolume<u16, 3> = InputVolume::open(&buffered_path).unwrap();
    assert_eq!(a.header(), b.header());
    for index in 0..a.size() {
        assert_eq!(a.get(index), b.get(index));
    }
}

/// An explicit `finalize` commits the file and later drop is a no-op.
#[test]
fn finalize_is_the_commit_point_and_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vol.nii.gz");

    let mut out: OutputVolume<f32, 3> =
        OutputVolume::create(&path, like_header(), [2, 2, 2]).unwrap();
    for index in 0..out.size() {
        out[index] = index as f32;
    }
    out.finalize().unwrap();
    out.finalize().unwrap();

    let vol: InputVolume<f32, 3> = InputVolume::open(&path).unwrap();
    assert_eq!(vol.get(7), 7.0);
    drop(out);
}

/// Volumes written from the same "like" header agree on grid and frame,
/// across element types and ranks.
#[test]
fn written_volumes_share_spatial_coords() {
    let dir = tempdir().unwrap();
    let path_a = dir.path().join("a.nii");
    let path_b = dir.path().join("b.nii.gz");

    drop(OutputVolume::<f32, 4>::create(&path_a, like_header(), [4, 3, 2, 5]).unwrap());
    drop(OutputVolume::<i16, 3>::create(&path_b, like_header(), [4, 3, 2]).unwrap());

    let a: InputVolume<f32, 4> = InputVolume::open(&path_a).unwrap();
    let b: InputVolume<f64, 3> = InputVolume::open(&path_b).unwrap();
    assert!(a.has_equal_spatial_coords(&b));
    assert!(b.has_equal_spatial_coords(&a));

    // a different grid spacing must break the agreement
    let mut other = like_header();
    other.pixdim[1] = 1.5;
    let path_c = dir.path().join("c.nii");
    drop(OutputVolume::<f32, 3>::create(&path_c, other, [4, 3, 2]).unwrap());
    let c: InputVolume<f32, 3> = InputVolume::open(&path_c).unwrap();
    assert!(!a.has_equal_spatial_coords(&c));
}

#[test]
fn derived_header_is_reset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vol.hdr");

    let mut like = like_header();
    like.intent_code = 3;
    like.intent_p1 = 12.;
    like.scl_slope = 8.;
    like.scl_inter = -3.;
    like.cal_max = 99.;

    drop(OutputVolume::<f32, 3>::create(&path, like, [4, 3, 2]).unwrap());

    let vol: InputVolume<f32, 3> = InputVolume::open(&path).unwrap();
    let header = vol.header();
    assert_eq!(header.intent_code, 0);
    assert_eq!(header.intent_p1, 0.);
    assert_eq!(header.scl_slope, 1.);
    assert_eq!(header.scl_inter, 0.);
    assert_eq!(header.cal_max, 0.);
    assert_eq!(header.dim, [3, 4, 3, 2, 0, 0, 0, 0]);
    assert_eq!(&header.magic, b"ni1\0");
    assert!(header.descrip.starts_with(b"niivol v"));
}

#[test]
fn extent_too_large_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vol.nii");
    let result = OutputVolume::<u8, 3>::create(&path, like_header(), [4, 40_000, 2]);
    match result {
        Err(niivol::NiftiError::ExtentTooLarge(1, 40_000)) => {}
        other => panic!("expected ExtentTooLarge, got {:?}", other.map(|_| ())),
    }
}
