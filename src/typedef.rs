//! The on-disk datatype registry and the read-side decoder table.
//!
//! NIfTI-1 declares the numeric storage type of the voxel block as a code
//! in the header. Fourteen codes are registered here. A volume opened with
//! element type `T` resolves, once, a decode function from the file's code
//! and rescale parameters; voxel accesses then go through that function
//! without any further dispatch.

use crate::error::{NiftiError, Result};
use bytemuck::Pod;
use num_complex::Complex;
use num_derive::FromPrimitive;
use num_traits::AsPrimitive;
use std::fmt;
use std::mem;
use std::path::PathBuf;

/// The on-disk datatype codes understood by this crate.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, FromPrimitive)]
pub enum NiftiType {
    /// unsigned char.
    Uint8 = 2,
    /// signed short.
    Int16 = 4,
    /// signed int.
    Int32 = 8,
    /// 32 bit float.
    Float32 = 16,
    /// 64 bit complex = 2 32 bit floats.
    Complex64 = 32,
    /// 64 bit float = double.
    Float64 = 64,
    /// signed char.
    Int8 = 256,
    /// unsigned short.
    Uint16 = 512,
    /// unsigned int.
    Uint32 = 768,
    /// signed long long.
    Int64 = 1024,
    /// unsigned long long.
    Uint64 = 1280,
    /// 128 bit float = long double.
    Float128 = 1536,
    /// 128 bit complex = 2 64 bit floats.
    Complex128 = 1792,
    /// 256 bit complex = 2 128 bit floats.
    Complex256 = 2048,
}

impl NiftiType {
    /// The size of one element of this data type, in bytes.
    pub fn size_of(self) -> usize {
        use NiftiType::*;
        match self {
            Int8 | Uint8 => 1,
            Int16 | Uint16 => 2,
            Int32 | Uint32 | Float32 => 4,
            Int64 | Uint64 | Float64 | Complex64 => 8,
            Float128 | Complex128 => 16,
            Complex256 => 32,
        }
    }
}

/// A resolved voxel decode function: `(voxel block, linear index) -> T`.
pub(crate) type Decoder<T> = Box<dyn Fn(&[u8], usize) -> T + Send + Sync>;

/// Whether the header's rescale parameters mean "no rescale".
///
/// The format reserves both `slope == 0` and `(slope, inter) == (1, 0)`
/// for this; in that case integer values must pass through bit-exactly.
fn is_identity(slope: f32, inter: f32) -> bool {
    slope == 0.0 || (slope == 1.0 && inter == 0.0)
}

fn raw<S, T>() -> Decoder<T>
where
    S: Pod + AsPrimitive<T>,
    T: 'static + Copy + Send + Sync,
{
    Box::new(|bytes, i| {
        let w = mem::size_of::<S>();
        bytemuck::pod_read_unaligned::<S>(&bytes[i * w..(i + 1) * w]).as_()
    })
}

fn rescaled<S, T>(slope: f32, inter: f32) -> Decoder<T>
where
    S: Pod + AsPrimitive<f64>,
    T: 'static + Copy + Send + Sync,
    f64: AsPrimitive<T>,
{
    let slope = f64::from(slope);
    let inter = f64::from(inter);
    Box::new(move |bytes, i| {
        let w = mem::size_of::<S>();
        let v: f64 = bytemuck::pod_read_unaligned::<S>(&bytes[i * w..(i + 1) * w]).as_();
        (v * slope + inter).as_()
    })
}

fn complex_raw<S, T>() -> Decoder<Complex<T>>
where
    S: Pod + AsPrimitive<T>,
    T: 'static + Copy + Send + Sync,
{
    Box::new(|bytes, i| {
        let w = mem::size_of::<S>();
        let re: T = bytemuck::pod_read_unaligned::<S>(&bytes[2 * i * w..(2 * i + 1) * w]).as_();
        let im: T = bytemuck::pod_read_unaligned::<S>(&bytes[(2 * i + 1) * w..(2 * i + 2) * w]).as_();
        Complex::new(re, im)
    })
}

fn complex_rescaled<S, T>(slope: f32, inter: f32) -> Decoder<Complex<T>>
where
    S: Pod + AsPrimitive<f64>,
    T: 'static + Copy + Send + Sync,
    f64: AsPrimitive<T>,
{
    let slope = f64::from(slope);
    let inter = f64::from(inter);
    let component = move |v: f64| -> T { (v * slope + inter).as_() };
    Box::new(move |bytes, i| {
        let w = mem::size_of::<S>();
        let re: f64 = bytemuck::pod_read_unaligned::<S>(&bytes[2 * i * w..(2 * i + 1) * w]).as_();
        let im: f64 =
            bytemuck::pod_read_unaligned::<S>(&bytes[(2 * i + 1) * w..(2 * i + 2) * w]).as_();
        Complex::new(component(re), component(im))
    })
}

/// Trait for the in-memory element types a volume can decode into or be
/// written from.
///
/// Implemented for the primitive numeric types and for
/// `Complex<f32>`/`Complex<f64>`. The `Pod` bound is what lets output
/// buffers be persisted as raw bytes without an encode step.
pub trait DataElement: 'static + Sized + Copy + Send + Sync + PartialEq + fmt::Debug + Pod {
    /// The datatype code emitted when writing a volume of this type.
    const DATA_TYPE: NiftiType;

    /// Resolve the decode function for a file holding `code` elements
    /// under the given rescale parameters.
    ///
    /// Fails with `UnsupportedDataType` when `code` has no conversion to
    /// `Self` (complex to real and vice versa, or a code with no native
    /// representation such as `Float128`).
    fn decoder(code: NiftiType, slope: f32, inter: f32) -> Result<Decoder<Self>>;
}

macro_rules! real_data_element {
    ($t:ty, $code:expr) => {
        impl DataElement for $t {
            const DATA_TYPE: NiftiType = $code;

            fn decoder(code: NiftiType, slope: f32, inter: f32) -> Result<Decoder<Self>> {
                use NiftiType::*;
                let plain = is_identity(slope, inter);
                Ok(match code {
                    Uint8 if plain => raw::<u8, $t>(),
                    Uint8 => rescaled::<u8, $t>(slope, inter),
                    Int8 if plain => raw::<i8, $t>(),
                    Int8 => rescaled::<i8, $t>(slope, inter),
                    Uint16 if plain => raw::<u16, $t>(),
                    Uint16 => rescaled::<u16, $t>(slope, inter),
                    Int16 if plain => raw::<i16, $t>(),
                    Int16 => rescaled::<i16, $t>(slope, inter),
                    Uint32 if plain => raw::<u32, $t>(),
                    Uint32 => rescaled::<u32, $t>(slope, inter),
                    Int32 if plain => raw::<i32, $t>(),
                    Int32 => rescaled::<i32, $t>(slope, inter),
                    Uint64 if plain => raw::<u64, $t>(),
                    Uint64 => rescaled::<u64, $t>(slope, inter),
                    Int64 if plain => raw::<i64, $t>(),
                    Int64 => rescaled::<i64, $t>(slope, inter),
                    Float32 if plain => raw::<f32, $t>(),
                    Float32 => rescaled::<f32, $t>(slope, inter),
                    Float64 if plain => raw::<f64, $t>(),
                    Float64 => rescaled::<f64, $t>(slope, inter),
                    other => {
                        return Err(NiftiError::UnsupportedDataType(
                            PathBuf::new(),
                            other as i16,
                        ))
                    }
                })
            }
        }
    };
}

real_data_element!(u8, NiftiType::Uint8);
real_data_element!(i8, NiftiType::Int8);
real_data_element!(u16, NiftiType::Uint16);
real_data_element!(i16, NiftiType::Int16);
real_data_element!(u32, NiftiType::Uint32);
real_data_element!(i32, NiftiType::Int32);
real_data_element!(u64, NiftiType::Uint64);
real_data_element!(i64, NiftiType::Int64);
real_data_element!(f32, NiftiType::Float32);
real_data_element!(f64, NiftiType::Float64);

macro_rules! complex_data_element {
    ($t:ty, $code:expr) => {
        impl DataElement for Complex<$t> {
            const DATA_TYPE: NiftiType = $code;

            fn decoder(code: NiftiType, slope: f32, inter: f32) -> Result<Decoder<Self>> {
                use NiftiType::*;
                let plain = is_identity(slope, inter);
                Ok(match code {
                    Complex64 if plain => complex_raw::<f32, $t>(),
                    Complex64 => complex_rescaled::<f32, $t>(slope, inter),
                    Complex128 if plain => complex_raw::<f64, $t>(),
                    Complex128 => complex_rescaled::<f64, $t>(slope, inter),
                    other => {
                        return Err(NiftiError::UnsupportedDataType(
                            PathBuf::new(),
                            other as i16,
                        ))
                    }
                })
            }
        }
    };
}

complex_data_element!(f32, NiftiType::Complex64);
complex_data_element!(f64, NiftiType::Complex128);

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn code_sizes() {
        assert_eq!(NiftiType::Uint8.size_of(), 1);
        assert_eq!(NiftiType::Int16.size_of(), 2);
        assert_eq!(NiftiType::Float32.size_of(), 4);
        assert_eq!(NiftiType::Complex64.size_of(), 8);
        assert_eq!(NiftiType::Float128.size_of(), 16);
        assert_eq!(NiftiType::Complex256.size_of(), 32);
    }

    #[test]
    fn code_lookup() {
        assert_eq!(NiftiType::from_i16(16), Some(NiftiType::Float32));
        assert_eq!(NiftiType::from_i16(2304), None);
        assert_eq!(NiftiType::from_i16(0), None);
    }

    #[test]
    fn rescale_law() {
        let values: [i16; 3] = [100, -7, 0];
        let raw: &[u8] = bytemuck::cast_slice(&values);
        let decode = f32::decoder(NiftiType::Int16, 2.0, -1024.0).unwrap();
        assert_eq!(decode(raw, 0), 100.0 * 2.0 - 1024.0);
        assert_eq!(decode(raw, 1), -7.0 * 2.0 - 1024.0);
        assert_eq!(decode(raw, 2), -1024.0);
    }

    #[test]
    fn default_rescale_is_bit_exact() {
        let values: &[i32] = &[i32::MIN, -1, 0, 16_777_217, i32::MAX];
        let raw: &[u8] = bytemuck::cast_slice(values);
        // both "no rescale" conventions
        for &(slope, inter) in &[(0.0, 0.0), (1.0, 0.0), (0.0, 33.0)] {
            let decode = i32::decoder(NiftiType::Int32, slope, inter).unwrap();
            for (i, &v) in values.iter().enumerate() {
                assert_eq!(decode(raw, i), v);
            }
        }
    }

    #[test]
    fn widening_decode() {
        let values: [u8; 3] = [0, 128, 255];
        let raw: &[u8] = &values;
        let decode = f64::decoder(NiftiType::Uint8, 0.0, 0.0).unwrap();
        assert_eq!(decode(raw, 1), 128.0);
        assert_eq!(decode(raw, 2), 255.0);
    }

    #[test]
    fn complex_decode() {
        let values: [f32; 4] = [1.0, -2.0, 3.5, 0.25];
        let raw: &[u8] = bytemuck::cast_slice(&values);
        let decode = Complex::<f32>::decoder(NiftiType::Complex64, 0.0, 0.0).unwrap();
        assert_eq!(decode(raw, 0), Complex::new(1.0, -2.0));
        assert_eq!(decode(raw, 1), Complex::new(3.5, 0.25));
    }

    #[test]
    fn unrepresentable_codes_are_rejected() {
        assert!(f32::decoder(NiftiType::Complex64, 0.0, 0.0).is_err());
        assert!(f64::decoder(NiftiType::Float128, 0.0, 0.0).is_err());
        assert!(Complex::<f32>::decoder(NiftiType::Float32, 0.0, 0.0).is_err());
        assert!(Complex::<f64>::decoder(NiftiType::Complex256, 0.0, 0.0).is_err());
    }
}
