//! Wire-level parsing primitives: four-character codes, box headers, box-list resolution, and
//! the fixed-point field types used by movie and track headers.

use bytes::Buf;
use fixed::types::{I16F16, I2F30, I8F8};
use nalgebra::{Matrix3, Matrix3x2, Vector3};

use crate::error::{ParseError, Result};

mod fourcc;
mod header;
mod resolver;

pub use fourcc::FourCC;
pub use header::{box_type, BoxHeader, BoxType, BoxUuid, FullBoxHeader};
pub use resolver::resolve_box_list;

/// 16.16 fixed point, used for rates, resolutions and track dimensions.
pub type Fixed32 = I16F16;

/// 8.8 fixed point, used for volumes.
pub type Fixed16 = I8F8;

/// A primitive value with a fixed-size big-endian encoding.
pub trait Mp4Int: Sized {
    /// The encoded length of this value, in bytes.
    const ENCODED_LEN: u64;

    /// Parse a value from `buf`, advancing it.
    fn parse<B: Buf>(buf: &mut B) -> Result<Self>;
}

/// An extension providing checked [`Mp4Int`] reads on any [`Buf`].
pub trait Mp4IntReaderExt: Buf + Sized {
    /// Parse a value of type `T` from `self`, advancing it.
    fn get_mp4<T: Mp4Int>(&mut self) -> Result<T> {
        T::parse(self)
    }
}

impl<B: Buf> Mp4IntReaderExt for B {}

macro_rules! mp4_int {
    ($($ty:ty => $get_fun:ident),+ $(,)?) => {
        $(impl Mp4Int for $ty {
            const ENCODED_LEN: u64 = std::mem::size_of::<Self>() as u64;

            fn parse<B: Buf>(buf: &mut B) -> Result<Self> {
                ensure_attach!(
                    buf.remaining() >= Self::ENCODED_LEN as usize,
                    ParseError::TruncatedFile,
                    concat!("while parsing ", stringify!($ty)),
                );
                Ok(buf.$get_fun())
            }
        })+
    };
}

mp4_int! {
    u8 => get_u8,
    u16 => get_u16,
    u32 => get_u32,
    u64 => get_u64,
    i8 => get_i8,
    i16 => get_i16,
    i32 => get_i32,
    i64 => get_i64,
}

impl Mp4Int for FourCC {
    const ENCODED_LEN: u64 = 4;

    fn parse<B: Buf>(buf: &mut B) -> Result<Self> {
        FourCC::parse(buf)
    }
}

impl<const N: usize> Mp4Int for [u8; N] {
    const ENCODED_LEN: u64 = N as u64;

    fn parse<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure_attach!(buf.remaining() >= N, ParseError::TruncatedFile, "while parsing byte array");
        let mut value = [0; N];
        buf.copy_to_slice(&mut value);
        Ok(value)
    }
}

impl Mp4Int for Fixed32 {
    const ENCODED_LEN: u64 = 4;

    fn parse<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self::from_bits(i32::parse(buf)?))
    }
}

impl Mp4Int for Fixed16 {
    const ENCODED_LEN: u64 = 2;

    fn parse<B: Buf>(buf: &mut B) -> Result<Self> {
        Ok(Self::from_bits(i16::parse(buf)?))
    }
}

/// The 3×3 fixed-point transformation matrix carried by `mvhd` and `tkhd`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transform {
    /// The 2D transformation part, in 16.16 fixed point.
    pub transform: Matrix3x2<I16F16>,
    /// The projective column, in 2.30 fixed point.
    pub normalizer: Vector3<I2F30>,
}

impl Transform {
    /// The identity transform, the only value MP4 allows here.
    pub const UNITY: Self = Self {
        transform: Matrix3x2::new(
            I16F16::ONE,
            I16F16::ZERO,
            I16F16::ZERO,
            I16F16::ZERO,
            I16F16::ONE,
            I16F16::ZERO,
        ),
        normalizer: Vector3::new(I2F30::ZERO, I2F30::ZERO, I2F30::ONE),
    };

    /// Whether this transform is the identity.
    pub fn is_unity(&self) -> bool {
        *self == Self::UNITY
    }
}

impl Mp4Int for Transform {
    const ENCODED_LEN: u64 = 36;

    fn parse<B: Buf>(buf: &mut B) -> Result<Self> {
        let mut raw = Matrix3::<i32>::default();
        for value in &mut raw {
            *value = i32::parse(buf)?;
        }
        Ok(Self {
            transform: raw.fixed_columns::<2>(0).map(I16F16::from_bits),
            normalizer: raw.column(2).map(I2F30::from_bits),
        })
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::UNITY
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truncated_int_read_fails() {
        let mut buf = &[0u8, 1, 2][..];
        assert!(u32::parse(&mut buf).is_err());
    }

    #[test]
    fn fixed_point_reads() {
        let mut buf = &0x0001_0000i32.to_be_bytes()[..];
        assert_eq!(Fixed32::parse(&mut buf).unwrap(), Fixed32::from_num(1));

        let mut buf = &0x0100i16.to_be_bytes()[..];
        assert_eq!(Fixed16::parse(&mut buf).unwrap(), Fixed16::from_num(1));
    }

    #[test]
    fn unity_transform_roundtrip() {
        // Row-major identity as it appears on the wire.
        let raw: [i32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];
        let mut bytes = Vec::new();
        for word in raw {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        let transform = Transform::parse(&mut &bytes[..]).unwrap();
        assert!(transform.is_unity());

        let mut skewed = bytes.clone();
        skewed[3] = 1;
        let transform = Transform::parse(&mut &skewed[..]).unwrap();
        assert!(!transform.is_unity());
    }
}
