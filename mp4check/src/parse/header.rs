use std::fmt;

use bytes::Buf;
use derive_more::{Display, From};

use crate::error::{ParseError, Result};

use super::FourCC;

/// The type of a box: a plain four-character code, or the 16-byte extended type carried by
/// `uuid` boxes.
#[derive(Clone, Copy, Debug, Display, From, PartialEq, Eq)]
pub enum BoxType {
    /// A plain four-character code.
    FourCC(FourCC),
    /// A `uuid` box extended type.
    Uuid(BoxUuid),
}

/// A `uuid` box extended type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct BoxUuid(pub [u8; 16]);

/// A box header as resolved by the box-list resolver: absolute position, resolved size, and the
/// number of header bytes actually consumed.
///
/// A wire size of zero ("extends to the end of the parent") is resolved before the header is
/// surfaced, so `size` is always the actual total size of the box, header included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    /// Absolute offset of the box start, including the size/type header.
    pub offset: u64,
    /// Resolved total box size in bytes, including the header.
    pub size: u64,
    /// Length of the header actually consumed: 8, 16, 24, or 32 bytes depending on the presence
    /// of a 64-bit size field and a `uuid` extended type.
    pub header_len: u64,
    /// The box type.
    pub box_type: BoxType,
}

/// The version/flags header carried by "full" boxes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FullBoxHeader {
    /// The box version.
    pub version: u8,
    /// The 24-bit box flags.
    pub flags: u32,
}

//
// BoxHeader impls
//

impl BoxHeader {
    /// Returns the `(min_offset, max_offset)` range of the box payload, excluding the header.
    pub fn payload_range(&self) -> (u64, u64) {
        (self.offset + self.header_len, self.offset + self.size)
    }

    /// Returns the length of the box payload, excluding the header.
    pub fn payload_len(&self) -> u64 {
        self.size - self.header_len
    }
}

//
// FullBoxHeader impls
//

impl FullBoxHeader {
    /// The encoded length of a [`FullBoxHeader`], in bytes.
    pub const ENCODED_LEN: u64 = 4;

    /// Parse a [`FullBoxHeader`] from a [`Buf`], advancing it by 4.
    pub fn parse<B: Buf>(mut buf: B) -> Result<Self> {
        ensure_attach!(
            buf.remaining() >= Self::ENCODED_LEN as usize,
            ParseError::TruncatedFile,
            "while parsing full box header",
        );
        let word = buf.get_u32();
        Ok(Self { version: (word >> 24) as u8, flags: word & 0x00ff_ffff })
    }
}

//
// BoxType impls
//

impl BoxType {
    /// Returns the plain four-character code of this box type, if it has one.
    pub fn fourcc(&self) -> Option<FourCC> {
        match self {
            BoxType::FourCC(fourcc) => Some(*fourcc),
            BoxType::Uuid(_) => None,
        }
    }
}

impl fmt::Display for BoxUuid {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self([a, b, c, d, e, f, g, h, i, j, k, l, m, n, o, p]) = *self;
        write!(
            fmt,
            "{a:02x}{b:02x}{c:02x}{d:02x}-{e:02x}{f:02x}-{g:02x}{h:02x}-{i:02x}{j:02x}-{k:02x}{l:02x}{m:02x}{n:02x}{o:02x}{p:02x}",
        )
    }
}

macro_rules! box_type {
    ($($name:ident),+ $(,)?) => {
        impl FourCC {
            $(#[allow(missing_docs)] pub const $name: Self = box_name_to_fourcc(stringify!($name));)+
        }

        impl BoxType {
            $(#[allow(missing_docs)] pub const $name: Self = Self::FourCC(FourCC::$name);)+
        }

        #[allow(missing_docs)]
        pub mod box_type {
            use super::BoxType;
            $(pub const $name: BoxType = BoxType::$name;)+
        }
    };
}

box_type! {
    BTRT, BXML, CO64, COLR, CPRT, CTTS, DINF, DPND, DREF, EDTS, ELST, ESDS, FREE, FRMA, FTYP,
    HDLR, HINT, HMHD, HNTI, IINF, ILOC, IODS, IPIR, IPRO, LOCI, M4DS, MDAT, MDHD, MDIA, META,
    MINF, MOOV, MP4A, MP4S, MP4V, MPOD, MVHD, NMHD, PADB, PITM, SCHI, SCHM, SDTP, SINF, SKIP,
    SMHD, STBL, STCO, STDP, STSC, STSD, STSH, STSS, STSZ, STTS, STZ2, SYNC, TKHD, TRAK, TREF,
    UDTA, UUID, URL, URN, VMHD, WIDE, XML,
}

// Mixed-case codes the lowercasing macro above cannot express.
impl FourCC {
    #[allow(missing_docs)]
    pub const AVCC: Self = FourCC { value: *b"avcC" };
    #[allow(missing_docs)]
    pub const SVCC: Self = FourCC { value: *b"svcC" };
    #[allow(missing_docs)]
    pub const MVCC: Self = FourCC { value: *b"mvcC" };
}

impl BoxType {
    #[allow(missing_docs)]
    pub const AVCC: Self = Self::FourCC(FourCC::AVCC);
    #[allow(missing_docs)]
    pub const SVCC: Self = Self::FourCC(FourCC::SVCC);
    #[allow(missing_docs)]
    pub const MVCC: Self = Self::FourCC(FourCC::MVCC);
}

// Handler types, sample entry types, and brands.
impl FourCC {
    #[allow(missing_docs)]
    pub const VIDE: Self = FourCC::from_str("vide");
    #[allow(missing_docs)]
    pub const SOUN: Self = FourCC::from_str("soun");
    #[allow(missing_docs)]
    pub const ODSM: Self = FourCC::from_str("odsm");
    #[allow(missing_docs)]
    pub const SDSM: Self = FourCC::from_str("sdsm");

    #[allow(missing_docs)]
    pub const AVC1: Self = FourCC::from_str("avc1");
    #[allow(missing_docs)]
    pub const ENCV: Self = FourCC::from_str("encv");
    #[allow(missing_docs)]
    pub const ENCA: Self = FourCC::from_str("enca");

    #[allow(missing_docs)]
    pub const ISOM: Self = FourCC::from_str("isom");
    #[allow(missing_docs)]
    pub const MP41: Self = FourCC::from_str("mp41");
    #[allow(missing_docs)]
    pub const MP42: Self = FourCC::from_str("mp42");
}

const fn box_name_to_fourcc(name: &str) -> FourCC {
    let name = name.as_bytes();
    let mut fourcc = [b' '; 4];
    let mut name_idx = 0;
    while name_idx < name.len() {
        fourcc[name_idx] = name[name_idx].to_ascii_lowercase();
        name_idx += 1;
    }
    FourCC { value: fourcc }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_names_pad_with_spaces() {
        assert_eq!(FourCC::URL.value, *b"url ");
        assert_eq!(FourCC::XML.value, *b"xml ");
    }

    #[test]
    fn mixed_case_codes() {
        assert_eq!(FourCC::AVCC.value, *b"avcC");
    }

    #[test]
    fn full_box_header_splits_version_and_flags() {
        let header = FullBoxHeader::parse(&[0x01, 0x00, 0x00, 0x07][..]).unwrap();
        assert_eq!(header, FullBoxHeader { version: 1, flags: 7 });
    }
}
