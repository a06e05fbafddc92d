use bytes::Buf;

use crate::error::{ParseError, Result};
use crate::source::ByteSource;

use super::{BoxHeader, BoxType, BoxUuid, FourCC};

/// Resolve the ordered list of sibling boxes covering `[min_offset, max_offset)`.
///
/// Handles 32-bit sizes, 64-bit large sizes (wire size 1), `uuid` extended types, and a wire
/// size of zero, which means the box extends to `max_offset` and is necessarily the last of its
/// siblings. On success the returned boxes tile the range exactly, with no gaps or overlaps.
///
/// On any failure (short read, implausible size) the whole partially-built list is discarded and
/// the owning box must be treated as unparseable; no partial results are returned.
pub fn resolve_box_list(source: &dyn ByteSource, min_offset: u64, max_offset: u64) -> Result<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let mut cur_offset = min_offset;

    while cur_offset < max_offset {
        let offset = cur_offset;

        let mut head = source.read_at(offset, 8)?;
        let wire_size = head.get_u32();
        let fourcc = FourCC::parse(&mut head)?;
        let mut header_len = 8u64;

        let mut size = wire_size as u64;
        if wire_size == 1 {
            let mut large = source.read_at(offset + header_len, 8)?;
            size = large.get_u64();
            header_len += 8;
        }

        let box_type = if fourcc == FourCC::UUID {
            let mut ext = source.read_at(offset + header_len, 16)?;
            let mut uuid = [0; 16];
            ext.copy_to_slice(&mut uuid);
            header_len += 16;
            BoxType::Uuid(BoxUuid(uuid))
        } else {
            BoxType::FourCC(fourcc)
        };

        if wire_size == 0 {
            // The box extends to the end of the parent and closes the list.
            let size = max_offset - offset;
            ensure_attach!(size >= header_len, ParseError::BadBoxSize, BoxSizeTooSmall { size, header_len });
            boxes.push(BoxHeader { offset, size, header_len, box_type });
            break;
        }

        ensure_attach!(size >= header_len, ParseError::BadBoxSize, BoxSizeTooSmall { size, header_len });
        let end = offset
            .checked_add(size)
            .ok_or_else(|| report_attach!(ParseError::BadBoxSize, "box size overflows file offset"))?;
        ensure_attach!(
            end <= max_offset,
            ParseError::BadBoxSize,
            format!("box of size {size} at offset {offset} overruns parent end {max_offset}"),
        );

        boxes.push(BoxHeader { offset, size, header_len, box_type });
        cur_offset = end;
    }

    Ok(boxes)
}

#[derive(Clone, Copy, Debug, derive_more::Display)]
#[display(fmt = "box size {size} smaller than its header length {header_len}")]
struct BoxSizeTooSmall {
    size: u64,
    header_len: u64,
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;

    fn put_box(out: &mut BytesMut, name: &[u8; 4], data: &[u8]) {
        out.put_u32(8 + data.len() as u32);
        out.put_slice(name);
        out.put_slice(data);
    }

    #[test]
    fn resolved_boxes_tile_the_range() {
        let mut data = BytesMut::new();
        put_box(&mut data, b"ftyp", &[0; 8]);
        put_box(&mut data, b"free", &[]);
        put_box(&mut data, b"mdat", &[1, 2, 3]);
        let source = Bytes::from(data);

        let boxes = resolve_box_list(&source, 0, ByteSource::len(&source)).unwrap();
        assert_eq!(boxes.len(), 3);
        assert_eq!(boxes[0].box_type, BoxType::FTYP);
        let mut expected_offset = 0;
        for header in &boxes {
            assert_eq!(header.offset, expected_offset);
            expected_offset += header.size;
        }
        assert_eq!(expected_offset, ByteSource::len(&source));
    }

    #[test]
    fn large_size_box() {
        let mut data = BytesMut::new();
        data.put_u32(1);
        data.put_slice(b"mdat");
        data.put_u64(16 + 4);
        data.put_slice(&[0; 4]);
        let source = Bytes::from(data);

        let boxes = resolve_box_list(&source, 0, ByteSource::len(&source)).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].header_len, 16);
        assert_eq!(boxes[0].size, 20);
    }

    #[test]
    fn zero_size_box_extends_to_parent_end() {
        let mut data = BytesMut::new();
        put_box(&mut data, b"ftyp", &[0; 8]);
        data.put_u32(0);
        data.put_slice(b"mdat");
        data.put_slice(&[0; 32]);
        let source = Bytes::from(data);

        let boxes = resolve_box_list(&source, 0, ByteSource::len(&source)).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[1].box_type, BoxType::MDAT);
        assert_eq!(boxes[1].offset + boxes[1].size, ByteSource::len(&source));
    }

    #[test]
    fn uuid_box_extended_type() {
        let mut data = BytesMut::new();
        data.put_u32(8 + 16);
        data.put_slice(b"uuid");
        data.put_slice(&[0xab; 16]);
        let source = Bytes::from(data);

        let boxes = resolve_box_list(&source, 0, ByteSource::len(&source)).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].header_len, 24);
        assert_matches!(boxes[0].box_type, BoxType::Uuid(BoxUuid(uuid)) => assert_eq!(uuid, [0xab; 16]));
    }

    #[test]
    fn undersized_box_discards_whole_list() {
        let mut data = BytesMut::new();
        put_box(&mut data, b"ftyp", &[0; 8]);
        data.put_u32(4); // smaller than its own header
        data.put_slice(b"free");
        let source = Bytes::from(data);

        assert_matches!(resolve_box_list(&source, 0, ByteSource::len(&source)), Err(err) => {
            assert_eq!(err.into_inner(), ParseError::BadBoxSize);
        });
    }

    #[test]
    fn truncated_header_discards_whole_list() {
        let source = Bytes::from_static(&[0, 0, 0, 12, b'f']);
        assert_matches!(resolve_box_list(&source, 0, ByteSource::len(&source)), Err(err) => {
            assert_eq!(err.into_inner(), ParseError::TruncatedFile);
        });
    }

    #[test]
    fn box_overrunning_parent_is_rejected() {
        let mut data = BytesMut::new();
        data.put_u32(64);
        data.put_slice(b"moov");
        data.put_slice(&[0; 8]);
        let source = Bytes::from(data);

        assert_matches!(resolve_box_list(&source, 0, 16), Err(err) => {
            assert_eq!(err.into_inner(), ParseError::BadBoxSize);
        });
    }
}
