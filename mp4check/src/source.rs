//! Random-access input for the validator.
//!
//! Validation is offset-addressed: the box-list resolver and several cross-checks re-read
//! earlier regions of the file, so the input must support reads at arbitrary positions. Both an
//! in-memory buffer and a file satisfy the contract.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::error::{ParseError, Result};

/// A random-access byte source.
pub trait ByteSource {
    /// The total length of the input, in bytes.
    fn len(&self) -> u64;

    /// Whether the input is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// A read past the end of the input fails with [`ParseError::TruncatedFile`].
    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes>;
}

/// A [`ByteSource`] over a [`File`], reading with seek + read.
pub struct FileSource {
    file: RefCell<File>,
    len: u64,
}

//
// ByteSource impls
//

impl ByteSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        let end = offset.checked_add(len).ok_or_else(|| report_attach!(ParseError::BadBoxSize, "offset overflow"))?;
        ensure_attach!(
            end <= Bytes::len(self) as u64,
            ParseError::TruncatedFile,
            ReadPastEnd { offset, len },
        );
        Ok(self.slice(offset as usize..end as usize))
    }
}

impl ByteSource for &[u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        let end = offset.checked_add(len).ok_or_else(|| report_attach!(ParseError::BadBoxSize, "offset overflow"))?;
        ensure_attach!(
            end <= <[u8]>::len(self) as u64,
            ParseError::TruncatedFile,
            ReadPastEnd { offset, len },
        );
        Ok(Bytes::copy_from_slice(&self[offset as usize..end as usize]))
    }
}

//
// FileSource impls
//

impl FileSource {
    /// Wrap an open [`File`].
    pub fn new(mut file: File) -> std::io::Result<Self> {
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self { file: RefCell::new(file), len })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        let end = offset.checked_add(len).ok_or_else(|| report_attach!(ParseError::BadBoxSize, "offset overflow"))?;
        ensure_attach!(end <= self.len, ParseError::TruncatedFile, ReadPastEnd { offset, len });

        let mut file = self.file.borrow_mut();
        let mut buf = vec![0; len as usize];
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|err| report_attach!(ParseError::TruncatedFile, format!("IO error: {err}")))?;
        Ok(buf.into())
    }
}

#[derive(Clone, Copy, Debug, derive_more::Display)]
#[display(fmt = "read of {len} bytes at offset {offset} past end of input")]
struct ReadPastEnd {
    offset: u64,
    len: u64,
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::error::ParseError;

    use super::*;

    #[test]
    fn bytes_read_at() {
        let source = Bytes::from_static(b"abcdef");
        assert_eq!(source.read_at(2, 3).unwrap(), Bytes::from_static(b"cde"));
        assert_matches!(source.read_at(4, 3), Err(err) => {
            assert_eq!(err.into_inner(), ParseError::TruncatedFile);
        });
    }

    #[test]
    fn read_at_offset_overflow() {
        let source = Bytes::from_static(b"abcdef");
        source.read_at(u64::MAX, 2).unwrap_err();
    }
}
