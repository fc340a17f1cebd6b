//! Byte-range sources backing an image.
//!
//! A [`ByteSource`] turns `(offset, length)` into bytes. The mount table only
//! calls into a source while its lock is held, so implementations need no
//! synchronization of their own.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Positioned reads from whatever storage backs an image.
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes at `offset`.
    ///
    /// Returns fewer bytes only at end of storage.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Short description for logs.
    fn describe(&self) -> String {
        "<source>".to_string()
    }

    /// Fill `buf` completely from `offset`.
    ///
    /// Any short read is an `UnexpectedEof` error.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let pos = offset
                .checked_add(filled as u64)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
            match self.read_at(pos, &mut buf[filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "short read at {:#x}: wanted {} bytes, got {}",
                            offset,
                            buf.len(),
                            filled
                        ),
                    ));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// An image stored in a host file, optionally embedded at `base` bytes in.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    base: u64,
}

impl FileSource {
    /// Open `path` with the image starting at byte 0.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_at(path, 0)
    }

    /// Open `path` with the image starting at byte `base`.
    pub fn open_at(path: impl AsRef<Path>, base: u64) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            base,
        })
    }
}

impl ByteSource for FileSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let pos = self
            .base
            .checked_add(offset)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read(buf)
    }

    fn describe(&self) -> String {
        if self.base == 0 {
            self.path.display().to_string()
        } else {
            format!("{}@{:#x}", self.path.display(), self.base)
        }
    }
}

/// An image held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap an owned image buffer.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for MemorySource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(avail) = self.data.get(start..) else {
            return Ok(0);
        };
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        Ok(n)
    }

    fn describe(&self) -> String {
        format!("<memory {} bytes>", self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_read_at() {
        let mut src = MemorySource::new(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        assert_eq!(src.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");

        // Short at end, zero past end
        assert_eq!(src.read_at(9, &mut buf).unwrap(), 2);
        assert_eq!(src.read_at(11, &mut buf).unwrap(), 0);
        assert_eq!(src.read_at(u64::MAX, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_exact_short_is_error() {
        let mut src = MemorySource::new(b"abc".to_vec());
        let mut buf = [0u8; 4];
        let err = src.read_exact_at(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut buf = [0u8; 3];
        src.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_file_source_with_base() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"PADDINGpayload").unwrap();
        tmp.flush().unwrap();

        let mut src = FileSource::open_at(tmp.path(), 7).unwrap();
        let mut buf = [0u8; 7];
        src.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"payload");
        assert!(src.describe().ends_with("@0x7"));

        let mut buf = [0u8; 8];
        assert!(src.read_exact_at(0, &mut buf).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path().join("nope.wuhb")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
