// SPDX-FileCopyrightText: 2026 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::ByteBuffer;
use crate::Error;

/// Chunk size used when streaming between stores, so disk-backed stores never
/// need the whole range in memory.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Where a new [Store] keeps its bytes.
pub enum StoreBacking {
    /// Bytes live in memory.
    Memory,
    /// Bytes live in a file created (or truncated) at this path.
    Disk(PathBuf),
}

enum Backing {
    Memory(Cursor<Vec<u8>>),
    Disk { file: File, path: PathBuf },
}

/// A random-access byte store. All multi-byte accessors are big-endian.
///
/// A store is strict by default: a read that leaves the store's current
/// length fails with [Error::OutOfBounds]. Lenient stores instead return
/// zero-filled buffers, which tolerates truncated dumps.
pub struct Store {
    backing: Backing,
    lenient: bool,
}

impl Store {
    /// Creates an empty store with the given backing. Parent directories of a
    /// disk path are created as needed.
    pub fn new(backing: StoreBacking) -> Result<Store, Error> {
        match backing {
            StoreBacking::Memory => Ok(Store::from_vec(Vec::new())),
            StoreBacking::Disk(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }

                let file = File::options()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;

                Ok(Store {
                    backing: Backing::Disk { file, path },
                    lenient: false,
                })
            }
        }
    }

    /// Wraps an owned byte buffer in a memory-backed store.
    pub fn from_vec(data: Vec<u8>) -> Store {
        Store {
            backing: Backing::Memory(Cursor::new(data)),
            lenient: false,
        }
    }

    /// Opens an existing file as a disk-backed store, read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Store, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::options().read(true).write(true).open(&path)?;

        Ok(Store {
            backing: Backing::Disk { file, path },
            lenient: false,
        })
    }

    /// Switches between strict out-of-bounds errors and zero-filled reads.
    pub fn with_leniency(mut self, lenient: bool) -> Store {
        self.lenient = lenient;
        self
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    /// The file path backing this store, for disk-backed stores.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Disk { path, .. } => Some(path),
        }
    }

    /// Current length of the store in bytes.
    pub fn len(&self) -> Result<u64, Error> {
        match &self.backing {
            Backing::Memory(cursor) => Ok(cursor.get_ref().len() as u64),
            Backing::Disk { file, .. } => Ok(file.metadata()?.len()),
        }
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Consumes the store and returns its entire contents.
    pub fn into_vec(mut self) -> Result<ByteBuffer, Error> {
        match self.backing {
            Backing::Memory(cursor) => Ok(cursor.into_inner()),
            Backing::Disk { .. } => {
                let size = self.len()?;
                self.read_bytes(0, size as usize)
            }
        }
    }

    fn read_array<const N: usize>(&mut self, offset: u64) -> Result<[u8; N], Error> {
        let size = self.len()?;
        let mut value = [0u8; N];

        if offset.checked_add(N as u64).map_or(true, |end| end > size) {
            if self.lenient {
                return Ok(value);
            }
            return Err(Error::OutOfBounds {
                offset,
                length: N as u64,
                size,
            });
        }

        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(&mut value)?;
        Ok(value)
    }

    pub fn read_u8(&mut self, offset: u64) -> Result<u8, Error> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    pub fn read_u16(&mut self, offset: u64) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.read_array::<2>(offset)?))
    }

    pub fn read_u32(&mut self, offset: u64) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.read_array::<4>(offset)?))
    }

    pub fn read_u64(&mut self, offset: u64) -> Result<u64, Error> {
        Ok(u64::from_be_bytes(self.read_array::<8>(offset)?))
    }

    /// Reads `length` bytes at `offset`.
    pub fn read_bytes(&mut self, offset: u64, length: usize) -> Result<ByteBuffer, Error> {
        let size = self.len()?;
        let mut bytes = vec![0u8; length];

        if offset.checked_add(length as u64).map_or(true, |end| end > size) {
            if self.lenient {
                return Ok(bytes);
            }
            return Err(Error::OutOfBounds {
                offset,
                length: length as u64,
                size,
            });
        }

        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Writes `bytes` at `offset`. Writing past the current end zero-extends
    /// the store.
    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Error> {
        if bytes.is_empty() {
            return Ok(());
        }

        self.seek(SeekFrom::Start(offset))?;
        self.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u8(&mut self, offset: u64, value: u8) -> Result<(), Error> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    pub fn write_u16(&mut self, offset: u64, value: u16) -> Result<(), Error> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) -> Result<(), Error> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<(), Error> {
        self.write_bytes(offset, &value.to_be_bytes())
    }

    /// Appends `bytes` at the end of the store.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.seek(SeekFrom::End(0))?;
        self.write_all(bytes)?;
        Ok(())
    }

    /// Appends zero bytes until the store's length is a multiple of
    /// `alignment`.
    pub fn align(&mut self, alignment: u64) -> Result<(), Error> {
        let m = self.len()? % alignment;
        if m != 0 {
            self.append(&vec![0u8; (alignment - m) as usize])?;
        }
        Ok(())
    }

    /// Appends `length` bytes starting at `start` onto the end of `dst`,
    /// streaming in bounded chunks.
    pub fn copy_range(&mut self, dst: &mut Store, start: u64, length: u64) -> Result<(), Error> {
        if length == 0 {
            return Ok(());
        }

        let size = self.len()?;
        if start.checked_add(length).map_or(true, |end| end > size) && !self.lenient {
            return Err(Error::OutOfBounds {
                offset: start,
                length,
                size,
            });
        }

        self.seek(SeekFrom::Start(start))?;
        dst.seek(SeekFrom::End(0))?;

        let mut remaining = length.min(size.saturating_sub(start));
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(COPY_CHUNK_SIZE as u64) as usize;
            let got = self.read(&mut chunk[..want])?;
            if got == 0 {
                break;
            }

            dst.write_all(&chunk[..got])?;
            remaining -= got as u64;
        }

        Ok(())
    }

    /// Returns the offsets of every non-overlapping occurrence of a four-byte
    /// marker. A match advances the scan past itself.
    pub fn find_marker(&mut self, marker: [u8; 4]) -> Result<Vec<u64>, Error> {
        let mut offsets = Vec::new();

        self.seek(SeekFrom::Start(0))?;

        // window keeps up to three unscanned bytes across chunk boundaries
        let mut window: Vec<u8> = Vec::new();
        let mut window_start = 0u64;
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        loop {
            let got = self.read(&mut chunk)?;
            if got == 0 {
                break;
            }
            window.extend_from_slice(&chunk[..got]);

            let mut i = 0;
            while i + 4 <= window.len() {
                if window[i..i + 4] == marker {
                    offsets.push(window_start + i as u64);
                    i += 4;
                } else {
                    i += 1;
                }
            }

            window.drain(..i);
            window_start += i as u64;
        }

        Ok(offsets)
    }

    /// Reads a NUL-terminated byte string at `offset`, as stored in archive
    /// name tables. Unterminated input stops at the end of the store.
    pub fn read_terminated_string(&mut self, offset: u64) -> Result<String, Error> {
        let size = self.len()?;
        if offset > size {
            if self.lenient {
                return Ok(String::new());
            }
            return Err(Error::OutOfBounds {
                offset,
                length: 1,
                size,
            });
        }

        let mut bytes = Vec::new();
        let mut pos = offset;
        'scan: while pos < size {
            let chunk_len = (size - pos).min(64) as usize;
            let chunk = self.read_bytes(pos, chunk_len)?;
            for &b in &chunk {
                if b == 0 {
                    break 'scan;
                }
                bytes.push(b);
            }
            pos += chunk_len as u64;
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Inserts `data` at `offset`, consuming the store and returning the
    /// rebuilt replacement. Disk-backed stores are rebuilt in a sibling temp
    /// file which is renamed over the original path only once fully written.
    pub fn insert(self, offset: u64, data: &[u8]) -> Result<Store, Error> {
        if data.is_empty() {
            return Ok(self);
        }

        let size = self.len()?;
        if offset > size {
            return Err(Error::OutOfBounds {
                offset,
                length: data.len() as u64,
                size,
            });
        }

        debug!(offset, length = data.len(), "Inserting into store");
        self.splice(offset, 0, data)
    }

    /// Deletes `length` bytes at `offset`, consuming the store and returning
    /// the rebuilt replacement.
    pub fn delete(self, offset: u64, length: u64) -> Result<Store, Error> {
        if length == 0 {
            return Ok(self);
        }

        let size = self.len()?;
        if offset.checked_add(length).map_or(true, |end| end > size) {
            return Err(Error::OutOfBounds {
                offset,
                length,
                size,
            });
        }

        debug!(offset, length, "Deleting from store");
        self.splice(offset, length, &[])
    }

    fn splice(mut self, prefix: u64, skip: u64, data: &[u8]) -> Result<Store, Error> {
        let size = self.len()?;
        let lenient = self.lenient;
        let suffix_start = prefix + skip;

        let disk_path = match &self.backing {
            Backing::Memory(_) => None,
            Backing::Disk { path, .. } => Some(path.clone()),
        };

        match disk_path {
            None => {
                let mut replacement =
                    Store::from_vec(Vec::with_capacity((size - skip) as usize + data.len()))
                        .with_leniency(lenient);
                self.copy_range(&mut replacement, 0, prefix)?;
                replacement.append(data)?;
                self.copy_range(&mut replacement, suffix_start, size - suffix_start)?;
                Ok(replacement)
            }
            Some(path) => {
                let directory = match path.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                    _ => PathBuf::from("."),
                };

                let temp = NamedTempFile::new_in(&directory)?;
                let mut replacement = Store {
                    backing: Backing::Disk {
                        file: temp.as_file().try_clone()?,
                        path: temp.path().to_path_buf(),
                    },
                    lenient,
                };

                self.copy_range(&mut replacement, 0, prefix)?;
                replacement.append(data)?;
                self.copy_range(&mut replacement, suffix_start, size - suffix_start)?;
                replacement.flush()?;
                drop(replacement);

                // the original handle must be fully released before the rename
                drop(self);

                let file = temp.persist(&path).map_err(|err| Error::Io(err.error))?;
                Ok(Store {
                    backing: Backing::Disk { file, path },
                    lenient,
                })
            }
        }
    }
}

impl Read for Store {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.backing {
            Backing::Memory(cursor) => cursor.read(buf),
            Backing::Disk { file, .. } => file.read(buf),
        }
    }
}

impl Write for Store {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.backing {
            Backing::Memory(cursor) => cursor.write(buf),
            Backing::Disk { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.backing {
            Backing::Memory(cursor) => cursor.flush(),
            Backing::Disk { file, .. } => file.flush(),
        }
    }
}

impl Seek for Store {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match &mut self.backing {
            Backing::Memory(cursor) => cursor.seek(pos),
            Backing::Disk { file, .. } => file.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_accessors() {
        let mut store = Store::from_vec(vec![0u8; 16]);
        store.write_u32(4, 0xDEADBEEF).unwrap();
        store.write_u16(8, 0x1234).unwrap();

        assert_eq!(store.read_u32(4).unwrap(), 0xDEADBEEF);
        assert_eq!(store.read_u8(4).unwrap(), 0xDE);
        assert_eq!(store.read_u16(8).unwrap(), 0x1234);
        assert_eq!(store.read_u64(4).unwrap(), 0xDEADBEEF12340000);
    }

    #[test]
    fn strict_reads_error_out_of_bounds() {
        let mut store = Store::from_vec(vec![1, 2, 3]);

        assert!(matches!(
            store.read_u32(1),
            Err(Error::OutOfBounds {
                offset: 1,
                length: 4,
                size: 3
            })
        ));
        assert!(store.read_bytes(2, 4).is_err());
    }

    #[test]
    fn lenient_reads_zero_fill() {
        let mut store = Store::from_vec(vec![1, 2, 3]).with_leniency(true);

        assert_eq!(store.read_u32(1).unwrap(), 0);
        assert_eq!(store.read_bytes(2, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn writes_past_end_zero_extend() {
        let mut store = Store::from_vec(vec![]);
        store.write_u16(4, 0xBEEF).unwrap();

        assert_eq!(store.len().unwrap(), 6);
        assert_eq!(store.into_vec().unwrap(), vec![0, 0, 0, 0, 0xBE, 0xEF]);
    }

    #[test]
    fn align_pads_to_boundary() {
        let mut store = Store::from_vec(vec![0xAA; 5]);
        store.align(16).unwrap();
        assert_eq!(store.len().unwrap(), 16);

        // already aligned, nothing appended
        store.align(16).unwrap();
        assert_eq!(store.len().unwrap(), 16);
    }

    #[test]
    fn copy_range_streams_large_buffers() {
        let source: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
        let mut src = Store::from_vec(source.clone());
        let mut dst = Store::from_vec(vec![]);

        src.copy_range(&mut dst, 100, 150_000).unwrap();

        assert_eq!(dst.into_vec().unwrap(), source[100..150_100]);
    }

    #[test]
    fn copy_range_appends_to_destination() {
        let mut src = Store::from_vec(vec![1, 2, 3, 4]);
        let mut dst = Store::from_vec(vec![9]);

        src.copy_range(&mut dst, 2, 2).unwrap();

        assert_eq!(dst.into_vec().unwrap(), vec![9, 3, 4]);
    }

    #[test]
    fn find_marker_skips_matched_bytes() {
        let mut data = vec![0u8; 64];
        data[4..8].copy_from_slice(b"FSYS");
        data[8..12].copy_from_slice(b"FSYS");
        data[30..34].copy_from_slice(b"FSYS");
        let mut store = Store::from_vec(data);

        assert_eq!(store.find_marker(*b"FSYS").unwrap(), vec![4, 8, 30]);
    }

    #[test]
    fn find_marker_across_chunk_boundary() {
        let mut data = vec![0u8; COPY_CHUNK_SIZE + 64];
        data[COPY_CHUNK_SIZE - 2..COPY_CHUNK_SIZE + 2].copy_from_slice(b"FSYS");
        let mut store = Store::from_vec(data);

        assert_eq!(
            store.find_marker(*b"FSYS").unwrap(),
            vec![COPY_CHUNK_SIZE as u64 - 2]
        );
    }

    #[test]
    fn terminated_string() {
        let mut store = Store::from_vec(b"abc\0def".to_vec());

        assert_eq!(store.read_terminated_string(0).unwrap(), "abc");
        assert_eq!(store.read_terminated_string(4).unwrap(), "def");
    }

    #[test]
    fn insert_then_delete_is_identity() {
        let original = vec![1, 2, 3, 4, 5, 6];
        let store = Store::from_vec(original.clone());

        let store = store.insert(3, &[0xAA, 0xBB]).unwrap();
        assert_eq!(store.len().unwrap(), 8);

        let store = store.delete(3, 2).unwrap();
        assert_eq!(store.into_vec().unwrap(), original);
    }

    #[test]
    fn insert_at_end_appends() {
        let store = Store::from_vec(vec![1, 2]);
        let store = store.insert(2, &[3]).unwrap();

        assert_eq!(store.into_vec().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn delete_out_of_bounds_errors() {
        let store = Store::from_vec(vec![1, 2, 3]);
        assert!(store.delete(2, 5).is_err());
    }

    #[test]
    fn disk_splice_replaces_original_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splice.bin");

        let mut store = Store::new(StoreBacking::Disk(path.clone())).unwrap();
        store.append(&[1, 2, 3, 4]).unwrap();

        let mut store = store.insert(2, &[0xFF, 0xFE]).unwrap();
        assert_eq!(store.path().unwrap(), path);
        assert_eq!(store.read_bytes(0, 6).unwrap(), vec![1, 2, 0xFF, 0xFE, 3, 4]);

        // the replacement landed at the original path, fully written
        drop(store);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 0xFF, 0xFE, 3, 4]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn disk_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.bin");

        let mut store = Store::new(StoreBacking::Disk(path.clone())).unwrap();
        store.write_u32(0, 0xCAFEBABE).unwrap();
        drop(store);

        let mut store = Store::open(&path).unwrap();
        assert_eq!(store.read_u32(0).unwrap(), 0xCAFEBABE);
    }
}
