// SPDX-FileCopyrightText: 2026 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::fsys::EntryDescriptor;
use crate::store::Store;
use crate::ByteBuffer;
use crate::ByteSpan;
use crate::Error;

/// A decoded sub-resource pulled out of an archive.
///
/// Entries hold no reference back to their owning container; the container
/// owns them through its materialization cache.
pub trait SubResource {
    /// Length of the decoded payload in bytes. Feeds the descriptor's
    /// uncompressed size on repack.
    fn raw_len(&self) -> u64;

    /// Re-encodes the resource into container payload bytes. `compressed`
    /// carries the original entry's compression intent.
    fn encode(&self, compressed: bool) -> Result<ByteBuffer, Error>;
}

/// Materializes one entry out of an archive's raw store.
pub trait ResourceExtractor {
    fn extract(
        &self,
        raw: &mut Store,
        entry: &EntryDescriptor,
    ) -> Result<Box<dyn SubResource>, Error>;
}

/// A sub-resource whose payload bytes are carried verbatim. This is what
/// entries materialize into when no format-specific codec is wired up, and it
/// re-encodes to exactly the bytes it holds.
pub struct OpaqueResource {
    data: ByteBuffer,
    raw_len: u64,
}

impl OpaqueResource {
    /// Wraps payload bytes as read out of a container, with the decoded
    /// length the descriptor advertised.
    pub fn new(data: ByteBuffer, raw_len: u64) -> OpaqueResource {
        OpaqueResource { data, raw_len }
    }

    /// Wraps uncompressed payload bytes.
    pub fn from_raw(data: ByteBuffer) -> OpaqueResource {
        let raw_len = data.len() as u64;
        OpaqueResource { data, raw_len }
    }

    pub fn data(&self) -> ByteSpan {
        &self.data
    }

    /// Replaces the payload with new uncompressed content.
    pub fn set_data(&mut self, data: ByteBuffer) {
        self.raw_len = data.len() as u64;
        self.data = data;
    }
}

impl SubResource for OpaqueResource {
    fn raw_len(&self) -> u64 {
        self.raw_len
    }

    fn encode(&self, _compressed: bool) -> Result<ByteBuffer, Error> {
        Ok(self.data.clone())
    }
}

/// The default extractor: copies an entry's payload bytes out of the raw
/// store without interpreting them.
pub struct OpaqueExtractor;

impl ResourceExtractor for OpaqueExtractor {
    fn extract(
        &self,
        raw: &mut Store,
        entry: &EntryDescriptor,
    ) -> Result<Box<dyn SubResource>, Error> {
        let data = raw.read_bytes(entry.start_offset as u64, entry.compressed_size as usize)?;

        Ok(Box::new(OpaqueResource::new(
            data,
            entry.uncompressed_size as u64,
        )))
    }
}
