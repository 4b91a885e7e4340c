// SPDX-FileCopyrightText: 2026 Joshua Goins <josh@redstrate.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;

use binrw::binread;
use binrw::binrw;
use binrw::BinRead;
use binrw::BinWrite;
use tracing::{debug, warn};

use crate::filetype::FileType;
use crate::resource::{OpaqueExtractor, ResourceExtractor, SubResource};
use crate::store::{Store, StoreBacking};
use crate::ByteBuffer;
use crate::ByteSpan;
use crate::Error;

/// The magic marker opening an archive and closing its trailer.
pub const FSYS_MAGIC: [u8; 4] = *b"FSYS";

const ENTRY_COUNT_OFFSET: u64 = 0x0C;
const TOTAL_SIZE_OFFSET: u64 = 0x20;
const POINTER_TABLE_OFFSET: u64 = 0x60;
const PAYLOAD_ALIGNMENT: u64 = 0x10;

const HEADER_PARSE_LEN: usize = 0x24;
const RECORD_PARSE_LEN: usize = 0x28;

/// Which game's on-disk layout an archive uses. The two layouts differ only
/// in descriptor record size and the record trailer, and are never inferred
/// from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameVariant {
    /// Pokémon XD: Gale of Darkness.
    XD,
    /// Pokémon Colosseum.
    Colosseum,
}

impl GameVariant {
    fn record_size(&self) -> u64 {
        match self {
            GameVariant::XD => 0x70,
            GameVariant::Colosseum => 0x50,
        }
    }
}

#[binread]
#[br(big, magic = b"FSYS")]
struct FsysHeader {
    #[br(pad_before = 4)]
    group_id: u32,

    entry_count: u32,

    #[br(pad_before = 3)]
    uses_extensions: u8,

    #[br(pad_before = 0xC)]
    total_size: u32,
}

#[binrw]
#[brw(big)]
struct EntryRecord {
    identity: u16,

    type_tag: u8,

    #[brw(pad_before = 1)]
    start_offset: u32,

    uncompressed_size: u32,

    #[br(temp)]
    #[bw(calc = 0x8000_0000u32)]
    payload_flags: u32,

    #[brw(pad_before = 4)]
    compressed_size: u32,

    #[brw(pad_before = 4)]
    full_name_offset: u32,

    format_index: u32,

    name_offset: u32,
}

/// Metadata for one packed entry.
#[derive(Debug, Clone)]
pub struct EntryDescriptor {
    /// Arbitrary identifier assigned by the packer.
    pub identity: u16,
    /// The entry's type tag.
    pub file_type: FileType,
    /// The entry's short name, unique within its archive.
    pub name: String,
    /// The full filename with extension, when the archive carries one.
    pub full_name: Option<String>,
    /// Offset of the payload within the archive.
    pub start_offset: u32,
    /// Size of the payload once decoded.
    pub uncompressed_size: u32,
    /// Size of the payload as stored.
    pub compressed_size: u32,
    /// Index into the game's format table for this entry.
    pub format_index: u32,
}

impl EntryDescriptor {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != self.uncompressed_size
    }

    /// The entry's name with its type-derived extension.
    pub fn file_name(&self) -> String {
        let extension = self.file_type.extension();
        if self.name.to_lowercase().ends_with(extension) {
            self.name.clone()
        } else {
            format!("{}{extension}", self.name)
        }
    }

    fn cache_key(&self) -> String {
        normalized_name(&self.name, self.file_type)
    }
}

/// Options for re-encoding an archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// Lay payloads back out at the next aligned offset after their
    /// predecessor, closing gaps left behind by entries that shrank. The
    /// default keeps every surviving offset where the source archive put it.
    pub compact: bool,
}

/// An FSYS archive container.
///
/// Decoding parses the header and every descriptor eagerly but reads no
/// payload bytes; entries are materialized on first access and cached for the
/// container's lifetime. Encoding produces a brand-new byte sequence and
/// never alters the original raw store.
pub struct Fsys {
    /// Identifier grouping this archive's contents.
    pub group_id: u32,
    /// Whether entry names in this archive carry their file extension.
    pub uses_extensions: bool,
    variant: GameVariant,
    descriptors: Vec<EntryDescriptor>,
    raw: Store,
    materialized: HashMap<String, Box<dyn SubResource>>,
    extractor: Box<dyn ResourceExtractor>,
}

impl Fsys {
    /// Decodes an archive from a byte buffer.
    pub fn from_existing(variant: GameVariant, buffer: ByteSpan) -> Result<Fsys, Error> {
        Self::from_store(variant, Store::from_vec(buffer.to_vec()))
    }

    /// Decodes an archive from a byte buffer, zero-filling reads that run
    /// past its end instead of failing. Useful for truncated dumps.
    pub fn from_existing_lenient(variant: GameVariant, buffer: ByteSpan) -> Result<Fsys, Error> {
        Self::from_store(variant, Store::from_vec(buffer.to_vec()).with_leniency(true))
    }

    /// Carves an archive out of a disc image store and decodes it. The
    /// archive's bytes are copied into a fresh store with the given backing.
    pub fn extract_from(
        source: &mut Store,
        offset: u64,
        length: u64,
        variant: GameVariant,
        backing: StoreBacking,
    ) -> Result<Fsys, Error> {
        debug!(offset, length, "Extracting archive from disc image");

        let mut raw = Store::new(backing)?;
        source.copy_range(&mut raw, offset, length)?;
        Self::from_store(variant, raw)
    }

    /// Decodes an archive that already owns its store.
    pub fn from_store(variant: GameVariant, mut raw: Store) -> Result<Fsys, Error> {
        let size = raw.len()?;

        let header_bytes = raw.read_bytes(0, HEADER_PARSE_LEN)?;
        let header = FsysHeader::read(&mut Cursor::new(&header_bytes))?;

        if header.total_size as u64 != size {
            warn!(
                header = header.total_size,
                actual = size,
                "Header total size disagrees with store length"
            );
        }

        let count = header.entry_count as u64;
        let table_end = POINTER_TABLE_OFFSET + count * 4;
        if table_end > size && !raw.is_lenient() {
            return Err(Error::OutOfBounds {
                offset: POINTER_TABLE_OFFSET,
                length: count * 4,
                size,
            });
        }

        let mut descriptors = Vec::with_capacity(header.entry_count as usize);
        for index in 0..count {
            let pointer = raw.read_u32(POINTER_TABLE_OFFSET + index * 4)? as u64;

            let record_bytes = raw.read_bytes(pointer, RECORD_PARSE_LEN)?;
            let record = EntryRecord::read(&mut Cursor::new(&record_bytes))?;

            let payload_end = record.start_offset as u64 + record.compressed_size as u64;
            if payload_end > size && !raw.is_lenient() {
                return Err(Error::OutOfBounds {
                    offset: record.start_offset as u64,
                    length: record.compressed_size as u64,
                    size,
                });
            }

            let name = raw.read_terminated_string(record.name_offset as u64)?;
            let full_name = if record.full_name_offset != 0 {
                Some(raw.read_terminated_string(record.full_name_offset as u64)?)
            } else {
                None
            };

            descriptors.push(EntryDescriptor {
                identity: record.identity,
                file_type: FileType::from_tag(record.type_tag),
                name,
                full_name,
                start_offset: record.start_offset,
                uncompressed_size: record.uncompressed_size,
                compressed_size: record.compressed_size,
                format_index: record.format_index,
            });
        }

        debug!(
            group_id = header.group_id,
            entries = descriptors.len(),
            "Decoded archive"
        );

        Ok(Fsys {
            group_id: header.group_id,
            uses_extensions: header.uses_extensions == 1,
            variant,
            descriptors,
            raw,
            materialized: HashMap::new(),
            extractor: Box::new(OpaqueExtractor),
        })
    }

    /// Replaces the extractor used to materialize entries.
    pub fn with_extractor(mut self, extractor: Box<dyn ResourceExtractor>) -> Fsys {
        self.extractor = extractor;
        self
    }

    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    pub fn entry_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn descriptors(&self) -> &[EntryDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, index: usize) -> Option<&EntryDescriptor> {
        self.descriptors.get(index)
    }

    /// How many entries have been materialized so far.
    pub fn materialized_count(&self) -> usize {
        self.materialized.len()
    }

    /// Finds the descriptor index for a name. Matching is case-insensitive
    /// and accepts the name with or without its type-derived extension.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|descriptor| {
            normalized_name(name, descriptor.file_type) == descriptor.cache_key()
        })
    }

    /// Returns the entry with the given name, materializing it on first
    /// access. Unknown names are `Ok(None)`.
    pub fn entry_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<&mut Box<dyn SubResource>>, Error> {
        match self.index_of(name) {
            Some(index) => self.entry_by_index(index),
            None => Ok(None),
        }
    }

    /// Returns the entry at the given index, materializing it on first
    /// access. Out-of-range indices are `Ok(None)`.
    pub fn entry_by_index(
        &mut self,
        index: usize,
    ) -> Result<Option<&mut Box<dyn SubResource>>, Error> {
        let Some(descriptor) = self.descriptors.get(index) else {
            return Ok(None);
        };

        let key = descriptor.cache_key();
        if !self.materialized.contains_key(&key) {
            debug!(name = %key, "Materializing entry");

            let resource = self
                .extractor
                .extract(&mut self.raw, &self.descriptors[index])?;
            self.materialized.insert(key.clone(), resource);
        }

        Ok(self.materialized.get_mut(&key))
    }

    /// Swaps in replacement content for an entry. Returns whether the name
    /// resolved to an entry.
    pub fn replace_entry(
        &mut self,
        name: &str,
        resource: Box<dyn SubResource>,
    ) -> Result<bool, Error> {
        let Some(index) = self.index_of(name) else {
            return Ok(false);
        };

        let key = self.descriptors[index].cache_key();
        self.materialized.insert(key, resource);
        Ok(true)
    }

    /// Encodes the archive into a new store. A disk-backed archive encodes
    /// into a `.repak` sibling of its own file; a memory-backed one encodes
    /// into memory.
    pub fn encode(&mut self) -> Result<Store, Error> {
        self.encode_with(EncodeOptions::default())
    }

    pub fn encode_with(&mut self, options: EncodeOptions) -> Result<Store, Error> {
        let mut output = match self.raw.path() {
            Some(path) => {
                let mut repack = path.as_os_str().to_os_string();
                repack.push(".repak");
                Store::new(StoreBacking::Disk(PathBuf::from(repack)))?
            }
            None => Store::new(StoreBacking::Memory)?,
        };

        self.encode_into(&mut output, options)?;
        Ok(output)
    }

    /// Encodes the archive into a byte buffer.
    pub fn write_to_buffer(&mut self) -> Result<ByteBuffer, Error> {
        let mut output = Store::new(StoreBacking::Memory)?;
        self.encode_into(&mut output, EncodeOptions::default())?;
        output.into_vec()
    }

    fn encode_into(&mut self, output: &mut Store, options: EncodeOptions) -> Result<(), Error> {
        if self.materialized.is_empty() {
            // nothing extracted, nothing changed, copy the existing bytes back
            let size = self.raw.len()?;
            self.raw.copy_range(output, 0, size)?;
            return Ok(());
        }

        self.rebuild(output, options)
    }

    fn rebuild(&mut self, output: &mut Store, options: EncodeOptions) -> Result<(), Error> {
        let record_size = self.variant.record_size();
        let count = self.descriptors.len();

        // repacking needs every entry's current bytes
        for index in 0..count {
            self.entry_by_index(index)?;
        }

        self.check_layout()?;

        debug!(entries = count, compact = options.compact, "Rebuilding archive");

        self.raw.copy_range(output, 0, POINTER_TABLE_OFFSET)?;
        output.write_u32(ENTRY_COUNT_OFFSET, count as u32)?;

        // the name table sits past the pointer table, the descriptor records
        // past the name table
        let mut name_offsets = Vec::with_capacity(count);
        let mut name_cursor = align_up(POINTER_TABLE_OFFSET + count as u64 * 4, PAYLOAD_ALIGNMENT);
        for descriptor in &self.descriptors {
            name_offsets.push(name_cursor as u32);
            output.write_bytes(name_cursor, descriptor.name.as_bytes())?;
            name_cursor += descriptor.name.len() as u64;
            output.write_bytes(name_cursor, &[0])?;
            name_cursor += 1;
        }
        output.align(PAYLOAD_ALIGNMENT)?;
        let record_base = output.len()?;

        for index in 0..count {
            output.write_u32(
                POINTER_TABLE_OFFSET + index as u64 * 4,
                (record_base + index as u64 * record_size) as u32,
            )?;
        }

        let mut compact_cursor =
            align_up(record_base + count as u64 * record_size, PAYLOAD_ALIGNMENT);

        for index in 0..count {
            let was_compressed = self.descriptors[index].is_compressed();
            let key = self.descriptors[index].cache_key();
            let resource =
                self.materialized
                    .get(&key)
                    .ok_or_else(|| Error::MalformedArchive {
                        reason: format!("entry {key} vanished from the cache"),
                    })?;

            let encoded = resource.encode(was_compressed)?;
            let raw_len = resource.raw_len();

            if options.compact {
                self.descriptors[index].start_offset = compact_cursor as u32;
            }
            let start = self.descriptors[index].start_offset as u64;
            output.write_bytes(start, &encoded)?;

            let old_size = self.descriptors[index].compressed_size;
            let new_size = encoded.len() as u32;
            self.descriptors[index].uncompressed_size = raw_len as u32;
            self.descriptors[index].compressed_size = new_size;

            if options.compact {
                compact_cursor = align_up(start + new_size as u64, PAYLOAD_ALIGNMENT);
            } else if new_size > old_size {
                // a later payload must never overlap an enlarged predecessor;
                // shrinking leaves the gap in place
                let delta = (new_size - old_size) as u64;
                for later in &mut self.descriptors[index + 1..] {
                    later.start_offset =
                        align_up(later.start_offset as u64 + delta, PAYLOAD_ALIGNMENT) as u32;
                }
            }
        }

        output.align(PAYLOAD_ALIGNMENT)?;
        let mut trailer = [0u8; 16];
        trailer[12..].copy_from_slice(&FSYS_MAGIC);
        output.append(&trailer)?;
        output.write_u32(TOTAL_SIZE_OFFSET, output.len()? as u32)?;

        // descriptor records are rewritten last, once offsets and sizes have
        // settled
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let record = EntryRecord {
                identity: descriptor.identity,
                type_tag: descriptor.file_type.tag(),
                start_offset: descriptor.start_offset,
                uncompressed_size: descriptor.uncompressed_size,
                compressed_size: descriptor.compressed_size,
                full_name_offset: 0,
                format_index: descriptor.format_index,
                name_offset: name_offsets[index],
            };

            let mut cursor = Cursor::new(Vec::new());
            record.write(&mut cursor)?;

            let mut bytes = cursor.into_inner();
            bytes.extend_from_slice(&[0u8; 0xC]);
            if self.variant == GameVariant::Colosseum {
                bytes.extend_from_slice(&[0x11u8; 0xC]);
            }
            bytes.resize(record_size as usize, 0);

            output.write_bytes(record_base + index as u64 * record_size, &bytes)?;
        }

        Ok(())
    }

    fn check_layout(&self) -> Result<(), Error> {
        let count = self.descriptors.len() as u64;
        let name_table = align_up(POINTER_TABLE_OFFSET + count * 4, PAYLOAD_ALIGNMENT);
        let names_len: u64 = self
            .descriptors
            .iter()
            .map(|descriptor| descriptor.name.len() as u64 + 1)
            .sum();
        let record_base = align_up(name_table + names_len, PAYLOAD_ALIGNMENT);
        let metadata_end = record_base + count * self.variant.record_size();

        let mut previous: Option<u32> = None;
        for descriptor in &self.descriptors {
            if descriptor.start_offset as u64 % PAYLOAD_ALIGNMENT != 0 {
                return Err(Error::MalformedArchive {
                    reason: format!(
                        "payload offset {:#x} of {} is not aligned",
                        descriptor.start_offset, descriptor.name
                    ),
                });
            }

            if (descriptor.start_offset as u64) < metadata_end {
                return Err(Error::MalformedArchive {
                    reason: format!(
                        "payload offset {:#x} of {} overlaps the metadata tables",
                        descriptor.start_offset, descriptor.name
                    ),
                });
            }

            if let Some(previous) = previous {
                if descriptor.start_offset <= previous {
                    return Err(Error::MalformedArchive {
                        reason: format!(
                            "payload offsets are not increasing at {}",
                            descriptor.name
                        ),
                    });
                }
            }
            previous = Some(descriptor.start_offset);
        }

        Ok(())
    }
}

fn normalized_name(name: &str, file_type: FileType) -> String {
    let lowered = name.to_lowercase();
    let extension = file_type.extension();
    if lowered.ends_with(extension) {
        lowered
    } else {
        format!("{lowered}{extension}")
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    let m = value % alignment;
    if m == 0 {
        value
    } else {
        value + (alignment - m)
    }
}
