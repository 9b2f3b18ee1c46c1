//! On-disk record definitions.
//!
//! An archive is the concatenation of: signature (8) ‖ header (28) ‖
//! header-extension area (`ext_field_size`) ‖ index entries with their
//! extensions (`index_size`) ‖ CRC32 trailer (4) ‖ data region.
//!
//! All binary I/O is strictly little-endian and byte-packed; every field is
//! written explicitly in declared order and width. Nothing here relies on
//! in-memory struct layout.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::checksum::ChecksumKind;
use crate::error::{DpkError, Result};

/// Archive signature, compared byte-for-byte on open.
pub const SIGNATURE: [u8; 8] = *b"DataPak.";

/// Byte length of the fixed header record (excluding the signature).
pub const HEADER_SIZE: usize = 28;

/// Byte length of one index entry record.
pub const INDEX_ENTRY_SIZE: usize = 128;

/// Byte length of the filename/digest field inside an index entry.
pub const FIELD_SIZE: usize = 100;

// ── Compression method ───────────────────────────────────────────────────────

/// The five recognized compression method tags. Trailing spaces in the
/// on-disk 8-byte ASCII form are significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompMethod {
    Stored,
    Zlib,
    Zstd,
    ZstdDict,
    Lz4,
}

impl CompMethod {
    pub const fn tag(self) -> [u8; 8] {
        match self {
            CompMethod::Stored => *b"UNCMPRSD",
            CompMethod::Zlib => *b"ZLIB    ",
            CompMethod::Zstd => *b"ZSTD    ",
            CompMethod::ZstdDict => *b"ZSTD+D  ",
            CompMethod::Lz4 => *b"LZ4     ",
        }
    }

    pub fn from_tag(tag: &[u8; 8]) -> Result<Self> {
        match tag {
            b"UNCMPRSD" => Ok(CompMethod::Stored),
            b"ZLIB    " => Ok(CompMethod::Zlib),
            b"ZSTD    " => Ok(CompMethod::Zstd),
            b"ZSTD+D  " => Ok(CompMethod::ZstdDict),
            b"LZ4     " => Ok(CompMethod::Lz4),
            other => Err(DpkError::UnknownCompressionExtension(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompMethod::Stored => "uncompressed",
            CompMethod::Zlib => "zlib",
            CompMethod::Zstd => "zstd",
            CompMethod::ZstdDict => "zstd+dict",
            CompMethod::Lz4 => "lz4",
        }
    }

    /// Inverse of [`name`](Self::name), used by the CLI.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uncompressed" | "none" => Some(CompMethod::Stored),
            "zlib" => Some(CompMethod::Zlib),
            "zstd" => Some(CompMethod::Zstd),
            "zstd+dict" => Some(CompMethod::ZstdDict),
            "lz4" => Some(CompMethod::Lz4),
            _ => None,
        }
    }

    pub fn needs_dictionary(self) -> bool {
        matches!(self, CompMethod::ZstdDict)
    }
}

// ── Header flag word ─────────────────────────────────────────────────────────

/// Decoded form of the packed 32-bit header flag word.
///
/// Bits are allocated LSB-first in declared order: `comp_index` (1),
/// `comp_ext_field` (1), `checksum` (6), `comp_level` (6), `per_file_comp`
/// (1), `filesize_limit` (3); the remaining 14 bits are reserved.
/// `comp_index` and `comp_ext_field` are deprecated: accepted on read,
/// always written as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFlags {
    pub comp_index: bool,
    pub comp_ext_field: bool,
    pub checksum: ChecksumKind,
    pub comp_level: u8,
    pub per_file_comp: bool,
    pub filesize_limit: u8,
}

impl HeaderFlags {
    pub fn encode(&self) -> u32 {
        (self.comp_index as u32)
            | (self.comp_ext_field as u32) << 1
            | (self.checksum.id() as u32 & 0x3f) << 2
            | (self.comp_level as u32 & 0x3f) << 8
            | (self.per_file_comp as u32) << 14
            | (self.filesize_limit as u32 & 0x07) << 15
    }

    pub fn decode(word: u32) -> Result<Self> {
        let checksum_id = (word >> 2 & 0x3f) as u8;
        let checksum = ChecksumKind::from_id(checksum_id).ok_or_else(|| {
            DpkError::BadChecksum(format!("header declares unknown checksum id {checksum_id}"))
        })?;
        Ok(Self {
            comp_index: word & 1 != 0,
            comp_ext_field: word >> 1 & 1 != 0,
            checksum,
            comp_level: (word >> 8 & 0x3f) as u8,
            per_file_comp: word >> 14 & 1 != 0,
            filesize_limit: (word >> 15 & 0x07) as u8,
        })
    }
}

impl Default for HeaderFlags {
    fn default() -> Self {
        Self {
            comp_index: false,
            comp_ext_field: false,
            checksum: ChecksumKind::None,
            comp_level: 0,
            per_file_comp: false,
            filesize_limit: 0,
        }
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// The fixed 28-byte archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Total byte length of the index table (every entry plus its
    /// index-extension bytes).
    pub index_size: u64,
    pub comp_method: CompMethod,
    /// Total byte length of the header-extension area.
    pub ext_field_size: u32,
    pub num_of_indexes: u32,
    pub flags: HeaderFlags,
}

impl Header {
    /// A header template for the writer; size accounting starts at zero and
    /// grows as files and extensions are added.
    pub fn new(
        comp_method: CompMethod,
        comp_level: u8,
        checksum: ChecksumKind,
        per_file_comp: bool,
    ) -> Self {
        Self {
            index_size: 0,
            comp_method,
            ext_field_size: 0,
            num_of_indexes: 0,
            flags: HeaderFlags {
                checksum,
                comp_level: comp_level.min(0x3f),
                per_file_comp,
                ..HeaderFlags::default()
            },
        }
    }

    /// True when entries can be decoded in any order.
    pub fn random_access(&self) -> bool {
        self.flags.per_file_comp || self.comp_method == CompMethod::Stored
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.index_size)?;
        writer.write_all(&self.comp_method.tag())?;
        writer.write_u32::<LittleEndian>(self.ext_field_size)?;
        writer.write_u32::<LittleEndian>(self.num_of_indexes)?;
        writer.write_u32::<LittleEndian>(self.flags.encode())?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let index_size = reader.read_u64::<LittleEndian>()?;
        let mut tag = [0u8; 8];
        reader.read_exact(&mut tag)?;
        let comp_method = CompMethod::from_tag(&tag)?;
        let ext_field_size = reader.read_u32::<LittleEndian>()?;
        let num_of_indexes = reader.read_u32::<LittleEndian>()?;
        let flags = HeaderFlags::decode(reader.read_u32::<LittleEndian>()?)?;
        Ok(Self {
            index_size,
            comp_method,
            ext_field_size,
            num_of_indexes,
            flags,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        // Writing a fixed-size record into an equally sized buffer.
        self.write(&mut buf[..]).expect("header fits its record size");
        buf
    }
}

// ── Index entry ──────────────────────────────────────────────────────────────

/// One 128-byte index record describing one stored file.
///
/// `field` holds the NUL-terminated filename at offset 0 and, when the
/// archive carries per-file checksums, the digest in the trailing
/// `digest_len` bytes. The two regions never overlap.
#[derive(Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Data-region byte offset for random-access archives; decompressed
    /// stream offset for jointly compressed archives.
    pub offset: u64,
    pub uncomp_size: u64,
    /// Equals `uncomp_size` when uncompressed, zero when jointly compressed,
    /// the per-file compressed size otherwise.
    pub comp_size: u64,
    /// Total byte length of this entry's index extensions.
    pub ext_field_size: u32,
    pub field: [u8; FIELD_SIZE],
}

impl IndexEntry {
    /// Build an entry for `name`, validating that the filename and the
    /// digest tail fit the field together.
    pub fn new(name: &str, checksum: ChecksumKind) -> Result<Self> {
        let digest_len = checksum.digest_len();
        if name.as_bytes().len() + digest_len > FIELD_SIZE - 1 {
            return Err(DpkError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "archive name {:?} too long for a {}-byte {} digest",
                    name,
                    digest_len,
                    checksum.name()
                ),
            )));
        }
        let mut field = [0u8; FIELD_SIZE];
        field[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            offset: 0,
            uncomp_size: 0,
            comp_size: 0,
            ext_field_size: 0,
            field,
        })
    }

    /// The stored filename. Terminated by NUL; the legacy `0xFF` terminator
    /// written by older format revisions is accepted too.
    pub fn name(&self) -> String {
        let end = self
            .field
            .iter()
            .position(|&b| b == 0x00 || b == 0xff)
            .unwrap_or(FIELD_SIZE);
        String::from_utf8_lossy(&self.field[..end]).into_owned()
    }

    /// The digest tail of the field for the given checksum kind.
    pub fn digest(&self, checksum: ChecksumKind) -> &[u8] {
        &self.field[FIELD_SIZE - checksum.digest_len()..]
    }

    pub(crate) fn set_digest(&mut self, digest: &[u8]) {
        self.field[FIELD_SIZE - digest.len()..].copy_from_slice(digest);
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u64::<LittleEndian>(self.uncomp_size)?;
        writer.write_u64::<LittleEndian>(self.comp_size)?;
        writer.write_u32::<LittleEndian>(self.ext_field_size)?;
        writer.write_all(&self.field)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let offset = reader.read_u64::<LittleEndian>()?;
        let uncomp_size = reader.read_u64::<LittleEndian>()?;
        let comp_size = reader.read_u64::<LittleEndian>()?;
        let ext_field_size = reader.read_u32::<LittleEndian>()?;
        let mut field = [0u8; FIELD_SIZE];
        reader.read_exact(&mut field)?;
        Ok(Self {
            offset,
            uncomp_size,
            comp_size,
            ext_field_size,
            field,
        })
    }

    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        self.write(&mut buf[..]).expect("entry fits its record size");
        buf
    }
}

impl std::fmt::Debug for IndexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEntry")
            .field("name", &self.name())
            .field("offset", &self.offset)
            .field("uncomp_size", &self.uncomp_size)
            .field("comp_size", &self.comp_size)
            .field("ext_field_size", &self.ext_field_size)
            .finish()
    }
}
