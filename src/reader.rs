//! Archive reader.
//!
//! Construction parses signature, header, extension area and index table
//! while recomputing the running CRC32, and verifies the 4-byte trailer
//! before any record is trusted. Payload iteration then yields decompressed
//! bodies in archive order; random-access archives (uncompressed or
//! per-file compressed) additionally support `seek_to`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, warn};

use crate::checksum::ChecksumKind;
use crate::codec::{self, BodyDecoder, DEFAULT_READ_BUFFER_SIZE};
use crate::error::{DpkError, Result};
use crate::ext::{self, HeaderExt, IndexExt, HEADER_EXT_PREFIX, INDEX_EXT_PREFIX};
use crate::layout::{CompMethod, Header, IndexEntry, HEADER_SIZE, INDEX_ENTRY_SIZE, SIGNATURE};

/// Per-archive read configuration.
///
/// The signature and header-checksum checks can be disabled individually for
/// forensic recovery of damaged archives; the reader then proceeds
/// best-effort.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub check_signature: bool,
    pub check_header_checksum: bool,
    pub check_file_checksums: bool,
    pub read_buffer_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            check_signature: true,
            check_header_checksum: true,
            check_file_checksums: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Payload cursor state. Jointly compressed archives keep one decoder alive
/// across entries; random-access archives seek the raw stream per entry.
enum Body<R: Read + Seek> {
    Random(R),
    Joint(BodyDecoder<R>),
}

/// Read-mode archive object.
pub struct Reader<R: Read + Seek> {
    opts: ReadOptions,
    header: Header,
    header_exts: Vec<HeaderExt>,
    entries: Vec<IndexEntry>,
    index_exts: Vec<Vec<IndexExt>>,
    dict: Option<Vec<u8>>,
    data_start: u64,
    next_index: usize,
    body: Body<R>,
}

impl Reader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReadOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, opts: ReadOptions) -> Result<Self> {
        Self::from_stream(File::open(path)?, opts)
    }
}

impl<R: Read + Seek> Reader<R> {
    /// Parse an archive from a seekable stream positioned at its start.
    pub fn from_stream(mut stream: R, opts: ReadOptions) -> Result<Self> {
        let mut crc = crc32fast::Hasher::new();

        let mut signature = [0u8; 8];
        read_record(&mut stream, &mut signature)?;
        if opts.check_signature && signature != SIGNATURE {
            return Err(DpkError::BadSignature);
        }
        crc.update(&signature);

        let mut header_bytes = [0u8; HEADER_SIZE];
        read_record(&mut stream, &mut header_bytes)?;
        crc.update(&header_bytes);
        let header = Header::read(&header_bytes[..])?;

        let mut ext_raw = vec![0u8; header.ext_field_size as usize];
        read_record(&mut stream, &mut ext_raw)?;
        crc.update(&ext_raw);

        let mut index_raw = vec![0u8; header.index_size as usize];
        read_record(&mut stream, &mut index_raw)?;
        crc.update(&index_raw);

        let mut trailer = [0u8; 4];
        read_record(&mut stream, &mut trailer)?;
        let stored = u32::from_le_bytes(trailer);
        let computed = crc.finalize();
        if stored != computed {
            if opts.check_header_checksum {
                return Err(DpkError::BadChecksum("archive header region".into()));
            }
            warn!(
                "header CRC32 mismatch (stored {stored:#010x}, computed {computed:#010x}); \
                 continuing with checks disabled"
            );
        }

        // Deprecated region-compression flags: the stored region is one
        // codec blob; decompress it before parsing records. The dictionary
        // method cannot apply here since the dictionary itself lives in the
        // extension area.
        if header.flags.comp_ext_field {
            ext_raw = codec::decode_region(header.comp_method, None, &ext_raw)?;
        }
        if header.flags.comp_index {
            index_raw = codec::decode_region(header.comp_method, None, &index_raw)?;
        }

        let header_exts = parse_header_exts(&ext_raw)?;
        let (entries, index_exts) = parse_index(&index_raw, header.num_of_indexes)?;
        let data_start = stream.stream_position()?;

        let dict = if header.comp_method.needs_dictionary() {
            match ext::resolve_dictionary(&header_exts)? {
                Some(d) => Some(d),
                None => {
                    return Err(DpkError::Compression(
                        "archive uses a dictionary method but carries no dictionary extension"
                            .into(),
                    ))
                }
            }
        } else {
            None
        };

        debug!(
            "opened archive: {} entries, method {}, {} header extension(s), data at {}",
            entries.len(),
            header.comp_method.name(),
            header_exts.len(),
            data_start,
        );

        let body = if header.random_access() {
            Body::Random(stream)
        } else {
            Body::Joint(BodyDecoder::new(
                header.comp_method,
                dict.as_deref(),
                stream,
                opts.read_buffer_size,
            )?)
        };

        Ok(Self {
            opts,
            header,
            header_exts,
            entries,
            index_exts,
            dict,
            data_start,
            next_index: 0,
            body,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_extensions(&self) -> &[HeaderExt] {
        &self.header_exts
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The next entry sequential iteration would yield, if any.
    pub fn peek_index(&self) -> Option<&IndexEntry> {
        self.entries.get(self.next_index)
    }

    pub fn get_index(&self, index: usize) -> Option<&IndexEntry> {
        self.entries.get(index)
    }

    /// Index extensions attached to entry `index`.
    pub fn index_extensions(&self, index: usize) -> Option<&[IndexExt]> {
        self.index_exts.get(index).map(|v| v.as_slice())
    }

    /// True when entries can be decoded in any order: per-file compression
    /// or no compression at all.
    pub fn random_access(&self) -> bool {
        self.header.random_access()
    }

    /// Position sequential iteration at entry `index`.
    ///
    /// Only valid on random-access archives; a jointly compressed archive
    /// reports `UnsupportedAccessMode`.
    pub fn seek_to(&mut self, index: usize) -> Result<IndexEntry> {
        if !self.header.random_access() {
            return Err(DpkError::UnsupportedAccessMode);
        }
        let entry = self
            .entries
            .get(index)
            .cloned()
            .ok_or(DpkError::UnexpectedEof)?;
        self.next_index = index;
        Ok(entry)
    }

    /// Decompress and return the current entry's body, advancing the cursor.
    ///
    /// A per-file digest mismatch fails this call but leaves the reader
    /// usable for subsequent entries.
    pub fn next_bytes(&mut self) -> Result<Vec<u8>> {
        let entry = self
            .entries
            .get(self.next_index)
            .cloned()
            .ok_or(DpkError::UnexpectedEof)?;

        let mut out = vec![0u8; entry.uncomp_size as usize];
        match &mut self.body {
            Body::Joint(decoder) => {
                decoder
                    .read_exact(&mut out)
                    .map_err(DpkError::from_codec_io)?;
            }
            Body::Random(stream) => {
                stream.seek(SeekFrom::Start(self.data_start + entry.offset))?;
                if self.header.comp_method == CompMethod::Stored {
                    read_record(stream, &mut out)?;
                } else {
                    let bounded = stream.by_ref().take(entry.comp_size);
                    let mut decoder = BodyDecoder::new(
                        self.header.comp_method,
                        self.dict.as_deref(),
                        bounded,
                        self.opts.read_buffer_size,
                    )?;
                    decoder
                        .read_exact(&mut out)
                        .map_err(DpkError::from_codec_io)?;
                }
            }
        }
        self.next_index += 1;

        let kind = self.header.flags.checksum;
        if self.opts.check_file_checksums && kind != ChecksumKind::None {
            let digest = kind.digest(&out);
            if digest.as_slice() != entry.digest(kind) {
                return Err(DpkError::BadChecksum(format!("entry {:?}", entry.name())));
            }
        }
        Ok(out)
    }
}

/// `read_exact` with short reads reported as `UnexpectedEof`.
fn read_record<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => DpkError::UnexpectedEof,
        _ => DpkError::Io(e),
    })
}

fn parse_header_exts(raw: &[u8]) -> Result<Vec<HeaderExt>> {
    let mut exts = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        if rest.len() < HEADER_EXT_PREFIX {
            return Err(DpkError::UnexpectedEof);
        }
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&rest[..8]);
        let size = u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]) as usize;
        if size < HEADER_EXT_PREFIX || size > rest.len() {
            return Err(DpkError::UnexpectedEof);
        }
        exts.push(HeaderExt::parse(signature, rest[HEADER_EXT_PREFIX..size].to_vec()));
        rest = &rest[size..];
    }
    Ok(exts)
}

fn parse_index_exts(raw: &[u8]) -> Result<Vec<IndexExt>> {
    let mut exts = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        if rest.len() < INDEX_EXT_PREFIX {
            return Err(DpkError::UnexpectedEof);
        }
        let mut signature = [0u8; 6];
        signature.copy_from_slice(&rest[..6]);
        let size = u16::from_le_bytes([rest[6], rest[7]]) as usize;
        if size < INDEX_EXT_PREFIX || size > rest.len() {
            return Err(DpkError::UnexpectedEof);
        }
        exts.push(IndexExt::parse(signature, rest[INDEX_EXT_PREFIX..size].to_vec()));
        rest = &rest[size..];
    }
    Ok(exts)
}

fn parse_index(raw: &[u8], count: u32) -> Result<(Vec<IndexEntry>, Vec<Vec<IndexExt>>)> {
    let mut entries = Vec::with_capacity(count as usize);
    let mut index_exts = Vec::with_capacity(count as usize);
    let mut rest = raw;
    for _ in 0..count {
        if rest.len() < INDEX_ENTRY_SIZE {
            return Err(DpkError::UnexpectedEof);
        }
        let (record, tail) = rest.split_at(INDEX_ENTRY_SIZE);
        let entry = IndexEntry::read(record).map_err(DpkError::Io)?;
        rest = tail;

        let ext_len = entry.ext_field_size as usize;
        if rest.len() < ext_len {
            return Err(DpkError::UnexpectedEof);
        }
        let (ext_bytes, tail) = rest.split_at(ext_len);
        index_exts.push(parse_index_exts(ext_bytes)?);
        rest = tail;

        entries.push(entry);
    }
    if !rest.is_empty() {
        warn!("index region carries {} unparsed trailing bytes", rest.len());
    }
    Ok((entries, index_exts))
}
