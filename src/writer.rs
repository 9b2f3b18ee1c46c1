//! Archive writer.
//!
//! Files are registered up front with [`Writer::add_file`] /
//! [`Writer::add_bytes`]; each registration runs the per-file checksum
//! pre-pass and appends an index entry. [`Writer::finalize`] then serializes
//! signature, header, extensions, index table and CRC32 trailer, and streams
//! every body through the configured codec. Finalize consumes the writer, so
//! the build lifecycle is terminal by construction.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::checksum;
use crate::codec::{BodyEncoder, CountingWriter, DEFAULT_READ_BUFFER_SIZE};
use crate::error::{DpkError, Result};
use crate::ext::{self, HeaderExt, IndexExt};
use crate::layout::{CompMethod, Header, IndexEntry, INDEX_ENTRY_SIZE, SIGNATURE};

/// Where a registered entry's body comes from at finalize time.
enum Source {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Snapshot handed to the progress callback between buffer-sized steps.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub file_index: usize,
    pub total_files: usize,
    pub name: &'a str,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

/// Build-mode archive object.
pub struct Writer<W: Write + Seek> {
    sink: W,
    header: Header,
    header_exts: Vec<HeaderExt>,
    entries: Vec<IndexEntry>,
    index_exts: Vec<Vec<IndexExt>>,
    sources: Vec<Source>,
    dict: Option<Vec<u8>>,
    running_offset: u64,
    read_buffer_size: usize,
}

impl Writer<File> {
    /// Create the archive file and a writer over it.
    pub fn create(
        path: impl AsRef<Path>,
        header: Header,
        header_exts: Vec<HeaderExt>,
    ) -> Result<Self> {
        Self::from_stream(File::create(path)?, header, header_exts)
    }
}

impl<W: Write + Seek> Writer<W> {
    /// Build into an arbitrary seekable sink.
    ///
    /// The deprecated region-compression flag bits are always cleared on the
    /// write path; the dictionary (for the dictionary method) is resolved
    /// here so a bad configuration fails before any file is registered.
    pub fn from_stream(sink: W, mut header: Header, header_exts: Vec<HeaderExt>) -> Result<Self> {
        header.flags.comp_index = false;
        header.flags.comp_ext_field = false;
        header.ext_field_size = header_exts.iter().map(|e| e.size()).sum();
        header.index_size = 0;
        header.num_of_indexes = 0;

        let dict = if header.comp_method.needs_dictionary() {
            match ext::resolve_dictionary(&header_exts)? {
                Some(d) => Some(d),
                None => {
                    return Err(DpkError::Compression(
                        "dictionary method selected but no dictionary extension given".into(),
                    ))
                }
            }
        } else {
            None
        };

        // Fail fast on codec configuration problems.
        BodyEncoder::new(
            header.comp_method,
            header.flags.comp_level,
            dict.as_deref(),
            io::sink(),
        )?;

        Ok(Self {
            sink,
            header,
            header_exts,
            entries: Vec::new(),
            index_exts: Vec::new(),
            sources: Vec::new(),
            dict,
            running_offset: 0,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.read_buffer_size = size.max(1);
    }

    /// Register a file from the filesystem. Streams it once now to compute
    /// the per-file digest; the body itself is written during finalize.
    pub fn add_file(
        &mut self,
        src_path: impl AsRef<Path>,
        archive_name: &str,
        index_exts: Vec<IndexExt>,
    ) -> Result<IndexEntry> {
        let src_path = src_path.as_ref();
        let mut file = File::open(src_path)?;
        let (size, digest) =
            checksum::hash_reader(self.header.flags.checksum, &mut file, self.read_buffer_size)?;
        self.push_entry(
            archive_name,
            size,
            digest,
            Source::Path(src_path.to_path_buf()),
            index_exts,
        )
    }

    /// Register an in-memory buffer as an entry.
    pub fn add_bytes(
        &mut self,
        archive_name: &str,
        data: Vec<u8>,
        index_exts: Vec<IndexExt>,
    ) -> Result<IndexEntry> {
        let digest = self.header.flags.checksum.digest(&data);
        let size = data.len() as u64;
        self.push_entry(archive_name, size, digest, Source::Bytes(data), index_exts)
    }

    fn push_entry(
        &mut self,
        name: &str,
        size: u64,
        digest: Vec<u8>,
        source: Source,
        index_exts: Vec<IndexExt>,
    ) -> Result<IndexEntry> {
        let mut entry = IndexEntry::new(name, self.header.flags.checksum)?;
        entry.uncomp_size = size;
        entry.offset = self.running_offset;
        // Uncompressed archives know the stored size already; jointly
        // compressed entries stay at zero; per-file sizes are recorded
        // while streaming.
        entry.comp_size = if self.header.comp_method == CompMethod::Stored {
            size
        } else {
            0
        };
        entry.ext_field_size = index_exts.iter().map(|e| e.size() as u32).sum();
        entry.set_digest(&digest);

        self.header.index_size += INDEX_ENTRY_SIZE as u64 + entry.ext_field_size as u64;
        self.header.num_of_indexes += 1;
        self.running_offset += size;

        self.entries.push(entry.clone());
        self.index_exts.push(index_exts);
        self.sources.push(source);
        Ok(entry)
    }

    /// Serialize the archive and return the sink.
    pub fn finalize(self) -> Result<W> {
        self.finalize_with_progress(|_| {})
    }

    /// Like [`finalize`](Self::finalize), invoking `progress` synchronously
    /// between buffer-sized steps. The callback cannot re-enter the writer.
    pub fn finalize_with_progress(self, mut progress: impl FnMut(Progress<'_>)) -> Result<W> {
        let Writer {
            mut sink,
            mut entries,
            header,
            header_exts,
            index_exts,
            sources,
            dict,
            read_buffer_size,
            ..
        } = self;

        debug!(
            "finalizing archive: {} entries, method {}, per-file {}",
            entries.len(),
            header.comp_method.name(),
            header.flags.per_file_comp,
        );
        write_header_region(&mut sink, &header, &header_exts, &entries, &index_exts)?;

        let total = entries.len();
        let names: Vec<String> = entries.iter().map(|e| e.name()).collect();
        let level = header.flags.comp_level;

        match (header.comp_method, header.flags.per_file_comp) {
            (CompMethod::Stored, _) => {
                for (i, source) in sources.iter().enumerate() {
                    let mut enc = BodyEncoder::new(CompMethod::Stored, 0, None, &mut sink)?;
                    stream_one(
                        &mut enc,
                        source,
                        entries[i].uncomp_size,
                        &names[i],
                        i,
                        total,
                        read_buffer_size,
                        &mut progress,
                    )?;
                    enc.finish()?;
                }
            }
            (method, true) => {
                let mut counting = CountingWriter::new(&mut sink);
                for (i, source) in sources.iter().enumerate() {
                    let start = counting.written();
                    let mut enc =
                        BodyEncoder::new(method, level, dict.as_deref(), &mut counting)?;
                    stream_one(
                        &mut enc,
                        source,
                        entries[i].uncomp_size,
                        &names[i],
                        i,
                        total,
                        read_buffer_size,
                        &mut progress,
                    )?;
                    enc.finish()?;
                    entries[i].offset = start;
                    entries[i].comp_size = counting.written() - start;
                }
                // The index now carries final data-region offsets and
                // compressed sizes; rewrite the front of the file in place
                // (same byte length) with a recomputed trailer.
                sink.seek(SeekFrom::Start(0))?;
                write_header_region(&mut sink, &header, &header_exts, &entries, &index_exts)?;
                sink.seek(SeekFrom::End(0))?;
            }
            (method, false) => {
                let mut enc = BodyEncoder::new(method, level, dict.as_deref(), &mut sink)?;
                for (i, source) in sources.iter().enumerate() {
                    stream_one(
                        &mut enc,
                        source,
                        entries[i].uncomp_size,
                        &names[i],
                        i,
                        total,
                        read_buffer_size,
                        &mut progress,
                    )?;
                    if i + 1 < total {
                        enc.sync_flush()?;
                    }
                }
                enc.finish()?;
            }
        }

        sink.flush()?;
        Ok(sink)
    }
}

/// Write signature ‖ header ‖ header extensions ‖ index table, feeding a
/// running CRC32, then the 4-byte trailer.
fn write_header_region<W: Write>(
    sink: &mut W,
    header: &Header,
    header_exts: &[HeaderExt],
    entries: &[IndexEntry],
    index_exts: &[Vec<IndexExt>],
) -> Result<()> {
    let mut crc = crc32fast::Hasher::new();

    crc.update(&SIGNATURE);
    sink.write_all(&SIGNATURE)?;

    let header_bytes = header.to_bytes();
    crc.update(&header_bytes);
    sink.write_all(&header_bytes)?;

    for ext in header_exts {
        let bytes = ext.encode();
        crc.update(&bytes);
        sink.write_all(&bytes)?;
    }

    for (entry, exts) in entries.iter().zip(index_exts) {
        let bytes = entry.to_bytes();
        crc.update(&bytes);
        sink.write_all(&bytes)?;
        for ext in exts {
            let bytes = ext.encode();
            crc.update(&bytes);
            sink.write_all(&bytes)?;
        }
    }

    sink.write_all(&crc.finalize().to_le_bytes())?;
    Ok(())
}

/// Stream one registered body through the encoder in buffer-sized chunks.
#[allow(clippy::too_many_arguments)]
fn stream_one<W: Write>(
    enc: &mut BodyEncoder<W>,
    source: &Source,
    expected: u64,
    name: &str,
    file_index: usize,
    total_files: usize,
    buf_size: usize,
    progress: &mut impl FnMut(Progress<'_>),
) -> Result<()> {
    let mut emit = |bytes_done: u64| {
        progress(Progress {
            file_index,
            total_files,
            name,
            bytes_done,
            bytes_total: expected,
        })
    };

    emit(0);
    match source {
        Source::Bytes(data) => {
            let mut done = 0u64;
            for chunk in data.chunks(buf_size.max(1)) {
                enc.write_all(chunk)?;
                done += chunk.len() as u64;
                emit(done);
            }
        }
        Source::Path(path) => {
            // The digest pre-pass already fixed this entry's size; stream at
            // most that many bytes and fail if the file shrank since.
            let file = File::open(path)?;
            let mut limited = file.take(expected);
            let mut buf = vec![0u8; buf_size.max(1)];
            let mut done = 0u64;
            loop {
                let n = limited.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                enc.write_all(&buf[..n])?;
                done += n as u64;
                emit(done);
            }
            if done != expected {
                return Err(DpkError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{path:?} changed size while the archive was being built"),
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumKind;
    use std::io::Cursor;

    #[test]
    fn add_bytes_keeps_index_accounting() {
        let header = Header::new(CompMethod::Zstd, 3, ChecksumKind::Crc32, false);
        let mut writer =
            Writer::from_stream(Cursor::new(Vec::new()), header, Vec::new()).unwrap();
        writer.add_bytes("a", vec![1, 2, 3], Vec::new()).unwrap();
        writer.add_bytes("b", vec![4, 5], Vec::new()).unwrap();

        let header = writer.header();
        assert_eq!(header.num_of_indexes, 2);
        assert_eq!(header.index_size, 256);
        assert_eq!(writer.entries()[1].offset, 3);
        assert_eq!(writer.entries()[1].uncomp_size, 2);
        // Jointly compressed entries record no compressed size.
        assert_eq!(writer.entries()[1].comp_size, 0);
    }

    #[test]
    fn missing_dictionary_fails_at_construction() {
        let header = Header::new(CompMethod::ZstdDict, 3, ChecksumKind::None, false);
        assert!(matches!(
            Writer::from_stream(Cursor::new(Vec::new()), header, Vec::new()),
            Err(DpkError::Compression(_))
        ));
    }

    #[test]
    fn progress_reports_every_file() {
        let header = Header::new(CompMethod::Stored, 0, ChecksumKind::None, false);
        let mut writer =
            Writer::from_stream(Cursor::new(Vec::new()), header, Vec::new()).unwrap();
        writer.add_bytes("a", vec![0u8; 10], Vec::new()).unwrap();
        writer.add_bytes("b", vec![1u8; 20], Vec::new()).unwrap();

        let mut seen = Vec::new();
        writer
            .finalize_with_progress(|p| seen.push((p.file_index, p.bytes_done, p.bytes_total)))
            .unwrap();
        assert!(seen.contains(&(0, 10, 10)));
        assert!(seen.contains(&(1, 20, 20)));
    }
}
