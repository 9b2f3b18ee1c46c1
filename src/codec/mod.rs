//! Streaming body codecs.
//!
//! One surface over the five compression methods. The write side is a
//! [`BodyEncoder`]: `write_all` feeds bytes (Continue), [`sync_flush`]
//! emits a codec sync point between entries of a jointly compressed archive
//! (zstd `e_flush`, deflate `Z_SYNC_FLUSH`, an lz4 block boundary), and
//! [`finish`] writes the final block (zstd `e_end`, deflate `Z_FINISH`).
//! The read side is a [`BodyDecoder`] implementing [`Read`]; for jointly
//! compressed archives one decoder persists across entries, for per-file
//! compression a fresh bounded decoder is built per entry.
//!
//! Buffering is bounded by the archive's read-buffer size; decoders wrap
//! their source in a `BufReader` of that capacity and never grow buffers
//! unboundedly.
//!
//! [`sync_flush`]: BodyEncoder::sync_flush
//! [`finish`]: BodyEncoder::finish

use std::io::{self, BufReader, Read, Write};

use crate::error::{DpkError, Result};
use crate::layout::CompMethod;

/// Default streaming buffer size: 32 KiB.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;

// ── Counting writer ──────────────────────────────────────────────────────────

/// Pass-through writer that tracks bytes written, used for per-file
/// compressed-size accounting.
pub struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Streaming compressor over an arbitrary sink.
pub enum BodyEncoder<W: Write> {
    Stored(W),
    Zlib(flate2::write::ZlibEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
    Lz4(Box<lz4_flex::frame::FrameEncoder<W>>),
}

impl<W: Write> BodyEncoder<W> {
    /// Initialize an encoder for `method`. `dict` must be present for the
    /// dictionary method and is ignored otherwise.
    pub fn new(method: CompMethod, level: u8, dict: Option<&[u8]>, sink: W) -> Result<Self> {
        Ok(match method {
            CompMethod::Stored => BodyEncoder::Stored(sink),
            CompMethod::Zlib => BodyEncoder::Zlib(flate2::write::ZlibEncoder::new(
                sink,
                flate2::Compression::new(level.min(9) as u32),
            )),
            CompMethod::Zstd => BodyEncoder::Zstd(
                zstd::stream::write::Encoder::new(sink, level as i32)
                    .map_err(DpkError::from_codec_io)?,
            ),
            CompMethod::ZstdDict => {
                let dict = dict.ok_or_else(|| {
                    DpkError::Compression("dictionary method without a dictionary".into())
                })?;
                BodyEncoder::Zstd(
                    zstd::stream::write::Encoder::with_dictionary(sink, level as i32, dict)
                        .map_err(DpkError::from_codec_io)?,
                )
            }
            CompMethod::Lz4 => BodyEncoder::Lz4(Box::new(lz4_flex::frame::FrameEncoder::new(sink))),
        })
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let r = match self {
            BodyEncoder::Stored(w) => w.write_all(buf),
            BodyEncoder::Zlib(w) => w.write_all(buf),
            BodyEncoder::Zstd(w) => w.write_all(buf),
            BodyEncoder::Lz4(w) => w.write_all(buf),
        };
        r.map_err(DpkError::from_codec_io)
    }

    /// Emit a codec sync point so everything fed so far becomes decodable,
    /// without ending the stream.
    pub fn sync_flush(&mut self) -> Result<()> {
        let r = match self {
            BodyEncoder::Stored(w) => w.flush(),
            BodyEncoder::Zlib(w) => w.flush(),
            BodyEncoder::Zstd(w) => w.flush(),
            BodyEncoder::Lz4(w) => w.flush(),
        };
        r.map_err(DpkError::from_codec_io)
    }

    /// Write the final block and return the sink.
    pub fn finish(self) -> Result<W> {
        match self {
            BodyEncoder::Stored(mut w) => {
                w.flush().map_err(DpkError::from_codec_io)?;
                Ok(w)
            }
            BodyEncoder::Zlib(w) => w.finish().map_err(DpkError::from_codec_io),
            BodyEncoder::Zstd(w) => w.finish().map_err(DpkError::from_codec_io),
            BodyEncoder::Lz4(w) => w
                .finish()
                .map_err(|e| DpkError::Compression(e.to_string())),
        }
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

/// Streaming decompressor over an arbitrary source. Implements [`Read`];
/// callers drain exactly the decompressed sizes recorded in the index.
pub enum BodyDecoder<R: Read> {
    Stored(R),
    Zlib(flate2::bufread::ZlibDecoder<BufReader<R>>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
    Lz4(Box<lz4_flex::frame::FrameDecoder<BufReader<R>>>),
}

impl<R: Read> BodyDecoder<R> {
    pub fn new(
        method: CompMethod,
        dict: Option<&[u8]>,
        source: R,
        buf_size: usize,
    ) -> Result<Self> {
        let buf_size = buf_size.max(1);
        Ok(match method {
            CompMethod::Stored => BodyDecoder::Stored(source),
            CompMethod::Zlib => BodyDecoder::Zlib(flate2::bufread::ZlibDecoder::new(
                BufReader::with_capacity(buf_size, source),
            )),
            CompMethod::Zstd => BodyDecoder::Zstd(
                zstd::stream::read::Decoder::new(source).map_err(DpkError::from_codec_io)?,
            ),
            CompMethod::ZstdDict => {
                let dict = dict.ok_or_else(|| {
                    DpkError::Compression("dictionary method without a dictionary".into())
                })?;
                BodyDecoder::Zstd(
                    zstd::stream::read::Decoder::with_dictionary(
                        BufReader::with_capacity(buf_size, source),
                        dict,
                    )
                    .map_err(DpkError::from_codec_io)?,
                )
            }
            CompMethod::Lz4 => BodyDecoder::Lz4(Box::new(lz4_flex::frame::FrameDecoder::new(
                BufReader::with_capacity(buf_size, source),
            ))),
        })
    }
}

impl<R: Read> Read for BodyDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BodyDecoder::Stored(r) => r.read(buf),
            BodyDecoder::Zlib(r) => r.read(buf),
            BodyDecoder::Zstd(r) => r.read(buf),
            BodyDecoder::Lz4(r) => r.read(buf),
        }
    }
}

/// Decompress a complete in-memory region. Used for the deprecated
/// compressed header/index region flags.
pub fn decode_region(method: CompMethod, dict: Option<&[u8]>, raw: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = BodyDecoder::new(method, dict, raw, DEFAULT_READ_BUFFER_SIZE)?;
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(DpkError::from_codec_io)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Vec<u8> {
        let mut v = Vec::new();
        for i in 0..4096u32 {
            v.extend_from_slice(&i.wrapping_mul(2654435761).to_le_bytes());
        }
        v.extend_from_slice(&[0u8; 8192]);
        v
    }

    fn round_trip(method: CompMethod, dict: Option<&[u8]>) {
        let data = sample();
        let mut enc = BodyEncoder::new(method, 3, dict, Vec::new()).unwrap();
        enc.write_all(&data).unwrap();
        let packed = enc.finish().unwrap();

        let mut dec = BodyDecoder::new(method, dict, Cursor::new(packed), 1024).unwrap();
        let mut back = vec![0u8; data.len()];
        dec.read_exact(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn round_trip_all_methods() {
        round_trip(CompMethod::Stored, None);
        round_trip(CompMethod::Zlib, None);
        round_trip(CompMethod::Zstd, None);
        round_trip(CompMethod::Lz4, None);
        let dict = sample()[..2048].to_vec();
        round_trip(CompMethod::ZstdDict, Some(&dict));
    }

    #[test]
    fn sync_flush_makes_prefix_decodable() {
        for method in [CompMethod::Zlib, CompMethod::Zstd, CompMethod::Lz4] {
            let mut enc = BodyEncoder::new(method, 3, None, Vec::new()).unwrap();
            enc.write_all(b"first entry").unwrap();
            enc.sync_flush().unwrap();

            // Everything before the sync point must decode without the
            // encoder ever finishing the stream.
            let packed = match &enc {
                BodyEncoder::Stored(w) => w.clone(),
                BodyEncoder::Zlib(w) => w.get_ref().clone(),
                BodyEncoder::Zstd(w) => w.get_ref().clone(),
                BodyEncoder::Lz4(w) => w.get_ref().clone(),
            };
            let mut dec = BodyDecoder::new(method, None, Cursor::new(packed), 1024).unwrap();
            let mut back = [0u8; 11];
            dec.read_exact(&mut back).unwrap();
            assert_eq!(&back, b"first entry", "method {:?}", method);
        }
    }

    #[test]
    fn dictionary_method_requires_dictionary() {
        assert!(matches!(
            BodyEncoder::new(CompMethod::ZstdDict, 3, None, Vec::new()),
            Err(DpkError::Compression(_))
        ));
        assert!(matches!(
            BodyDecoder::new(CompMethod::ZstdDict, None, Cursor::new(vec![]), 1024),
            Err(DpkError::Compression(_))
        ));
    }

    #[test]
    fn truncated_stream_reports_eof() {
        let data = sample();
        let mut enc = BodyEncoder::new(CompMethod::Zlib, 6, None, Vec::new()).unwrap();
        enc.write_all(&data).unwrap();
        let mut packed = enc.finish().unwrap();
        packed.truncate(packed.len() / 2);

        let mut dec = BodyDecoder::new(CompMethod::Zlib, None, Cursor::new(packed), 1024).unwrap();
        let mut back = vec![0u8; data.len()];
        assert!(dec.read_exact(&mut back).is_err());
    }

    #[test]
    fn counting_writer_tracks_bytes() {
        let mut w = CountingWriter::new(Vec::new());
        w.write_all(b"0123456789").unwrap();
        assert_eq!(w.written(), 10);
        assert_eq!(w.into_inner().len(), 10);
    }
}
