use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DpkError>;

/// Archive-level failures surfaced by the reader, writer, and codecs.
#[derive(Error, Debug)]
pub enum DpkError {
    #[error("file does not begin with the DataPak signature")]
    BadSignature,

    #[error("checksum mismatch in {0}")]
    BadChecksum(String),

    #[error("archive does not support random access")]
    UnsupportedAccessMode,

    #[error("compression error: {0}")]
    Compression(String),

    #[error("unknown compression method tag {0:?}")]
    UnknownCompressionExtension(String),

    #[error("unexpected end of archive")]
    UnexpectedEof,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DpkError {
    /// Classify an `io::Error` produced while driving a codec stream.
    ///
    /// The zstd/flate2/lz4 adapters report stream corruption through
    /// `io::Error`; a short read is the archive ending mid-record, anything
    /// else is a genuine I/O failure.
    pub(crate) fn from_codec_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => DpkError::UnexpectedEof,
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::Other => {
                DpkError::Compression(e.to_string())
            }
            _ => DpkError::Io(e),
        }
    }
}
