//! The `.dpk` container format — packaging many files into one archive with
//! optional streaming compression and per-file integrity checksums.
//!
//! An archive is built once and finalized, or opened read-only; the two
//! lifecycles never mix. Jointly compressed archives stream one codec
//! session across all entries and are read strictly in order; uncompressed
//! and per-file compressed archives support random access.
//!
//! ```no_run
//! use datapak::{ChecksumKind, CompMethod, Header, Reader, Writer};
//!
//! // Write
//! let header = Header::new(CompMethod::Zstd, 10, ChecksumKind::Crc32, false);
//! let mut writer = Writer::create("assets.dpk", header, Vec::new())?;
//! writer.add_file("logo.png", "logo.png", Vec::new())?;
//! writer.finalize()?;
//!
//! // Read
//! let mut reader = Reader::open("assets.dpk")?;
//! while let Some(entry) = reader.peek_index() {
//!     println!("{} ({} bytes)", entry.name(), entry.uncomp_size);
//!     let _data = reader.next_bytes()?;
//! }
//! # Ok::<(), datapak::DpkError>(())
//! ```

pub mod checksum;
pub mod codec;
pub mod error;
pub mod ext;
pub mod layout;
pub mod reader;
pub mod writer;

pub use checksum::ChecksumKind;
pub use error::{DpkError, Result};
pub use ext::{HeaderExt, IndexExt, OsExt, PosixExt, RandomAccessExt};
pub use layout::{CompMethod, Header, HeaderFlags, IndexEntry, SIGNATURE};
pub use reader::{ReadOptions, Reader};
pub use writer::{Progress, Writer};
