//! Extension registry — optional typed metadata attached to the header or to
//! individual index entries.
//!
//! Header extensions carry a 12-byte prefix `{signature: [u8; 8], size: u32}`
//! where `size` counts the prefix; index extensions carry an 8-byte prefix
//! `{signature: [u8; 6], size: u16}`. Unknown signatures are preserved as
//! opaque byte blobs and round-trip unchanged when an archive is re-written.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::{DpkError, Result};

/// Prefix length of a header extension record.
pub const HEADER_EXT_PREFIX: usize = 12;
/// Prefix length of an index extension record.
pub const INDEX_EXT_PREFIX: usize = 8;

pub const SIG_DICTIONARY: [u8; 8] = *b"CMPRDICT";
pub const SIG_DICTIONARY_FILE: [u8; 8] = *b"CMPRDIxf";
pub const SIG_OS: [u8; 6] = *b"OSExt ";
pub const SIG_OS_POSIX: [u8; 6] = *b"OSExtP";
pub const SIG_RANDOM_ACCESS: [u8; 6] = *b"RandAc";

// ── Header extensions ────────────────────────────────────────────────────────

/// A header-level extension record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderExt {
    /// `"CMPRDICT"` — inline compression dictionary bytes.
    Dictionary(Vec<u8>),
    /// `"CMPRDIxf"` — NUL-terminated path of an external dictionary file.
    DictionaryFile(String),
    /// Any unrecognized signature, preserved byte-exactly.
    Unknown { signature: [u8; 8], payload: Vec<u8> },
}

impl HeaderExt {
    pub fn signature(&self) -> [u8; 8] {
        match self {
            HeaderExt::Dictionary(_) => SIG_DICTIONARY,
            HeaderExt::DictionaryFile(_) => SIG_DICTIONARY_FILE,
            HeaderExt::Unknown { signature, .. } => *signature,
        }
    }

    /// On-disk record length including the 12-byte prefix.
    pub fn size(&self) -> u32 {
        let payload = match self {
            HeaderExt::Dictionary(bytes) => bytes.len(),
            HeaderExt::DictionaryFile(path) => path.len() + 1,
            HeaderExt::Unknown { payload, .. } => payload.len(),
        };
        (HEADER_EXT_PREFIX + payload) as u32
    }

    /// Registry dispatch over a raw `(signature, payload)` record.
    pub fn parse(signature: [u8; 8], payload: Vec<u8>) -> Self {
        match signature {
            SIG_DICTIONARY => HeaderExt::Dictionary(payload),
            SIG_DICTIONARY_FILE => {
                let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
                HeaderExt::DictionaryFile(String::from_utf8_lossy(&payload[..end]).into_owned())
            }
            _ => HeaderExt::Unknown { signature, payload },
        }
    }

    /// Full record bytes, prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        out.extend_from_slice(&self.signature());
        out.extend_from_slice(&self.size().to_le_bytes());
        match self {
            HeaderExt::Dictionary(bytes) => out.extend_from_slice(bytes),
            HeaderExt::DictionaryFile(path) => {
                out.extend_from_slice(path.as_bytes());
                out.push(0);
            }
            HeaderExt::Unknown { payload, .. } => out.extend_from_slice(payload),
        }
        out
    }
}

// ── Index extensions ─────────────────────────────────────────────────────────

/// Filesystem metadata attached to an entry: the `"OSExt "` record.
///
/// `path` is the filename extension plus relative path, 0xFF-padded to 200
/// bytes; timestamps are POSIX seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsExt {
    pub path: [u8; 200],
    pub created: u64,
    pub modified: u64,
    pub attributes: [u32; 2],
}

impl OsExt {
    pub const PAYLOAD_LEN: usize = 200 + 8 + 8 + 8;

    pub fn new(path: &str, created: u64, modified: u64) -> Self {
        let mut padded = [0xffu8; 200];
        let n = path.len().min(200);
        padded[..n].copy_from_slice(&path.as_bytes()[..n]);
        Self {
            path: padded,
            created,
            modified,
            attributes: [0; 2],
        }
    }

    /// Capture timestamps from filesystem metadata. Filesystems without a
    /// creation time report it as zero.
    pub fn from_metadata(path: &Path, meta: &fs::Metadata) -> Self {
        let secs = |t: io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0)
        };
        Self::new(
            &path.to_string_lossy(),
            secs(meta.created()),
            secs(meta.modified()),
        )
    }

    pub fn path(&self) -> String {
        let end = self.path.iter().position(|&b| b == 0xff).unwrap_or(200);
        String::from_utf8_lossy(&self.path[..end]).into_owned()
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.path);
        out.extend_from_slice(&self.created.to_le_bytes());
        out.extend_from_slice(&self.modified.to_le_bytes());
        out.extend_from_slice(&self.attributes[0].to_le_bytes());
        out.extend_from_slice(&self.attributes[1].to_le_bytes());
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != Self::PAYLOAD_LEN {
            return None;
        }
        let mut r = payload;
        let mut path = [0u8; 200];
        r.read_exact(&mut path).ok()?;
        Some(Self {
            path,
            created: r.read_u64::<LittleEndian>().ok()?,
            modified: r.read_u64::<LittleEndian>().ok()?,
            attributes: [
                r.read_u32::<LittleEndian>().ok()?,
                r.read_u32::<LittleEndian>().ok()?,
            ],
        })
    }
}

/// POSIX ownership and permissions: the `"OSExtP"` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixExt {
    pub user_id: u32,
    pub group_id: u32,
    pub user_name: [u8; 32],
    pub group_name: [u8; 32],
    pub access_flags: u32,
}

impl PosixExt {
    pub const PAYLOAD_LEN: usize = 4 + 4 + 32 + 32 + 4;

    pub const OTHER_EXEC: u32 = 0x001;
    pub const OTHER_WRITE: u32 = 0x002;
    pub const OTHER_READ: u32 = 0x004;
    pub const GROUP_EXEC: u32 = 0x008;
    pub const GROUP_WRITE: u32 = 0x010;
    pub const GROUP_READ: u32 = 0x020;
    pub const OWNER_EXEC: u32 = 0x040;
    pub const OWNER_WRITE: u32 = 0x080;
    pub const OWNER_READ: u32 = 0x100;

    pub fn new(user_id: u32, group_id: u32, access_flags: u32) -> Self {
        Self {
            user_id,
            group_id,
            user_name: [0; 32],
            group_name: [0; 32],
            access_flags,
        }
    }

    /// Map the nine low permission bits of a Unix `st_mode`.
    ///
    /// The archive encoding and `st_mode` agree bit-for-bit on the 0o777
    /// range (other/group/owner triplets from the low end).
    pub fn from_unix_mode(user_id: u32, group_id: u32, mode: u32) -> Self {
        Self::new(user_id, group_id, mode & 0o777)
    }

    pub fn to_unix_mode(&self) -> u32 {
        self.access_flags & 0o777
    }

    #[cfg(unix)]
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self::from_unix_mode(meta.uid(), meta.gid(), meta.mode())
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.user_id.to_le_bytes());
        out.extend_from_slice(&self.group_id.to_le_bytes());
        out.extend_from_slice(&self.user_name);
        out.extend_from_slice(&self.group_name);
        out.extend_from_slice(&self.access_flags.to_le_bytes());
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != Self::PAYLOAD_LEN {
            return None;
        }
        let mut r = payload;
        let user_id = r.read_u32::<LittleEndian>().ok()?;
        let group_id = r.read_u32::<LittleEndian>().ok()?;
        let mut user_name = [0u8; 32];
        r.read_exact(&mut user_name).ok()?;
        let mut group_name = [0u8; 32];
        r.read_exact(&mut group_name).ok()?;
        Some(Self {
            user_id,
            group_id,
            user_name,
            group_name,
            access_flags: r.read_u32::<LittleEndian>().ok()?,
        })
    }
}

/// Per-file random-access position: the `"RandAc"` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomAccessExt {
    pub position: u64,
    /// Codec-dependent resume state.
    pub state: [u8; 16],
}

impl RandomAccessExt {
    pub const PAYLOAD_LEN: usize = 8 + 16;

    fn encode_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.position.to_le_bytes());
        out.extend_from_slice(&self.state);
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != Self::PAYLOAD_LEN {
            return None;
        }
        let mut r = payload;
        let position = r.read_u64::<LittleEndian>().ok()?;
        let mut state = [0u8; 16];
        r.read_exact(&mut state).ok()?;
        Some(Self { position, state })
    }
}

/// An index-level extension record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexExt {
    Os(OsExt),
    Posix(PosixExt),
    RandomAccess(RandomAccessExt),
    Unknown { signature: [u8; 6], payload: Vec<u8> },
}

impl IndexExt {
    pub fn signature(&self) -> [u8; 6] {
        match self {
            IndexExt::Os(_) => SIG_OS,
            IndexExt::Posix(_) => SIG_OS_POSIX,
            IndexExt::RandomAccess(_) => SIG_RANDOM_ACCESS,
            IndexExt::Unknown { signature, .. } => *signature,
        }
    }

    /// On-disk record length including the 8-byte prefix.
    pub fn size(&self) -> u16 {
        let payload = match self {
            IndexExt::Os(_) => OsExt::PAYLOAD_LEN,
            IndexExt::Posix(_) => PosixExt::PAYLOAD_LEN,
            IndexExt::RandomAccess(_) => RandomAccessExt::PAYLOAD_LEN,
            IndexExt::Unknown { payload, .. } => payload.len(),
        };
        (INDEX_EXT_PREFIX + payload) as u16
    }

    /// Registry dispatch. A recognized signature whose payload does not
    /// parse is kept opaque rather than rejected, so damaged or
    /// future-revision records still round-trip.
    pub fn parse(signature: [u8; 6], payload: Vec<u8>) -> Self {
        match signature {
            SIG_OS => match OsExt::parse(&payload) {
                Some(ext) => IndexExt::Os(ext),
                None => IndexExt::Unknown { signature, payload },
            },
            SIG_OS_POSIX => match PosixExt::parse(&payload) {
                Some(ext) => IndexExt::Posix(ext),
                None => IndexExt::Unknown { signature, payload },
            },
            SIG_RANDOM_ACCESS => match RandomAccessExt::parse(&payload) {
                Some(ext) => IndexExt::RandomAccess(ext),
                None => IndexExt::Unknown { signature, payload },
            },
            _ => IndexExt::Unknown { signature, payload },
        }
    }

    /// Full record bytes, prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        out.extend_from_slice(&self.signature());
        out.extend_from_slice(&self.size().to_le_bytes());
        match self {
            IndexExt::Os(ext) => ext.encode_payload(&mut out),
            IndexExt::Posix(ext) => ext.encode_payload(&mut out),
            IndexExt::RandomAccess(ext) => ext.encode_payload(&mut out),
            IndexExt::Unknown { payload, .. } => out.extend_from_slice(payload),
        }
        out
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.encode())
    }
}

/// Locate the compression dictionary among the header extensions.
///
/// Inline dictionary bytes win; otherwise the named external file is loaded.
/// A dictionary file that cannot be read is a fatal `Compression` error.
pub fn resolve_dictionary(exts: &[HeaderExt]) -> Result<Option<Vec<u8>>> {
    for ext in exts {
        match ext {
            HeaderExt::Dictionary(bytes) => return Ok(Some(bytes.clone())),
            HeaderExt::DictionaryFile(path) => {
                return match fs::read(path) {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) => Err(DpkError::Compression(format!(
                        "failed to load dictionary file {path:?}: {e}"
                    ))),
                }
            }
            HeaderExt::Unknown { .. } => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_index(ext: IndexExt) {
        let bytes = ext.encode();
        assert_eq!(bytes.len(), ext.size() as usize);
        let mut sig = [0u8; 6];
        sig.copy_from_slice(&bytes[..6]);
        let size = u16::from_le_bytes([bytes[6], bytes[7]]);
        assert_eq!(size as usize, bytes.len());
        assert_eq!(IndexExt::parse(sig, bytes[8..].to_vec()), ext);
    }

    #[test]
    fn os_ext_round_trip() {
        let mut ext = OsExt::new("png assets/logo.png", 1_700_000_000, 1_700_000_100);
        ext.attributes = [0x01, 0x8000_0000];
        assert_eq!(ext.path(), "png assets/logo.png");
        round_trip_index(IndexExt::Os(ext));
    }

    #[test]
    fn posix_ext_round_trip() {
        let ext = PosixExt::from_unix_mode(1000, 1000, 0o754);
        assert_eq!(ext.to_unix_mode(), 0o754);
        assert_eq!(
            ext.access_flags,
            PosixExt::OWNER_READ
                | PosixExt::OWNER_WRITE
                | PosixExt::OWNER_EXEC
                | PosixExt::GROUP_READ
                | PosixExt::GROUP_EXEC
                | PosixExt::OTHER_READ
        );
        round_trip_index(IndexExt::Posix(ext));
    }

    #[test]
    fn random_access_ext_round_trip() {
        round_trip_index(IndexExt::RandomAccess(RandomAccessExt {
            position: 0xDEAD_BEEF,
            state: [7u8; 16],
        }));
    }

    #[test]
    fn unknown_index_ext_is_opaque() {
        round_trip_index(IndexExt::Unknown {
            signature: *b"FUTUR1",
            payload: vec![1, 2, 3, 4, 5],
        });
    }

    #[test]
    fn recognized_signature_with_bad_payload_stays_opaque() {
        let ext = IndexExt::parse(SIG_OS_POSIX, vec![0u8; 3]);
        assert!(matches!(ext, IndexExt::Unknown { .. }));
    }

    #[test]
    fn dictionary_header_ext() {
        let ext = HeaderExt::Dictionary(vec![0xAA; 32]);
        let bytes = ext.encode();
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[..8], b"CMPRDICT");
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 44);
        assert_eq!(HeaderExt::parse(SIG_DICTIONARY, bytes[12..].to_vec()), ext);
    }

    #[test]
    fn dictionary_file_header_ext_nul_terminated() {
        let ext = HeaderExt::DictionaryFile("dicts/assets.dict".into());
        let bytes = ext.encode();
        assert_eq!(*bytes.last().unwrap(), 0);
        assert_eq!(
            HeaderExt::parse(SIG_DICTIONARY_FILE, bytes[12..].to_vec()),
            ext
        );
    }

    #[test]
    fn unreadable_dictionary_file_is_a_compression_error() {
        let exts = [HeaderExt::DictionaryFile("/no/such/dictionary".into())];
        assert!(matches!(
            resolve_dictionary(&exts),
            Err(DpkError::Compression(_))
        ));
    }

    #[test]
    fn unknown_header_ext_is_opaque() {
        let ext = HeaderExt::Unknown {
            signature: *b"XXNOTICE",
            payload: b"hello".to_vec(),
        };
        let bytes = ext.encode();
        assert_eq!(HeaderExt::parse(*b"XXNOTICE", bytes[12..].to_vec()), ext);
    }
}
