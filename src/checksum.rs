//! Per-file checksum catalog.
//!
//! The archive header carries a 6-bit checksum id; every entry stores the
//! digest of its uncompressed content in the trailing bytes of the 128-byte
//! index record. The header-region integrity checksum is always CRC32 and is
//! handled separately by the reader/writer.

use std::io::{self, Cursor, Read};

use crc::{Crc, CRC_64_ECMA_182, CRC_64_GO_ISO};
use md5::Md5;
use ripemd::Ripemd160;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512, Sha512_224, Sha512_256};

/// Seed used by the MurmurHash3 family, kept for compatibility with archives
/// produced by older format revisions.
pub const MURMUR_SEED: u32 = 0x6669_6c65;

static CRC64_ISO: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);
static CRC64_ECMA: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// The closed per-file checksum catalog. Ids are the on-disk 6-bit encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    None = 0,
    Ripemd160 = 1,
    Murmur3_32 = 2,
    Murmur3_128x86 = 3,
    Murmur3_128x64 = 4,
    Sha224 = 5,
    Sha256 = 6,
    Sha384 = 7,
    Sha512 = 8,
    Sha512_224 = 9,
    Sha512_256 = 10,
    Md5 = 11,
    Crc32 = 12,
    Crc64Iso = 13,
    Crc64Ecma = 14,
}

impl ChecksumKind {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => ChecksumKind::None,
            1 => ChecksumKind::Ripemd160,
            2 => ChecksumKind::Murmur3_32,
            3 => ChecksumKind::Murmur3_128x86,
            4 => ChecksumKind::Murmur3_128x64,
            5 => ChecksumKind::Sha224,
            6 => ChecksumKind::Sha256,
            7 => ChecksumKind::Sha384,
            8 => ChecksumKind::Sha512,
            9 => ChecksumKind::Sha512_224,
            10 => ChecksumKind::Sha512_256,
            11 => ChecksumKind::Md5,
            12 => ChecksumKind::Crc32,
            13 => ChecksumKind::Crc64Iso,
            14 => ChecksumKind::Crc64Ecma,
            _ => return None,
        })
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Byte length of the digest stored in the index-entry field tail.
    pub fn digest_len(self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Ripemd160 => 20,
            ChecksumKind::Murmur3_32 => 4,
            ChecksumKind::Murmur3_128x86 => 16,
            ChecksumKind::Murmur3_128x64 => 16,
            ChecksumKind::Sha224 => 28,
            ChecksumKind::Sha256 => 32,
            ChecksumKind::Sha384 => 48,
            ChecksumKind::Sha512 => 64,
            ChecksumKind::Sha512_224 => 28,
            ChecksumKind::Sha512_256 => 32,
            ChecksumKind::Md5 => 16,
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Crc64Iso => 8,
            ChecksumKind::Crc64Ecma => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumKind::None => "none",
            ChecksumKind::Ripemd160 => "ripemd160",
            ChecksumKind::Murmur3_32 => "murmur3-32",
            ChecksumKind::Murmur3_128x86 => "murmur3-128-x86",
            ChecksumKind::Murmur3_128x64 => "murmur3-128-x64",
            ChecksumKind::Sha224 => "sha224",
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha384 => "sha384",
            ChecksumKind::Sha512 => "sha512",
            ChecksumKind::Sha512_224 => "sha512-224",
            ChecksumKind::Sha512_256 => "sha512-256",
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Crc32 => "crc32",
            ChecksumKind::Crc64Iso => "crc64-iso",
            ChecksumKind::Crc64Ecma => "crc64-ecma",
        }
    }

    /// Inverse of [`name`](Self::name), used by the CLI.
    pub fn parse(s: &str) -> Option<Self> {
        (0u8..=14)
            .filter_map(Self::from_id)
            .find(|k| k.name() == s)
    }

    pub fn hasher(self) -> Hasher {
        match self {
            ChecksumKind::None => Hasher::None,
            ChecksumKind::Ripemd160 => Hasher::Ripemd160(Ripemd160::new()),
            ChecksumKind::Murmur3_32 | ChecksumKind::Murmur3_128x86 | ChecksumKind::Murmur3_128x64 => {
                Hasher::Murmur(self, Vec::new())
            }
            ChecksumKind::Sha224 => Hasher::Sha224(Sha224::new()),
            ChecksumKind::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumKind::Sha384 => Hasher::Sha384(Sha384::new()),
            ChecksumKind::Sha512 => Hasher::Sha512(Sha512::new()),
            ChecksumKind::Sha512_224 => Hasher::Sha512_224(Sha512_224::new()),
            ChecksumKind::Sha512_256 => Hasher::Sha512_256(Sha512_256::new()),
            ChecksumKind::Md5 => Hasher::Md5(Md5::new()),
            ChecksumKind::Crc32 => Hasher::Crc32(crc32fast::Hasher::new()),
            ChecksumKind::Crc64Iso => Hasher::Crc64(CRC64_ISO.digest()),
            ChecksumKind::Crc64Ecma => Hasher::Crc64(CRC64_ECMA.digest()),
        }
    }

    /// Digest a full in-memory buffer.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut h = self.hasher();
        h.update(data);
        h.finalize()
    }
}

/// Unified streaming hasher: `update` any number of times, `finalize` once.
pub enum Hasher {
    None,
    Ripemd160(Ripemd160),
    /// The murmur3 crate digests a complete `Read` source in one shot, so
    /// the streamed input is staged here until `finalize`.
    Murmur(ChecksumKind, Vec<u8>),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Sha512_224(Sha512_224),
    Sha512_256(Sha512_256),
    Md5(Md5),
    Crc32(crc32fast::Hasher),
    Crc64(crc::Digest<'static, u64>),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::None => {}
            Hasher::Ripemd160(h) => h.update(data),
            Hasher::Murmur(_, buf) => buf.extend_from_slice(data),
            Hasher::Sha224(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Sha512_224(h) => h.update(data),
            Hasher::Sha512_256(h) => h.update(data),
            Hasher::Md5(h) => h.update(data),
            Hasher::Crc32(h) => h.update(data),
            Hasher::Crc64(h) => h.update(data),
        }
    }

    /// Produce exactly `digest_len` bytes. CRC values are emitted
    /// little-endian, matching the on-disk integer convention.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::None => Vec::new(),
            Hasher::Ripemd160(h) => h.finalize().to_vec(),
            Hasher::Murmur(kind, buf) => murmur_digest(kind, &buf),
            Hasher::Sha224(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Sha512_224(h) => h.finalize().to_vec(),
            Hasher::Sha512_256(h) => h.finalize().to_vec(),
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Crc32(h) => h.finalize().to_le_bytes().to_vec(),
            Hasher::Crc64(h) => h.finalize().to_le_bytes().to_vec(),
        }
    }
}

fn murmur_digest(kind: ChecksumKind, buf: &[u8]) -> Vec<u8> {
    let mut cur = Cursor::new(buf);
    // Reads from an in-memory cursor cannot fail.
    match kind {
        ChecksumKind::Murmur3_32 => murmur3::murmur3_32(&mut cur, MURMUR_SEED)
            .expect("in-memory read")
            .to_le_bytes()
            .to_vec(),
        ChecksumKind::Murmur3_128x86 => murmur3::murmur3_x86_128(&mut cur, MURMUR_SEED)
            .expect("in-memory read")
            .to_le_bytes()
            .to_vec(),
        ChecksumKind::Murmur3_128x64 => murmur3::murmur3_x64_128(&mut cur, MURMUR_SEED)
            .expect("in-memory read")
            .to_le_bytes()
            .to_vec(),
        _ => unreachable!("not a murmur checksum kind"),
    }
}

/// Stream a source through a hasher in `buf_size` chunks.
///
/// Returns the total byte count alongside the digest; the writer uses this
/// as the pre-pass over each input file before any index entry is built.
pub fn hash_reader<R: Read>(
    kind: ChecksumKind,
    reader: &mut R,
    buf_size: usize,
) -> io::Result<(u64, Vec<u8>)> {
    let mut hasher = kind.hasher();
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_digest(kind: ChecksumKind, data: &[u8]) -> String {
        hex::encode(kind.digest(data))
    }

    #[test]
    fn catalog_digest_lengths() {
        for id in 0u8..=14 {
            let kind = ChecksumKind::from_id(id).unwrap();
            assert_eq!(kind.digest(b"abc").len(), kind.digest_len());
            assert_eq!(kind.id(), id);
        }
        assert!(ChecksumKind::from_id(15).is_none());
        assert!(ChecksumKind::from_id(63).is_none());
    }

    #[test]
    fn crc32_known_value() {
        // CRC32("A") = 0xD3D99E8B, stored little-endian.
        assert_eq!(
            ChecksumKind::Crc32.digest(b"A"),
            vec![0x8B, 0x9E, 0xD9, 0xD3]
        );
    }

    #[test]
    fn crc64_check_values() {
        // Registry check values for the "123456789" test string.
        let iso = ChecksumKind::Crc64Iso.digest(b"123456789");
        assert_eq!(u64::from_le_bytes(iso.try_into().unwrap()), 0xB90956C775A41001);
        let ecma = ChecksumKind::Crc64Ecma.digest(b"123456789");
        assert_eq!(u64::from_le_bytes(ecma.try_into().unwrap()), 0x6C40DF5F0B497347);
    }

    #[test]
    fn cryptographic_known_vectors() {
        assert_eq!(
            hex_digest(ChecksumKind::Md5, b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            hex_digest(ChecksumKind::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex_digest(ChecksumKind::Sha224, b"abc"),
            "23097d223405d8228642a477bda255b32aadbce4bda0b3f7e36c9da7"
        );
        assert_eq!(
            hex_digest(ChecksumKind::Ripemd160, b"abc"),
            "8eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
        );
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data: Vec<u8> = (0u8..=255).cycle().take(100_000).collect();
        for id in 0u8..=14 {
            let kind = ChecksumKind::from_id(id).unwrap();
            let (len, digest) = hash_reader(kind, &mut &data[..], 4096).unwrap();
            assert_eq!(len, data.len() as u64);
            assert_eq!(digest, kind.digest(&data), "kind {:?}", kind);
        }
    }

    #[test]
    fn murmur_wiring() {
        let digest = ChecksumKind::Murmur3_32.digest(b"hello");
        let expected = murmur3::murmur3_32(&mut Cursor::new(b"hello"), MURMUR_SEED).unwrap();
        assert_eq!(digest, expected.to_le_bytes().to_vec());
    }

    #[test]
    fn name_round_trip() {
        for id in 0u8..=14 {
            let kind = ChecksumKind::from_id(id).unwrap();
            assert_eq!(ChecksumKind::parse(kind.name()), Some(kind));
        }
        assert!(ChecksumKind::parse("blake3").is_none());
    }
}
