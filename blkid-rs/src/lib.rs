//! Native decoding of LUKS on-disk superblocks.
//!
//! This crate reads the fixed-layout, big-endian binary headers of LUKS1 and
//! LUKS2 containers without any help from `libcryptsetup`. It performs the
//! structural validation a prober needs (magic, version, header size) and
//! exposes the decoded fields; all cryptographic verification is left to the
//! caller.

use std::io;
use std::io::Read;
use std::str;

use either::Either::{Left, Right};
use thiserror::Error;
use uuid::Uuid;

/// Keyslot state marker for an enabled LUKS1 keyslot.
pub const LUKS_KEY_ENABLED: u32 = 0x00AC_71F3;
/// Keyslot state marker for a disabled LUKS1 keyslot.
pub const LUKS_KEY_DISABLED: u32 = 0x0000_DEAD;

/// Number of keyslots in a LUKS1 header.
pub const LUKS1_NUM_KEYSLOTS: usize = 8;
/// Total size of the LUKS1 header including the keyslot array.
pub const LUKS1_HEADER_LEN: usize = 592;

/// Size of the LUKS2 binary header structure (the region up to
/// [`LUKS2_JSON_OFFSET`] is zero padding).
pub const LUKS2_BIN_HEADER_LEN: usize = 512;
/// Offset of the JSON metadata area within the LUKS2 header region.
pub const LUKS2_JSON_OFFSET: usize = 4096;
/// Offset of the checksum field within the LUKS2 binary header.
pub const LUKS2_CSUM_OFFSET: usize = 448;
/// Reserved length of the LUKS2 checksum field.
pub const LUKS2_CSUM_LEN: usize = 64;

const LUKS2_HDR_SIZE_MIN: u64 = 16384;
const LUKS2_HDR_SIZE_MAX: u64 = 4_194_304;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid LUKS magic")]
    InvalidMagic,
    #[error("unsupported LUKS version {0}")]
    UnsupportedVersion(u16),
    #[error("invalid header size {0}")]
    InvalidHeaderSize(u64),
    #[error("string field is not valid UTF-8: {0}")]
    InvalidStringEncoding(#[from] str::Utf8Error),
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("read error: {0}")]
    Read(#[from] io::Error),
    #[error("required string field is empty")]
    EmptyString,
}

/// A LUKS superblock of either supported version.
pub enum LuksHeader {
    Luks1(LuksHeaderV1),
    Luks2(LuksHeaderV2),
}

impl LuksHeader {
    /// Read a LUKS header from the start of `reader`.
    ///
    /// Only the primary header magic is accepted here; probing a secondary
    /// header copy has to decode the raw bytes explicitly.
    pub fn read<R: Read>(mut reader: R) -> Result<LuksHeader, Error> {
        let res = match raw::read_luks_header(&mut reader)? {
            Left(raw) => LuksHeader::Luks1(LuksHeaderV1 { raw }),
            Right(raw) => LuksHeader::Luks2(LuksHeaderV2 { raw }),
        };
        Ok(res)
    }
}

pub struct LuksHeaderV1 {
    raw: raw::Luks1Phdr,
}

pub struct LuksHeaderV2 {
    raw: raw::Luks2Phdr,
}

/// Operations common to every LUKS header version.
pub trait LuksVersionedHeader {
    fn version(&self) -> u16;
    fn uuid(&self) -> Result<Uuid, Error>;
}

impl LuksVersionedHeader for LuksHeader {
    fn version(&self) -> u16 {
        match self {
            LuksHeader::Luks1(h) => h.version(),
            LuksHeader::Luks2(h) => h.version(),
        }
    }

    fn uuid(&self) -> Result<Uuid, Error> {
        match self {
            LuksHeader::Luks1(h) => h.uuid(),
            LuksHeader::Luks2(h) => h.uuid(),
        }
    }
}

impl LuksVersionedHeader for LuksHeaderV1 {
    fn version(&self) -> u16 {
        self.raw.version
    }

    fn uuid(&self) -> Result<Uuid, Error> {
        raw::uuid_buf_to_uuid(&self.raw.uuid)
    }
}

impl LuksVersionedHeader for LuksHeaderV2 {
    fn version(&self) -> u16 {
        self.raw.version
    }

    fn uuid(&self) -> Result<Uuid, Error> {
        raw::uuid_buf_to_uuid(&self.raw.uuid)
    }
}

/// One entry of the LUKS1 keyslot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Luks1Keyslot {
    /// [`LUKS_KEY_ENABLED`] or [`LUKS_KEY_DISABLED`].
    pub active: u32,
    /// PBKDF2 iteration count for this slot.
    pub iterations: u32,
    /// PBKDF2 salt for this slot.
    pub salt: [u8; 32],
    /// Start of the key material area, in 512-byte sectors.
    pub key_material_offset: u32,
    /// Number of anti-forensic stripes.
    pub stripes: u32,
}

impl Luks1Keyslot {
    pub fn is_enabled(&self) -> bool {
        self.active == LUKS_KEY_ENABLED
    }
}

impl LuksHeaderV1 {
    pub fn cipher_name(&self) -> Result<&str, Error> {
        raw::u8_buf_to_str(&self.raw.cipher_name)?.ok_or(Error::EmptyString)
    }

    pub fn cipher_mode(&self) -> Result<&str, Error> {
        raw::u8_buf_to_str(&self.raw.cipher_mode)?.ok_or(Error::EmptyString)
    }

    pub fn hash_spec(&self) -> Result<&str, Error> {
        raw::u8_buf_to_str(&self.raw.hash_spec)?.ok_or(Error::EmptyString)
    }

    /// Start of the encrypted payload, in 512-byte sectors.
    pub fn payload_offset(&self) -> u32 {
        self.raw.payload_offset
    }

    /// Master key length in bytes.
    pub fn key_bytes(&self) -> u32 {
        self.raw.key_bytes
    }

    pub fn mk_digest(&self) -> &[u8; 20] {
        &self.raw.mk_digest
    }

    pub fn mk_digest_salt(&self) -> &[u8; 32] {
        &self.raw.mk_digest_salt
    }

    pub fn mk_digest_iterations(&self) -> u32 {
        self.raw.mk_digest_iterations
    }

    pub fn keyslots(&self) -> &[Luks1Keyslot; LUKS1_NUM_KEYSLOTS] {
        &self.raw.keyslots
    }
}

impl LuksHeaderV2 {
    pub fn label(&self) -> Result<Option<&str>, Error> {
        raw::u8_buf_to_str(&self.raw.label)
    }

    pub fn subsystem(&self) -> Result<Option<&str>, Error> {
        raw::u8_buf_to_str(&self.raw.subsystem)
    }

    pub fn checksum_alg(&self) -> Result<&str, Error> {
        raw::u8_buf_to_str(&self.raw.checksum_alg)?.ok_or(Error::EmptyString)
    }

    pub fn seqid(&self) -> u64 {
        self.raw.seqid
    }

    /// Combined size of the binary header and the JSON metadata area.
    pub fn header_size(&self) -> u64 {
        self.raw.hdr_size
    }

    pub fn header_offset(&self) -> u64 {
        self.raw.hdr_offset
    }

    pub fn salt(&self) -> &[u8; 64] {
        &self.raw.salt
    }

    pub fn checksum(&self) -> &[u8; LUKS2_CSUM_LEN] {
        &self.raw.csum
    }
}

mod raw {
    use std::io::{Cursor, Read};

    use byteorder::{BigEndian, ReadBytesExt};
    use either::Either;
    use either::Either::{Left, Right};

    use super::{
        Error, Luks1Keyslot, LUKS1_HEADER_LEN, LUKS1_NUM_KEYSLOTS, LUKS2_BIN_HEADER_LEN,
        LUKS2_HDR_SIZE_MAX, LUKS2_HDR_SIZE_MIN,
    };

    const V1: u16 = 1;
    const V2: u16 = 2;

    const LUKS_MAGIC_L: usize = 6;
    const LUKS_CIPHERNAME_L: usize = 32;
    const LUKS_CIPHERMODE_L: usize = 32;
    const LUKS_HASHSPEC_L: usize = 32;
    const LUKS_DIGESTSIZE: usize = 20;
    const LUKS_SALTSIZE: usize = 32;
    const UUID_STRING_L: usize = 40;
    const LUKS2_LABEL_L: usize = 48;
    const LUKS2_SALT_L: usize = 64;
    const LUKS2_CHECKSUM_ALG_L: usize = 32;
    const LUKS2_CHECKSUM_L: usize = 64;
    const LUKS2_PHDR_PADDING_L: usize = 184;

    const LUKS_MAGIC: &[u8; LUKS_MAGIC_L] = b"LUKS\xba\xbe";
    // magic of the secondary (backup) LUKS2 header copy
    const LUKS2_MAGIC_2ND: &[u8; LUKS_MAGIC_L] = b"SKUL\xba\xbe";

    pub struct Luks1Phdr {
        pub version: u16,
        pub cipher_name: [u8; LUKS_CIPHERNAME_L],
        pub cipher_mode: [u8; LUKS_CIPHERMODE_L],
        pub hash_spec: [u8; LUKS_HASHSPEC_L],
        pub payload_offset: u32,
        pub key_bytes: u32,
        pub mk_digest: [u8; LUKS_DIGESTSIZE],
        pub mk_digest_salt: [u8; LUKS_SALTSIZE],
        pub mk_digest_iterations: u32,
        pub uuid: [u8; UUID_STRING_L],
        pub keyslots: [Luks1Keyslot; LUKS1_NUM_KEYSLOTS],
    }

    pub struct Luks2Phdr {
        pub version: u16,
        pub hdr_size: u64,
        pub seqid: u64,
        pub label: [u8; LUKS2_LABEL_L],
        pub checksum_alg: [u8; LUKS2_CHECKSUM_ALG_L],
        pub salt: [u8; LUKS2_SALT_L],
        pub uuid: [u8; UUID_STRING_L],
        pub subsystem: [u8; LUKS2_LABEL_L],
        pub hdr_offset: u64,
        pub csum: [u8; LUKS2_CHECKSUM_L],
    }

    pub fn read_luks_header<R: Read>(
        reader: &mut R,
    ) -> Result<Either<Luks1Phdr, Luks2Phdr>, Error> {
        let mut start_buf = [0u8; 8];
        reader.read_exact(&mut start_buf)?;

        if start_buf[..LUKS_MAGIC_L] != LUKS_MAGIC[..] {
            return Err(Error::InvalidMagic);
        }
        let version = u16::from_be_bytes([start_buf[6], start_buf[7]]);

        match version {
            V1 => {
                let mut buf = vec![0u8; LUKS1_HEADER_LEN];
                buf[..8].copy_from_slice(&start_buf);
                reader.read_exact(&mut buf[8..])?;
                Luks1Phdr::from_buf(&buf).map(Left)
            }
            V2 => {
                let mut buf = vec![0u8; LUKS2_BIN_HEADER_LEN];
                buf[..8].copy_from_slice(&start_buf);
                reader.read_exact(&mut buf[8..])?;
                Luks2Phdr::from_buf(&buf).map(Right)
            }
            v => Err(Error::UnsupportedVersion(v)),
        }
    }

    fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> Result<[u8; N], Error> {
        let mut buf = [0u8; N];
        cursor.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_magic(cursor: &mut Cursor<&[u8]>, accept_secondary: bool) -> Result<(), Error> {
        let magic: [u8; LUKS_MAGIC_L] = read_array(cursor)?;
        if magic == *LUKS_MAGIC || (accept_secondary && magic == *LUKS2_MAGIC_2ND) {
            Ok(())
        } else {
            Err(Error::InvalidMagic)
        }
    }

    impl Luks1Phdr {
        pub fn from_buf(buf: &[u8]) -> Result<Luks1Phdr, Error> {
            let mut cursor = Cursor::new(buf);
            read_magic(&mut cursor, false)?;

            let version = cursor.read_u16::<BigEndian>()?;
            if version != V1 {
                return Err(Error::UnsupportedVersion(version));
            }

            let cipher_name = read_array(&mut cursor)?;
            let cipher_mode = read_array(&mut cursor)?;
            let hash_spec = read_array(&mut cursor)?;
            let payload_offset = cursor.read_u32::<BigEndian>()?;
            let key_bytes = cursor.read_u32::<BigEndian>()?;
            let mk_digest = read_array(&mut cursor)?;
            let mk_digest_salt = read_array(&mut cursor)?;
            let mk_digest_iterations = cursor.read_u32::<BigEndian>()?;
            let uuid = read_array(&mut cursor)?;

            let mut keyslots = [Luks1Keyslot {
                active: 0,
                iterations: 0,
                salt: [0u8; LUKS_SALTSIZE],
                key_material_offset: 0,
                stripes: 0,
            }; LUKS1_NUM_KEYSLOTS];
            for slot in keyslots.iter_mut() {
                slot.active = cursor.read_u32::<BigEndian>()?;
                slot.iterations = cursor.read_u32::<BigEndian>()?;
                slot.salt = read_array(&mut cursor)?;
                slot.key_material_offset = cursor.read_u32::<BigEndian>()?;
                slot.stripes = cursor.read_u32::<BigEndian>()?;
            }

            Ok(Luks1Phdr {
                version,
                cipher_name,
                cipher_mode,
                hash_spec,
                payload_offset,
                key_bytes,
                mk_digest,
                mk_digest_salt,
                mk_digest_iterations,
                uuid,
                keyslots,
            })
        }
    }

    impl Luks2Phdr {
        pub fn from_buf(buf: &[u8]) -> Result<Luks2Phdr, Error> {
            let mut cursor = Cursor::new(buf);
            read_magic(&mut cursor, true)?;

            let version = cursor.read_u16::<BigEndian>()?;
            if version != V2 {
                return Err(Error::UnsupportedVersion(version));
            }

            let hdr_size = cursor.read_u64::<BigEndian>()?;
            if !hdr_size.is_power_of_two()
                || hdr_size < LUKS2_HDR_SIZE_MIN
                || hdr_size > LUKS2_HDR_SIZE_MAX
            {
                return Err(Error::InvalidHeaderSize(hdr_size));
            }

            let seqid = cursor.read_u64::<BigEndian>()?;
            let label = read_array(&mut cursor)?;
            let checksum_alg = read_array(&mut cursor)?;
            let salt = read_array(&mut cursor)?;
            let uuid = read_array(&mut cursor)?;
            let subsystem = read_array(&mut cursor)?;
            let hdr_offset = cursor.read_u64::<BigEndian>()?;
            let _padding: [u8; LUKS2_PHDR_PADDING_L] = read_array(&mut cursor)?;
            let csum = read_array(&mut cursor)?;

            Ok(Luks2Phdr {
                version,
                hdr_size,
                seqid,
                label,
                checksum_alg,
                salt,
                uuid,
                subsystem,
                hdr_offset,
                csum,
            })
        }
    }

    pub fn u8_buf_to_str(buf: &[u8]) -> Result<Option<&str>, Error> {
        if let Some(pos) = buf.iter().position(|&c| c == 0) {
            if pos == 0 {
                Ok(None)
            } else {
                std::str::from_utf8(&buf[0..pos])
                    .map_err(From::from)
                    .map(Some)
            }
        } else {
            std::str::from_utf8(buf).map_err(From::from).map(Some)
        }
    }

    pub fn uuid_buf_to_uuid(buf: &[u8; UUID_STRING_L]) -> Result<uuid::Uuid, Error> {
        let uuid_str = u8_buf_to_str(buf)?.ok_or(Error::EmptyString)?;
        uuid::Uuid::parse_str(uuid_str).map_err(From::from)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn push_padded(buf: &mut Vec<u8>, value: &[u8], len: usize) {
        buf.extend_from_slice(value);
        buf.resize(buf.len() + len - value.len(), 0);
    }

    fn sample_luks1_header() -> Vec<u8> {
        let mut buf = Vec::with_capacity(LUKS1_HEADER_LEN);
        buf.extend_from_slice(b"LUKS\xba\xbe\x00\x01");
        push_padded(&mut buf, b"aes", 32);
        push_padded(&mut buf, b"xts-plain64", 32);
        push_padded(&mut buf, b"sha256", 32);
        buf.extend_from_slice(&4096u32.to_be_bytes()); // payload offset in sectors
        buf.extend_from_slice(&32u32.to_be_bytes()); // key bytes
        buf.extend_from_slice(&[0xd0u8; 20]); // mk digest
        buf.extend_from_slice(&[0x5au8; 32]); // mk digest salt
        buf.extend_from_slice(&1000u32.to_be_bytes());
        push_padded(&mut buf, b"a1b49d2d-8a7e-4b04-ab2a-89f3408fd198", 40);
        for i in 0..LUKS1_NUM_KEYSLOTS as u32 {
            let active = if i == 0 {
                LUKS_KEY_ENABLED
            } else {
                LUKS_KEY_DISABLED
            };
            buf.extend_from_slice(&active.to_be_bytes());
            buf.extend_from_slice(&(2000 + i).to_be_bytes());
            buf.extend_from_slice(&[i as u8; 32]);
            buf.extend_from_slice(&(8 + i * 512).to_be_bytes());
            buf.extend_from_slice(&4000u32.to_be_bytes());
        }
        assert_eq!(buf.len(), LUKS1_HEADER_LEN);
        buf
    }

    #[test]
    fn test_luks1_header_from_byte_buffer() {
        let bytes = sample_luks1_header();
        let header = LuksHeader::read(Cursor::new(&bytes)).unwrap();

        let v1 = match header {
            LuksHeader::Luks1(v1) => v1,
            _ => panic!("expected a LUKS1 header"),
        };
        assert_eq!(v1.version(), 1);
        assert_eq!(v1.cipher_name().unwrap(), "aes");
        assert_eq!(v1.cipher_mode().unwrap(), "xts-plain64");
        assert_eq!(v1.hash_spec().unwrap(), "sha256");
        assert_eq!(v1.payload_offset(), 4096);
        assert_eq!(v1.key_bytes(), 32);
        assert_eq!(v1.mk_digest(), &[0xd0u8; 20]);
        assert_eq!(v1.mk_digest_salt(), &[0x5au8; 32]);
        assert_eq!(v1.mk_digest_iterations(), 1000);
        assert_eq!(
            v1.uuid().unwrap(),
            Uuid::parse_str("a1b49d2d-8a7e-4b04-ab2a-89f3408fd198").unwrap()
        );

        let slots = v1.keyslots();
        assert!(slots[0].is_enabled());
        assert!(slots[1..].iter().all(|s| !s.is_enabled()));
        assert_eq!(slots[0].iterations, 2000);
        assert_eq!(slots[0].salt, [0u8; 32]);
        assert_eq!(slots[3].key_material_offset, 8 + 3 * 512);
        assert!(slots.iter().all(|s| s.stripes == 4000));
    }

    #[test]
    fn test_luks2_header_from_byte_buffer() {
        let header = b"LUKS\xba\xbe\x00\x02\x00\x00\x00\x00\x00\x00@\x00\x00\x00\x00\x00\x00\x00\x00\x03\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00sha256\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00g\x98\x84>\xba \x87\x16\xff\xdc\xdb\xc8\xe1\xd6\xd5\xf6\x01\x94\x9c^E\x84\x1e\xcc\x1c\xc5\xa6\xeb\xaePf\xde\x7f\x95\xfeL\x07\x1f46B\x95Z\xae\xf5\x8f\x88\xc0uj,\x08\xb4NW\r\x8c\xec\xb6D\x15P\x0e\x8f0748f429-3aad-426d-95b4-82005de5ad36\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00>\xc7\x12\xf52$\xac\xd3\xc7G()<\xbb\x8d\x0f\x14\x03\x1e\xe6\x83\xc9\xe8C\x00\xff\xdf\xb8\x8b\x08\x9f4\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        let mut cursor: Cursor<&[u8]> = Cursor::new(header);
        let header = LuksHeader::read(&mut cursor).unwrap();

        let v2 = match header {
            LuksHeader::Luks2(v2) => v2,
            _ => panic!("expected a LUKS2 header"),
        };
        assert_eq!(v2.version(), 2);
        assert_eq!(v2.header_size(), 16384);
        assert_eq!(v2.seqid(), 3);
        assert_eq!(v2.label().unwrap(), None);
        assert_eq!(v2.subsystem().unwrap(), None);
        assert_eq!(v2.checksum_alg().unwrap(), "sha256");
        assert_eq!(v2.header_offset(), 0);
        assert_eq!(
            v2.uuid().unwrap(),
            Uuid::parse_str("0748f429-3aad-426d-95b4-82005de5ad36").unwrap()
        );
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let bytes = b"NOPE\xba\xbe\x00\x01morebytes";
        assert!(matches!(
            LuksHeader::read(Cursor::new(&bytes[..])),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let bytes = b"LUKS\xba\xbe\x00\x03";
        assert!(matches!(
            LuksHeader::read(Cursor::new(&bytes[..])),
            Err(Error::UnsupportedVersion(3))
        ));
    }
}
