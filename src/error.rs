use std::io;
use std::result;

use thiserror::Error;

/// Errors reported while probing or unsealing a LUKS device.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Magic mismatch, malformed JSON metadata or a field out of range.
    #[error("invalid LUKS header: {0}")]
    InvalidHeader(String),
    /// The binary header checksum does not match its contents.
    #[error("header checksum mismatch")]
    BadChecksum,
    /// The header version is neither 1 nor 2.
    #[error("unsupported LUKS version {0}")]
    UnsupportedVersion(u16),
    /// Unrecognized hash, cipher, KDF or cipher-mode name.
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    /// Anti-forensic stripe count other than the LUKS standard 4000.
    #[error("unsupported anti-forensic stripe count {0}")]
    UnsupportedAf(u32),
    /// The keyslot id is missing, out of range or disabled.
    #[error("no active keyslot {0}")]
    NoSuchSlot(u32),
    /// No digest references the keyslot, or it references more than one
    /// storage segment.
    #[error("no usable digest for keyslot {0}")]
    NoDigest(u32),
    /// Digest verification of the recovered candidate key failed. Callers
    /// iterating over keyslots treat this as the try-next-slot signal.
    #[error("passphrase does not match")]
    PassphraseDoesNotMatch,
    /// Underlying read or size query failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A segment size is neither `"dynamic"` nor a usable byte count, or a
    /// keyslot area fails its alignment checks.
    #[error("malformed size: {0}")]
    MalformedSize(String),
    /// A LUKSMeta token slot failed its CRC check.
    #[error("corrupt token in slot {0}")]
    CorruptToken(u32),
}

pub type Result<T> = result::Result<T, Error>;

impl From<blkid_rs::Error> for Error {
    fn from(e: blkid_rs::Error) -> Self {
        match e {
            blkid_rs::Error::UnsupportedVersion(v) => Error::UnsupportedVersion(v),
            blkid_rs::Error::Read(e) => Error::Io(e),
            other => Error::InvalidHeader(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidHeader(format!("JSON metadata: {}", e))
    }
}
