//! The artifact produced by a successful unseal: the recovered master key
//! plus the geometry of the encrypted data segment, i.e. everything a
//! dm-crypt activation layer needs to map the volume.

use std::fmt;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

/// On-disk format of the unsealed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuksType {
    Luks1,
    Luks2,
}

impl fmt::Display for LuksType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuksType::Luks1 => f.write_str("LUKS1"),
            LuksType::Luks2 => f.write_str("LUKS2"),
        }
    }
}

/// An unsealed LUKS volume.
///
/// The volume exclusively owns the recovered master key; the buffer is
/// zeroized when the volume is dropped. Callers that hand the key to a
/// device-mapper table are responsible for scrubbing their own copies.
pub struct Volume {
    pub(crate) backing_device: PathBuf,
    pub(crate) flags: Vec<String>,
    pub(crate) uuid: String,
    pub(crate) master_key: Zeroizing<Vec<u8>>,
    pub(crate) luks_type: LuksType,
    pub(crate) storage_encryption: String,
    pub(crate) storage_iv_tweak: u64,
    pub(crate) storage_sector_size: u64,
    pub(crate) storage_offset: u64,
    pub(crate) storage_size: u64,
}

impl Volume {
    /// Path of the device or image file holding the ciphertext.
    pub fn backing_device(&self) -> &Path {
        &self.backing_device
    }

    /// Activation flags captured from the device at unseal time.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The recovered master volume key.
    pub fn master_key(&self) -> &[u8] {
        &self.master_key
    }

    pub fn luks_type(&self) -> LuksType {
        self.luks_type
    }

    /// Encryption spec of the data segment in dm-crypt notation, e.g.
    /// `aes-xts-plain64`.
    pub fn storage_encryption(&self) -> &str {
        &self.storage_encryption
    }

    /// Initial sector number for the IV generator.
    pub fn storage_iv_tweak(&self) -> u64 {
        self.storage_iv_tweak
    }

    pub fn storage_sector_size(&self) -> u64 {
        self.storage_sector_size
    }

    /// Start of the ciphertext region, in bytes.
    pub fn storage_offset(&self) -> u64 {
        self.storage_offset
    }

    /// Length of the ciphertext region, in bytes.
    pub fn storage_size(&self) -> u64 {
        self.storage_size
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        f.debug_struct("Volume")
            .field("backing_device", &self.backing_device)
            .field("flags", &self.flags)
            .field("uuid", &self.uuid)
            .field("master_key", &format_args!("[{} bytes]", self.master_key.len()))
            .field("luks_type", &self.luks_type)
            .field("storage_encryption", &self.storage_encryption)
            .field("storage_iv_tweak", &self.storage_iv_tweak)
            .field("storage_sector_size", &self.storage_sector_size)
            .field("storage_offset", &self.storage_offset)
            .field("storage_size", &self.storage_size)
            .finish()
    }
}
