//! High-level API to work with LUKS encrypted devices (disks)
//! The main focus is on probing headers and unsealing keyslots

use std::fs::File;
use std::path::Path;

use blkid_rs::{LuksHeader, LuksVersionedHeader};
use log::debug;

use crate::error::{Error, Result};
use crate::luks1::Luks1Device;
use crate::luks2::Luks2Device;
use crate::volume::Volume;

/// Activation flag understood by dm-crypt.
pub const FLAG_ALLOW_DISCARDS: &str = "allow-discards";
/// Activation flag understood by dm-crypt.
pub const FLAG_SAME_CPU_CRYPT: &str = "same-cpu-crypt";
/// Activation flag understood by dm-crypt.
pub const FLAG_SUBMIT_FROM_CRYPT_CPUS: &str = "submit-from-crypt-cpus";
/// Activation flag understood by dm-crypt (Linux 5.9 or newer).
pub const FLAG_NO_READ_WORKQUEUE: &str = "no-read-workqueue";
/// Activation flag understood by dm-crypt (Linux 5.9 or newer).
pub const FLAG_NO_WRITE_WORKQUEUE: &str = "no-write-workqueue";

/// Slot metadata attached to a device: LUKS2 JSON tokens, or LUKSMeta
/// entries on LUKS1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: u32,
    /// Keyslots the token is bound to.
    pub slots: Vec<u32>,
    /// Token type, e.g. `clevis` or `systemd-fido2`. Empty when unknown.
    pub token_type: String,
    /// Raw token content: JSON bytes for LUKS2, the stored blob for
    /// LUKSMeta.
    pub payload: Vec<u8>,
}

/// Open a LUKS device at the given path and parse its header.
///
/// The version is dispatched from the first 8 bytes; both LUKS1 and LUKS2
/// devices come back behind the same [`LuksDevice`] vocabulary.
pub fn open<P: AsRef<Path>>(path: P) -> Result<LuksDevice> {
    let path = path.as_ref();
    let file = File::open(path)?;
    debug!("probing LUKS header on {}", path.display());

    match LuksHeader::read(&file)? {
        LuksHeader::Luks1(hdr) => Ok(LuksDevice::Luks1(Luks1Device::new(
            path.to_path_buf(),
            file,
            hdr,
        )?)),
        LuksHeader::Luks2(hdr) => Ok(LuksDevice::Luks2(Luks2Device::new(
            path.to_path_buf(),
            file,
            hdr,
        )?)),
    }
}

/// Read the LUKS version used by a LUKS container without opening the device
pub fn luks_version<P: AsRef<Path>>(path: P) -> Result<u16> {
    let device_file = File::open(path.as_ref())?;
    let header = LuksHeader::read(device_file)?;
    Ok(header.version())
}

/// Read the UUID of a LUKS container without opening the device
pub fn luks_uuid<P: AsRef<Path>>(path: P) -> Result<String> {
    let device_file = File::open(path.as_ref())?;
    let uuid = LuksHeader::read(device_file)?.uuid()?;
    Ok(uuid.to_string())
}

/// An opened LUKS device of either version, sharing one operation
/// vocabulary.
pub enum LuksDevice {
    Luks1(Luks1Device),
    Luks2(Luks2Device),
}

impl LuksDevice {
    /// On-disk format version, 1 or 2.
    pub fn version(&self) -> u16 {
        match self {
            LuksDevice::Luks1(_) => 1,
            LuksDevice::Luks2(_) => 2,
        }
    }

    /// Path of the backing device or image file.
    pub fn path(&self) -> &Path {
        match self {
            LuksDevice::Luks1(d) => d.path(),
            LuksDevice::Luks2(d) => d.path(),
        }
    }

    /// Partition UUID in canonical dashed form.
    pub fn uuid(&self) -> &str {
        match self {
            LuksDevice::Luks1(d) => d.uuid(),
            LuksDevice::Luks2(d) => d.uuid(),
        }
    }

    /// Usable keyslot ids, sorted by unlock priority.
    pub fn slots(&self) -> Vec<u32> {
        match self {
            LuksDevice::Luks1(d) => d.slots(),
            LuksDevice::Luks2(d) => d.slots(),
        }
    }

    /// Slot metadata tokens stored on the device.
    pub fn tokens(&self) -> Result<Vec<Token>> {
        match self {
            LuksDevice::Luks1(d) => d.tokens(),
            LuksDevice::Luks2(d) => d.tokens(),
        }
    }

    /// Activation flags that will be attached to unsealed volumes. LUKS2
    /// devices start out with their persistent flags.
    pub fn flags_get(&self) -> &[String] {
        match self {
            LuksDevice::Luks1(d) => &d.flags,
            LuksDevice::Luks2(d) => &d.flags,
        }
    }

    /// Add activation flags for subsequent unseals. Flags are kept verbatim,
    /// duplicates included; names the kernel does not understand surface
    /// when the mapper table is created, not here. The persistent LUKS2
    /// flags on disk are not touched.
    pub fn flags_add<I, S>(&mut self, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = match self {
            LuksDevice::Luks1(d) => &mut d.flags,
            LuksDevice::Luks2(d) => &mut d.flags,
        };
        list.extend(flags.into_iter().map(Into::into));
    }

    /// Clear all activation flags.
    pub fn flags_clear(&mut self) {
        match self {
            LuksDevice::Luks1(d) => d.flags.clear(),
            LuksDevice::Luks2(d) => d.flags.clear(),
        }
    }

    /// Recover the master key protected by the given keyslot and describe
    /// the encrypted data segment.
    pub fn unseal_volume(&self, slot_id: u32, passphrase: &[u8]) -> Result<Volume> {
        match self {
            LuksDevice::Luks1(d) => d.unseal_volume(slot_id, passphrase),
            LuksDevice::Luks2(d) => d.unseal_volume(slot_id, passphrase),
        }
    }

    /// Try every usable keyslot in priority order until one accepts the
    /// passphrase.
    pub fn unseal_any_volume(&self, passphrase: &[u8]) -> Result<Volume> {
        for slot_id in self.slots() {
            match self.unseal_volume(slot_id, passphrase) {
                Ok(volume) => return Ok(volume),
                Err(Error::PassphraseDoesNotMatch) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::PassphraseDoesNotMatch)
    }

    /// Close the device, releasing the file handle.
    pub fn close(self) -> Result<()> {
        // the handle is dropped here; positional reads keep no other state
        Ok(())
    }
}
