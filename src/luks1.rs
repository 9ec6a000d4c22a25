//! LUKS1 device handling: fixed binary header, PBKDF2-only keyslots, and
//! master-key recovery through the anti-forensic merge.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use blkid_rs::{LuksHeaderV1, LuksVersionedHeader};
use log::debug;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::af;
use crate::api::Token;
use crate::crypto::{AreaCipher, HashAlgo};
use crate::error::{Error, Result};
use crate::luksmeta;
use crate::util::file_size;
use crate::volume::{LuksType, Volume};
use crate::{SECTOR_SIZE, STRIPES};

// stored digest length in the binary header
const MK_DIGEST_LEN: usize = 20;

/// An opened LUKS1 device.
pub struct Luks1Device {
    path: PathBuf,
    file: File,
    hdr: LuksHeaderV1,
    uuid: String,
    pub(crate) flags: Vec<String>,
}

impl Luks1Device {
    pub(crate) fn new(path: PathBuf, file: File, hdr: LuksHeaderV1) -> Result<Luks1Device> {
        let uuid = hdr.uuid()?.to_string();
        debug!("opened LUKS1 device {} ({})", path.display(), uuid);
        Ok(Luks1Device {
            path,
            file,
            hdr,
            uuid,
            flags: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn cipher_name(&self) -> Result<&str> {
        Ok(self.hdr.cipher_name()?)
    }

    pub fn cipher_mode(&self) -> Result<&str> {
        Ok(self.hdr.cipher_mode()?)
    }

    pub fn hash_spec(&self) -> Result<&str> {
        Ok(self.hdr.hash_spec()?)
    }

    /// Start of the encrypted payload, in sectors.
    pub fn payload_offset(&self) -> u32 {
        self.hdr.payload_offset()
    }

    /// Master key length, in bits.
    pub fn mk_bits(&self) -> u32 {
        self.hdr.key_bytes() * 8
    }

    /// Enabled keyslot indices, in ascending order.
    pub(crate) fn slots(&self) -> Vec<u32> {
        self.hdr
            .keyslots()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_enabled())
            .map(|(idx, _)| idx as u32)
            .collect()
    }

    pub(crate) fn tokens(&self) -> Result<Vec<Token>> {
        luksmeta::read_tokens(&self.file, &self.hdr)
    }

    pub(crate) fn unseal_volume(&self, slot_id: u32, passphrase: &[u8]) -> Result<Volume> {
        let slot = self
            .hdr
            .keyslots()
            .get(slot_id as usize)
            .filter(|slot| slot.is_enabled())
            .ok_or(Error::NoSuchSlot(slot_id))?;

        let hash = HashAlgo::from_name(self.hdr.hash_spec()?)?;
        let key_bytes = self.hdr.key_bytes() as usize;

        let mut af_key = Zeroizing::new(vec![0u8; key_bytes]);
        hash.pbkdf2(passphrase, &slot.salt, slot.iterations, &mut af_key);

        if slot.stripes != STRIPES {
            return Err(Error::UnsupportedAf(slot.stripes));
        }
        let area_len = key_bytes * STRIPES as usize;
        if area_len as u64 % SECTOR_SIZE != 0 {
            return Err(Error::MalformedSize(format!(
                "keyslot {} material of {} bytes is not sector aligned",
                slot_id, area_len
            )));
        }

        let mut area = Zeroizing::new(vec![0u8; area_len]);
        self.file
            .read_exact_at(&mut area, u64::from(slot.key_material_offset) * SECTOR_SIZE)?;

        let cipher_mode = self.hdr.cipher_mode()?;
        if cipher_mode != "xts-plain64" {
            return Err(Error::UnknownAlgorithm(cipher_mode.to_string()));
        }
        let cipher = AreaCipher::new(self.hdr.cipher_name()?, &af_key)?;
        cipher.decrypt_area(&mut area, SECTOR_SIZE as usize);

        let candidate = af::merge(&area, key_bytes, STRIPES as usize, &mut *hash.hasher())?;

        // PBKDF2 output is prefix stable, so deriving the stored digest
        // length directly also covers master keys shorter than it
        let mut generated = Zeroizing::new(vec![0u8; MK_DIGEST_LEN]);
        hash.pbkdf2(
            &candidate,
            self.hdr.mk_digest_salt(),
            self.hdr.mk_digest_iterations(),
            &mut generated,
        );
        if !bool::from(generated.ct_eq(self.hdr.mk_digest())) {
            return Err(Error::PassphraseDoesNotMatch);
        }

        let storage_offset = u64::from(self.hdr.payload_offset()) * SECTOR_SIZE;
        let device_size = file_size(&self.file)?;
        if device_size < storage_offset {
            return Err(Error::MalformedSize(format!(
                "device of {} bytes is smaller than the payload offset {}",
                device_size, storage_offset
            )));
        }

        let encryption = format!("{}-{}", self.hdr.cipher_name()?, cipher_mode);
        debug!("unsealed LUKS1 keyslot {} on {}", slot_id, self.path.display());
        Ok(Volume {
            backing_device: self.path.clone(),
            flags: self.flags.clone(),
            uuid: self.uuid.clone(),
            master_key: candidate,
            luks_type: LuksType::Luks1,
            storage_encryption: encryption,
            storage_iv_tweak: 0,
            storage_sector_size: SECTOR_SIZE,
            storage_offset,
            storage_size: device_size - storage_offset,
        })
    }
}
