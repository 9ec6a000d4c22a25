//! LUKS2 device handling: binary header pair, checksummed JSON metadata,
//! and keyslot unsealing driven entirely by the metadata records.

use std::convert::TryFrom;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use blkid_rs::{LuksHeaderV2, LuksVersionedHeader, LUKS2_CSUM_LEN, LUKS2_CSUM_OFFSET, LUKS2_JSON_OFFSET};
use log::debug;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::af;
use crate::api::Token;
use crate::crypto::{derive_af_key, split_encryption, AreaCipher, HashAlgo};
use crate::error::{Error, Result};
use crate::luks2_meta::{
    Luks2Digest, Luks2Keyslot, Luks2KeyslotPriority, Luks2Metadata, Luks2SegmentSize, Luks2Token,
};
use crate::util::file_size;
use crate::volume::{LuksType, Volume};
use crate::{SECTOR_SIZE, STRIPES};

/// An opened LUKS2 device.
pub struct Luks2Device {
    path: PathBuf,
    file: File,
    hdr: LuksHeaderV2,
    meta: Luks2Metadata,
    uuid: String,
    pub(crate) flags: Vec<String>,
}

impl Luks2Device {
    pub(crate) fn new(path: PathBuf, file: File, hdr: LuksHeaderV2) -> Result<Luks2Device> {
        // re-read the whole header region for checksum verification
        let mut data = vec![0u8; hdr.header_size() as usize];
        file.read_exact_at(&mut data, 0)?;

        let algo = HashAlgo::from_name(hdr.checksum_alg()?)?;
        data[LUKS2_CSUM_OFFSET..LUKS2_CSUM_OFFSET + LUKS2_CSUM_LEN].fill(0);
        let mut hasher = algo.hasher();
        hasher.update(&data);
        let checksum = hasher.finalize();
        if checksum[..algo.size()] != hdr.checksum()[..algo.size()] {
            return Err(Error::BadChecksum);
        }

        let json_region = &data[LUKS2_JSON_OFFSET..];
        let json_len = json_region
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::InvalidHeader("JSON metadata is not NUL terminated".into()))?;
        let json = std::str::from_utf8(&json_region[..json_len])
            .map_err(|e| Error::InvalidHeader(format!("JSON metadata is not UTF-8: {}", e)))?;
        let meta = Luks2Metadata::try_from(json)?;

        let uuid = hdr.uuid()?.to_string();
        let flags = meta.config.flags.clone().unwrap_or_default();
        debug!("opened LUKS2 device {} ({})", path.display(), uuid);
        Ok(Luks2Device {
            path,
            file,
            hdr,
            meta,
            uuid,
            flags,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn label(&self) -> Result<Option<&str>> {
        Ok(self.hdr.label()?)
    }

    pub fn subsystem(&self) -> Result<Option<&str>> {
        Ok(self.hdr.subsystem()?)
    }

    pub fn sequence_id(&self) -> u64 {
        self.hdr.seqid()
    }

    /// The parsed JSON metadata document.
    pub fn metadata(&self) -> &Luks2Metadata {
        &self.meta
    }

    /// Keyslot ids in unlock order: high priority first, then normal, each
    /// group ascending. Slots marked "ignore" are left out entirely.
    pub(crate) fn slots(&self) -> Vec<u32> {
        let mut high = Vec::new();
        let mut normal = Vec::new();
        for (&id, keyslot) in &self.meta.keyslots {
            match keyslot.priority() {
                Luks2KeyslotPriority::High => high.push(id),
                Luks2KeyslotPriority::Normal => normal.push(id),
                Luks2KeyslotPriority::Ignore => {}
            }
        }
        high.sort_unstable();
        normal.sort_unstable();
        high.extend(normal);
        high
    }

    /// All metadata tokens in ascending id order, with their raw JSON
    /// payload preserved byte for byte.
    pub(crate) fn tokens(&self) -> Result<Vec<Token>> {
        let mut ids: Vec<u32> = self.meta.tokens.keys().copied().collect();
        ids.sort_unstable();

        let mut tokens = Vec::with_capacity(ids.len());
        for id in ids {
            let raw = &self.meta.tokens[&id];
            let node: Luks2Token = serde_json::from_str(raw.get())?;
            tokens.push(Token {
                id,
                slots: node.keyslots,
                token_type: node.type_,
                payload: raw.get().as_bytes().to_vec(),
            });
        }
        Ok(tokens)
    }

    pub(crate) fn unseal_volume(&self, slot_id: u32, passphrase: &[u8]) -> Result<Volume> {
        let keyslot = self
            .meta
            .keyslots
            .get(&slot_id)
            .ok_or(Error::NoSuchSlot(slot_id))?;

        let af_key = derive_af_key(&keyslot.kdf, passphrase, keyslot.area.key_size as usize)?;
        let candidate = self.recover_candidate_key(slot_id, keyslot, &af_key)?;

        let (digest_id, digest) = self
            .meta
            .digests
            .iter()
            .find(|(_, digest)| digest.keyslots.contains(&slot_id))
            .ok_or(Error::NoDigest(slot_id))?;

        let generated = compute_key_digest(digest, &candidate)?;
        let stored = &digest.digest;
        if stored.len() > generated.len()
            || !bool::from(generated[..stored.len()].ct_eq(stored))
        {
            return Err(Error::PassphraseDoesNotMatch);
        }

        if digest.segments.len() != 1 {
            return Err(Error::NoDigest(slot_id));
        }
        let segment_id = digest.segments[0];
        let segment = self.meta.segments.get(&segment_id).ok_or_else(|| {
            Error::InvalidHeader(format!(
                "digest {} references missing segment {}",
                digest_id, segment_id
            ))
        })?;

        let storage_size = match segment.size {
            Luks2SegmentSize::Bytes(0) => {
                return Err(Error::MalformedSize("segment size is zero".into()))
            }
            Luks2SegmentSize::Bytes(n) => n,
            Luks2SegmentSize::Dynamic => {
                let device_size = file_size(&self.file)?;
                device_size.checked_sub(segment.offset).ok_or_else(|| {
                    Error::MalformedSize(format!(
                        "device of {} bytes is smaller than the segment offset {}",
                        device_size, segment.offset
                    ))
                })?
            }
        };

        debug!("unsealed LUKS2 keyslot {} on {}", slot_id, self.path.display());
        Ok(Volume {
            backing_device: self.path.clone(),
            flags: self.flags.clone(),
            uuid: self.uuid.clone(),
            master_key: candidate,
            luks_type: LuksType::Luks2,
            storage_encryption: segment.encryption.clone(),
            storage_iv_tweak: segment.iv_tweak,
            storage_sector_size: u64::from(segment.sector_size),
            storage_offset: segment.offset,
            storage_size,
        })
    }

    /// Read, decrypt and AF-merge the keyslot area into a candidate master
    /// key. The candidate still needs digest verification.
    fn recover_candidate_key(
        &self,
        slot_id: u32,
        keyslot: &Luks2Keyslot,
        af_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let af = &keyslot.af;
        if af.stripes != STRIPES {
            return Err(Error::UnsupportedAf(af.stripes));
        }

        let area = &keyslot.area;
        let area_len = keyslot.key_size as usize * STRIPES as usize;
        if area_len as u64 > area.size {
            return Err(Error::MalformedSize(format!(
                "keyslot {} area of {} bytes cannot hold {} bytes of key material",
                slot_id, area.size, area_len
            )));
        }
        if area_len as u64 % SECTOR_SIZE != 0 {
            return Err(Error::MalformedSize(format!(
                "keyslot {} material of {} bytes is not sector aligned",
                slot_id, area_len
            )));
        }
        if area.offset % SECTOR_SIZE != 0 {
            return Err(Error::MalformedSize(format!(
                "keyslot {} area offset {} is not sector aligned",
                slot_id, area.offset
            )));
        }

        let mut material = Zeroizing::new(vec![0u8; area_len]);
        self.file.read_exact_at(&mut material, area.offset)?;

        let (cipher_name, cipher_mode, _iv_mode) = split_encryption(&area.encryption)?;
        if cipher_mode != "xts" {
            return Err(Error::UnknownAlgorithm(cipher_mode.to_string()));
        }
        let cipher = AreaCipher::new(cipher_name, af_key)?;
        cipher.decrypt_area(&mut material, SECTOR_SIZE as usize);

        let hash = HashAlgo::from_name(&af.hash)?;
        af::merge(
            &material,
            keyslot.key_size as usize,
            STRIPES as usize,
            &mut *hash.hasher(),
        )
    }
}

/// Compute the digest of a candidate master key as recorded in a digest
/// object; only `pbkdf2` digests are defined.
fn compute_key_digest(digest: &Luks2Digest, key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if digest.type_ != "pbkdf2" {
        return Err(Error::UnknownAlgorithm(digest.type_.clone()));
    }
    let hash = HashAlgo::from_name(&digest.hash)?;
    let mut out = Zeroizing::new(vec![0u8; hash.size()]);
    hash.pbkdf2(key, &digest.salt, digest.iterations, &mut out);
    Ok(out)
}
