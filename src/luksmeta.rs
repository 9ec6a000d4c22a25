//! LUKSMeta token storage for LUKS1 volumes.
//!
//! LUKS1 has no token support of its own; the LUKSMeta project squeezes a
//! small slot directory into the gap between the last keyslot material area
//! and the data payload. Each directory entry pairs a keyslot with a typed
//! binary blob, both guarded by CRC-32/Castagnoli checksums.

use std::cmp;
use std::fs::File;
use std::io::{Cursor, Read};
use std::os::unix::fs::FileExt;

use byteorder::{BigEndian, ReadBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use uuid::Uuid;

use crate::api::Token;
use crate::error::{Error, Result};
use crate::util::round_up;
use crate::{SECTOR_SIZE, STRIPES};

const LUKSMETA_MAGIC: &[u8; 8] = b"LUKSMETA";
const LUKSMETA_SLOT_COUNT: usize = 8;
const LUKSMETA_HEADER_LEN: usize = 240;
const LUKSMETA_ALIGN: u64 = 4096;
const CRC_FIELD_OFFSET: usize = 12;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

// cb6e8904-81ff-40da-a84a-07ab9ab5715e, the only slot UUID with a
// well-known type name
const CLEVIS_UUID: Uuid = Uuid::from_bytes([
    0xcb, 0x6e, 0x89, 0x04, 0x81, 0xff, 0x40, 0xda, 0xa8, 0x4a, 0x07, 0xab, 0x9a, 0xb5, 0x71,
    0x5e,
]);

#[derive(Debug, Clone, Copy)]
struct MetaSlot {
    uuid: Uuid,
    offset: u32,
    length: u32,
    crc: u32,
}

/// Decode and CRC-validate the LUKSMeta slot directory. Returns `None` when
/// the magic does not match, i.e. no LUKSMeta area is present.
fn parse_header(buf: &[u8; LUKSMETA_HEADER_LEN]) -> Result<Option<Vec<MetaSlot>>> {
    if &buf[..8] != LUKSMETA_MAGIC {
        return Ok(None);
    }

    let mut cursor = Cursor::new(&buf[8..]);
    let _version = cursor.read_u32::<BigEndian>()?;
    let stored_crc = cursor.read_u32::<BigEndian>()?;

    let mut copy = *buf;
    copy[CRC_FIELD_OFFSET..CRC_FIELD_OFFSET + 4].fill(0);
    if CASTAGNOLI.checksum(&copy) != stored_crc {
        return Err(Error::BadChecksum);
    }

    let mut slots = Vec::with_capacity(LUKSMETA_SLOT_COUNT);
    for _ in 0..LUKSMETA_SLOT_COUNT {
        let mut uuid = [0u8; 16];
        cursor.read_exact(&mut uuid)?;
        slots.push(MetaSlot {
            uuid: Uuid::from_bytes(uuid),
            offset: cursor.read_u32::<BigEndian>()?,
            length: cursor.read_u32::<BigEndian>()?,
            crc: cursor.read_u32::<BigEndian>()?,
        });
    }
    Ok(Some(slots))
}

/// First byte past every keyslot material area, rounded up to the LUKSMeta
/// alignment; this is where the slot directory lives if it exists.
fn meta_base(hdr: &blkid_rs::LuksHeaderV1) -> u64 {
    let material_len = u64::from(hdr.key_bytes()) * u64::from(STRIPES);
    let mut end = 0u64;
    for slot in hdr.keyslots() {
        let slot_end = u64::from(slot.key_material_offset) * SECTOR_SIZE + material_len;
        end = cmp::max(end, slot_end);
    }
    round_up(end, LUKSMETA_ALIGN)
}

/// Extract all stored LUKSMeta tokens. An absent directory yields an empty
/// list; a corrupt one is an error.
pub(crate) fn read_tokens(file: &File, hdr: &blkid_rs::LuksHeaderV1) -> Result<Vec<Token>> {
    let base = meta_base(hdr);

    let mut header = [0u8; LUKSMETA_HEADER_LEN];
    file.read_exact_at(&mut header, base)?;

    let slots = match parse_header(&header)? {
        Some(slots) => slots,
        None => return Ok(Vec::new()),
    };

    let mut tokens = Vec::new();
    for (id, slot) in slots.iter().enumerate() {
        if slot.uuid.is_nil() {
            continue;
        }
        let id = id as u32;

        let mut payload = vec![0u8; slot.length as usize];
        file.read_exact_at(&mut payload, base + u64::from(slot.offset))?;
        if CASTAGNOLI.checksum(&payload) != slot.crc {
            return Err(Error::CorruptToken(id));
        }

        let token_type = if slot.uuid == CLEVIS_UUID {
            "clevis".to_string()
        } else {
            String::new()
        };
        tokens.push(Token {
            id,
            slots: vec![id],
            token_type,
            payload,
        });
    }
    Ok(tokens)
}
