//! Read-only unsealing of LUKS encrypted volumes - recover the master key
//! of a LUKS1 or LUKS2 container from a passphrase, entirely in Rust.
//!
//! The crate parses the on-disk headers, derives the keyslot area key,
//! reverses the anti-forensic splitting and verifies the recovered key
//! against the stored digest. The resulting [`Volume`] carries everything a
//! dm-crypt activation layer needs; the crate itself never writes to the
//! device.
//!
//! # Example
//!
//! ```no_run
//! use luks_rs::*;
//! # fn foo() -> Result<()> {
//! let device = open("/dev/loop0")?;
//! println!("Device UUID: {}", device.uuid());
//! let volume = device.unseal_volume(0, b"secret passphrase")?;
//! println!("Storage starts at byte {}", volume.storage_offset());
//! # Ok(())
//! # }
//! ```

pub mod af;
pub mod api;
pub mod crypto;
mod error;
pub mod luks1;
pub mod luks2;
pub mod luks2_meta;
mod luksmeta;
mod util;
mod volume;

pub use api::{luks_uuid, luks_version, open, LuksDevice, Token};
pub use api::{
    FLAG_ALLOW_DISCARDS, FLAG_NO_READ_WORKQUEUE, FLAG_NO_WRITE_WORKQUEUE, FLAG_SAME_CPU_CRYPT,
    FLAG_SUBMIT_FROM_CRYPT_CPUS,
};
pub use error::{Error, Result};
pub use volume::{LuksType, Volume};

/// Number of anti-forensic stripes every LUKS keyslot uses.
pub const STRIPES: u32 = 4000;

/// Sector size keyslot areas and LUKS1 payloads are laid out in.
pub const SECTOR_SIZE: u64 = 512;
