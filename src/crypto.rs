//! Name-based registry over the cryptographic primitives LUKS headers may
//! reference: hash functions, block ciphers in XTS mode, and the password
//! KDFs. All lookups use the LUKS-standard algorithm names.

use aes::cipher::{BlockCipher, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::consts::{U20, U32, U48, U64};
use blake2::{Blake2b, Blake2s256};
use camellia::{Camellia128, Camellia192, Camellia256};
use digest::DynDigest;
use hmac::{Hmac, SimpleHmac};
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};
use twofish::Twofish;
use xts_mode::{get_tweak_default, Xts128};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::luks2_meta::Luks2Kdf;

type Blake2b160 = Blake2b<U20>;
type Blake2b256 = Blake2b<U32>;
type Blake2b384 = Blake2b<U48>;
type Blake2b512 = Blake2b<U64>;

/// A hash algorithm known to LUKS, resolved from its header name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Ripemd160,
    Blake2b160,
    Blake2b256,
    Blake2b384,
    Blake2b512,
    Blake2s256,
}

impl HashAlgo {
    /// Resolve a LUKS hash-spec name.
    ///
    /// cryptsetup additionally knows whirlpool, stribog and sm3; none of
    /// them has a maintained pure-Rust implementation, so they are rejected.
    pub fn from_name(name: &str) -> Result<HashAlgo> {
        let algo = match name {
            "sha1" => HashAlgo::Sha1,
            "sha224" => HashAlgo::Sha224,
            "sha256" => HashAlgo::Sha256,
            "sha384" => HashAlgo::Sha384,
            "sha512" => HashAlgo::Sha512,
            "sha3-224" => HashAlgo::Sha3_224,
            "sha3-256" => HashAlgo::Sha3_256,
            "sha3-384" => HashAlgo::Sha3_384,
            "sha3-512" => HashAlgo::Sha3_512,
            "ripemd160" => HashAlgo::Ripemd160,
            "blake2b-160" => HashAlgo::Blake2b160,
            "blake2b-256" => HashAlgo::Blake2b256,
            "blake2b-384" => HashAlgo::Blake2b384,
            "blake2b-512" => HashAlgo::Blake2b512,
            "blake2s-256" => HashAlgo::Blake2s256,
            _ => return Err(Error::UnknownAlgorithm(name.to_string())),
        };
        Ok(algo)
    }

    /// Digest size in bytes.
    pub fn size(&self) -> usize {
        match self {
            HashAlgo::Sha1 | HashAlgo::Ripemd160 | HashAlgo::Blake2b160 => 20,
            HashAlgo::Sha224 | HashAlgo::Sha3_224 => 28,
            HashAlgo::Sha256 | HashAlgo::Sha3_256 | HashAlgo::Blake2b256 | HashAlgo::Blake2s256 => {
                32
            }
            HashAlgo::Sha384 | HashAlgo::Sha3_384 | HashAlgo::Blake2b384 => 48,
            HashAlgo::Sha512 | HashAlgo::Sha3_512 | HashAlgo::Blake2b512 => 64,
        }
    }

    /// A fresh hasher instance.
    pub fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            HashAlgo::Sha1 => Box::new(Sha1::default()),
            HashAlgo::Sha224 => Box::new(Sha224::default()),
            HashAlgo::Sha256 => Box::new(Sha256::default()),
            HashAlgo::Sha384 => Box::new(Sha384::default()),
            HashAlgo::Sha512 => Box::new(Sha512::default()),
            HashAlgo::Sha3_224 => Box::new(Sha3_224::default()),
            HashAlgo::Sha3_256 => Box::new(Sha3_256::default()),
            HashAlgo::Sha3_384 => Box::new(Sha3_384::default()),
            HashAlgo::Sha3_512 => Box::new(Sha3_512::default()),
            HashAlgo::Ripemd160 => Box::new(Ripemd160::default()),
            HashAlgo::Blake2b160 => Box::new(Blake2b160::default()),
            HashAlgo::Blake2b256 => Box::new(Blake2b256::default()),
            HashAlgo::Blake2b384 => Box::new(Blake2b384::default()),
            HashAlgo::Blake2b512 => Box::new(Blake2b512::default()),
            HashAlgo::Blake2s256 => Box::new(Blake2s256::default()),
        }
    }

    /// PBKDF2 with this hash as the HMAC core, filling all of `out`.
    ///
    /// BLAKE2 needs the buffered HMAC wrapper, everything else runs on the
    /// eager one.
    pub fn pbkdf2(&self, material: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
        use pbkdf2::pbkdf2;

        match self {
            HashAlgo::Sha1 => pbkdf2::<Hmac<Sha1>>(material, salt, iterations, out),
            HashAlgo::Sha224 => pbkdf2::<Hmac<Sha224>>(material, salt, iterations, out),
            HashAlgo::Sha256 => pbkdf2::<Hmac<Sha256>>(material, salt, iterations, out),
            HashAlgo::Sha384 => pbkdf2::<Hmac<Sha384>>(material, salt, iterations, out),
            HashAlgo::Sha512 => pbkdf2::<Hmac<Sha512>>(material, salt, iterations, out),
            HashAlgo::Sha3_224 => pbkdf2::<Hmac<Sha3_224>>(material, salt, iterations, out),
            HashAlgo::Sha3_256 => pbkdf2::<Hmac<Sha3_256>>(material, salt, iterations, out),
            HashAlgo::Sha3_384 => pbkdf2::<Hmac<Sha3_384>>(material, salt, iterations, out),
            HashAlgo::Sha3_512 => pbkdf2::<Hmac<Sha3_512>>(material, salt, iterations, out),
            HashAlgo::Ripemd160 => pbkdf2::<Hmac<Ripemd160>>(material, salt, iterations, out),
            HashAlgo::Blake2b160 => {
                pbkdf2::<SimpleHmac<Blake2b160>>(material, salt, iterations, out)
            }
            HashAlgo::Blake2b256 => {
                pbkdf2::<SimpleHmac<Blake2b256>>(material, salt, iterations, out)
            }
            HashAlgo::Blake2b384 => {
                pbkdf2::<SimpleHmac<Blake2b384>>(material, salt, iterations, out)
            }
            HashAlgo::Blake2b512 => {
                pbkdf2::<SimpleHmac<Blake2b512>>(material, salt, iterations, out)
            }
            HashAlgo::Blake2s256 => {
                pbkdf2::<SimpleHmac<Blake2s256>>(material, salt, iterations, out)
            }
        }
        .expect("HMAC accepts keys of any length")
    }
}

/// Split a dm-crypt encryption spec such as `aes-xts-plain64` into
/// (cipher, mode, iv mode).
pub(crate) fn split_encryption(encryption: &str) -> Result<(&str, &str, &str)> {
    let mut parts = encryption.split('-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(cipher), Some(mode), Some(iv), None) => Ok((cipher, mode, iv)),
        _ => Err(Error::UnknownAlgorithm(encryption.to_string())),
    }
}

/// An XTS cipher over one of the supported block cipher families, keyed for
/// keyslot-area transformation.
pub enum AreaCipher {
    Aes128(Xts128<Aes128>),
    Aes192(Xts128<Aes192>),
    Aes256(Xts128<Aes256>),
    Twofish(Xts128<Twofish>),
    Camellia128(Xts128<Camellia128>),
    Camellia192(Xts128<Camellia192>),
    Camellia256(Xts128<Camellia256>),
}

fn xts_pair<C: BlockEncrypt + BlockDecrypt + KeyInit + BlockCipher>(key: &[u8]) -> Xts128<C> {
    let (k1, k2) = key.split_at(key.len() / 2);
    Xts128::new(
        C::new_from_slice(k1).expect("key length matched on cipher selection"),
        C::new_from_slice(k2).expect("key length matched on cipher selection"),
    )
}

impl AreaCipher {
    /// Build an XTS cipher from a LUKS cipher name and the full XTS key
    /// (twice the block cipher key length).
    pub fn new(cipher_name: &str, xts_key: &[u8]) -> Result<AreaCipher> {
        let half = match xts_key.len() {
            n if n % 2 == 0 => n / 2,
            n => {
                return Err(Error::InvalidHeader(format!(
                    "XTS key length {} is not even",
                    n
                )))
            }
        };
        match (cipher_name, half) {
            ("aes", 16) => Ok(AreaCipher::Aes128(xts_pair(xts_key))),
            ("aes", 24) => Ok(AreaCipher::Aes192(xts_pair(xts_key))),
            ("aes", 32) => Ok(AreaCipher::Aes256(xts_pair(xts_key))),
            ("twofish", 16 | 24 | 32) => Ok(AreaCipher::Twofish(xts_pair(xts_key))),
            ("camellia", 16) => Ok(AreaCipher::Camellia128(xts_pair(xts_key))),
            ("camellia", 24) => Ok(AreaCipher::Camellia192(xts_pair(xts_key))),
            ("camellia", 32) => Ok(AreaCipher::Camellia256(xts_pair(xts_key))),
            ("aes" | "twofish" | "camellia", _) => Err(Error::InvalidHeader(format!(
                "{} does not support {}-bit keys",
                cipher_name,
                half * 8
            ))),
            (name, _) => Err(Error::UnknownAlgorithm(name.to_string())),
        }
    }

    /// Decrypt a whole area in place, sector by sector, with the plain64
    /// tweak starting at sector 0.
    pub fn decrypt_area(&self, buf: &mut [u8], sector_size: usize) {
        match self {
            AreaCipher::Aes128(x) => x.decrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Aes192(x) => x.decrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Aes256(x) => x.decrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Twofish(x) => x.decrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Camellia128(x) => x.decrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Camellia192(x) => x.decrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Camellia256(x) => x.decrypt_area(buf, sector_size, 0, get_tweak_default),
        }
    }

    /// Inverse of [`decrypt_area`](AreaCipher::decrypt_area); used to build
    /// keyslot areas for round-trip testing.
    pub fn encrypt_area(&self, buf: &mut [u8], sector_size: usize) {
        match self {
            AreaCipher::Aes128(x) => x.encrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Aes192(x) => x.encrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Aes256(x) => x.encrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Twofish(x) => x.encrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Camellia128(x) => x.encrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Camellia192(x) => x.encrypt_area(buf, sector_size, 0, get_tweak_default),
            AreaCipher::Camellia256(x) => x.encrypt_area(buf, sector_size, 0, get_tweak_default),
        }
    }
}

/// Derive the keyslot-area decryption key ("AF key") from a passphrase using
/// the KDF recorded in the keyslot.
pub(crate) fn derive_af_key(
    kdf: &Luks2Kdf,
    passphrase: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(vec![0u8; length]);
    match kdf {
        Luks2Kdf::Pbkdf2 {
            salt,
            hash,
            iterations,
        } => {
            HashAlgo::from_name(hash)?.pbkdf2(passphrase, salt, *iterations, &mut out);
        }
        Luks2Kdf::Argon2i {
            salt,
            time,
            memory,
            cpus,
        } => argon2_fill(Algorithm::Argon2i, passphrase, salt, *time, *memory, *cpus, &mut out)?,
        Luks2Kdf::Argon2id {
            salt,
            time,
            memory,
            cpus,
        } => argon2_fill(Algorithm::Argon2id, passphrase, salt, *time, *memory, *cpus, &mut out)?,
    }
    Ok(out)
}

fn argon2_fill(
    algorithm: Algorithm,
    passphrase: &[u8],
    salt: &[u8],
    time: u32,
    memory_kib: u32,
    cpus: u32,
    out: &mut [u8],
) -> Result<()> {
    let params = Params::new(memory_kib, time, cpus, Some(out.len()))
        .map_err(|e| Error::InvalidHeader(format!("argon2 parameters: {}", e)))?;
    Argon2::new(algorithm, Version::V0x13, params)
        .hash_password_into(passphrase, salt, out)
        .map_err(|e| Error::InvalidHeader(format!("argon2: {}", e)))
}
