//! Anti-forensic information splitting.
//!
//! A secret of `block_size` bytes is expanded over `stripes` blocks so that
//! every stripe must survive on disk for the secret to be recoverable;
//! destroying any single sector of key material renders the keyslot
//! unrecoverable. Stripes are chained through a hash-driven diffusion step.

use digest::DynDigest;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

fn xor_into(src: &[u8], dest: &mut [u8]) {
    for (d, s) in dest.iter_mut().zip(src) {
        *d ^= *s;
    }
}

/// In-place diffusion: every digest-sized chunk of `buf` is replaced by
/// `H(BE32(chunk index) || chunk)`, the tail by a truncated digest.
fn diffuse(hash: &mut dyn DynDigest, buf: &mut [u8]) {
    let digest_size = hash.output_size();
    let blocks = buf.len() / digest_size;
    let padding = buf.len() % digest_size;

    for i in 0..blocks {
        hash.update(&(i as u32).to_be_bytes());
        hash.update(&buf[i * digest_size..(i + 1) * digest_size]);
        hash.finalize_into_reset(&mut buf[i * digest_size..(i + 1) * digest_size])
            .expect("chunk length equals digest size");
    }

    if padding != 0 {
        let start = blocks * digest_size;
        hash.update(&(blocks as u32).to_be_bytes());
        hash.update(&buf[start..]);
        let mut scratch = Zeroizing::new(vec![0u8; digest_size]);
        hash.finalize_into_reset(&mut scratch)
            .expect("scratch length equals digest size");
        buf[start..].copy_from_slice(&scratch[..padding]);
    }
}

/// Recover a `block_size`-byte secret from `block_size * stripes` bytes of
/// split material.
pub fn merge(
    material: &[u8],
    block_size: usize,
    stripes: usize,
    hash: &mut dyn DynDigest,
) -> Result<Zeroizing<Vec<u8>>> {
    if stripes < 2 {
        return Err(Error::UnsupportedAf(stripes as u32));
    }
    if block_size == 0 {
        return Err(Error::MalformedSize("anti-forensic block size is zero".into()));
    }
    let needed = block_size
        .checked_mul(stripes)
        .filter(|&n| n <= material.len())
        .ok_or_else(|| {
            Error::MalformedSize(format!(
                "anti-forensic material of {} bytes cannot hold {} stripes of {} bytes",
                material.len(),
                stripes,
                block_size
            ))
        })?;
    let material = &material[..needed];

    let mut buffer = Zeroizing::new(vec![0u8; block_size]);
    for stripe in material.chunks_exact(block_size).take(stripes - 1) {
        xor_into(stripe, &mut buffer);
        diffuse(hash, &mut buffer);
    }
    xor_into(&material[(stripes - 1) * block_size..], &mut buffer);
    Ok(buffer)
}

/// Expand `secret` over `stripes` blocks of fresh random material. The
/// counterpart of [`merge`]: `merge(split(s))` always returns `s`.
pub fn split(secret: &[u8], stripes: usize, hash: &mut dyn DynDigest) -> Vec<u8> {
    let block_size = secret.len();
    let mut out = vec![0u8; block_size * stripes];
    let mut buffer = Zeroizing::new(vec![0u8; block_size]);

    let random_len = (stripes - 1) * block_size;
    OsRng.fill_bytes(&mut out[..random_len]);

    for stripe in out[..random_len].chunks_exact(block_size) {
        xor_into(stripe, &mut buffer);
        diffuse(hash, &mut buffer);
    }

    out[random_len..].copy_from_slice(secret);
    xor_into(&buffer, &mut out[random_len..]);
    out
}
