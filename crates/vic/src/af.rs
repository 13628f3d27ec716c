// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Anti-forensic information splitter
//!
//! A key of `n` bytes is expanded into `stripes × n` bytes such that every
//! stripe is needed to recover it. The last stripe is the key XORed with a
//! hash-diffused accumulation of all the random stripes before it, so losing
//! (or overwriting) any part of the material destroys the key.

use zeroize::Zeroizing;

use crate::{crypto::random, crypto::HashType, Error, Result};

/// Split `key` into `stripes` stripes of `key.len()` bytes each
pub fn split(hash: HashType, key: &[u8], stripes: usize) -> Result<Zeroizing<Vec<u8>>> {
    if stripes == 0 || key.is_empty() {
        raise!(Error::BadParameter);
    }
    let size = key.len();
    let total = size.checked_mul(stripes).ok_or(Error::BadParameter)?;

    let mut out = Zeroizing::new(vec![0u8; total]);
    let mut acc = Zeroizing::new(vec![0u8; size]);

    let (head, last) = out.split_at_mut(total - size);
    for stripe in head.chunks_exact_mut(size) {
        random::fill(stripe);
        xor_into(&mut acc, stripe);
        diffuse(hash, &mut acc);
    }

    for ((dst, a), k) in last.iter_mut().zip(acc.iter()).zip(key) {
        *dst = a ^ k;
    }

    Ok(out)
}

/// Recover a key of `key_size` bytes from material produced by [`split`]
pub fn merge(hash: HashType, material: &[u8], key_size: usize, stripes: usize) -> Result<Zeroizing<Vec<u8>>> {
    if stripes == 0 || key_size == 0 || key_size.checked_mul(stripes) != Some(material.len()) {
        raise!(Error::BadParameter);
    }

    let mut acc = Zeroizing::new(vec![0u8; key_size]);
    let (head, last) = material.split_at(material.len() - key_size);
    for stripe in head.chunks_exact(key_size) {
        xor_into(&mut acc, stripe);
        diffuse(hash, &mut acc);
    }
    xor_into(&mut acc, last);

    Ok(acc)
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Replace each digest-sized chunk `j` of `buf` by `H(be32(j) || chunk)`, truncating the tail
fn diffuse(hash: HashType, buf: &mut [u8]) {
    for (j, chunk) in buf.chunks_mut(hash.size()).enumerate() {
        let iv = (j as u32).to_be_bytes();
        let digest = Zeroizing::new(hash.digest(&[&iv[..], &chunk[..]]));
        let len = chunk.len();
        chunk.copy_from_slice(&digest[..len]);
    }
}
