// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Random bytes for keys, salts and AF stripes

use rand::RngCore;

/// Fill `buf` from the thread-local CSPRNG
pub fn fill(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// A freshly allocated buffer of `len` random bytes
pub fn bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    fill(&mut buf);
    buf
}
