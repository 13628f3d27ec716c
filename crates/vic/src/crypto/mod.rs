// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Glue over the RustCrypto primitives used by the on-disk formats
//!
//! Everything here works on caller-owned buffers and reports failures with the
//! crate's closed [`Error`](crate::Error) kinds.

mod cipher;
mod hash;
mod kdf;
pub mod random;

pub use cipher::{CipherMode, SectorCipher};
pub use hash::HashType;
pub use kdf::{Argon2Params, Kdf};
