// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Closed result taxonomy shared by every layer of the crate
//!
//! Errors are plain values: the first failing sub-operation returns its kind and
//! every caller above passes it up unchanged.

use thiserror::Error;

/// Every failure kind surfaced by the engines, the dispatch layer and the devices
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    #[error("failed")]
    Failed,
    #[error("bad version")]
    BadVersion,
    #[error("unexpected")]
    Unexpected,
    #[error("bad parameter")]
    BadParameter,
    #[error("bad device")]
    BadDevice,
    #[error("out of memory")]
    OutOfMemory,
    #[error("not found")]
    NotFound,
    #[error("out of bounds")]
    OutOfBounds,
    #[error("key too big")]
    KeyTooBig,
    #[error("device count failed")]
    DeviceCountFailed,
    #[error("device get failed")]
    DeviceGetFailed,
    #[error("device put failed")]
    DevicePutFailed,
    #[error("device too small")]
    DeviceTooSmall,
    #[error("header read failed")]
    HeaderReadFailed,
    #[error("key material read failed")]
    KeyMaterialReadFailed,
    #[error("header write failed")]
    HeaderWriteFailed,
    #[error("key material write failed")]
    KeyMaterialWriteFailed,
    #[error("key lookup failed")]
    KeyLookupFailed,
    #[error("pbkdf2 failed")]
    Pbkdf2Failed,
    #[error("encrypt failed")]
    EncryptFailed,
    #[error("decrypt failed")]
    DecryptFailed,
    #[error("afmerge failed")]
    AfMergeFailed,
    #[error("afsplit failed")]
    AfSplitFailed,
    #[error("end of file")]
    Eof,
    #[error("unsupported")]
    Unsupported,
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("unknown keyslot type")]
    UnknownKeyslotType,
    #[error("unknown kdf type")]
    UnknownKdfType,
    #[error("digest not found")]
    DigestNotFound,
    #[error("argon2i failed")]
    Argon2iFailed,
    #[error("argon2id failed")]
    Argon2idFailed,
    #[error("unsupported digest type")]
    UnsupportedDigestType,
    #[error("num cpus failed")]
    NumCpusFailed,
    #[error("out of keyslots")]
    OutOfKeyslots,
    #[error("bad uuid")]
    BadUuid,
    #[error("last keyslot")]
    LastKeyslot,
    #[error("unsupported integrity journaling")]
    UnsupportedIntegrityJournaling,
    #[error("device open failed")]
    DeviceOpenFailed,
    #[error("path too long")]
    PathTooLong,
    #[error("failed to get loop device")]
    FailedToGetLoopDevice,
    #[error("unsupported cipher")]
    UnsupportedCipher,
    #[error("read failed")]
    ReadFailed,
    #[error("write failed")]
    WriteFailed,
    #[error("stat failed")]
    StatFailed,
    #[error("not block multiple")]
    NotBlockMultiple,
    #[error("file too small")]
    FileTooSmall,
    #[error("open failed")]
    OpenFailed,
    #[error("seek failed")]
    SeekFailed,
    #[error("ioctl failed")]
    IoctlFailed,
    #[error("bad signature")]
    BadSignature,
    #[error("bad magic")]
    BadMagic,
    #[error("bad checksum")]
    BadChecksum,
    #[error("bad json")]
    BadJson,
    #[error("bad flags")]
    BadFlags,
    #[error("bad block device")]
    BadBlockDevice,
    #[error("verify failed")]
    VerifyFailed,
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable upper-case identifier of this error kind, suitable for logs and tooling
    pub fn name(&self) -> &'static str {
        match self {
            Error::Failed => "FAILED",
            Error::BadVersion => "BAD_VERSION",
            Error::Unexpected => "UNEXPECTED",
            Error::BadParameter => "BAD_PARAMETER",
            Error::BadDevice => "BAD_DEVICE",
            Error::OutOfMemory => "OUT_OF_MEMORY",
            Error::NotFound => "NOT_FOUND",
            Error::OutOfBounds => "OUT_OF_BOUNDS",
            Error::KeyTooBig => "KEY_TOO_BIG",
            Error::DeviceCountFailed => "DEVICE_COUNT_FAILED",
            Error::DeviceGetFailed => "DEVICE_GET_FAILED",
            Error::DevicePutFailed => "DEVICE_PUT_FAILED",
            Error::DeviceTooSmall => "DEVICE_TOO_SMALL",
            Error::HeaderReadFailed => "HEADER_READ_FAILED",
            Error::KeyMaterialReadFailed => "KEY_MATERIAL_READ_FAILED",
            Error::HeaderWriteFailed => "HEADER_WRITE_FAILED",
            Error::KeyMaterialWriteFailed => "KEY_MATERIAL_WRITE_FAILED",
            Error::KeyLookupFailed => "KEY_LOOKUP_FAILED",
            Error::Pbkdf2Failed => "PBKDF2_FAILED",
            Error::EncryptFailed => "ENCRYPT_FAILED",
            Error::DecryptFailed => "DECRYPT_FAILED",
            Error::AfMergeFailed => "AFMERGE_FAILED",
            Error::AfSplitFailed => "AFSPLIT_FAILED",
            Error::Eof => "EOF",
            Error::Unsupported => "UNSUPPORTED",
            Error::BufferTooSmall => "BUFFER_TOO_SMALL",
            Error::UnknownKeyslotType => "UNKNOWN_KEYSLOT_TYPE",
            Error::UnknownKdfType => "UNKNOWN_KDF_TYPE",
            Error::DigestNotFound => "DIGEST_NOT_FOUND",
            Error::Argon2iFailed => "ARGON2I_FAILED",
            Error::Argon2idFailed => "ARGON2ID_FAILED",
            Error::UnsupportedDigestType => "UNSUPPORTED_DIGEST_TYPE",
            Error::NumCpusFailed => "NUM_CPUS_FAILED",
            Error::OutOfKeyslots => "OUT_OF_KEYSLOTS",
            Error::BadUuid => "BAD_UUID",
            Error::LastKeyslot => "LAST_KEYSLOT",
            Error::UnsupportedIntegrityJournaling => "UNSUPPORTED_INTEGRITY_JOURNALING",
            Error::DeviceOpenFailed => "DEVICE_OPEN_FAILED",
            Error::PathTooLong => "PATH_TOO_LONG",
            Error::FailedToGetLoopDevice => "FAILED_TO_GET_LOOP_DEVICE",
            Error::UnsupportedCipher => "UNSUPPORTED_CIPHER",
            Error::ReadFailed => "READ_FAILED",
            Error::WriteFailed => "WRITE_FAILED",
            Error::StatFailed => "STAT_FAILED",
            Error::NotBlockMultiple => "NOT_BLOCK_MULTIPLE",
            Error::FileTooSmall => "FILE_TOO_SMALL",
            Error::OpenFailed => "OPEN_FAILED",
            Error::SeekFailed => "SEEK_FAILED",
            Error::IoctlFailed => "IOCTL_FAILED",
            Error::BadSignature => "BAD_SIGNATURE",
            Error::BadMagic => "BAD_MAGIC",
            Error::BadChecksum => "BAD_CHECKSUM",
            Error::BadJson => "BAD_JSON",
            Error::BadFlags => "BAD_FLAGS",
            Error::BadBlockDevice => "BAD_BLOCK_DEVICE",
            Error::VerifyFailed => "VERIFY_FAILED",
        }
    }
}

/// Return early with the given error, logging where it was raised
///
/// The trace line is diagnostic only: with `trace` disabled the macro is a plain `return Err(..)`.
#[macro_export]
macro_rules! raise {
    ($err:expr) => {{
        let err: $crate::Error = $err;
        $crate::__log::trace!("raise: {}:{}: {}(): {}", file!(), line!(), module_path!(), err.name());
        return Err(err);
    }};
}

/// Map an I/O error onto a closed error kind, keeping the detail in the debug log
pub(crate) fn io_error(kind: Error, context: &str, err: std::io::Error) -> Error {
    log::debug!("{context}: {err}");
    kind
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails() -> Result<()> {
        raise!(Error::LastKeyslot)
    }

    #[test_log::test]
    fn test_raise_returns_error() {
        assert_eq!(fails(), Err(Error::LastKeyslot));
    }

    #[test]
    fn test_names_and_display() {
        assert_eq!(Error::KeyLookupFailed.name(), "KEY_LOOKUP_FAILED");
        assert_eq!(Error::KeyLookupFailed.to_string(), "key lookup failed");
        assert_eq!(Error::BadSignature.name(), "BAD_SIGNATURE");
        assert_eq!(Error::NotBlockMultiple.to_string(), "not block multiple");
    }
}
