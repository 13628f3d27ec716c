// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use log::debug;
use nix::errno::Errno;
use vic::Error;

/// The errno libcryptsetup callers expect for an engine error
pub fn from_error(err: Error) -> Errno {
    let errno = match err {
        Error::BadParameter
        | Error::BadVersion
        | Error::BadMagic
        | Error::BadSignature
        | Error::BadChecksum
        | Error::BadJson
        | Error::BadUuid
        | Error::BadFlags
        | Error::KeyTooBig
        | Error::NotBlockMultiple
        | Error::FileTooSmall
        | Error::UnknownKeyslotType
        | Error::UnknownKdfType => Errno::EINVAL,
        Error::Unsupported
        | Error::UnsupportedCipher
        | Error::UnsupportedDigestType
        | Error::UnsupportedIntegrityJournaling => Errno::ENOTSUP,
        Error::KeyLookupFailed | Error::LastKeyslot => Errno::EPERM,
        Error::OutOfKeyslots | Error::DeviceTooSmall => Errno::ENOSPC,
        Error::OutOfMemory => Errno::ENOMEM,
        Error::NotFound | Error::DigestNotFound | Error::OpenFailed => Errno::ENOENT,
        _ => Errno::EIO,
    };
    debug!("{} -> {errno}", err.name());
    errno
}
