// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fs;

use cryptsetup::{CryptDevice, Luks2Params, Params, PbkdfType, VerityParams, CRYPT_LUKS1, CRYPT_LUKS2, CRYPT_VERITY};
use nix::errno::Errno;
use vic::{blockdev::sparsefile, luks, FileDevice, OpenMode};

fn fast_pbkdf2() -> PbkdfType {
    PbkdfType {
        kind: "pbkdf2".into(),
        iterations: 1000,
        max_memory_kb: 0,
        parallel_threads: 0,
    }
}

#[test_log::test]
fn luks2_format_and_add_key() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("luks2.img");
    sparsefile::create(&image, 20 * 1024 * 1024).unwrap();

    let mut cd = CryptDevice::init(&image).unwrap();
    let params = Params::Luks2(Luks2Params {
        pbkdf: Some(PbkdfType {
            kind: "argon2id".into(),
            iterations: 1,
            max_memory_kb: 32,
            parallel_threads: 1,
        }),
        label: Some("data".into()),
        ..Default::default()
    });
    cd.format(CRYPT_LUKS2, "aes", "xts-plain64", None, None, 64, Some(&params))
        .unwrap();
    assert_eq!(cd.kind(), Some("LUKS2"));
    assert_eq!(cd.volume_key_size(), Some(64));
    assert_eq!(cd.keyslot_add_by_key(None, None, b"passphrase").unwrap(), 0);
    assert_eq!(cd.keyslot_add_by_key(Some(3), None, b"x").unwrap_err(), Errno::ENOTSUP);
    let uuid = cd.uuid().unwrap().to_owned();
    drop(cd);

    let mut cd = CryptDevice::init(&image).unwrap();
    assert_eq!(cd.load(Some(CRYPT_LUKS1), None).unwrap_err(), Errno::EINVAL);
    cd.load(None, None).unwrap();
    assert_eq!(cd.kind(), Some("LUKS2"));
    assert_eq!(cd.uuid(), Some(uuid.as_str()));

    let mut dev = FileDevice::open(&image, OpenMode::ReadOnly, 0).unwrap();
    let key = luks::recover_master_key(&mut dev, b"passphrase").unwrap();
    assert_eq!(key.len(), 64);
}

#[test]
fn luks1_supplied_volume_key() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("luks1.img");
    sparsefile::create(&image, 4 * 1024 * 1024).unwrap();
    let volume_key = [0x11u8; 32];

    let mut cd = CryptDevice::init(&image).unwrap();
    cd.set_pbkdf_type(&fast_pbkdf2()).unwrap();
    cd.format(CRYPT_LUKS1, "aes", "cbc-plain64", None, Some(&volume_key), 0, None)
        .unwrap();
    assert_eq!(cd.keyslot_add_by_key(None, Some(&volume_key), b"pw").unwrap(), 0);
    assert_eq!(cd.keyslot_add_by_key(None, Some(&[0x22u8; 32]), b"pw").unwrap_err(), Errno::EPERM);
    drop(cd);

    let mut dev = FileDevice::open(&image, OpenMode::ReadOnly, 0).unwrap();
    assert_eq!(luks::recover_master_key(&mut dev, b"pw").unwrap().as_bytes(), &volume_key);
}

#[test]
fn unsupported_combinations() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("disk.img");
    sparsefile::create(&image, 20 * 1024 * 1024).unwrap();
    let mut cd = CryptDevice::init(&image).unwrap();

    let sector_size = Params::Luks2(Luks2Params {
        sector_size: 4096,
        ..Default::default()
    });
    let integrity = Params::Luks2(Luks2Params {
        integrity: Some("hmac(sha256)".into()),
        ..Default::default()
    });
    for params in [&sector_size, &integrity] {
        assert_eq!(
            cd.format(CRYPT_LUKS2, "aes", "xts-plain64", None, None, 64, Some(params))
                .unwrap_err(),
            Errno::ENOTSUP
        );
    }
    assert_eq!(
        cd.format("INTEGRITY", "aes", "xts-plain64", None, None, 64, None).unwrap_err(),
        Errno::ENOTSUP
    );
    assert_eq!(
        cd.format("PLAIN", "aes", "xts-plain64", None, None, 64, None).unwrap_err(),
        Errno::EINVAL
    );
    assert_eq!(
        cd.format(CRYPT_LUKS1, "serpent", "xts-plain64", None, None, 64, None)
            .unwrap_err(),
        Errno::ENOTSUP
    );
    assert_eq!(cd.keyslot_add_by_key(None, None, b"pw").unwrap_err(), Errno::EINVAL);
    // nothing was written
    assert!(fs::read(&image).unwrap().iter().all(|b| *b == 0));
}

#[test]
fn verity_format_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.img");
    let hash = dir.path().join("hash.img");
    fs::write(&data, vec![0xa5u8; 8 * 4096]).unwrap();
    fs::write(&hash, b"").unwrap();

    let mut cd = CryptDevice::init(&hash).unwrap();
    let params = Params::Verity(VerityParams {
        data_device: data.clone(),
        salt: Some(vec![9u8; 32]),
        ..Default::default()
    });
    cd.format(
        CRYPT_VERITY,
        "",
        "",
        Some("6f1c2c8e-3d7b-4b57-9f0a-2b8e4e1c5d90"),
        None,
        0,
        Some(&params),
    )
    .unwrap();
    let root = cd.verity_root_hash().unwrap().to_vec();
    assert_eq!(root.len(), 32);
    drop(cd);

    let mut cd = CryptDevice::init(&hash).unwrap();
    cd.load(Some(CRYPT_VERITY), None).unwrap();
    assert_eq!(cd.uuid(), Some("6f1c2c8e-3d7b-4b57-9f0a-2b8e4e1c5d90"));
    assert_eq!(cd.load(None, None).unwrap_err(), Errno::EINVAL);
}
