// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use log::{debug, info};
use std::{fs, io, path::Path};

use cryptsetup::{CryptDevice, Luks2Params, Params, PbkdfType, VerityParams, CRYPT_LUKS2, CRYPT_VERITY};
use vic::{
    blockdev::sparsefile,
    dm::{DeviceMapper, Dmsetup},
    luks, verity, FileDevice, OpenMode,
};

/// Formats `path` as LUKS2 with one passphrase through the libcryptsetup-style API
///
/// # Arguments
///
/// * `path` - Path to the image file
/// * `passphrase` - Passphrase of the first key slot
fn create_luks2_volume<P>(path: P, passphrase: &[u8]) -> Result<(), Box<dyn std::error::Error>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    info!("Formatting {:?} as LUKS2", path);

    let mut cd = CryptDevice::init(path)?;
    let params = Params::Luks2(Luks2Params {
        pbkdf: Some(PbkdfType {
            kind: "argon2id".into(),
            iterations: 4,
            max_memory_kb: 65536,
            parallel_threads: 1,
        }),
        label: Some("vic-test".into()),
        ..Default::default()
    });
    cd.format(CRYPT_LUKS2, "aes", "xts-plain64", None, None, 64, Some(&params))?;
    let slot = cd.keyslot_add_by_key(None, None, passphrase)?;
    info!("Volume {} ready, passphrase in key slot {slot}", cd.uuid().unwrap_or("?"));
    Ok(())
}

/// Rotates the passphrase and prints the resulting header
fn rotate_passphrase<P>(path: P, old: &[u8], new: &[u8]) -> Result<(), Box<dyn std::error::Error>>
where
    P: AsRef<Path>,
{
    let mut device = FileDevice::open(path.as_ref(), OpenMode::ReadWrite, 0)?;
    let slot = luks::change_key(&mut device, old, new)?;
    info!("Passphrase moved to key slot {slot}");

    let stat = luks::stat(&mut device)?;
    info!(
        "Payload: {} bytes at offset {} (LUKS{})",
        stat.payload_size,
        stat.payload_offset,
        stat.version.number()
    );
    luks::dump(&mut device, &mut io::stdout())?;
    Ok(())
}

/// Builds a verity tree for `data` into `hash` and checks it from userland
fn create_verity_tree<P>(data: P, hash: P) -> Result<Vec<u8>, Box<dyn std::error::Error>>
where
    P: AsRef<Path>,
{
    fs::write(hash.as_ref(), b"")?;
    let mut cd = CryptDevice::init(hash.as_ref())?;
    let params = Params::Verity(VerityParams {
        data_device: data.as_ref().to_owned(),
        ..Default::default()
    });
    cd.format(CRYPT_VERITY, "", "", None, None, 0, Some(&params))?;
    let root = cd.verity_root_hash().map(<[u8]>::to_vec).unwrap_or_default();
    info!("Root hash: {}", hex::encode(&root));

    let mut data_dev = FileDevice::open(data.as_ref(), OpenMode::ReadOnly, verity::BLOCK_SIZE)?;
    let mut hash_dev = FileDevice::open(hash.as_ref(), OpenMode::ReadOnly, verity::BLOCK_SIZE)?;
    verity::verify(&mut data_dev, &mut hash_dev, &root)?;
    verity::dump(&mut hash_dev, &mut io::stdout())?;
    Ok(root)
}

/// Demonstrates the vic APIs:
/// - Creating sparse image files
/// - LUKS2 format, key slot management and dumps
/// - dm-verity tree construction and verification
/// - Optional activation through `dmsetup` (pass `--open`, needs root)
fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Debug)
        .init();
    info!("Starting vic demo");

    let image_size = 64 * 1024 * 1024;
    info!("Creating {}MB sparse image file", image_size / (1024 * 1024));
    sparsefile::create("luks.img", image_size)?;
    create_luks2_volume("luks.img", b"hello world")?;
    rotate_passphrase("luks.img", b"hello world", b"goodbye world")?;

    info!("Creating verity data image");
    let data: Vec<u8> = (0..16 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
    fs::write("verity-data.img", &data)?;
    let root = create_verity_tree("verity-data.img", "verity-hash.img")?;

    if std::env::args().any(|a| a == "--open") {
        let mut dm = Dmsetup::default();
        let mut device = FileDevice::open("luks.img", OpenMode::ReadOnly, 0)?;
        let key = luks::recover_master_key(&mut device, b"goodbye world")?;
        drop(device);

        luks::open(&mut dm, Path::new("luks.img"), "vic-test", &key)?;
        verity::open(
            &mut dm,
            "vic-test-verity",
            Path::new("verity-data.img"),
            Path::new("verity-hash.img"),
            &root,
        )?;
        debug!("Mapped devices present: {}", dm.exists("vic-test") && dm.exists("vic-test-verity"));

        verity::close(&mut dm, "vic-test-verity")?;
        luks::close(&mut dm, "vic-test")?;
    }

    info!("Done");
    Ok(())
}
