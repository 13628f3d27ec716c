// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Sparse image files to format volumes on without a real disk

use std::{fs, path::Path};

use log::debug;

use crate::{error::io_error, Error, Result};

/// Create (or truncate) an image of `size` bytes at `path`
///
/// No blocks are allocated, so the image reads back as zeros until a volume
/// is written to it. Fails with [`Error::OpenFailed`] when the file cannot be
/// created and [`Error::WriteFailed`] when it cannot be sized.
pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<()> {
    let path = path.as_ref();
    let image = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| io_error(Error::OpenFailed, "create image", e))?;
    image
        .set_len(size)
        .map_err(|e| io_error(Error::WriteFailed, "size image", e))?;

    debug!("created {size} byte image {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        fs::write(&image, b"stale contents").unwrap();

        create(&image, 1024 * 1024).unwrap();
        let data = fs::read(&image).unwrap();
        assert_eq!(data.len(), 1024 * 1024);
        assert!(data.iter().all(|b| *b == 0));

        assert_eq!(create(dir.path().join("missing/disk.img"), 512), Err(Error::OpenFailed));
    }
}
