// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Mock device-mapper for testing.
//!
//! Records the tables it is given instead of creating kernel devices.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use zeroize::Zeroizing;

use super::DeviceMapper;
use crate::{Error, Result};

/// An in-memory table of named mappings
#[derive(Debug, Default)]
pub struct MockMapper {
    devices: BTreeMap<String, Zeroizing<String>>,
}

impl MockMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table line device `name` was created with
    pub fn table(&self, name: &str) -> Option<&str> {
        self.devices.get(name).map(|t| t.as_str())
    }

    /// Names of all live devices
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }
}

impl DeviceMapper for MockMapper {
    fn attach(&mut self, path: &Path, _read_only: bool) -> Result<PathBuf> {
        Ok(path.to_owned())
    }

    fn create(&mut self, name: &str, table: &str, _read_only: bool) -> Result<()> {
        if self.devices.contains_key(name) {
            raise!(Error::Failed);
        }
        self.devices.insert(name.to_owned(), Zeroizing::new(table.to_owned()));
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        if self.devices.remove(name).is_none() {
            raise!(Error::NotFound);
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove() {
        let mut dm = MockMapper::new();
        dm.create("a", "0 8 zero", false).unwrap();
        assert_eq!(dm.create("a", "0 8 zero", false), Err(Error::Failed));
        assert_eq!(dm.table("a"), Some("0 8 zero"));
        assert!(dm.exists("a"));
        dm.remove("a").unwrap();
        assert_eq!(dm.remove("a"), Err(Error::NotFound));
        assert_eq!(dm.names().count(), 0);
    }
}
