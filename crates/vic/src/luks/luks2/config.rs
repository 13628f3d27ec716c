// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as, DisplayFromStr};

/// Top-level LUKS2 metadata stored in the JSON area.
/// Object keys are decimal ids, kept sorted so the first entry is the lowest id.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Luks2Config {
    /// Key slots by id
    pub keyslots: BTreeMap<u64, Luks2Keyslot>,
    /// Tokens by id; kept verbatim
    #[serde(default)]
    pub tokens: BTreeMap<u64, serde_json::Value>,
    /// Encrypted regions of the device by id
    pub segments: BTreeMap<u64, Luks2Segment>,
    /// Master key digests by id
    pub digests: BTreeMap<u64, Luks2Digest>,
    /// Area sizes and activation flags
    pub config: Luks2ConfigData,
}

/// Area sizes and activation flags
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Luks2ConfigData {
    /// Size of the JSON metadata area in bytes.
    #[serde_as(as = "DisplayFromStr")]
    pub json_size: u64,

    /// Size of the keyslots area in bytes.
    #[serde_as(as = "DisplayFromStr")]
    pub keyslots_size: u64,

    /// Persistent activation flags such as `allow-discards`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,

    /// Features the volume requires of any implementation touching it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Luks2Requirements>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Luks2Requirements {
    #[serde(default)]
    pub mandatory: Vec<String>,
}

/// Key derivation function (KDF) configuration used to generate encryption keys from passwords.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Luks2Kdf {
    Pbkdf2 {
        /// Hash algorithm of the HMAC
        hash: String,
        iterations: u32,
        #[serde_as(as = "Base64")]
        salt: Vec<u8>,
    },
    Argon2i {
        /// Passes
        time: u32,
        /// Memory cost in KiB
        memory: u32,
        /// Lanes
        cpus: u32,
        #[serde_as(as = "Base64")]
        salt: Vec<u8>,
    },
    Argon2id {
        time: u32,
        memory: u32,
        cpus: u32,
        #[serde_as(as = "Base64")]
        salt: Vec<u8>,
    },
    /// Any KDF this implementation cannot run
    #[serde(other)]
    Unknown,
}

/// Anti-forensic splitter settings of a key slot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Luks2Af {
    /// Always `luks1`
    #[serde(rename = "type")]
    pub af_type: String,
    pub stripes: u32,
    pub hash: String,
}

/// Configuration for a single keyslot containing key material and derivation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Luks2Keyslot {
    /// Type of keyslot, defining how the key material is processed
    #[serde(rename = "type")]
    pub slot_type: String,

    /// Size of the keyslot key in bytes
    pub key_size: u64,

    pub af: Luks2Af,

    /// Storage area configuration defining where and how key material is stored
    pub area: Luks2KeyslotArea,
    /// Key derivation parameters used to process passwords into keys
    pub kdf: Luks2Kdf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Configuration for keyslot storage area defining where encrypted keys are stored.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Luks2KeyslotArea {
    /// Type of storage area, defining how the area is organized
    #[serde(rename = "type")]
    pub area_type: String,

    /// Offset in bytes where this area begins on the device
    #[serde_as(as = "DisplayFromStr")]
    pub offset: u64,

    /// Size of this area in bytes
    #[serde_as(as = "DisplayFromStr")]
    pub size: u64,

    /// Encryption algorithm used to protect stored key material
    pub encryption: String,

    /// Size of encryption key in bytes used for this area
    pub key_size: u64,
}

/// dm-integrity settings of a segment
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Luks2SegmentIntegrity {
    #[serde(rename = "type")]
    pub integrity_type: String,
    pub journal_encryption: String,
    pub journal_integrity: String,
}

/// Configuration for a disk segment defining an encrypted region of the device.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Luks2Segment {
    /// Type of segment, defining how the region is processed
    #[serde(rename = "type")]
    pub segment_type: String,
    /// Offset where segment begins in bytes
    #[serde_as(as = "DisplayFromStr")]
    pub offset: u64,
    /// Size of segment in bytes, or `dynamic` for the rest of the device
    pub size: String,
    /// Initialization vector tweak used for encryption
    #[serde_as(as = "DisplayFromStr")]
    pub iv_tweak: u64,
    /// Encryption algorithm used for this segment
    pub encryption: String,
    /// Sector size in bytes - the granularity of encryption
    pub sector_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Luks2SegmentIntegrity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Master key digest, covering a set of keyslots and segments
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Luks2Digest {
    /// Only `pbkdf2` is understood
    #[serde(rename = "type")]
    pub digest_type: String,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub keyslots: Vec<u64>,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub segments: Vec<u64>,
    pub hash: String,
    pub iterations: u32,
    #[serde_as(as = "Base64")]
    pub salt: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub digest: Vec<u8>,
}

impl Luks2Segment {
    /// Size in bytes, `None` when the segment extends to the end of the device
    pub fn fixed_size(&self) -> Option<u64> {
        self.size.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "keyslots": {
            "0": {
                "type": "luks2",
                "key_size": 64,
                "af": {"type": "luks1", "stripes": 4000, "hash": "sha256"},
                "area": {"type": "raw", "offset": "32768", "size": "258048",
                         "encryption": "aes-xts-plain64", "key_size": 64},
                "kdf": {"type": "argon2id", "time": 4, "memory": 1048576, "cpus": 4,
                        "salt": "c2FsdHNhbHRzYWx0c2FsdA=="}
            },
            "1": {
                "type": "luks2",
                "key_size": 64,
                "af": {"type": "luks1", "stripes": 4000, "hash": "sha256"},
                "area": {"type": "raw", "offset": "290816", "size": "258048",
                         "encryption": "aes-xts-plain64", "key_size": 64},
                "kdf": {"type": "scrypt", "salt": "AAAA"}
            }
        },
        "tokens": {"0": {"type": "systemd-tpm2", "keyslots": ["0"]}},
        "segments": {
            "0": {"type": "crypt", "offset": "16777216", "size": "dynamic", "iv_tweak": "0",
                  "encryption": "aes-xts-plain64", "sector_size": 512}
        },
        "digests": {
            "0": {"type": "pbkdf2", "keyslots": ["0", "1"], "segments": ["0"], "hash": "sha256",
                  "iterations": 1000, "salt": "AAECAw==", "digest": "BAUGBw=="}
        },
        "config": {"json_size": "12288", "keyslots_size": "16744448"}
    }"#;

    #[test]
    fn test_parse_cryptsetup_metadata() {
        let config: Luks2Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.config.json_size, 12288);
        assert_eq!(config.config.keyslots_size, 16744448);

        let slot = &config.keyslots[&0];
        assert_eq!(slot.area.offset, 32768);
        assert_eq!(slot.af.stripes, 4000);
        match &slot.kdf {
            Luks2Kdf::Argon2id { time, memory, cpus, salt } => {
                assert_eq!((*time, *memory, *cpus), (4, 1048576, 4));
                assert_eq!(salt.as_slice(), b"saltsaltsaltsalt");
            }
            other => panic!("unexpected kdf {other:?}"),
        }
        assert_eq!(config.keyslots[&1].kdf, Luks2Kdf::Unknown);

        let segment = &config.segments[&0];
        assert_eq!(segment.offset, 16777216);
        assert_eq!(segment.fixed_size(), None);
        assert!(segment.integrity.is_none());

        let digest = &config.digests[&0];
        assert_eq!(digest.keyslots, vec![0, 1]);
        assert_eq!(digest.salt, vec![0, 1, 2, 3]);
        assert_eq!(config.tokens.len(), 1);
    }

    #[test]
    fn test_serialized_shape() {
        let digest = Luks2Digest {
            digest_type: "pbkdf2".into(),
            keyslots: vec![2],
            segments: vec![0],
            hash: "sha256".into(),
            iterations: 1000,
            salt: vec![0xff],
            digest: vec![0x00],
        };
        let value = serde_json::to_value(&digest).unwrap();
        assert_eq!(value["type"], "pbkdf2");
        assert_eq!(value["keyslots"][0], "2");
        assert_eq!(value["salt"], "/w==");

        let kdf = Luks2Kdf::Pbkdf2 {
            hash: "sha256".into(),
            iterations: 5,
            salt: vec![1, 2, 3],
        };
        let value = serde_json::to_value(&kdf).unwrap();
        assert_eq!(value["type"], "pbkdf2");
        assert_eq!(value["salt"], "AQID");
    }
}
