//! LUKS2 JSON metadata parsing
//!
//! The on-disk JSON document encodes most sizes and offsets as decimal
//! strings, although numbers also occur in the wild; every such field here
//! accepts both forms. Token objects are kept as raw JSON so their payload
//! bytes survive untouched.

use std::collections::HashMap;
use std::convert::TryFrom;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_with::base64::Base64;
use serde_with::{serde_as, skip_serializing_none, DisplayFromStr, PickFirst};

use crate::error::Error;

#[serde_as]
#[skip_serializing_none]
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Luks2Config {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub json_size: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub keyslots_size: u64,
    pub flags: Option<Vec<String>>,
    pub requirements: Option<Vec<String>>,
}

#[serde_as]
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Luks2Digest {
    /// Digest kind; only `pbkdf2` digests can be verified.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde_as(as = "Vec<PickFirst<(DisplayFromStr, _)>>")]
    pub keyslots: Vec<u32>,
    #[serde_as(as = "Vec<PickFirst<(DisplayFromStr, _)>>")]
    pub segments: Vec<u32>,
    #[serde_as(as = "Base64")]
    pub salt: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub digest: Vec<u8>,
    pub hash: String,
    pub iterations: u32,
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Luks2KeyslotAf {
    /// Always `luks1` in practice; not validated, the stripe count is what
    /// matters.
    #[serde(rename = "type")]
    pub type_: String,
    pub stripes: u32,
    pub hash: String,
}

#[serde_as]
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Luks2KeyslotArea {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub offset: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub size: u64,
    pub encryption: String,
    pub key_size: u32,
}

#[serde_as]
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Luks2Kdf {
    Pbkdf2 {
        #[serde_as(as = "Base64")]
        salt: Vec<u8>,
        hash: String,
        iterations: u32,
    },
    Argon2i {
        #[serde_as(as = "Base64")]
        salt: Vec<u8>,
        time: u32,
        memory: u32,
        cpus: u32,
    },
    Argon2id {
        #[serde_as(as = "Base64")]
        salt: Vec<u8>,
        time: u32,
        memory: u32,
        cpus: u32,
    },
}

/// Keyslot priority. The on-disk encoding is a quoted integer; absence of
/// the field means [`Normal`](Luks2KeyslotPriority::Normal), which is why
/// the keyslot stores an `Option` of this.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Luks2KeyslotPriority {
    Ignore,
    Normal,
    High,
}

impl Luks2KeyslotPriority {
    fn from_number(value: u64) -> Option<Luks2KeyslotPriority> {
        match value {
            0 => Some(Luks2KeyslotPriority::Ignore),
            1 => Some(Luks2KeyslotPriority::Normal),
            2 => Some(Luks2KeyslotPriority::High),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Luks2KeyslotPriority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        let number = match Repr::deserialize(deserializer)? {
            Repr::Number(n) => n,
            Repr::Text(s) => s
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid priority {:?}", s)))?,
        };
        Luks2KeyslotPriority::from_number(number)
            .ok_or_else(|| de::Error::custom(format!("invalid priority {}", number)))
    }
}

impl Serialize for Luks2KeyslotPriority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let number = match self {
            Luks2KeyslotPriority::Ignore => 0u8,
            Luks2KeyslotPriority::Normal => 1,
            Luks2KeyslotPriority::High => 2,
        };
        serializer.serialize_u8(number)
    }
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Luks2Keyslot {
    #[serde(rename = "type")]
    pub type_: String,
    /// Master key length protected by this slot, in bytes.
    pub key_size: u32,
    pub area: Luks2KeyslotArea,
    pub kdf: Luks2Kdf,
    pub af: Luks2KeyslotAf,
    pub priority: Option<Luks2KeyslotPriority>,
}

impl Luks2Keyslot {
    pub fn priority(&self) -> Luks2KeyslotPriority {
        self.priority.unwrap_or(Luks2KeyslotPriority::Normal)
    }
}

/// Segment size: a byte count, or `"dynamic"` for "the rest of the backing
/// device". The sentinel must never be collapsed to a number.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Luks2SegmentSize {
    Dynamic,
    Bytes(u64),
}

impl<'de> Deserialize<'de> for Luks2SegmentSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Luks2SegmentSize::Bytes(n)),
            Repr::Text(s) if s == "dynamic" => Ok(Luks2SegmentSize::Dynamic),
            Repr::Text(s) => s
                .parse()
                .map(Luks2SegmentSize::Bytes)
                .map_err(|_| de::Error::custom(format!("invalid segment size {:?}", s))),
        }
    }
}

impl Serialize for Luks2SegmentSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Luks2SegmentSize::Dynamic => serializer.serialize_str("dynamic"),
            Luks2SegmentSize::Bytes(n) => serializer.serialize_str(&n.to_string()),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Luks2SegmentIntegrity {
    #[serde(rename = "type")]
    pub type_: String,
    pub journal_encryption: String,
    pub journal_integrity: String,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Luks2Segment {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub offset: u64,
    pub size: Luks2SegmentSize,
    /// Initial sector number fed to the IV generator.
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub iv_tweak: u64,
    pub encryption: String,
    pub sector_size: u32,
    pub integrity: Option<Luks2SegmentIntegrity>,
    pub flags: Option<Vec<String>>,
}

/// The minimal, well-known part of a token object. Everything else is
/// token-type specific and stays in the raw payload.
#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct Luks2Token {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde_as(as = "Vec<PickFirst<(DisplayFromStr, _)>>")]
    pub keyslots: Vec<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Luks2Metadata {
    pub keyslots: HashMap<u32, Luks2Keyslot>,
    #[serde(default)]
    pub tokens: HashMap<u32, Box<RawValue>>,
    pub segments: HashMap<u32, Luks2Segment>,
    pub digests: HashMap<u32, Luks2Digest>,
    pub config: Luks2Config,
}

impl TryFrom<&str> for Luks2Metadata {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let res = serde_json::from_str(value)?;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_config() {
        let js = r#"{"json_size":"12288","keyslots_size":"16744448"}"#;
        let c: Luks2Config = serde_json::from_str(js).unwrap();
        assert_eq!(c.json_size, 12288);
        assert_eq!(c.keyslots_size, 16744448);
        assert_eq!(c.flags, None);
        assert_eq!(c.requirements, None);

        let to_js = serde_json::to_string(&c).unwrap();
        assert_eq!(to_js, js);
    }

    #[test]
    fn test_json_config_numeric_sizes() {
        let js = r#"{"json_size":12288,"keyslots_size":16744448,"flags":["allow-discards"]}"#;
        let c: Luks2Config = serde_json::from_str(js).unwrap();
        assert_eq!(c.json_size, 12288);
        assert_eq!(c.keyslots_size, 16744448);
        assert_eq!(c.flags, Some(vec!["allow-discards".to_string()]));
    }

    #[test]
    fn test_json_digest() {
        let js = r#"{"type":"pbkdf2","keyslots":["0"],"segments":["0"],"salt":"WYkbZOppCHRvwDvrVIbxKimZ4qjXDSizlcMRvyE7EM0=","digest":"SH2Ks6EOcW9r8Q82mLQG8+5H3TvAYLdLw8VuP7Vo5eM=","hash":"sha256","iterations":223672}"#;
        let d: Luks2Digest = serde_json::from_str(js).unwrap();

        assert_eq!(d.type_, "pbkdf2");
        assert_eq!(d.keyslots, vec![0]);
        assert_eq!(d.segments, vec![0]);
        assert_eq!(d.hash, "sha256");
        assert_eq!(d.iterations, 223672);
        assert_eq!(
            d.salt,
            [
                89u8, 137, 27, 100, 234, 105, 8, 116, 111, 192, 59, 235, 84, 134, 241, 42, 41,
                153, 226, 168, 215, 13, 40, 179, 149, 195, 17, 191, 33, 59, 16, 205
            ]
        );
        assert_eq!(
            d.digest,
            [
                72u8, 125, 138, 179, 161, 14, 113, 111, 107, 241, 15, 54, 152, 180, 6, 243, 238,
                71, 221, 59, 192, 96, 183, 75, 195, 197, 110, 63, 181, 104, 229, 227
            ]
        );
    }

    #[test]
    fn test_json_keyslot_af() {
        let js = r#"{"type":"luks1","stripes":4000,"hash":"sha256"}"#;
        let a: Luks2KeyslotAf = serde_json::from_str(js).unwrap();

        assert_eq!(a.type_, "luks1");
        assert_eq!(a.stripes, 4000);
        assert_eq!(a.hash, "sha256");

        let to_js = serde_json::to_string(&a).unwrap();
        assert_eq!(to_js, js);
    }

    #[test]
    fn test_json_keyslot_area() {
        let js = r#"{"type":"raw","offset":"32768","size":"258048","encryption":"aes-xts-plain64","key_size":64}"#;
        let a: Luks2KeyslotArea = serde_json::from_str(js).unwrap();

        assert_eq!(a.type_, "raw");
        assert_eq!(a.offset, 32768);
        assert_eq!(a.size, 258048);
        assert_eq!(a.encryption, "aes-xts-plain64");
        assert_eq!(a.key_size, 64);

        let to_js = serde_json::to_string(&a).unwrap();
        assert_eq!(to_js, js);
    }

    #[test]
    fn test_json_keyslot_kdf_pbkdf2() {
        let js = r#"{"type":"pbkdf2","salt":"SH2Ks6EOcW9r8Q82mLQG8+5H3TvAYLdLw8VuP7Vo5eM=","hash":"sha256","iterations":1234}"#;
        let k: Luks2Kdf = serde_json::from_str(js).unwrap();

        match &k {
            Luks2Kdf::Pbkdf2 {
                salt,
                hash,
                iterations,
            } => {
                assert_eq!(salt.len(), 32);
                assert_eq!(hash, "sha256");
                assert_eq!(*iterations, 1234);
            }
            _ => panic!("expected pbkdf2"),
        }

        let to_js = serde_json::to_string(&k).unwrap();
        assert_eq!(to_js, js);
    }

    #[test]
    fn test_json_keyslot_kdf_argon2() {
        for type_ in ["argon2i", "argon2id"] {
            let js = format!(
                r#"{{"type":"{}","salt":"cNqP5YVtK2DRlLvTPZU8LXy4jWi1+QJPH+Gz3WouBTI=","time":8,"memory":1048576,"cpus":4}}"#,
                type_
            );
            let k: Luks2Kdf = serde_json::from_str(&js).unwrap();

            match &k {
                Luks2Kdf::Argon2i {
                    salt,
                    time,
                    memory,
                    cpus,
                }
                | Luks2Kdf::Argon2id {
                    salt,
                    time,
                    memory,
                    cpus,
                } => {
                    assert_eq!(salt.len(), 32);
                    assert_eq!(*time, 8);
                    assert_eq!(*memory, 1048576);
                    assert_eq!(*cpus, 4);
                }
                _ => panic!("expected argon2"),
            }

            let to_js = serde_json::to_string(&k).unwrap();
            assert_eq!(to_js, js);
        }
    }

    #[test]
    fn test_json_keyslot_priority_forms() {
        let base = r#"{"type":"luks2","key_size":64,"area":{"type":"raw","offset":"32768","size":"258048","encryption":"aes-xts-plain64","key_size":64},"kdf":{"type":"pbkdf2","salt":"SH2Ks6EOcW9r8Q82mLQG8+5H3TvAYLdLw8VuP7Vo5eM=","hash":"sha256","iterations":1000},"af":{"type":"luks1","stripes":4000,"hash":"sha256"}"#;

        let absent: Luks2Keyslot = serde_json::from_str(&format!("{}}}", base)).unwrap();
        assert_eq!(absent.priority, None);
        assert_eq!(absent.priority(), Luks2KeyslotPriority::Normal);

        let quoted: Luks2Keyslot =
            serde_json::from_str(&format!(r#"{},"priority":"2"}}"#, base)).unwrap();
        assert_eq!(quoted.priority, Some(Luks2KeyslotPriority::High));

        let numeric: Luks2Keyslot =
            serde_json::from_str(&format!(r#"{},"priority":0}}"#, base)).unwrap();
        assert_eq!(numeric.priority, Some(Luks2KeyslotPriority::Ignore));

        let invalid = serde_json::from_str::<Luks2Keyslot>(&format!(r#"{},"priority":7}}"#, base));
        assert!(invalid.is_err());
    }

    #[test]
    fn test_json_segment() {
        let js = r#"{"type":"crypt","offset":"16777216","size":"dynamic","iv_tweak":"0","encryption":"aes-xts-plain64","sector_size":512}"#;
        let s: Luks2Segment = serde_json::from_str(js).unwrap();

        assert_eq!(s.type_, "crypt");
        assert_eq!(s.offset, 16777216);
        assert_eq!(s.size, Luks2SegmentSize::Dynamic);
        assert_eq!(s.iv_tweak, 0);
        assert_eq!(s.encryption, "aes-xts-plain64");
        assert_eq!(s.sector_size, 512);

        let to_js = serde_json::to_string(&s).unwrap();
        assert_eq!(to_js, js);
    }

    #[test]
    fn test_json_segment_fixed_size() {
        let js = r#"{"type":"crypt","offset":"4096","size":"8388608","iv_tweak":0,"encryption":"aes-xts-plain64","sector_size":4096}"#;
        let s: Luks2Segment = serde_json::from_str(js).unwrap();
        assert_eq!(s.size, Luks2SegmentSize::Bytes(8388608));
        assert_eq!(s.iv_tweak, 0);

        assert!(serde_json::from_str::<Luks2Segment>(
            r#"{"type":"crypt","offset":"0","size":"huge","iv_tweak":"0","encryption":"aes-xts-plain64","sector_size":512}"#
        )
        .is_err());
    }

    #[test]
    fn test_json_token_view() {
        let js = r#"{"type":"luks2-keyring","keyslots":["0","1"],"key_description":"my:key"}"#;
        let t: Luks2Token = serde_json::from_str(js).unwrap();

        assert_eq!(t.type_, "luks2-keyring");
        assert_eq!(t.keyslots, vec![0, 1]);
    }

    #[test]
    fn test_json_metadata_raw_token_payload() {
        let js = r#"{"keyslots":{},"tokens":{"0":{"type":"clevis","keyslots":["1"],"jwe":{"protected":"test\n"}}},"segments":{},"digests":{},"config":{"json_size":"12288","keyslots_size":"4161536"}}"#;
        let m: Luks2Metadata = serde_json::from_str(js).unwrap();

        let raw = m.tokens.get(&0).unwrap();
        assert_eq!(
            raw.get(),
            r#"{"type":"clevis","keyslots":["1"],"jwe":{"protected":"test\n"}}"#
        );

        let view: Luks2Token = serde_json::from_str(raw.get()).unwrap();
        assert_eq!(view.type_, "clevis");
        assert_eq!(view.keyslots, vec![1]);
    }

    #[test]
    fn test_json_metadata_example() {
        let js = r#"{
          "keyslots":{
            "0":{
              "type":"luks2",
              "key_size":32,
              "af":{
                "type":"luks1",
                "stripes":4000,
                "hash":"sha256"
              },
              "area":{
                "type":"raw",
                "encryption":"aes-xts-plain64",
                "key_size":32,
                "offset":"32768",
                "size":"131072"
              },
              "kdf":{
                "type":"argon2i",
                "time":4,
                "memory":235980,
                "cpus":2,
                "salt":"z6vz4xK7cjan92rDA5JF8O6Jk2HouV0O8DMB6GlztVk="
              }
            },
            "1":{
              "type":"luks2",
              "key_size":32,
              "priority":"2",
              "af":{
                "type":"luks1",
                "stripes":4000,
                "hash":"sha256"
              },
              "area":{
                "type":"raw",
                "encryption":"aes-xts-plain64",
                "key_size":32,
                "offset":"163840",
                "size":"131072"
              },
              "kdf":{
                "type":"pbkdf2",
                "hash":"sha256",
                "iterations":1774240,
                "salt":"vWcwY3rx2fKpXW2Q6oSCNf8j5bvdJyEzB6BNXECGDsI="
              }
            }
          },
          "tokens":{
            "0":{
              "type":"luks2-keyring",
              "keyslots":[
                "1"
              ],
              "key_description":"MyKeyringKeyID"
            }
          },
          "segments":{
            "0":{
              "type":"crypt",
              "offset":"4194304",
              "iv_tweak":"0",
              "size":"dynamic",
              "encryption":"aes-xts-plain64",
              "sector_size":512
            }
          },
          "digests":{
            "0":{
              "type":"pbkdf2",
              "keyslots":[
                "0",
                "1"
              ],
              "segments":[
                "0"
              ],
              "hash":"sha256",
              "iterations":110890,
              "salt":"G8gqtKhS96IbogHyJLO+t9kmjLkx+DM3HHJqQtgc2Dk=",
              "digest":"C9JWko5m+oYmjg6R0t/98cGGzLr/4UaG3hImSJMivfc="
            }
          },
          "config":{
            "json_size":"12288",
            "keyslots_size":"4161536",
            "flags":[
              "allow-discards"
            ]
          }
        }
        "#;
        let m: Luks2Metadata = serde_json::from_str(js).unwrap();

        assert_eq!(m.keyslots.len(), 2);
        assert_eq!(m.keyslots[&0].priority(), Luks2KeyslotPriority::Normal);
        assert_eq!(m.keyslots[&1].priority(), Luks2KeyslotPriority::High);
        assert_eq!(m.keyslots[&0].af.stripes, 4000);
        assert_eq!(m.segments[&0].size, Luks2SegmentSize::Dynamic);
        assert_eq!(m.digests[&0].keyslots, vec![0, 1]);
        assert_eq!(m.digests[&0].segments, vec![0]);
        assert_eq!(m.config.flags, Some(vec!["allow-discards".to_string()]));
    }
}
