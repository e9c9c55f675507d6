// ABOUTME: Time-ordered 128-bit identifier codec
// ABOUTME: Public form is `<prefix>_<base62>`, 22 canonical characters after the underscore

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ENCODED_LEN: usize = 22;

/// Type prefixes for every public entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    Sandbox,
    Exec,
    Session,
    Artifact,
    Image,
    Profile,
    Node,
    Project,
    ApiKey,
}

impl Prefix {
    pub fn as_str(self) -> &'static str {
        match self {
            Prefix::Sandbox => "sb",
            Prefix::Exec => "ex",
            Prefix::Session => "sess",
            Prefix::Artifact => "art",
            Prefix::Image => "img",
            Prefix::Profile => "prof",
            Prefix::Node => "node",
            Prefix::Project => "proj",
            Prefix::ApiKey => "key",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "sb" => Some(Prefix::Sandbox),
            "ex" => Some(Prefix::Exec),
            "sess" => Some(Prefix::Session),
            "art" => Some(Prefix::Artifact),
            "img" => Some(Prefix::Image),
            "prof" => Some(Prefix::Profile),
            "node" => Some(Prefix::Node),
            "proj" => Some(Prefix::Project),
            "key" => Some(Prefix::ApiKey),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("missing prefix separator")]
    MissingSeparator,
    #[error("unknown id prefix: {0}")]
    UnknownPrefix(String),
    #[error("wrong encoded length: expected {ENCODED_LEN}, got {0}")]
    WrongLength(usize),
    #[error("invalid base62 character: {0}")]
    InvalidCharacter(char),
    #[error("decoded value overflows 128 bits")]
    Overflow,
}

/// A time-ordered 128-bit identifier, rendered publicly as `<prefix>_<base62>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id {
    prefix: Prefix,
    bytes: [u8; 16],
}

impl Id {
    /// Generate a new id: 48-bit millisecond timestamp in the high bits,
    /// version nibble 7, RFC4122 variant bits, CSPRNG fill for the rest.
    pub fn generate(prefix: Prefix) -> Self {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::from_parts(prefix, millis, &mut rand::thread_rng())
    }

    fn from_parts(prefix: Prefix, millis: u64, rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; 16];
        let ts = millis & 0xFFFF_FFFF_FFFF; // 48 bits
        bytes[0] = (ts >> 40) as u8;
        bytes[1] = (ts >> 32) as u8;
        bytes[2] = (ts >> 24) as u8;
        bytes[3] = (ts >> 16) as u8;
        bytes[4] = (ts >> 8) as u8;
        bytes[5] = ts as u8;

        let mut rand_tail = [0u8; 10];
        rng.fill_bytes(&mut rand_tail);
        bytes[6] = 0x70 | (rand_tail[0] & 0x0F); // version nibble 7
        bytes[7] = rand_tail[1];
        bytes[8] = 0x80 | (rand_tail[2] & 0x3F); // RFC4122 variant (10xxxxxx)
        bytes[9..16].copy_from_slice(&rand_tail[3..10]);

        Self { prefix, bytes }
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    pub fn bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Millisecond timestamp packed into the high 48 bits at generation time.
    pub fn timestamp_millis(&self) -> u64 {
        (u64::from(self.bytes[0]) << 40)
            | (u64::from(self.bytes[1]) << 32)
            | (u64::from(self.bytes[2]) << 24)
            | (u64::from(self.bytes[3]) << 16)
            | (u64::from(self.bytes[4]) << 8)
            | u64::from(self.bytes[5])
    }

    fn to_u128(self) -> u128 {
        u128::from_be_bytes(self.bytes)
    }

    fn from_u128(prefix: Prefix, value: u128) -> Self {
        Self {
            prefix,
            bytes: value.to_be_bytes(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix.as_str(), encode_base62(self.to_u128()))
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Id::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl FromStr for Id {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix_str, encoded) = s.split_once('_').ok_or(IdParseError::MissingSeparator)?;
        let prefix = Prefix::from_str(prefix_str)
            .ok_or_else(|| IdParseError::UnknownPrefix(prefix_str.to_string()))?;
        let value = decode_base62(encoded)?;
        Ok(Id::from_u128(prefix, value))
    }
}

fn encode_base62(mut value: u128) -> String {
    let mut out = [0u8; ENCODED_LEN];
    for slot in out.iter_mut().rev() {
        *slot = BASE62_ALPHABET[(value % 62) as usize];
        value /= 62;
    }
    // SAFETY: BASE62_ALPHABET is all ASCII.
    String::from_utf8(out.to_vec()).expect("base62 alphabet is ascii")
}

fn decode_base62(s: &str) -> Result<u128, IdParseError> {
    if s.len() != ENCODED_LEN {
        return Err(IdParseError::WrongLength(s.len()));
    }
    let mut value: u128 = 0;
    for c in s.chars() {
        let digit = base62_digit(c).ok_or(IdParseError::InvalidCharacter(c))?;
        value = value
            .checked_mul(62)
            .and_then(|v| v.checked_add(digit as u128))
            .ok_or(IdParseError::Overflow)?;
    }
    Ok(value)
}

fn base62_digit(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        'A'..='Z' => Some(c as u8 - b'A' + 10),
        'a'..='z' => Some(c as u8 - b'a' + 36),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = Id::generate(Prefix::Sandbox);
        let rendered = id.to_string();
        assert!(rendered.starts_with("sb_"));
        assert_eq!(rendered.len(), 3 + ENCODED_LEN);
        let parsed: Id = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_unknown_prefix() {
        let bogus = format!("zz_{}", "0".repeat(ENCODED_LEN));
        assert_eq!(
            Id::from_str(&bogus).unwrap_err(),
            IdParseError::UnknownPrefix("zz".to_string())
        );
    }

    #[test]
    fn rejects_wrong_length() {
        let bogus = "sb_tooshort";
        assert!(matches!(
            Id::from_str(bogus).unwrap_err(),
            IdParseError::WrongLength(_)
        ));
    }

    #[test]
    fn rejects_missing_separator() {
        assert_eq!(
            Id::from_str("notanid").unwrap_err(),
            IdParseError::MissingSeparator
        );
    }

    #[test]
    fn preserves_lexicographic_order_across_milliseconds() {
        let mut rng = rand::thread_rng();
        let earlier = Id::from_parts(Prefix::Exec, 1_000, &mut rng);
        let later = Id::from_parts(Prefix::Exec, 2_000, &mut rng);
        assert!(earlier.to_string() < later.to_string());
    }

    #[test]
    fn embeds_the_generation_timestamp() {
        let id = Id::generate(Prefix::Exec);
        let now = chrono::Utc::now().timestamp_millis() as u64;
        assert!(id.timestamp_millis() <= now);
        assert!(now - id.timestamp_millis() < 5_000);
    }
}
