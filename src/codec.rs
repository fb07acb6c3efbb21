//! Wire encodings for GATT attributes: characteristic property names, pretty
//! UUIDs and manufacturer payloads.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::Result;

pub const FLAG_READ: u16 = 0x0002;
pub const FLAG_WRITE_NO_RESPONSE: u16 = 0x0004;
pub const FLAG_WRITE: u16 = 0x0008;
pub const FLAG_NOTIFY: u16 = 0x0010;
pub const FLAG_INDICATE: u16 = 0x0020;

/// Bluetooth Base UUID, shared by every 16-bit and 32-bit SIG assigned number.
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
const BASE_MASK: u128 = (1 << 96) - 1;

fn property_name(flag: u16) -> Option<&'static str> {
  match flag {
    FLAG_READ => Some("read"),
    FLAG_WRITE_NO_RESPONSE => Some("writeWithoutResponse"),
    FLAG_WRITE => Some("write"),
    FLAG_NOTIFY => Some("notify"),
    FLAG_INDICATE => Some("indicate"),
    _ => None,
  }
}

/// Names every recognised bit of a characteristic property mask, lowest bit first.
pub fn decode_properties(mask: u16) -> Vec<&'static str> {
  let mut remaining = mask;
  let mut names = Vec::with_capacity(remaining.count_ones() as usize);
  while remaining != 0 {
    let lowest = remaining & remaining.wrapping_neg();
    remaining &= !lowest;
    if let Some(name) = property_name(lowest) {
      names.push(name);
    }
  }
  names
}

/// Hex of every manufacturer-specific AD field, concatenated in advertised order.
pub fn manufacturer_hex(fields: &[Vec<u8>]) -> String {
  fields.iter().map(hex::encode).collect()
}

/// UUID as it appears on the wire: SIG 16-bit numbers as integers, everything
/// else as a lowercase hyphenated string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PrettyUuid {
  Short(u16),
  Long(String),
}

impl PrettyUuid {
  /// Reads `UUID(0x180f)`, `UUID('6e400001-...')`, `0x180f`, `180f` or a bare
  /// 128-bit string.
  pub fn parse(raw: &str) -> Result<Self> {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("UUID(").and_then(|rest| rest.strip_suffix(')')) {
      text = inner.trim();
    }
    let text = text.trim_matches(|c| c == '\'' || c == '"');
    let digits = text
      .strip_prefix("0x")
      .or_else(|| text.strip_prefix("0X"))
      .unwrap_or(text);
    if !digits.is_empty() && digits.len() <= 8 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
      let value = u32::from_str_radix(digits, 16)
        .map_err(|err| crate::Error::InvalidRequest(format!("invalid UUID {raw}: {err}")))?;
      return Ok(Uuid::from_u128(((value as u128) << 96) | BLUETOOTH_BASE_UUID).into());
    }
    Ok(Uuid::parse_str(text)?.into())
  }
}

impl From<Uuid> for PrettyUuid {
  fn from(uuid: Uuid) -> Self {
    let value = uuid.as_u128();
    if value & BASE_MASK == BLUETOOTH_BASE_UUID && value >> 112 == 0 {
      PrettyUuid::Short((value >> 96) as u16)
    } else {
      PrettyUuid::Long(uuid.hyphenated().to_string())
    }
  }
}

impl fmt::Display for PrettyUuid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PrettyUuid::Short(value) => write!(f, "0x{value:04x}"),
      PrettyUuid::Long(text) => f.write_str(text),
    }
  }
}

impl<'de> Deserialize<'de> for PrettyUuid {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Short(u16),
      Text(String),
    }

    match Raw::deserialize(deserializer)? {
      Raw::Short(value) => Ok(PrettyUuid::Short(value)),
      Raw::Text(text) => PrettyUuid::parse(&text).map_err(de::Error::custom),
    }
  }
}
