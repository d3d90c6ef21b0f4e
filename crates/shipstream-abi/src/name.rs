//! Account / action / table names: 64-bit values rendered in base-32 text.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::AbiError;

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// A 64-bit encoded name such as `eosio.token` or `transfer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u64);

impl Name {
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'.' => Some(0),
        _ => None,
    }
}

impl FromStr for Name {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > 13 {
            return Err(AbiError::InvalidName(s.to_string()));
        }

        let mut value = 0u64;
        for (i, &c) in bytes.iter().enumerate() {
            let sym = char_to_symbol(c).ok_or_else(|| AbiError::InvalidName(s.to_string()))?;
            if i < 12 {
                value |= (sym & 0x1f) << (64 - 5 * (i + 1));
            } else {
                // the 13th character only has four bits available
                if sym > 0x0f {
                    return Err(AbiError::InvalidName(s.to_string()));
                }
                value |= sym;
            }
        }
        Ok(Self(value))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
            chars[12 - i] = CHARMAP[(tmp & mask) as usize];
            tmp >>= shift;
        }
        let end = chars.iter().rposition(|&c| c != b'.').map_or(0, |p| p + 1);
        // CHARMAP is pure ASCII
        f.write_str(std::str::from_utf8(&chars[..end]).map_err(|_| fmt::Error)?)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Render a `symbol_code` (up to 7 upper-case letters packed little-endian).
pub fn symbol_code_to_string(raw: u64) -> String {
    raw.to_le_bytes()
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Parse a `symbol_code` such as `EOS`.
pub fn symbol_code_from_str(s: &str) -> Result<u64, AbiError> {
    if s.is_empty() || s.len() > 7 || !s.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(AbiError::invalid("symbol_code", format!("'{s}' is not a valid symbol code")));
    }
    let mut raw = [0u8; 8];
    raw[..s.len()].copy_from_slice(s.as_bytes());
    Ok(u64::from_le_bytes(raw))
}
