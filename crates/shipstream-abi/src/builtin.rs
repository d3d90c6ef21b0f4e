//! Built-in scalar types and their text / JSON forms.

use chrono::{DateTime, NaiveDateTime};
use ripemd::{Digest, Ripemd160};
use serde_json::{json, Value};

use crate::buffer::{SerialReader, SerialWriter};
use crate::error::AbiError;
use crate::name::{symbol_code_from_str, symbol_code_to_string, Name};

/// Milliseconds between the Unix epoch and the block timestamp epoch (2000-01-01).
const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
const BLOCK_INTERVAL_MS: i64 = 500;

const KEY_SUFFIXES: [&str; 3] = ["K1", "R1", "WA"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Int128,
    Uint128,
    Varint32,
    Varuint32,
    Float32,
    Float64,
    Float128,
    TimePoint,
    TimePointSec,
    BlockTimestamp,
    Name,
    Bytes,
    String,
    Checksum160,
    Checksum256,
    Checksum512,
    PublicKey,
    PrivateKey,
    Signature,
    Symbol,
    SymbolCode,
    Asset,
    ExtendedAsset,
}

const NAMES: &[(&str, Builtin)] = &[
    ("bool", Builtin::Bool),
    ("int8", Builtin::Int8),
    ("uint8", Builtin::Uint8),
    ("int16", Builtin::Int16),
    ("uint16", Builtin::Uint16),
    ("int32", Builtin::Int32),
    ("uint32", Builtin::Uint32),
    ("int64", Builtin::Int64),
    ("uint64", Builtin::Uint64),
    ("int128", Builtin::Int128),
    ("uint128", Builtin::Uint128),
    ("varint32", Builtin::Varint32),
    ("varuint32", Builtin::Varuint32),
    ("float32", Builtin::Float32),
    ("float64", Builtin::Float64),
    ("float128", Builtin::Float128),
    ("time_point", Builtin::TimePoint),
    ("time_point_sec", Builtin::TimePointSec),
    ("block_timestamp_type", Builtin::BlockTimestamp),
    ("name", Builtin::Name),
    ("bytes", Builtin::Bytes),
    ("string", Builtin::String),
    ("checksum160", Builtin::Checksum160),
    ("checksum256", Builtin::Checksum256),
    ("checksum512", Builtin::Checksum512),
    ("public_key", Builtin::PublicKey),
    ("private_key", Builtin::PrivateKey),
    ("signature", Builtin::Signature),
    ("symbol", Builtin::Symbol),
    ("symbol_code", Builtin::SymbolCode),
    ("asset", Builtin::Asset),
    ("extended_asset", Builtin::ExtendedAsset),
];

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES.iter().find(|(n, _)| *n == name).map(|(_, b)| *b)
    }

    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, b)| *b == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    /// Every builtin with its ABI type name.
    pub fn all() -> impl Iterator<Item = (&'static str, Builtin)> {
        NAMES.iter().copied()
    }

    // ─── Decode ──────────────────────────────────────────────────────────────

    pub fn decode(self, r: &mut SerialReader<'_>) -> Result<Value, AbiError> {
        let value = match self {
            Builtin::Bool => match r.read_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                b => return Err(AbiError::invalid("bool", format!("byte {b} is not 0 or 1"))),
            },
            Builtin::Int8 => Value::from(r.read_u8()? as i8),
            Builtin::Uint8 => Value::from(r.read_u8()?),
            Builtin::Int16 => Value::from(r.read_u16()? as i16),
            Builtin::Uint16 => Value::from(r.read_u16()?),
            Builtin::Int32 => Value::from(r.read_u32()? as i32),
            Builtin::Uint32 => Value::from(r.read_u32()?),
            Builtin::Int64 => Value::String((r.read_u64()? as i64).to_string()),
            Builtin::Uint64 => Value::String(r.read_u64()?.to_string()),
            Builtin::Int128 => Value::String((r.read_u128()? as i128).to_string()),
            Builtin::Uint128 => Value::String(r.read_u128()?.to_string()),
            Builtin::Varint32 => Value::from(r.read_varint32()?),
            Builtin::Varuint32 => Value::from(r.read_varuint32()?),
            Builtin::Float32 => float_value(f32::from_le_bytes(r.read_array()?) as f64),
            Builtin::Float64 => float_value(f64::from_le_bytes(r.read_array()?)),
            Builtin::Float128 => Value::String(hex::encode_upper(r.read_slice(16)?)),
            Builtin::TimePoint => {
                let micros = r.read_u64()? as i64;
                let dt = DateTime::from_timestamp_micros(micros)
                    .ok_or_else(|| AbiError::invalid("time_point", "out of range"))?;
                Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
            }
            Builtin::TimePointSec => {
                let secs = r.read_u32()? as i64;
                let dt = DateTime::from_timestamp(secs, 0)
                    .ok_or_else(|| AbiError::invalid("time_point_sec", "out of range"))?;
                Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            }
            Builtin::BlockTimestamp => {
                let slot = r.read_u32()? as i64;
                let dt = DateTime::from_timestamp_millis(slot * BLOCK_INTERVAL_MS + BLOCK_TIMESTAMP_EPOCH_MS)
                    .ok_or_else(|| AbiError::invalid("block_timestamp_type", "out of range"))?;
                Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
            }
            Builtin::Name => Value::String(Name::from_u64(r.read_u64()?).to_string()),
            Builtin::Bytes => Value::String(hex::encode_upper(r.read_bytes()?)),
            Builtin::String => Value::String(r.read_string()?),
            Builtin::Checksum160 => Value::String(hex::encode_upper(r.read_slice(20)?)),
            Builtin::Checksum256 => Value::String(hex::encode_upper(r.read_slice(32)?)),
            Builtin::Checksum512 => Value::String(hex::encode_upper(r.read_slice(64)?)),
            Builtin::PublicKey => {
                let kind = r.read_u8()?;
                let data = match kind {
                    0 | 1 => r.read_slice(33)?.to_vec(),
                    2 => {
                        let mut w = SerialWriter::new();
                        w.write_slice(r.read_slice(33)?);
                        w.write_u8(r.read_u8()?);
                        w.write_bytes(r.read_bytes()?);
                        w.into_bytes()
                    }
                    _ => return Err(AbiError::invalid("public_key", format!("unknown key type {kind}"))),
                };
                Value::String(key_to_string("PUB", kind, &data)?)
            }
            Builtin::PrivateKey => {
                let kind = r.read_u8()?;
                let data = r.read_slice(32)?;
                Value::String(key_to_string("PVT", kind, data)?)
            }
            Builtin::Signature => {
                let kind = r.read_u8()?;
                let data = match kind {
                    0 | 1 => r.read_slice(65)?.to_vec(),
                    2 => {
                        let mut w = SerialWriter::new();
                        w.write_slice(r.read_slice(65)?);
                        w.write_bytes(r.read_bytes()?);
                        w.write_bytes(r.read_bytes()?);
                        w.into_bytes()
                    }
                    _ => return Err(AbiError::invalid("signature", format!("unknown signature type {kind}"))),
                };
                Value::String(key_to_string("SIG", kind, &data)?)
            }
            Builtin::Symbol => Value::String(symbol_to_string(r.read_u64()?)),
            Builtin::SymbolCode => Value::String(symbol_code_to_string(r.read_u64()?)),
            Builtin::Asset => Value::String(read_asset(r)?),
            Builtin::ExtendedAsset => {
                let quantity = read_asset(r)?;
                let contract = Name::from_u64(r.read_u64()?).to_string();
                json!({ "quantity": quantity, "contract": contract })
            }
        };
        Ok(value)
    }

    // ─── Encode ──────────────────────────────────────────────────────────────

    pub fn encode(self, value: &Value, w: &mut SerialWriter) -> Result<(), AbiError> {
        match self {
            Builtin::Bool => match value {
                Value::Bool(b) => w.write_u8(*b as u8),
                other => w.write_u8(narrow::<u8>(self, other)?.min(1)),
            },
            Builtin::Int8 => w.write_u8(narrow::<i8>(self, value)? as u8),
            Builtin::Uint8 => w.write_u8(narrow::<u8>(self, value)?),
            Builtin::Int16 => w.write_u16(narrow::<i16>(self, value)? as u16),
            Builtin::Uint16 => w.write_u16(narrow::<u16>(self, value)?),
            Builtin::Int32 => w.write_u32(narrow::<i32>(self, value)? as u32),
            Builtin::Uint32 => w.write_u32(narrow::<u32>(self, value)?),
            Builtin::Int64 => w.write_u64(narrow::<i64>(self, value)? as u64),
            Builtin::Uint64 => w.write_u64(narrow::<u64>(self, value)?),
            Builtin::Int128 => w.write_u128(integer(self, value)? as u128),
            Builtin::Uint128 => w.write_u128(unsigned128(self, value)?),
            Builtin::Varint32 => w.write_varint32(narrow::<i32>(self, value)?),
            Builtin::Varuint32 => w.write_varuint32(narrow::<u32>(self, value)?),
            Builtin::Float32 => w.write_slice(&(float(self, value)? as f32).to_le_bytes()),
            Builtin::Float64 => w.write_slice(&float(self, value)?.to_le_bytes()),
            Builtin::Float128 => w.write_slice(&fixed_hex(self, value, 16)?),
            Builtin::TimePoint => w.write_u64(parse_time(self, value)? as u64),
            Builtin::TimePointSec => {
                let secs = parse_time(self, value)? / 1_000_000;
                w.write_u32(u32::try_from(secs).map_err(|_| AbiError::invalid(self.name(), "out of range"))?);
            }
            Builtin::BlockTimestamp => {
                let ms = parse_time(self, value)? / 1_000;
                let slot = (ms - BLOCK_TIMESTAMP_EPOCH_MS) / BLOCK_INTERVAL_MS;
                w.write_u32(u32::try_from(slot).map_err(|_| AbiError::invalid(self.name(), "out of range"))?);
            }
            Builtin::Name => w.write_u64(text(self, value)?.parse::<Name>()?.as_u64()),
            Builtin::Bytes => {
                let data = hex::decode(text(self, value)?).map_err(|e| AbiError::invalid(self.name(), e.to_string()))?;
                w.write_bytes(&data);
            }
            Builtin::String => w.write_string(text(self, value)?),
            Builtin::Checksum160 => w.write_slice(&fixed_hex(self, value, 20)?),
            Builtin::Checksum256 => w.write_slice(&fixed_hex(self, value, 32)?),
            Builtin::Checksum512 => w.write_slice(&fixed_hex(self, value, 64)?),
            Builtin::PublicKey => {
                let (kind, data) = key_from_string(self, "PUB", text(self, value)?)?;
                if kind != 2 && data.len() != 33 {
                    return Err(AbiError::invalid(self.name(), "key data must be 33 bytes"));
                }
                w.write_u8(kind);
                w.write_slice(&data);
            }
            Builtin::PrivateKey => {
                let (kind, data) = key_from_string(self, "PVT", text(self, value)?)?;
                if data.len() != 32 {
                    return Err(AbiError::invalid(self.name(), "key data must be 32 bytes"));
                }
                w.write_u8(kind);
                w.write_slice(&data);
            }
            Builtin::Signature => {
                let (kind, data) = key_from_string(self, "SIG", text(self, value)?)?;
                if kind != 2 && data.len() != 65 {
                    return Err(AbiError::invalid(self.name(), "signature data must be 65 bytes"));
                }
                w.write_u8(kind);
                w.write_slice(&data);
            }
            Builtin::Symbol => w.write_u64(symbol_from_str(text(self, value)?)?),
            Builtin::SymbolCode => w.write_u64(symbol_code_from_str(text(self, value)?)?),
            Builtin::Asset => write_asset(text(self, value)?, w)?,
            Builtin::ExtendedAsset => {
                let quantity = value
                    .get("quantity")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AbiError::invalid(self.name(), "missing 'quantity'"))?;
                let contract = value
                    .get("contract")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AbiError::invalid(self.name(), "missing 'contract'"))?;
                write_asset(quantity, w)?;
                w.write_u64(contract.parse::<Name>()?.as_u64());
            }
        }
        Ok(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn float_value(f: f64) -> Value {
    match serde_json::Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None if f.is_nan() => Value::String("NaN".into()),
        None if f > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

fn text<'v>(ty: Builtin, value: &'v Value) -> Result<&'v str, AbiError> {
    value
        .as_str()
        .ok_or_else(|| AbiError::invalid(ty.name(), format!("expected string, got {value}")))
}

fn integer(ty: Builtin, value: &Value) -> Result<i128, AbiError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .ok_or_else(|| AbiError::invalid(ty.name(), format!("{n} is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|e| AbiError::invalid(ty.name(), format!("'{s}': {e}"))),
        Value::Bool(b) => Ok(i128::from(*b)),
        other => Err(AbiError::invalid(ty.name(), format!("expected integer, got {other}"))),
    }
}

fn unsigned128(ty: Builtin, value: &Value) -> Result<u128, AbiError> {
    match value {
        Value::String(s) => s
            .trim()
            .parse::<u128>()
            .map_err(|e| AbiError::invalid(ty.name(), format!("'{s}': {e}"))),
        other => u128::try_from(integer(ty, other)?).map_err(|_| AbiError::invalid(ty.name(), "out of range")),
    }
}

fn narrow<T: TryFrom<i128>>(ty: Builtin, value: &Value) -> Result<T, AbiError> {
    let v = integer(ty, value)?;
    T::try_from(v).map_err(|_| AbiError::invalid(ty.name(), format!("{v} out of range")))
}

fn float(ty: Builtin, value: &Value) -> Result<f64, AbiError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| AbiError::invalid(ty.name(), format!("{n} is not a float"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| AbiError::invalid(ty.name(), format!("'{s}': {e}"))),
        other => Err(AbiError::invalid(ty.name(), format!("expected number, got {other}"))),
    }
}

fn fixed_hex(ty: Builtin, value: &Value, len: usize) -> Result<Vec<u8>, AbiError> {
    let data = hex::decode(text(ty, value)?).map_err(|e| AbiError::invalid(ty.name(), e.to_string()))?;
    if data.len() != len {
        return Err(AbiError::invalid(
            ty.name(),
            format!("expected {len} bytes, got {}", data.len()),
        ));
    }
    Ok(data)
}

/// Parse an ISO-8601 timestamp (optionally `Z`-suffixed) into Unix microseconds.
fn parse_time(ty: Builtin, value: &Value) -> Result<i64, AbiError> {
    let s = text(ty, value)?.trim_end_matches('Z');
    let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| AbiError::invalid(ty.name(), format!("'{s}': {e}")))?;
    Ok(dt.and_utc().timestamp_micros())
}

fn key_checksum(data: &[u8], suffix: &[u8]) -> [u8; 4] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.update(suffix);
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2], digest[3]]
}

fn key_to_string(prefix: &str, kind: u8, data: &[u8]) -> Result<String, AbiError> {
    let suffix = KEY_SUFFIXES
        .get(kind as usize)
        .ok_or_else(|| AbiError::invalid(prefix, format!("unknown key type {kind}")))?;
    let mut payload = data.to_vec();
    payload.extend_from_slice(&key_checksum(data, suffix.as_bytes()));
    Ok(format!("{prefix}_{suffix}_{}", bs58::encode(payload).into_string()))
}

fn split_checksum(ty: Builtin, encoded: &str) -> Result<(Vec<u8>, [u8; 4]), AbiError> {
    let raw = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| AbiError::invalid(ty.name(), e.to_string()))?;
    if raw.len() < 4 {
        return Err(AbiError::invalid(ty.name(), "encoded key too short"));
    }
    let (data, check) = raw.split_at(raw.len() - 4);
    Ok((data.to_vec(), [check[0], check[1], check[2], check[3]]))
}

fn key_from_string(ty: Builtin, prefix: &str, s: &str) -> Result<(u8, Vec<u8>), AbiError> {
    if let Some(rest) = s.strip_prefix(prefix).and_then(|r| r.strip_prefix('_')) {
        let (suffix, body) = rest
            .split_once('_')
            .ok_or_else(|| AbiError::invalid(ty.name(), format!("malformed key '{s}'")))?;
        let kind = KEY_SUFFIXES
            .iter()
            .position(|k| *k == suffix)
            .ok_or_else(|| AbiError::invalid(ty.name(), format!("unknown key type '{suffix}'")))?;
        let (data, check) = split_checksum(ty, body)?;
        if key_checksum(&data, suffix.as_bytes()) != check {
            return Err(AbiError::invalid(ty.name(), "checksum mismatch"));
        }
        return Ok((kind as u8, data));
    }

    // legacy `EOS...` public keys carry an unsuffixed checksum
    if let (Builtin::PublicKey, Some(body)) = (ty, s.strip_prefix("EOS")) {
        let (data, check) = split_checksum(ty, body)?;
        if key_checksum(&data, b"") != check {
            return Err(AbiError::invalid(ty.name(), "checksum mismatch"));
        }
        return Ok((0, data));
    }

    Err(AbiError::invalid(ty.name(), format!("unrecognized key format '{s}'")))
}

fn symbol_to_string(raw: u64) -> String {
    format!("{},{}", raw & 0xff, symbol_code_to_string(raw >> 8))
}

fn symbol_from_str(s: &str) -> Result<u64, AbiError> {
    let (precision, code) = s
        .split_once(',')
        .ok_or_else(|| AbiError::invalid("symbol", format!("'{s}' is not PRECISION,CODE")))?;
    let precision: u8 = precision
        .trim()
        .parse()
        .map_err(|_| AbiError::invalid("symbol", format!("bad precision in '{s}'")))?;
    Ok((symbol_code_from_str(code.trim())? << 8) | precision as u64)
}

fn read_asset(r: &mut SerialReader<'_>) -> Result<String, AbiError> {
    let amount = r.read_u64()? as i64;
    let symbol = r.read_u64()?;
    Ok(format_asset(amount, (symbol & 0xff) as usize, &symbol_code_to_string(symbol >> 8)))
}

fn format_asset(amount: i64, precision: usize, code: &str) -> String {
    let digits = (amount as i128).unsigned_abs().to_string();
    let digits = if digits.len() <= precision {
        format!("{}{digits}", "0".repeat(precision + 1 - digits.len()))
    } else {
        digits
    };
    let (int_part, frac_part) = digits.split_at(digits.len() - precision);
    let sign = if amount < 0 { "-" } else { "" };
    if precision == 0 {
        format!("{sign}{int_part} {code}")
    } else {
        format!("{sign}{int_part}.{frac_part} {code}")
    }
}

fn write_asset(s: &str, w: &mut SerialWriter) -> Result<(), AbiError> {
    let bad = || AbiError::invalid("asset", format!("'{s}' is not AMOUNT SYMBOL"));
    let (amount, code) = s.trim().split_once(' ').ok_or_else(bad)?;
    let (negative, amount) = match amount.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, amount),
    };
    let (int_part, frac_part) = amount.split_once('.').unwrap_or((amount, ""));
    if int_part.is_empty() || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let magnitude: i128 = format!("{int_part}{frac_part}").parse().map_err(|_| bad())?;
    let amount = i64::try_from(if negative { -magnitude } else { magnitude }).map_err(|_| bad())?;
    let precision = u8::try_from(frac_part.len()).map_err(|_| bad())?;

    w.write_u64(amount as u64);
    w.write_u64((symbol_code_from_str(code.trim())? << 8) | precision as u64);
    Ok(())
}
