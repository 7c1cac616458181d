//! Capacity values (memory sizes, disk sizes) normalized to bytes.
//!
//! Declarations and probe responses spell the same size many ways:
//! `"2048MB"`, `"2048M"`, `"2GB"`, `2147483648`. Everything is parsed into
//! a byte count before comparison so equivalent spellings never diff.

use crate::error::{Error, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// A size in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capacity(u64);

impl Capacity {
    /// Capacity from a raw byte count
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Capacity in mebibytes
    pub const fn mib(n: u64) -> Self {
        Self(n * MB)
    }

    /// Capacity in gibibytes
    pub const fn gib(n: u64) -> Self {
        Self(n * GB)
    }

    /// Capacity in tebibytes
    pub const fn tib(n: u64) -> Self {
        Self(n * TB)
    }

    /// Canonical byte count
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Parse a capacity string like "2048MB", "2G", "512 KiB" or "1073741824".
///
/// Units are binary multiples and case-insensitive.
pub fn parse_capacity(value: &str) -> Result<Capacity> {
    let trimmed = value.trim();
    let invalid = |message: &str| Error::InvalidCapacity {
        value: value.to_string(),
        message: message.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("empty capacity"));
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(invalid("missing number"));
    }

    let number: u64 = digits.parse().map_err(|_| invalid("number out of range"))?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KB,
        "M" | "MB" | "MIB" => MB,
        "G" | "GB" | "GIB" => GB,
        "T" | "TB" | "TIB" => TB,
        _ => return Err(invalid("unknown unit (expected B, KB, MB, GB or TB)")),
    };

    number
        .checked_mul(multiplier)
        .map(Capacity)
        .ok_or_else(|| invalid("capacity overflows 64 bits"))
}

impl FromStr for Capacity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_capacity(s)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes == 0 {
            return write!(f, "0B");
        }
        for (unit, suffix) in [(TB, "TB"), (GB, "GB"), (MB, "MB"), (KB, "KB")] {
            if bytes % unit == 0 {
                return write!(f, "{}{}", bytes / unit, suffix);
            }
        }
        write!(f, "{bytes}B")
    }
}

impl Serialize for Capacity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct CapacityVisitor;

impl Visitor<'_> for CapacityVisitor {
    type Value = Capacity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a byte count or a size string such as \"2GB\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Capacity, E> {
        Ok(Capacity(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Capacity, E> {
        u64::try_from(v)
            .map(Capacity)
            .map_err(|_| E::custom(format!("capacity cannot be negative: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Capacity, E> {
        parse_capacity(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Capacity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(CapacityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_spellings_normalize_equal() {
        let a = parse_capacity("2048MB").unwrap();
        let b = parse_capacity("2048M").unwrap();
        let c = parse_capacity("2GB").unwrap();
        let d = parse_capacity("2 gib").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(c, d);
        assert_eq!(a.bytes(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_bare_number_is_bytes() {
        assert_eq!(parse_capacity("4096").unwrap(), Capacity::from_bytes(4096));
        assert_eq!(parse_capacity("512B").unwrap(), Capacity::from_bytes(512));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_capacity("").is_err());
        assert!(parse_capacity("GB").is_err());
        assert!(parse_capacity("12XB").is_err());
        assert!(parse_capacity("-5MB").is_err());
        assert!(parse_capacity("99999999999TB").is_err());
    }

    #[test]
    fn test_display_uses_largest_exact_unit() {
        assert_eq!(Capacity::gib(2).to_string(), "2GB");
        assert_eq!(Capacity::mib(1536).to_string(), "1536MB");
        assert_eq!(Capacity::from_bytes(1000).to_string(), "1000B");
        assert_eq!(Capacity::tib(1).to_string(), "1TB");
    }

    #[test]
    fn test_deserialize_from_string_or_integer() {
        #[derive(Deserialize)]
        struct Disk {
            size: Capacity,
        }

        let from_str: Disk = toml::from_str(r#"size = "40GB""#).unwrap();
        let from_int: Disk = toml::from_str("size = 42949672960").unwrap();
        assert_eq!(from_str.size, from_int.size);

        assert!(toml::from_str::<Disk>("size = -1").is_err());
    }
}
