// This file is part of Gascope.
//
// Gascope is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Gascope is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Gascope.
// If not, see https://www.gnu.org/licenses/.

//! Serde helpers encoding integers as decimal strings so that values above 2^53 survive
//! a round trip through JavaScript clients.
//!
//! Deserialization accepts decimal strings, `0x` prefixed hex strings and plain JSON numbers.

use std::str::FromStr;

use alloy_primitives::U256;
use serde::{de::Error, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn parse_u256(value: NumberOrString) -> Result<U256, String> {
    match value {
        NumberOrString::Number(n) => Ok(U256::from(n)),
        NumberOrString::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16),
                None => U256::from_str(s),
            };
            parsed.map_err(|e| format!("invalid integer {s:?}: {e}"))
        }
    }
}

/// `U256` as a decimal string
pub mod u256_str {
    use super::*;

    /// Serialize as a decimal string
    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize from a decimal/hex string or a number
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        parse_u256(NumberOrString::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

/// `Option<U256>` as an optional decimal string
pub mod opt_u256_str {
    use super::*;

    /// Serialize as a decimal string or null
    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from an optional decimal/hex string or number
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        Option::<NumberOrString>::deserialize(deserializer)?
            .map(parse_u256)
            .transpose()
            .map_err(D::Error::custom)
    }
}

/// `u128` as a decimal string
pub mod u128_str {
    use super::*;

    /// Serialize as a decimal string
    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Deserialize from a decimal/hex string or a number
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let value = parse_u256(NumberOrString::deserialize(deserializer)?).map_err(D::Error::custom)?;
        value.try_into().map_err(|_| D::Error::custom("integer does not fit in u128"))
    }
}

/// `Option<u128>` as an optional decimal string
pub mod opt_u128_str {
    use super::*;

    /// Serialize as a decimal string or null
    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from an optional decimal/hex string or number
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u128>, D::Error> {
        Option::<NumberOrString>::deserialize(deserializer)?
            .map(|v| {
                parse_u256(v)?
                    .try_into()
                    .map_err(|_| "integer does not fit in u128".to_string())
            })
            .transpose()
            .map_err(D::Error::custom)
    }
}
