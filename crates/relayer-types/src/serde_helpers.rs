// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The consensus chain REST API encodes 64-bit integers as strings, while
//! other endpoints (and our own fixtures) use plain JSON numbers.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(u64),
}

/// (De)serializes a `u64` that may be encoded as a JSON string.
pub mod u64_string {
    use super::*;

    /// Always writes the value as a decimal string.
    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    /// Accepts a decimal string or a number.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match StringOrNumber::deserialize(d)? {
            StringOrNumber::Number(n) => Ok(n),
            StringOrNumber::String(s) if s.is_empty() => Ok(0),
            StringOrNumber::String(s) => {
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    }
}

/// Same as [`u64_string`], for signed values like voting power.
pub mod i64_string {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrSigned {
        String(String),
        Number(i64),
    }

    /// Always writes the value as a decimal string.
    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    /// Accepts a decimal string or a number.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match StringOrSigned::deserialize(d)? {
            StringOrSigned::Number(n) => Ok(n),
            StringOrSigned::String(s) if s.is_empty() => Ok(0),
            StringOrSigned::String(s) => {
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Height {
        #[serde(with = "super::u64_string")]
        height: u64,
    }

    #[test]
    fn accepts_both_encodings() {
        let a: Height = serde_json::from_str(r#"{"height":"42"}"#).unwrap();
        let b: Height = serde_json::from_str(r#"{"height":42}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"height":"42"}"#);
    }
}
