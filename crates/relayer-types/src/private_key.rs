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

use std::str::FromStr;

use ethers::signers::LocalWallet;
use ethers::types::H256;
use serde::Deserialize;

/// The validator signing key.
///
/// Accepts either a `0x` prefixed hex string, or `$VAR` to read the hex string
/// from the environment variable `VAR`.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl From<H256> for PrivateKey {
    fn from(secret: H256) -> Self {
        PrivateKey(secret)
    }
}

impl PrivateKey {
    /// Builds a local wallet (secp256k1) out of this key.
    pub fn wallet(&self) -> Result<LocalWallet, ethers::signers::WalletError> {
        LocalWallet::from_bytes(self.0.as_bytes())
    }
}

fn parse_secret<E: serde::de::Error>(value: &str) -> Result<H256, E> {
    H256::from_str(value).map_err(|e| {
        E::custom(format!(
            "{e}\n expected a 66 chars string (including the 0x prefix) but found {} chars",
            value.len()
        ))
    })
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        if let Some(var) = value.strip_prefix('$') {
            tracing::trace!("Reading {} from env", var);
            let val = std::env::var(var).map_err(|e| {
                serde::de::Error::custom(format!(
                    "error while loading this env {var}: {e}",
                ))
            })?;
            parse_secret(&val).map(Self)
        } else if value.starts_with("0x") {
            parse_secret(&value).map(Self)
        } else {
            Err(serde::de::Error::custom(
                "expected a hex string or an env var containing a hex string in it",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str =
        "0x8917174396171783496173419137618235192359106130478137647163400318";

    #[test]
    fn parses_hex_key() {
        let key: PrivateKey =
            serde_json::from_value(serde_json::json!(KEY)).unwrap();
        assert!(key.wallet().is_ok());
    }

    #[test]
    fn parses_key_from_env() {
        std::env::set_var("BRIDGE_TEST_PRIVATE_KEY", KEY);
        let key: PrivateKey = serde_json::from_value(serde_json::json!(
            "$BRIDGE_TEST_PRIVATE_KEY"
        ))
        .unwrap();
        assert!(key.wallet().is_ok());
    }

    #[test]
    fn rejects_bare_strings() {
        let key: Result<PrivateKey, _> =
            serde_json::from_value(serde_json::json!("not a key"));
        assert!(key.is_err());
    }
}
