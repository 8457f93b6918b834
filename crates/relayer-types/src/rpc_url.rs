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

use serde::{Deserialize, Serialize};

/// An endpoint URL wrapper around [`url::Url`] that can also be read from an
/// environment variable when written as `$VAR` in the config.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RpcUrl(url::Url);

impl RpcUrl {
    /// Returns the inner [`url::Url`].
    pub fn as_url(&self) -> &url::Url {
        &self.0
    }

    /// Appends a REST path (like `/staking/validator-set`) to this endpoint,
    /// keeping any base path the endpoint was configured with.
    pub fn join_path(&self, path: &str) -> url::Url {
        let mut url = self.0.clone();
        let base = self.0.path().trim_end_matches('/');
        url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        url
    }
}

impl std::fmt::Display for RpcUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for RpcUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<url::Url> for RpcUrl {
    fn from(url: url::Url) -> Self {
        RpcUrl(url)
    }
}

impl std::str::FromStr for RpcUrl {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        url::Url::parse(s).map(Self)
    }
}

impl std::ops::Deref for RpcUrl {
    type Target = url::Url;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for RpcUrl {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let raw = match value.strip_prefix('$') {
            Some(var) => {
                tracing::trace!("Reading {} from env", var);
                std::env::var(var).map_err(|e| {
                    serde::de::Error::custom(format!(
                        "error while loading this env {var}: {e}",
                    ))
                })?
            }
            None => value,
        };
        url::Url::parse(&raw)
            .map(Self)
            .map_err(|e| serde::de::Error::custom(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_keeps_base() {
        let url: RpcUrl = "http://localhost:1317/api/".parse().unwrap();
        assert_eq!(
            url.join_path("/staking/validator-set").as_str(),
            "http://localhost:1317/api/staking/validator-set"
        );
        let url: RpcUrl = "http://localhost:1317".parse().unwrap();
        assert_eq!(
            url.join_path("checkpoints/count").as_str(),
            "http://localhost:1317/checkpoints/count"
        );
    }
}
