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

use config::{Config, File};
use std::path::{Path, PathBuf};

use super::*;

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> bridge_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(bridge_relayer_utils::Error::from))
        .collect()
}

/// Try to parse the [`RelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> bridge_relayer_utils::Result<RelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        // get file extension
        let ext = config_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of BRIDGE).
    let builder = builder.add_source(
        config::Environment::with_prefix("BRIDGE")
            .prefix_separator("_")
            .separator("__"),
    );
    let cfg = builder.build()?;
    // and finally deserialize the config and post-process it
    let config: Result<
        RelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files and
///
/// Returns `Ok(RelayerConfig)` on success, or `Err(anyhow::Error)` on failure.
///
/// # Arguments
///
/// * `path` - The path to the configuration directory
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> bridge_relayer_utils::Result<RelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: RelayerConfig,
) -> bridge_relayer_utils::Result<RelayerConfig> {
    tracing::trace!("Checking configration sanity ...");

    if config.contracts.watched().is_empty() {
        tracing::warn!(
            "!!WARNING!!: no root chain contract is configured,
            the root chain listener will not relay any event"
        );
    }
    if config.self_heal.enabled && config.self_heal.indexer_url.is_none() {
        tracing::info!(
            "self-heal is enabled without an indexer, falling back to log scans"
        );
    }
    if config.milestone.timeout_proposers == 0 {
        tracing::warn!(
            "!!WARNING!!: milestone.timeout-proposers is 0, nobody will send milestone timeouts"
        );
    }
    // a zero confirmation count would relay events from blocks that may be re-orged.
    if config.root_chain.confirmations == 0 {
        tracing::warn!("!!WARNING!!: root-chain.confirmations is 0");
    }
    // the bor chain id is used as a string everywhere, keep it trimmed.
    config.consensus.bor_chain_id =
        config.consensus.bor_chain_id.trim().to_owned();

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.toml");
        std::fs::write(
            &path,
            r#"
private-key = "0x8917174396171783496173419137618235192359106130478137647163400318"

[root-chain]
http-endpoint = "http://localhost:9545"
chain-id = 5
confirmations = 12
poll-interval = 1000

[contracts]
state-sender = "0x0000000000000000000000000000000000001001"

[consensus]
bor-chain-id = " 80001 "
"#,
        )
        .unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.root_chain.confirmations, 12);
        assert_eq!(config.root_chain.rpc_timeout, defaults::rpc_timeout());
        assert_eq!(config.child_chain.chain_id, 15001);
        assert_eq!(config.consensus.bor_chain_id, "80001");
        assert_eq!(config.contracts.watched().len(), 1);
        assert!(config.verify().is_ok());
    }
}
