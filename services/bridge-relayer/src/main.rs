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

//! Bridge Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use tokio::signal::unix;

use bridge_relayer::service::{ignite, Clients};
use bridge_relayer_config::cli::{create_store, load_config, setup_logger, Opts};
use bridge_relayer_context::RelayerContext;

/// The main entry point for the relayer.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose, "bridge_relayer")?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let config = load_config(args.config_dir.clone())?;
    config.verify()?;

    // persistent storage for the relayer
    let store = create_store(&args).await?;
    tracing::debug!(bytes = store.get_data_stored_size(), "opened the store");

    // The RelayerContext takes a configuration and the store, and populates
    // objects that are needed throughout the lifetime of the relayer.
    let ctx = RelayerContext::new(config, store)?;
    let clients = Clients::connect(&ctx).await?;

    // start all background services.
    // this does not block, will fire the services on background tasks.
    let services = ignite(&ctx, clients).await?;
    tracing::info!(
        listeners = services.listeners(),
        "Relayer started"
    );
    tracing::event!(
        target: bridge_relayer_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %bridge_relayer_utils::probe::Kind::Lifecycle,
        started = true
    );
    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    let signal = async {
        tokio::select! {
            _ = ctrlc_signal.recv() => {
                tracing::warn!("Interrupted (Ctrl+C) ...");
            },
            _ = termination_signal.recv() => {
                tracing::warn!("Got Terminate signal ...");
            },
            _ = quit_signal.recv() => {
                tracing::warn!("Quitting ...");
            },
        }
    };
    // a listener that stops on its own ends the process with an error, so
    // whatever supervises the relayer restarts it.
    services.supervise(&ctx, signal).await?;
    tracing::info!("Clean Exit ..");
    Ok(())
}
