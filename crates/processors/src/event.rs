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

use bridge_relayer_chain_client::TxModule;
use ethers::contract::EthLogDecode;
use ethers::types::{Log, H256};
use serde::de::DeserializeOwned;

use crate::ProcessorContext;

/// Where a root chain event was emitted, the key the consensus chain
/// deduplicates relayed events by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPosition {
    /// Hash of the emitting transaction.
    pub tx_hash: H256,
    /// Index of the log in its block.
    pub log_index: u64,
    /// Block of the emitting transaction.
    pub block_number: u64,
}

impl EventPosition {
    /// The position of a mined log, `None` for pending logs.
    pub fn of(log: &Log) -> Option<Self> {
        Some(Self {
            tx_hash: log.transaction_hash?,
            log_index: log.log_index?.low_u64(),
            block_number: log.block_number?.as_u64(),
        })
    }
}

/// Decodes the JSON payload of `[event_name, payload]` task arguments.
///
/// A payload that does not decode will never decode, so failures are
/// logged and turned into `None` instead of an error worth retrying.
pub(crate) fn payload<T: DeserializeOwned>(args: &[String]) -> Option<T> {
    let [event_name, raw] = args else {
        tracing::error!(args = args.len(), "expected [event_name, payload] task arguments");
        return None;
    };
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!(%e, event = %event_name, "error while unmarshalling the task payload");
            None
        }
    }
}

/// Decodes a root chain log carried in the task arguments.
pub(crate) fn root_chain_event<E: EthLogDecode>(
    args: &[String],
) -> Option<(E, EventPosition)> {
    let log: Log = payload(args)?;
    let Some(at) = EventPosition::of(&log) else {
        tracing::error!(address = ?log.address, "log has no block position");
        return None;
    };
    match ethers::contract::parse_log::<E>(log) {
        Ok(event) => Some((event, at)),
        Err(e) => {
            tracing::error!(%e, tx_hash = ?at.tx_hash, log_index = at.log_index, "error while parsing event");
            None
        }
    }
}

/// Whether the consensus chain already holds the event at `at`. A failed
/// lookup counts as not relayed.
pub(crate) async fn already_relayed(
    ctx: &ProcessorContext,
    module: TxModule,
    at: &EventPosition,
) -> bool {
    match ctx
        .consensus
        .is_old_tx(module, at.tx_hash, at.log_index)
        .await
    {
        Ok(old) => {
            if old {
                tracing::info!(
                    %module,
                    tx_hash = ?at.tx_hash,
                    log_index = at.log_index,
                    "ignoring task to send tx to heimdall as already processed"
                );
            }
            old
        }
        Err(e) => {
            tracing::warn!(%e, %module, "isoldtx lookup failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_relayer_chain_client::events::StateSynced;
    use bridge_relayer_chain_client::mock::{state_synced_log, LogPosition};
    use ethers::types::Address;

    #[test]
    fn decodes_a_logged_event() {
        let at = LogPosition {
            emitter: Address::repeat_byte(1),
            block_number: 100,
            tx_hash: H256::repeat_byte(9),
            log_index: 4,
        };
        let log = state_synced_log(at, 7, Address::repeat_byte(2), vec![0xaa]);
        let args = vec![
            "StateSynced".to_string(),
            serde_json::to_string(&log).unwrap(),
        ];
        let (event, pos) = root_chain_event::<StateSynced>(&args).unwrap();
        assert_eq!(event.id.as_u64(), 7);
        assert_eq!(
            pos,
            EventPosition {
                tx_hash: H256::repeat_byte(9),
                log_index: 4,
                block_number: 100,
            }
        );
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let args = vec!["StateSynced".to_string(), "{not json".to_string()];
        assert!(root_chain_event::<StateSynced>(&args).is_none());
        assert!(payload::<u64>(&["only-one".to_string()]).is_none());
    }
}
