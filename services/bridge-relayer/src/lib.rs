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

#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Bridge Relayer Crate 🕸️
//!
//! A validator side relayer between three chains: an EVM root chain, an EVM
//! child chain and a Tendermint based consensus chain.
//!
//! ## Overview
//!
//! Every validator runs the relayer next to its consensus node. The relayer
//! watches the chains and turns what it sees into consensus chain
//! transactions:
//!
//! * staking, fee, slashing and state-sync events of the root chain contracts
//!   are relayed as the matching consensus chain messages,
//! * new child chain blocks are proposed as checkpoints, and committed
//!   checkpoints are submitted back to the root chain,
//! * spans and milestones are proposed on their own timers.
//!
//! All validators see the same events. Each one waits a delay that grows with
//! its position in the validator set before relaying, and every handler
//! checks whether the event was already relayed first, so a single
//! transaction lands for each event.
//!
//! A self-healing reconciler optionally compares both chains on a timer and
//! relays whatever the listeners missed.
//!
//! # Features
//!
//! * `integration-tests`: logs as json, which is easy to parse. By default,
//!   this is disabled.

/// A module for starting the long-running tasks of the relayer.
pub mod service;

pub use bridge_relayer_utils::{Error, Result};
