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

//! # Chain Listeners 🕸️
//!
//! The three chain listeners of the relayer and the self-healing reconciler.
//!
//! * [`RootChainListener`] relays the logs of the root chain contracts once
//!   they are confirmed, through the [`EventRouter`].
//! * [`ChildChainListener`] hands new child chain heads to the checkpoint
//!   processor.
//! * [`ConsensusChainListener`] finds committed checkpoints and hands them to
//!   the root chain submitter.
//!
//! All three implement [`Listener`](bridge_relayer_event_watcher_traits::Listener)
//! and are driven by a
//! [`ListenerHandle`](bridge_relayer_event_watcher_traits::ListenerHandle).

/// Child chain heads.
pub mod child_chain;
/// Committed checkpoints on the consensus chain.
pub mod consensus_chain;
/// Root chain confirmation windows.
pub mod root_chain;
/// Root chain log routing.
pub mod router;
pub mod self_heal;

pub use child_chain::ChildChainListener;
pub use consensus_chain::ConsensusChainListener;
pub use root_chain::RootChainListener;
pub use router::{EventRouter, Routed};
pub use self_heal::{EventSource, IndexerSource, LogScanSource, SelfHeal};
