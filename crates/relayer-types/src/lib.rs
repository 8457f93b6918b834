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

pub mod consensus;
pub mod msgs;
pub mod private_key;
pub mod rpc_url;
pub mod serde_helpers;

/// Cursor key of the root chain listener.
pub const ROOT_CHAIN_CURSOR: &str = "rootchain-last-block";
/// Cursor key of the consensus chain listener.
pub const CONSENSUS_CHAIN_CURSOR: &str = "heimdall-last-block";
