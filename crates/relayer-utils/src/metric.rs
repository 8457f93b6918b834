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

use prometheus::core::{AtomicF64, GenericCounter};
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    CounterVec, Encoder, Registry, TextEncoder,
};

/// A struct definition for collecting metrics in the relayer.
///
/// Every instance owns its own [`Registry`], so several relayer contexts can
/// live in the same process (as they do in tests).
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Listener back off metric
    pub listener_back_off: GenericCounter<AtomicF64>,
    /// Relay tasks scheduled through the dispatcher, by task name.
    pub tasks_dispatched: CounterVec,
    /// Relay tasks that completed successfully, by task name.
    pub tasks_succeeded: CounterVec,
    /// Relay tasks that asked to be retried later, by task name.
    pub tasks_retried: CounterVec,
    /// Relay tasks that exhausted their retries, by task name.
    pub tasks_failed: CounterVec,
    /// Transactions accepted by the destination chain, by message type.
    pub broadcasts_succeeded: CounterVec,
    /// Transactions rejected (or not delivered), by message type.
    pub broadcasts_failed: CounterVec,
    /// How many times the cached account sequence was refreshed.
    pub sequence_refreshes: GenericCounter<AtomicF64>,
    /// State-sync records found missing on the consensus chain.
    pub self_heal_missing_state_syncs: GenericCounter<AtomicF64>,
    /// Stake updates found missing on the consensus chain.
    pub self_heal_missing_stake_updates: GenericCounter<AtomicF64>,
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also creates a registry for the counters and
    /// registers the counters
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("bridge".into()), None)?;

        let listener_back_off = register_counter_with_registry!(
            "listener_back_off",
            "specifies how many times a chain listener backed off",
            registry
        )?;

        let tasks_dispatched = register_counter_vec_with_registry!(
            "tasks_dispatched",
            "The total number of relay tasks scheduled",
            &["task"],
            registry
        )?;

        let tasks_succeeded = register_counter_vec_with_registry!(
            "tasks_succeeded",
            "The total number of relay tasks that completed",
            &["task"],
            registry
        )?;

        let tasks_retried = register_counter_vec_with_registry!(
            "tasks_retried",
            "The total number of relay tasks rescheduled for later",
            &["task"],
            registry
        )?;

        let tasks_failed = register_counter_vec_with_registry!(
            "tasks_failed",
            "The total number of relay tasks that were dropped",
            &["task"],
            registry
        )?;

        let broadcasts_succeeded = register_counter_vec_with_registry!(
            "broadcasts_succeeded",
            "The total number of transactions accepted by a chain",
            &["msg"],
            registry
        )?;

        let broadcasts_failed = register_counter_vec_with_registry!(
            "broadcasts_failed",
            "The total number of transactions rejected by a chain",
            &["msg"],
            registry
        )?;

        let sequence_refreshes = register_counter_with_registry!(
            "sequence_refreshes",
            "How many times the cached account sequence was refreshed",
            registry
        )?;

        let self_heal_missing_state_syncs = register_counter_with_registry!(
            "self_heal_missing_state_syncs",
            "State-sync records found missing by the reconciler",
            registry
        )?;

        let self_heal_missing_stake_updates = register_counter_with_registry!(
            "self_heal_missing_stake_updates",
            "Stake updates found missing by the reconciler",
            registry
        )?;

        Ok(Self {
            registry,
            listener_back_off,
            tasks_dispatched,
            tasks_succeeded,
            tasks_retried,
            tasks_failed,
            broadcasts_succeeded,
            broadcasts_failed,
            sequence_refreshes,
            self_heal_missing_state_syncs,
            self_heal_missing_stake_updates,
        })
    }

    /// Gathers the whole relayer metrics in the prometheus text format.
    pub fn gather_metrics(&self) -> Result<String, GatherMetricsError> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}

/// Errors that can happen while encoding the gathered metrics.
#[derive(Debug, thiserror::Error)]
pub enum GatherMetricsError {
    /// Encoding failed.
    #[error(transparent)]
    PrometheusError(#[from] prometheus::Error),
    /// The encoder produced non UTF-8 output.
    #[error(transparent)]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_can_be_created_twice() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.tasks_dispatched.with_label_values(&["x"]).inc();
        assert_eq!(b.tasks_dispatched.with_label_values(&["x"]).get(), 0.0);
        let text = a.gather_metrics().unwrap();
        assert!(text.contains("bridge_tasks_dispatched"));
    }
}
