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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named task with its string arguments, as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTask {
    /// Name of the handler that runs the task.
    pub name: String,
    /// Handler arguments.
    pub args: Vec<String>,
    /// How many times a failed task is retried.
    pub retry_count: u32,
    /// How many times the task already failed.
    #[serde(default)]
    pub attempt: u32,
}

impl RelayTask {
    /// Creates a new task that has not run yet.
    pub fn new(
        name: impl Into<String>,
        args: Vec<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            name: name.into(),
            args,
            retry_count,
            attempt: 0,
        }
    }

    /// Whether another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.retry_count
    }

    /// The same task, one failed attempt later.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// What a handler decided about a task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The task is done, including "nothing to do".
    Ok,
    /// Run the task again after the delay. Does not count as a failure.
    RetryAfter(Duration),
    /// The task failed; it is retried while its retry count allows.
    Fail(bridge_relayer_utils::Error),
}

impl TaskOutcome {
    /// Whether the outcome is [`TaskOutcome::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<bridge_relayer_utils::Result<()>> for TaskOutcome {
    fn from(result: bridge_relayer_utils::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => Self::Fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_are_bounded() {
        let task = RelayTask::new("t", vec![], 2);
        assert!(task.can_retry());
        let task = task.next_attempt().next_attempt();
        assert_eq!(task.attempt, 2);
        assert!(!task.can_retry());
    }

    #[test]
    fn attempt_defaults_to_zero() {
        let task: RelayTask = serde_json::from_str(
            r#"{"name":"sendStateSyncedToHeimdall","args":["a","b"],"retry_count":3}"#,
        )
        .unwrap();
        assert_eq!(task.attempt, 0);
        assert_eq!(task.args.len(), 2);
    }
}
