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

#![warn(missing_docs)]
//! # Relay Task Queue 📬
//!
//! A durable, at-least-once delay queue of named relay tasks, and the worker
//! pool that runs them.
//!
//! Listeners, processors and the self-heal reconciler enqueue a
//! [`RelayTask`] through the [`TaskDispatcher`], optionally with a delay.
//! A [`TaskWorkerPool`] claims due tasks from the store and hands them to the
//! [`TaskHandler`] registered under the task name in the [`TaskRegistry`].
//! Handlers answer with a [`TaskOutcome`], which decides whether the task is
//! done, redelivered later, or retried as a failure.

mod dispatcher;
mod registry;
mod task;

pub use dispatcher::{TaskDispatcher, TaskWorkerPool, RELAY_TASKS_QUEUE};
pub use registry::{TaskHandler, TaskRegistry};
pub use task::{RelayTask, TaskOutcome};
