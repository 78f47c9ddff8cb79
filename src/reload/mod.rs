// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod backoff;
pub mod detector;
pub mod drift;
pub mod executor;
pub mod hash_cache;
pub mod queue;
pub mod watch_loop;

pub use executor::{RestartExecutor, RestartOutcome};
pub use hash_cache::{HashCache, Observation};
pub use queue::PendingRestartQueue;
pub use watch_loop::WatchLoop;
