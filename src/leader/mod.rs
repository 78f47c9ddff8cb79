// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Lease-based leader election and the per-term watch loop lifecycle.

pub mod elector;
pub mod supervisor;

pub use elector::{LeaseElector, LeadershipListener};
pub use supervisor::ReloaderSupervisor;
