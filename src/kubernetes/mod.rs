// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes access for the reload engine: the `ClusterOps` capability and its kube-rs implementation.

pub mod client;
pub mod ops;

pub use client::KubeClusterOps;
pub use ops::{ClusterOps, WatchStream};
