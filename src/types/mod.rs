// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Domain types shared by the reload engine and the Kubernetes adapter.

pub mod config_object;
pub mod selector;
pub mod workload;

pub use config_object::{content_hash, ConfigKey, ConfigListing, ConfigObject, WatchEvent};
pub use selector::LabelSelector;
pub use workload::{config_hash_annotation_key, TargetWorkload};
