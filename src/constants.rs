// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes label keys read by the controller
pub mod labels {
    /// Environment a ConfigMap or Deployment belongs to
    pub const ENVIRONMENT: &str = "env";
}

/// Pod template annotation naming
pub mod annotations {
    /// Default annotation written with the restart timestamp
    pub const DEFAULT_RESTART_KEY: &str = "shipshape.io/restartedAt";
    /// Name prefix of the per-ConfigMap content hash annotation
    pub const CONFIG_HASH_PREFIX: &str = "config-hash-";
    /// Fallback when a ConfigMap name normalizes to nothing
    pub const CONFIG_HASH_FALLBACK_NAME: &str = "configmap";
    /// Kubernetes limit on the name segment of an annotation key
    pub const MAX_NAME_LENGTH: usize = 63;
    /// Hex characters of the name digest appended to trimmed names
    pub const NAME_DIGEST_LENGTH: usize = 10;
}

/// The field manager used for deployment patches
pub const OPERATOR_NAME: &str = "shipshape-controller";

/// Watch loop timing
pub mod watch {
    /// Read timeout when no restart is pending
    pub const IDLE_TIMEOUT_SECS: u64 = 30;
    /// Server-side timeout requested for each watch stream
    pub const STREAM_TIMEOUT_SECS: u32 = 290;
    /// Floor of the jittered stream error backoff
    pub const BACKOFF_FLOOR_SECS: u64 = 1;
    /// Cap of the jittered stream error backoff
    pub const BACKOFF_CAP_SECS: u64 = 30;
}

/// Per-key restart retry timing
pub mod retry {
    pub const BASE_DELAY_SECS: u64 = 1;
    pub const CAP_DELAY_SECS: u64 = 30;
}

/// Configuration defaults
pub mod defaults {
    pub const NAMESPACE: &str = "shipshape";
    pub const APP_SELECTOR: &str = "app=helloworld";
    pub const DEBOUNCE_SECONDS: u64 = 5;
    pub const HEALTH_PORT: u16 = 8080;
    pub const LEASE_NAME: &str = "helloworld-controller-leader";
    pub const LEASE_DURATION_SECS: u64 = 15;
    pub const RENEW_DEADLINE_SECS: u64 = 10;
    pub const RETRY_PERIOD_SECS: u64 = 2;
    pub const CONTROLLER_STOP_TIMEOUT_SECS: u64 = 45;
}
