// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Metrics registration failed: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid label selector: {0}")]
    SelectorError(String),

    #[error("Lease operation failed: {0}")]
    LeaseError(String),

    #[error("Health server failed: {0}")]
    HealthServerError(#[from] std::io::Error),
}

impl ControllerError {
    /// HTTP status code of the API response behind this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ControllerError::KubeError(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// RBAC/authentication denials are permanent configuration errors, never retried
    pub fn is_fatal(&self) -> bool {
        matches!(self.status_code(), Some(401) | Some(403))
    }

    /// The watch cursor was compacted away and a fresh list is required
    pub fn is_gone(&self) -> bool {
        self.status_code() == Some(410)
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
