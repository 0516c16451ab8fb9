#![warn(clippy::dbg_macro, clippy::todo)]

pub mod attest;
pub mod client;
pub mod config;
pub mod csr;
pub mod identity;
pub mod key;
pub mod patch;
pub mod policy;
pub mod retry;
pub mod webhook;

use std::{path::PathBuf, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Failed to generate ECDSA private key: {0}")]
    KeyGenerationError(rcgen::Error),
    #[error("Failed to sign certificate request: {0}")]
    SigningError(rcgen::Error),
    #[error("Failed to write {}: {source}", path.display())]
    StorageError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unexpected object during watch: {0}")]
    UnexpectedObject(String),
    #[error("Signing request {0} was deleted before it was approved")]
    RequestDeleted(String),
    #[error("No approval for {name} within {timeout:?}")]
    ApprovalTimeout { name: String, timeout: Duration },
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::StorageError {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the failed call could succeed without any change on our side.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::KubeError { source } => match source {
                kube::Error::Api(resp) => resp.code == 429 || resp.code >= 500,
                kube::Error::HyperError(_) | kube::Error::Service(_) => true,
                kube::Error::ReadEvents(_) => true,
                _ => false,
            },
            _ => false,
        }
    }
}
