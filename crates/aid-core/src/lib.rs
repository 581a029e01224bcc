//! Core lifecycle engine for aid solver packages.
//!
//! This crate ties together descriptor parsing, the entity store, and runtime
//! clients into the `Engine`: the central API for building solver images,
//! creating, starting, stopping and removing containers, and invoking running
//! solvers. It also provides Dockerfile and runner generation from templates,
//! per-identifier locking, the container state machine, installed package
//! metadata, and configuration.

pub mod artifacts;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod packages;
pub mod template;

pub use artifacts::{
    join_snippet, ArtifactError, ArtifactGenerator, NO_SNIPPET, UNREADABLE_SNIPPET,
};
pub use concurrency::{install_signal_handler, shutdown_requested, KeyedLock};
pub use config::{resolve_home, AidConfig, DaemonConfig};
pub use engine::{parse_params, validate_port, BuildResult, Engine, PackageRef, RemoveTarget};
pub use lifecycle::{validate_transition, ContainerState};
pub use packages::{PackageMeta, PackageSummary, ALL_ENVIRONMENTS};
pub use template::TemplateRenderer;

use aid_runtime::RuntimeError;
use aid_schema::DescriptorError;
use aid_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("invalid state transition for {id}: {reason}")]
    InvalidTransition { id: String, reason: String },
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("malformed package descriptor: {0}")]
    MalformedDescriptor(#[from] DescriptorError),
    #[error("artifact generation failed: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error classes that callers map to exit codes or HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    MalformedDescriptor,
    InvalidArgument,
    Runtime,
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::MalformedDescriptor(_) => ErrorKind::MalformedDescriptor,
            Self::InvalidArgument(_) | Self::Config(_) => ErrorKind::InvalidArgument,
            Self::Runtime(_) => ErrorKind::Runtime,
            Self::Artifact(_) | Self::Store(_) | Self::Io(_) | Self::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn transition(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidUid(uid) => {
                Self::InvalidArgument(format!("invalid identifier '{uid}'"))
            }
            e if e.is_not_found() => Self::NotFound(e.to_string()),
            e => Self::Store(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aid_store::RecordKind;

    #[test]
    fn store_not_found_becomes_not_found() {
        let err: CoreError = StoreError::NotFound {
            kind: RecordKind::Container,
            uid: "c000000001".to_owned(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "container not found: c000000001");
    }

    #[test]
    fn other_store_errors_stay_internal() {
        let err: CoreError = StoreError::AlreadyExists {
            kind: RecordKind::Image,
            uid: "img".to_owned(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn invalid_uid_is_an_argument_error() {
        let err: CoreError = StoreError::InvalidUid("../etc".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn descriptor_errors_are_malformed() {
        let err: CoreError = DescriptorError::EmptyField("name").into();
        assert_eq!(err.kind(), ErrorKind::MalformedDescriptor);
    }
}
