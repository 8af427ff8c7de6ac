//! Error types for policy registration, resolution and loading.

use std::path::PathBuf;

use http::StatusCode;
use thiserror::Error;

/// Configuration and resolution errors.
///
/// Configuration errors abort registration or resolution and are meant for
/// the operator. Resolution errors are produced per request and surface as
/// framework errors, never as denials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Trying to add a duplicate policy: {0}")]
    DuplicatePolicy(String),

    #[error("Trying to set incorrect stage for the policy: {0}")]
    InvalidStage(String),

    #[error("Aggregate policies must be from the same stage: {}", .0.join(", "))]
    InconsistentAggregateStage(Vec<String>),

    #[error("Aggregate policy member is not loaded: {0}")]
    UnregisteredAggregateMember(String),

    #[error("Aggregate policy requires at least one policy name")]
    EmptyAggregate,

    #[error("Aggregate policy members must be unique: {0}")]
    DuplicateAggregateMember(String),

    #[error("Missing policy: {0}")]
    MissingPolicy(String),

    #[error("Policy not specified by name, by function or by group: {0}")]
    MalformedPolicyDeclaration(String),

    #[error("Trying to use incorrect stage for the dynamic policy: {0}")]
    InvalidDynamicStage(String),

    #[error("Policy not found: {0}")]
    NotFound(String),
}

impl PolicyError {
    /// HTTP status a host should answer with when this error reaches it.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingPolicy(_) => StatusCode::NOT_IMPLEMENTED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error belongs to the load/registration-time class.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicatePolicy(_)
                | Self::InvalidStage(_)
                | Self::InconsistentAggregateStage(_)
                | Self::UnregisteredAggregateMember(_)
                | Self::EmptyAggregate
                | Self::DuplicateAggregateMember(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors raised while scanning a policy directory.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Policy directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse policy manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid policy manifest {}: {reason}", .path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Unknown policy kind '{kind}' for policy {name}")]
    UnknownKind { name: String, kind: String },

    #[error("Invalid parameters for policy {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not find {0}")]
    NotFound(String),
}
