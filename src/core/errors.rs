//! DSD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DsdError>;

/// Top-level error type for disk-spindown.
#[derive(Debug, Error)]
pub enum DsdError {
    #[error("[DSD-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DSD-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DSD-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DSD-2001] disk statistics unreadable at {path}: {details}")]
    Diskstats { path: PathBuf, details: String },

    #[error("[DSD-2101] failed to invoke {command}: {details}")]
    CommandSpawn { command: String, details: String },

    #[error("[DSD-2201] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DSD-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DsdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DSD-1001",
            Self::MissingConfig { .. } => "DSD-1002",
            Self::ConfigParse { .. } => "DSD-1003",
            Self::Diskstats { .. } => "DSD-2001",
            Self::CommandSpawn { .. } => "DSD-2101",
            Self::Serialization { .. } => "DSD-2201",
            Self::Io { .. } => "DSD-3002",
        }
    }

    /// Whether retrying on a later poll cycle might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Diskstats { .. } | Self::CommandSpawn { .. } | Self::Io { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for DsdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DsdError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
