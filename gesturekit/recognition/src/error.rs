use thiserror::Error;

/// Result alias used by every module operation.
pub type Result<T, E = ModuleError> = std::result::Result<T, E>;

/// Errors raised by train/predict/reset/clear/save/load on any module.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A hyperparameter is outside its valid domain.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why the value was refused.
        reason: String,
    },
    /// The operation needs a trained model.
    #[error("{0} is not trained")]
    NotTrained(String),
    /// Input dimensionality does not match the model or dataset.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected number of dimensions.
        expected: usize,
        /// Observed number of dimensions.
        actual: usize,
    },
    /// Training was attempted on a dataset without samples.
    #[error("dataset has no samples")]
    EmptyDataset,
    /// Dataset content is malformed for the requested operation.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// The operation is not valid in the module's current configuration.
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// Model record could not be written or read.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// A pipeline stage failed.
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// Stage description, e.g. `preprocessing[0] (Normalize)`.
        stage: String,
        /// Underlying failure.
        #[source]
        source: Box<ModuleError>,
    },
    /// An ensemble member failed.
    #[error("member {index} ({id}) failed: {source}")]
    Member {
        /// Member position.
        index: usize,
        /// Member type id.
        id: String,
        /// Underlying failure.
        #[source]
        source: Box<ModuleError>,
    },
    /// No factory is registered for a type id.
    #[error("no {capability} registered under `{id}`")]
    UnknownType {
        /// Registry capability name.
        capability: &'static str,
        /// Requested id.
        id: String,
    },
}

impl ModuleError {
    /// Shorthand for [`ModuleError::InvalidParameter`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Wraps an error as the failure of a named pipeline stage.
    #[must_use]
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Wraps an error as the failure of an ensemble member.
    #[must_use]
    pub fn in_member(self, index: usize, id: impl Into<String>) -> Self {
        Self::Member {
            index,
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error of a stage/member chain.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Stage { source, .. } | Self::Member { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Failures of the model record codec.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The stream does not start with the record magic.
    #[error("not a gesturekit model record")]
    BadMagic,
    /// The record was written by a newer major format version.
    #[error("model record version {major}.{minor} is not supported")]
    UnsupportedVersion {
        /// Major version found.
        major: u8,
        /// Minor version found.
        minor: u8,
    },
    /// The record belongs to another module type.
    #[error("model type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        /// Loader's type id.
        expected: String,
        /// Id stored in the record.
        found: String,
    },
    /// A block failed its integrity check.
    #[error("{block} block checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Block name.
        block: &'static str,
        /// Stored checksum.
        expected: u32,
        /// Recomputed checksum.
        actual: u32,
    },
    /// The stream ended early.
    #[error("model record truncated while reading {0}")]
    Truncated(&'static str),
    /// A block could not be encoded or decoded.
    #[error("{block} block encoding error: {source}")]
    Encoding {
        /// Block name.
        block: &'static str,
        /// Serializer failure.
        #[source]
        source: serde_json::Error,
    },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_failures() {
        let err = ModuleError::EmptyDataset
            .in_member(2, "KNN")
            .in_stage("predictor (BAG)");
        assert!(matches!(err.root_cause(), ModuleError::EmptyDataset));
        assert!(err.to_string().contains("predictor (BAG)"));
    }

    #[test]
    fn persist_errors_convert() {
        let err: ModuleError = PersistError::BadMagic.into();
        assert_eq!(err.to_string(), "not a gesturekit model record");
    }
}
