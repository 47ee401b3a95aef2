//! Error types for the insertion engine

use bul_classfile::{ClassFileError, PoolError, VerifyError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while describing or committing an insertion
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InsertError {
    /// A descriptor or handle cannot be parsed or is internally inconsistent
    #[error("Malformed descriptor '{descriptor}': {reason}")]
    MalformedDescriptor {
        /// The offending descriptor (or member name)
        descriptor: String,
        /// What is wrong with it
        reason: String,
    },

    /// A well-formed descriptor that does not fit the requested instruction
    #[error("Invalid descriptor '{descriptor}' for {instruction}: {reason}")]
    InvalidDescriptor {
        /// The offending descriptor
        descriptor: String,
        /// Instruction being built
        instruction: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Builder operation not allowed in its current state
    #[error("Illegal builder state: {0}")]
    IllegalState(&'static str),

    /// The target method does not exist or has no code
    #[error("Unresolved target: {0}")]
    UnresolvedTarget(String),

    /// A 16-bit table or the code array would overflow
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The unit's class structure could not be read
    #[error("Class file error: {0}")]
    ClassFile(#[from] ClassFileError),
}

impl From<PoolError> for InsertError {
    fn from(error: PoolError) -> Self {
        InsertError::CapacityExceeded(error.to_string())
    }
}

impl InsertError {
    pub(crate) fn malformed(descriptor: &str, reason: impl Into<String>) -> Self {
        InsertError::MalformedDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(
        descriptor: &str,
        instruction: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        InsertError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
            instruction,
            reason: reason.into(),
        }
    }
}

/// Errors that abort processing of one unit
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit's bytes are not a readable class file
    #[error("Failed to read unit: {0}")]
    ClassFile(#[from] ClassFileError),

    /// An entry point failed
    #[error("Entry point '{entry}' failed on {unit}: {source}")]
    EntryPoint {
        /// Unit internal name
        unit: String,
        /// Entry point name
        entry: String,
        /// Underlying insertion error
        #[source]
        source: InsertError,
    },

    /// The patched unit is structurally broken
    #[error("Patched unit {unit} failed verification: {source}")]
    Verify {
        /// Unit internal name
        unit: String,
        /// Verification failure
        #[source]
        source: VerifyError,
    },

    /// An entry point kept a handle to the unit after returning
    #[error("Unit {0} is still referenced after processing")]
    StillShared(String),
}

/// Errors raised while loading an insertion plan
#[derive(Debug, Error)]
pub enum PlanError {
    /// IO error while reading the plan
    #[error("Failed to read plan {path}: {source}")]
    Io {
        /// Plan path
        path: PathBuf,
        /// IO failure
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("Failed to parse plan: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required field is missing or a value is out of place
    #[error("Unit {unit}, insertion {position}: {reason}")]
    Invalid {
        /// Unit internal name
        unit: String,
        /// 1-based insertion position within the unit
        position: usize,
        /// What is wrong
        reason: String,
    },

    /// A descriptor or handle in the plan is rejected
    #[error("Unit {unit}, insertion {position}: {source}")]
    Insertion {
        /// Unit internal name
        unit: String,
        /// 1-based insertion position within the unit
        position: usize,
        /// Validation error
        #[source]
        source: InsertError,
    },

    /// The same unit is listed twice
    #[error("Unit {0} appears more than once in the plan")]
    DuplicateUnit(String),
}
