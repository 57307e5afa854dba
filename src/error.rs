//! Unified error handling for OpForge
//!
//! This module provides a centralized error type that consolidates all
//! domain-specific errors throughout the codebase. It implements error
//! categorization for:
//! - Structural errors (invalid graphs: cycles, dangling values, missing types)
//! - Precondition errors (API misuse, fatal programming errors)
//! - Model errors (model source parsing, file I/O)
//! - Internal errors (bugs, broken invariants)
//!
//! Note that an exhausted memory budget during scheduling is *not* an error:
//! the scheduler prunes over-budget partial schedules internally and never
//! surfaces them to callers.

use std::fmt;

/// Unified error type for OpForge
///
/// This enum consolidates all domain-specific errors into a single type
/// that can be used throughout the codebase. It supports categorization
/// via the `category()` method.
#[derive(Debug, thiserror::Error)]
pub enum OpForgeError {
    // ========== Structural Errors ==========
    /// A value name referenced by a node could not be resolved
    #[error("value {0} not found")]
    ValueNotFound(String),

    /// A result value has more than one defining operator
    #[error("value {0} is defined more than once")]
    DuplicateDefinition(String),

    /// A result value is consumed but never defined
    #[error("value {0} is used without a definition")]
    UndefinedValue(String),

    /// The computation graph contains a cycle
    #[error("graph contains a cycle through operator {0}")]
    CyclicGraph(String),

    /// The graph lacks a required input or output vertex
    #[error("graph has no {0} vertex")]
    MissingTerminal(&'static str),

    /// A tensor shape or dtype is unusable
    #[error("invalid tensor type for {name}: {reason}")]
    InvalidTensorType { name: String, reason: String },

    // ========== Precondition Errors ==========
    /// A pass or scheduler was invoked in a state it does not accept
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// An op sequence does not match the graph it claims to schedule
    #[error("schedule has {actual} ops but graph has {expected}")]
    ScheduleLengthMismatch { expected: usize, actual: usize },

    // ========== Model Errors ==========
    /// Model description could not be parsed
    #[error("model parse error: {0}")]
    ModelParse(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),
}

impl OpForgeError {
    /// Categorize the error for handling decisions
    ///
    /// Returns the error category, which can be used to determine whether
    /// an error is caused by the input graph, by API misuse, or by a bug.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OpForgeError::ValueNotFound(_)
            | OpForgeError::DuplicateDefinition(_)
            | OpForgeError::UndefinedValue(_)
            | OpForgeError::CyclicGraph(_)
            | OpForgeError::MissingTerminal(_)
            | OpForgeError::InvalidTensorType { .. } => ErrorCategory::Structural,

            OpForgeError::Precondition(_) | OpForgeError::ScheduleLengthMismatch { .. } => {
                ErrorCategory::Precondition
            }

            OpForgeError::ModelParse(_) | OpForgeError::Io(_) => ErrorCategory::Model,

            OpForgeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error was caused by an invalid input graph
    pub fn is_structural(&self) -> bool {
        matches!(self.category(), ErrorCategory::Structural)
    }

    /// Check if this error indicates API misuse by the caller
    pub fn is_precondition(&self) -> bool {
        matches!(self.category(), ErrorCategory::Precondition)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
///
/// - Structural: the input graph violates a documented invariant
/// - Precondition: the caller invoked an operation in an unsupported state
/// - Model: the external model description is unreadable
/// - Internal: a bug in OpForge itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input graph
    Structural,
    /// API misuse
    Precondition,
    /// Model source problem
    Model,
    /// Bug in OpForge
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Structural => write!(f, "Structural"),
            ErrorCategory::Precondition => write!(f, "Precondition"),
            ErrorCategory::Model => write!(f, "Model"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

/// Helper type alias for Results using OpForgeError
pub type ForgeResult<T> = std::result::Result<T, OpForgeError>;

/// Create a precondition error with context
#[macro_export]
macro_rules! precondition_error {
    ($msg:expr) => {
        $crate::error::OpForgeError::Precondition($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::OpForgeError::Precondition(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::OpForgeError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::OpForgeError::Internal(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            OpForgeError::ValueNotFound("x".to_string()).category(),
            ErrorCategory::Structural
        );
        assert_eq!(
            OpForgeError::CyclicGraph("conv0".to_string()).category(),
            ErrorCategory::Structural
        );
        assert_eq!(
            OpForgeError::Precondition("test".to_string()).category(),
            ErrorCategory::Precondition
        );
        assert_eq!(
            OpForgeError::ScheduleLengthMismatch {
                expected: 3,
                actual: 2
            }
            .category(),
            ErrorCategory::Precondition
        );
        assert_eq!(
            OpForgeError::ModelParse("bad json".to_string()).category(),
            ErrorCategory::Model
        );
        assert_eq!(
            OpForgeError::Internal("bug".to_string()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_predicate_helpers() {
        assert!(OpForgeError::ValueNotFound("x".to_string()).is_structural());
        assert!(!OpForgeError::ValueNotFound("x".to_string()).is_internal());
        assert!(OpForgeError::Precondition("p".to_string()).is_precondition());
        assert!(OpForgeError::Internal("b".to_string()).is_internal());
    }

    #[test]
    fn test_error_display() {
        let err = OpForgeError::ValueNotFound("conv1_out".to_string());
        assert_eq!(err.to_string(), "value conv1_out not found");

        let err = OpForgeError::ScheduleLengthMismatch {
            expected: 10,
            actual: 9,
        };
        assert_eq!(err.to_string(), "schedule has 9 ops but graph has 10");
    }

    #[test]
    fn test_macros() {
        let err = precondition_error!("graph already has groups");
        assert!(matches!(err, OpForgeError::Precondition(_)));

        let err = internal_error!("frontier empty at step {}", 3);
        assert_eq!(err.to_string(), "internal error: frontier empty at step 3");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OpForgeError = io_err.into();
        assert!(matches!(err, OpForgeError::Io(_)));
        assert_eq!(err.category(), ErrorCategory::Model);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Structural.to_string(), "Structural");
        assert_eq!(ErrorCategory::Precondition.to_string(), "Precondition");
        assert_eq!(ErrorCategory::Model.to_string(), "Model");
        assert_eq!(ErrorCategory::Internal.to_string(), "Internal");
    }
}
