//! Error types for the GRT engine

use crate::types::Type;

/// Result type for GRT operations
pub type GrtResult<T> = Result<T, GrtError>;

/// GRT error types
#[derive(Debug, thiserror::Error)]
pub enum GrtError {
    /// A value had a different runtime type than required
    #[error("Type mismatch: expected {expected}, but got {got}")]
    TypeMismatch {
        /// Expected type description
        expected: String,
        /// Actual type description
        got: String,
    },

    /// A null value was used where a value is required
    #[error("Attempt to use a null value: {0}")]
    NullValue(String),

    /// Missing dict key, member or similar lookup failure
    #[error("Invalid item: {0}")]
    BadItem(String),

    /// List index out of range
    #[error("Index out of range: {index} (count {count})")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of items in the list
        count: usize,
    },

    /// Write to a read-only member
    #[error("{class}::{member} is read-only")]
    ReadOnly {
        /// Class name
        class: String,
        /// Member name
        member: String,
    },

    /// Malformed structure description
    #[error("Schema error in {source_name}: {message}")]
    Schema {
        /// File or source being loaded
        source_name: String,
        /// Description of the problem
        message: String,
    },

    /// A class was defined twice
    #[error("Duplicate struct definition for {name} (in {source_name})")]
    DuplicateClass {
        /// Class name
        name: String,
        /// Source of the second definition
        source_name: String,
    },

    /// Classes referenced but never defined
    #[error("Undefined structs referenced: {}", .0.join(", "))]
    UnresolvedPlaceholders(Vec<String>),

    /// Class validation failed
    #[error("Validation of loaded structs failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Class name not found in the metaclass table
    #[error("Unknown struct {0}")]
    UnknownStruct(String),

    /// No allocator bound for a class
    #[error("Class {0} has no implementation bound and cannot be instantiated")]
    Unbound(String),

    /// Class has abstract methods
    #[error("Class {0} is abstract and cannot be instantiated")]
    Abstract(String),

    /// Calculated member with no delegate registered
    #[error("No delegate registered for {class}::{member}")]
    MissingDelegate {
        /// Class name
        class: String,
        /// Member name
        member: String,
    },

    /// Structural error in a serialized document
    #[error("Invalid document: {0}")]
    Document(String),

    /// Module loading or calling error
    #[error("Module error: {0}")]
    Module(String),

    /// A module name was registered twice
    #[error("Duplicate module {0}")]
    DuplicateModule(String),

    /// An interface name was registered twice
    #[error("Duplicate interface {0}")]
    DuplicateInterface(String),

    /// Function not found in a module
    #[error("Function {module}::{function} not found")]
    UnknownFunction {
        /// Module name
        module: String,
        /// Function name
        function: String,
    },

    /// Invalid value path
    #[error("Invalid path {0}")]
    BadPath(String),

    /// Undo manager misuse
    #[error("Undo error: {0}")]
    Undo(String),

    /// Options could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// XML parse failure
    #[error("XML error: {0}")]
    Xml(String),

    /// File I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GrtError {
    /// Type mismatch between two runtime types
    pub fn type_error(expected: Type, got: Type) -> Self {
        GrtError::TypeMismatch {
            expected: format!("type {}", expected.name()),
            got: got.name().to_string(),
        }
    }

    /// Type mismatch for object classes
    pub fn class_error(expected: &str, got: &str) -> Self {
        GrtError::TypeMismatch {
            expected: format!("object of class {}", expected),
            got: format!("object of class {}", got),
        }
    }

    /// Wraps any displayable XML error
    pub(crate) fn xml(err: impl std::fmt::Display) -> Self {
        GrtError::Xml(err.to_string())
    }
}
