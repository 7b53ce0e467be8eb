//! Error types for the Meow VM crate
//!
//! This module provides error handling for VM operations, covering the
//! loader (parse/link), the interpreter, and the memory manager.

use thiserror::Error;

/// VM errors. The set is closed: every failure the VM can report maps onto
/// exactly one of these variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    /// Syntax error in textual bytecode, with source location
    #[error("parse error [{file}:{line}:{col}]: {message}")]
    Parse {
        file: String,
        line: usize,
        col: usize,
        message: String,
    },

    /// Unresolved label, proto reference, or missing `main` after parsing
    #[error("link error in {file}: {message}")]
    Link { file: String, message: String },

    /// Dispatcher miss, non-callable call target, or wrong arity
    #[error("type error: {message}")]
    Type { message: String },

    /// Integer division or modulo by zero
    #[error("division by zero in {operation}")]
    ZeroDivision { operation: String },

    /// Array access outside `0..len`
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    /// Hash table lookup for an absent key
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// Field, method, or builtin lookup failure on a property access
    #[error("attribute not found: {name} on {type_name}")]
    AttributeNotFound { name: String, type_name: String },

    /// Path resolution or nested load failure while importing a module
    #[error("module load error: {path}: {message}")]
    ModuleLoad { path: String, message: String },

    /// A value thrown by THROW that no handler caught
    #[error("uncaught throw: {value}")]
    UncaughtThrow {
        value: String,
        backtrace: Vec<String>,
    },

    /// Resource exhaustion (register file or call stack limit). Not catchable.
    #[error("fatal allocation failure: {message}")]
    FatalAllocation { message: String },
}

impl VmError {
    /// Create a new parse error.
    pub fn parse<S: Into<String>>(file: S, line: usize, col: usize, message: S) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            col,
            message: message.into(),
        }
    }

    /// Create a new link error.
    pub fn link<S: Into<String>>(file: S, message: S) -> Self {
        Self::Link {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create a new type error.
    pub fn type_error<S: Into<String>>(message: S) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Create a new division-by-zero error.
    pub fn zero_division<S: Into<String>>(operation: S) -> Self {
        Self::ZeroDivision {
            operation: operation.into(),
        }
    }

    /// Create a new index-out-of-range error.
    pub fn index_out_of_range(index: i64, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// Create a new key-not-found error.
    pub fn key_not_found<S: Into<String>>(key: S) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Create a new attribute-not-found error.
    pub fn attribute_not_found<S: Into<String>>(name: S, type_name: S) -> Self {
        Self::AttributeNotFound {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// Create a new module load error.
    pub fn module_load<S: Into<String>>(path: S, message: S) -> Self {
        Self::ModuleLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new fatal allocation error.
    pub fn fatal_allocation<S: Into<String>>(message: S) -> Self {
        Self::FatalAllocation {
            message: message.into(),
        }
    }

    /// The error kind name, as stored in thrown error instances and used by
    /// logging.
    pub fn kind(&self) -> &'static str {
        match self {
            VmError::Parse { .. } => "ParseError",
            VmError::Link { .. } => "LinkError",
            VmError::Type { .. } => "TypeError",
            VmError::ZeroDivision { .. } => "ZeroDivision",
            VmError::IndexOutOfRange { .. } => "IndexOutOfRange",
            VmError::KeyNotFound { .. } => "KeyNotFound",
            VmError::AttributeNotFound { .. } => "AttributeNotFound",
            VmError::ModuleLoad { .. } => "ModuleLoadError",
            VmError::UncaughtThrow { .. } => "UncaughtThrow",
            VmError::FatalAllocation { .. } => "FatalAllocation",
        }
    }

    /// Whether the interpreter converts this error into a catchable throw.
    /// Parse/link errors abort loading, fatal allocation aborts the VM, and
    /// an uncaught throw has already unwound past every handler.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            VmError::Type { .. }
                | VmError::ZeroDivision { .. }
                | VmError::IndexOutOfRange { .. }
                | VmError::KeyNotFound { .. }
                | VmError::AttributeNotFound { .. }
        )
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;

impl From<std::io::Error> for VmError {
    fn from(error: std::io::Error) -> Self {
        VmError::module_load("<io>".to_string(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = VmError::parse("main.meow", 3, 7, "unexpected token");
        assert_eq!(
            error.to_string(),
            "parse error [main.meow:3:7]: unexpected token"
        );

        let error = VmError::zero_division("DIV");
        assert_eq!(error.to_string(), "division by zero in DIV");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(VmError::type_error("x").kind(), "TypeError");
        assert_eq!(VmError::key_not_found("k").kind(), "KeyNotFound");
        assert_eq!(VmError::index_out_of_range(4, 2).kind(), "IndexOutOfRange");
    }

    #[test]
    fn test_catchability() {
        assert!(VmError::zero_division("MOD").is_catchable());
        assert!(VmError::attribute_not_found("speak", "int").is_catchable());
        assert!(!VmError::link("m.meow", "missing main").is_catchable());
        assert!(!VmError::fatal_allocation("register file").is_catchable());
    }
}
