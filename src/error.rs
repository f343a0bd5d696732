//! Crate-level error type.
//!
//! Every fallible operation returns [`Result`]. Atlas exhaustion is the one
//! failure that is *not* an error: [`Atlas::allocate`] reports it as `None`.
//!
//! [`Atlas::allocate`]: crate::atlas::Atlas::allocate

use thiserror::Error;

use crate::backend::ShaderStage;
use crate::dtype::DType;

/// Errors produced by glcompose.
#[derive(Debug, Error)]
pub enum Error {
    /// A texture was given a channel count outside `1..=4`.
    #[error("unsupported texture format: {channels} channels (expected 1 to 4)")]
    UnsupportedFormat {
        /// The rejected channel count.
        channels: usize,
    },

    /// A texture element type has no GL pixel type.
    #[error("unsupported texture element type: {0:?}")]
    UnsupportedType(DType),

    /// A vertex buffer was built from a record layout without fields.
    #[error("vertex buffers require a structured record layout")]
    UnstructuredBuffer,

    /// An index buffer element type other than `u8`, `u16` or `u32`.
    #[error("invalid index element type: {0:?}")]
    InvalidIndexType(DType),

    /// A write or region fell outside the resource's CPU-side storage.
    #[error("range {offset}..{} out of bounds for size {size}", offset + len)]
    OutOfBounds {
        /// Start of the rejected range.
        offset: usize,
        /// Length of the rejected range.
        len: usize,
        /// Size of the storage it was applied to.
        size: usize,
    },

    /// Malformed GLSL declaration or hook.
    #[error("GLSL parse error: {0}")]
    Parse(String),

    /// A shader still contains hook placeholders with nothing bound.
    #[error("{stage:?} shader has unresolved hooks: {}", hooks.join(", "))]
    PendingHooks {
        /// Stage of the offending shader.
        stage: ShaderStage,
        /// Names of the unresolved hooks.
        hooks: Vec<String>,
    },

    /// The driver rejected a shader; `context` holds the surrounding lines.
    #[error("{stage:?} shader compilation failed at line {line}: {message}\n{context}")]
    Compile {
        /// Stage of the offending shader.
        stage: ShaderStage,
        /// 1-based line in the submitted source.
        line: usize,
        /// Driver message for that line.
        message: String,
        /// Numbered source excerpt around `line`.
        context: String,
    },

    /// A compiler log line in none of the known vendor formats.
    #[error("unrecognized compiler diagnostic: {0}")]
    UnrecognizedDiagnostic(String),

    /// The driver failed to link a program.
    #[error("program link failed: {0}")]
    Link(String),

    /// Any other driver failure, named after the failed operation.
    #[error("{operation} failed: {message}")]
    Driver {
        /// The GL operation that failed.
        operation: &'static str,
        /// Driver-provided detail.
        message: String,
    },

    /// A snippet was composed with an argument that depends on itself.
    #[error("recursive snippet composition")]
    RecursiveComposition,

    /// A key that is neither a hook, a uniform nor an attribute.
    #[error("unknown program key `{0}`")]
    UnknownProgramKey(String),

    /// A uniform name not declared by a snippet or its dependencies.
    #[error("unknown snippet key `{0}`")]
    UnknownSnippetKey(String),

    /// A value of the wrong kind for its destination.
    #[error("`{name}` expects {expected}, got {found}")]
    TypeMismatch {
        /// Name of the hook, uniform or attribute.
        name: String,
        /// What the destination accepts.
        expected: &'static str,
        /// What was supplied.
        found: &'static str,
    },

    /// Reading shader source from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn driver(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Driver {
            operation,
            message: message.into(),
        }
    }
}
