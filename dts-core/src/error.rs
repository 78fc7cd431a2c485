//! Error types for the `dts-core` crate.

use std::fmt;

use serde::Serialize;

/// A position in DTS source text. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Location {
    pub line: u32,
    pub column: usize,
}

impl Location {
    pub const fn new(line: u32, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.line, self.column)
    }
}

/// An error raised while decoding DTS text or mutating a [`DtsMap`](crate::DtsMap).
///
/// Decoding errors carry the [`Location`] of the offending token. Mutation
/// errors never do: they refer to paths in the tree instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
#[non_exhaustive]
pub enum Error {
    /// The input does not start with `/dts-v1/;`.
    #[error("missing `/dts-v1/;` header")]
    MissingHeader { location: Location },

    /// The root node is not introduced by `/ {`.
    #[error("malformed root node, expected `/ {{`")]
    MalformedRoot { location: Location },

    /// The input ended before the node was closed with `};`.
    #[error("node `{path}` is not terminated")]
    UnterminatedNode { path: String, location: Location },

    /// A property value was not closed with `;`.
    #[error("property `{name}` is not terminated")]
    UnterminatedProperty { name: String, location: Location },

    /// A property value does not match any of the supported encodings.
    #[error("invalid property value syntax: {message}")]
    InvalidValueSyntax { message: String, location: Location },

    /// Two nodes resolve to the same fully-qualified path.
    #[error("duplicate node path `{path}`")]
    DuplicatePath {
        path: String,
        location: Option<Location>,
    },

    /// No node exists at the given path.
    #[error("no node at path `{path}`")]
    PathNotFound { path: String },

    /// The token stream does not follow the DTS grammar.
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        location: Location,
    },

    /// The text could not be split into tokens.
    #[error("{message}")]
    InvalidToken { message: String, location: Location },

    /// A `&label` override names a label that no node carries.
    #[error("unknown label `{label}`")]
    UnknownLabel { label: String, location: Location },

    /// A node name contains characters outside the node-name charset.
    #[error("invalid node name `{name}`")]
    InvalidNodeName { name: String },

    /// A property name contains characters outside the property-name charset.
    #[error("invalid property name `{name}`")]
    InvalidPropertyName { name: String },

    /// A label is not a C-style identifier.
    #[error("invalid label `{label}`")]
    InvalidLabel { label: String },

    /// The root node cannot be removed or renamed.
    #[error("the root node cannot be removed or renamed")]
    RootNode,

    /// The node at `path` has no property called `name`.
    #[error("node `{path}` has no property `{name}`")]
    PropertyNotFound { path: String, name: String },

    /// A deserialized model violates the tree invariants.
    #[error("inconsistent model: {reason}")]
    InvalidModel { reason: String },
}

impl Error {
    /// Returns the source location of a decoding error, if any.
    pub fn location(&self) -> Option<Location> {
        match self {
            Error::MissingHeader { location }
            | Error::MalformedRoot { location }
            | Error::UnterminatedNode { location, .. }
            | Error::UnterminatedProperty { location, .. }
            | Error::InvalidValueSyntax { location, .. }
            | Error::UnexpectedToken { location, .. }
            | Error::InvalidToken { location, .. }
            | Error::UnknownLabel { location, .. } => Some(*location),
            Error::DuplicatePath { location, .. } => *location,
            _ => None,
        }
    }

    pub(crate) fn duplicate(path: impl Into<String>) -> Self {
        Error::DuplicatePath {
            path: path.into(),
            location: None,
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Error::PathNotFound { path: path.into() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
