//! Error types for the reference engine and its wire layer.

use thiserror::Error;

/// Errors raised by the HTTP transport while talking to the catalog service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl TransportError {
    /// Status code of the server rejection, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised by the reference engine.
///
/// Transport failures pass through transparently; everything else is a
/// structured engine-level condition with enough context to present to a
/// caller without the raw request.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// Bad caller arguments: non-positive limit, wrong context, malformed
    /// sort/search input, or a filter string that overflowed the URL budget.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("no column named \"{name}\" in table {table}")]
    ColumnNotFound { table: String, name: String },

    /// The server rejected an entire mutation as unauthorized.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// An update was requested but every submitted value equals its snapshot.
    #[error("no data changed in the update request")]
    NoDataChanged,

    /// The server answered 2xx but the payload is not what the protocol
    /// promises (e.g. a non-array entity response).
    #[error("invalid server response: {message}")]
    InvalidServerResponse { message: String },

    /// Facet definitions that this engine cannot translate into filters.
    /// Propagated from facet parsing, never originated here.
    #[error("unsupported filters: {message}")]
    UnsupportedFilters { message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReferenceError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        ReferenceError::InvalidInput {
            message: message.into(),
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReferenceError::InvalidInput { .. } => 1,
            ReferenceError::Transport(_) => 3,
            _ => 2,
        }
    }
}
