//! Shared error definitions for tandem primitives.

/// The result type used throughout tandem-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with tandem primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed to parse.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },
}
