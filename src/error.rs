use thiserror::Error;

/// Errors returned by [`NetDb`](crate::NetDb) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// CIDR text could not be parsed, or its prefix length is zero.
    #[error("invalid prefix {input:?}: {reason}")]
    InvalidPrefix { input: String, reason: String },

    /// Lookup input is not an IPv4 or IPv6 address.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// No registered network contains the address.
    #[error("not found")]
    NotFound,

    /// Writing a graph export failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_prefix(input: &str, reason: impl ToString) -> Self {
        Self::InvalidPrefix {
            input: input.to_owned(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
