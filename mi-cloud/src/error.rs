use thiserror::Error;

use crate::response::DecodeError;
use crate::transport::TransportError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A signed call was attempted without a live session.
    #[error("not authenticated, please log in")]
    NotAuthenticated,
    /// The account service answered with something we cannot drive the login with.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Business-level failure reported inside the `{code, message}` envelope.
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("request to {url} failed with status {status}")]
    Transport { status: u16, url: String },
    #[error(transparent)]
    Http(#[from] TransportError),
}

impl Error {
    /// Whether the caller should send the user back through the QR login.
    pub fn requires_login(&self) -> bool {
        matches!(self, Error::NotAuthenticated)
    }
}
