use thiserror::Error;

use crate::event::EventError;
use crate::session::SessionError;
use crate::transport::TransportError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Error {
    /// Whether the underlying transport is unusable after this error.
    ///
    /// Terminal errors require reconstructing the session; peer-reported
    /// application errors and local validation failures do not.
    pub fn is_terminal(&self) -> bool {
        match self {
            Error::Transport(err) => err.is_terminal(),
            Error::Session(_) => false,
        }
    }
}

impl From<EventError> for Error {
    fn from(err: EventError) -> Self {
        Error::Session(SessionError::Event(err))
    }
}
