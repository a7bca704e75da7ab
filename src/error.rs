use thiserror::Error;

use crate::{Frame, Role};

#[derive(Error, Debug)]
pub enum Error {
    /// A local action was attempted in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The local role may not perform this action.
    #[error("role {0:?} can not send inputs")]
    Role(Role),
    /// An inbound packet contradicts locally held state.
    #[error("consistency error: {0}")]
    Consistency(String),
    /// The simulation timeline lost a frame it relies on. This is a logic bug.
    #[error("invariant violated at frame {frame}: {reason}")]
    InvariantViolation { frame: Frame, reason: String },
    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),
    #[error("room event loop is no longer running")]
    RoomClosed,
}

impl Error {
    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    pub(crate) fn consistency(reason: impl Into<String>) -> Self {
        Self::Consistency(reason.into())
    }

    /// True for errors that must abort the running simulation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
