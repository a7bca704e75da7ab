use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Network frame number. Frame 0 is the initial state owned by the host.
pub type Frame = u32;

/// Part a peer plays in one match. Fixed for the lifetime of an `ActiveGame`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Guest,
    Spectator,
}

impl Role {
    pub fn is_player(&self) -> bool {
        !matches!(self, Role::Spectator)
    }
}

/// Inputs buffered for a single frame, at most one per playing role.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FrameInputs<D> {
    pub host: Option<D>,
    pub guest: Option<D>,
}

impl<D> Default for FrameInputs<D> {
    fn default() -> Self {
        Self {
            host: None,
            guest: None,
        }
    }
}

impl<D> FrameInputs<D> {
    /// Put `data` into the slot for `role`, keeping the other slot.
    /// Returns the value that was replaced, if any.
    pub(crate) fn set(&mut self, role: Role, data: D) -> Option<D> {
        match role {
            Role::Host => self.host.replace(data),
            Role::Guest => self.guest.replace(data),
            Role::Spectator => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.guest.is_none()
    }
}

/// Generic trait for deterministic, frame based p2p games.
///
/// `calculate_frame` must be a pure function: the same previous state and
/// inputs always produce the same next state. Randomness has to be derived
/// from the seed handed to `initial_state`.
pub trait GameLogic: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync;
    type Input: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync;

    /// State at frame 0 for a match with the given shared seed.
    fn initial_state(&self, random_seed: u32) -> Self::State;

    /// Advance one network frame.
    fn calculate_frame(
        &self,
        previous: &Self::State,
        inputs: &FrameInputs<Self::Input>,
    ) -> Self::State;
}
