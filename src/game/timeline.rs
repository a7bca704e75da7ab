use std::collections::BTreeMap;

use crate::{Frame, FrameInputs, Role};

/// Frame-indexed history of states and buffered inputs.
///
/// Both maps are sparse; presence has to be checked explicitly.
#[derive(Debug)]
pub(crate) struct Timeline<S, D> {
    states: BTreeMap<Frame, S>,
    inputs: BTreeMap<Frame, FrameInputs<D>>,
}

impl<S, D: PartialEq> Timeline<S, D> {
    pub(crate) fn new() -> Self {
        Self {
            states: BTreeMap::new(),
            inputs: BTreeMap::new(),
        }
    }

    pub(crate) fn state(&self, frame: Frame) -> Option<&S> {
        self.states.get(&frame)
    }

    pub(crate) fn has_state(&self, frame: Frame) -> bool {
        self.states.contains_key(&frame)
    }

    pub(crate) fn set_state(&mut self, frame: Frame, state: S) {
        self.states.insert(frame, state);
    }

    pub(crate) fn inputs(&self, frame: Frame) -> Option<&FrameInputs<D>> {
        self.inputs.get(&frame)
    }

    /// Store `data` for `role` at `frame`, merging with the other role's slot.
    /// Returns false if the exact same value was already buffered.
    pub(crate) fn set_input(&mut self, frame: Frame, role: Role, data: D) -> bool {
        let slot = self.inputs.entry(frame).or_default();
        let previous = match role {
            Role::Host => slot.host.as_ref(),
            Role::Guest => slot.guest.as_ref(),
            Role::Spectator => return false,
        };
        if previous == Some(&data) {
            return false;
        }
        slot.set(role, data);
        true
    }

    /// Forget everything before `oldest`.
    pub(crate) fn prune_before(&mut self, oldest: Frame) {
        self.states = self.states.split_off(&oldest);
        self.inputs = self.inputs.split_off(&oldest);
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}
