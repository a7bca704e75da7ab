//! Lock-step, input delayed, rollback capable frame simulation.
//!
//! Inputs are scheduled `input_delay` frames ahead so both peers usually
//! apply them to the same frame. An input that shows up for a frame we have
//! already simulated marks the timeline for replay on the next tick.
//! Players broadcast a snapshot every `snapshot_interval` frames so late
//! joiners and spectators can start from there instead of frame 0.

mod timeline;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::matchmaking::{MatchId, RunningMatch};
use crate::packet::{GamePacket, Outbox};
use crate::peer::PeerId;
use crate::{Frame, FrameInputs, GameLogic, Role};

use timeline::Timeline;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Input<D> {
    pub network_frame: Frame,
    pub data: D,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GameState<S> {
    pub network_frame: Frame,
    pub state: S,
}

/// Authoritative full state, for late join and resync.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot<S> {
    pub state: GameState<S>,
}

/// Simulation tuning, taken from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameConfig {
    pub input_delay: u32,
    pub snapshot_interval: u32,
    /// How many frames of history are kept for rollback. 0 keeps everything.
    pub max_rollback_frames: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GameConfig {
    fn from(config: &Config) -> Self {
        Self {
            input_delay: config.input_delay_frames,
            snapshot_interval: config.snapshot_interval,
            max_rollback_frames: config.max_rollback_frames,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Waiting for the first snapshot.
    NotReady,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    Ready { frame: Frame },
    FrameAdvanced { frame: Frame },
    /// Frames `from..=to` were recomputed with corrected inputs.
    RolledBack { from: Frame, to: Frame },
}

pub type GamePacketOf<G> = GamePacket<<G as GameLogic>::Input, <G as GameLogic>::State>;
pub type GameOutbox<G> = Outbox<GamePacketOf<G>, GameEvent>;

pub struct ActiveGame<G: GameLogic> {
    match_id: MatchId,
    host: PeerId,
    guest: PeerId,
    random_seed: u32,
    role: Role,
    logic: Arc<G>,
    config: GameConfig,
    timeline: Timeline<G::State, G::Input>,
    current_network_frame: Frame,
    /// Earliest frame whose state we hold and trust.
    initial_join_frame: Frame,
    roll_back_to_frame: Option<Frame>,
    readiness: Readiness,
}

impl<G: GameLogic> std::fmt::Debug for ActiveGame<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveGame")
            .field("match_id", &self.match_id)
            .field("role", &self.role)
            .field("current_network_frame", &self.current_network_frame)
            .field("initial_join_frame", &self.initial_join_frame)
            .field("roll_back_to_frame", &self.roll_back_to_frame)
            .field("readiness", &self.readiness)
            .finish()
    }
}

impl<G: GameLogic> ActiveGame<G> {
    /// Set up the simulation for a match that starts now. The host owns
    /// frame 0 and announces it right away, everybody else waits for a
    /// snapshot.
    pub fn new(
        running: &RunningMatch,
        role: Role,
        logic: Arc<G>,
        config: GameConfig,
        out: &mut GameOutbox<G>,
    ) -> Self {
        let mut game = Self::waiting(running, role, logic, config);
        if role == Role::Host {
            let initial = game.logic.initial_state(game.random_seed);
            game.timeline.set_state(0, initial.clone());
            game.readiness = Readiness::Ready;
            out.emit(GameEvent::Ready { frame: 0 });
            out.ephemeral(GamePacket::Snapshot {
                match_id: game.match_id.clone(),
                snapshot: GameSnapshot {
                    state: GameState {
                        network_frame: 0,
                        state: initial,
                    },
                },
            });
        }
        info!(match_id = %game.match_id, ?role, "game created");
        game
    }

    /// Pick up a match that is already under way, whatever our role.
    /// Frame 0 is long gone, so even the host waits for the other
    /// player's next snapshot.
    pub fn resume(running: &RunningMatch, role: Role, logic: Arc<G>, config: GameConfig) -> Self {
        let game = Self::waiting(running, role, logic, config);
        info!(match_id = %game.match_id, ?role, "game resumed, waiting for a snapshot");
        game
    }

    fn waiting(running: &RunningMatch, role: Role, logic: Arc<G>, config: GameConfig) -> Self {
        Self {
            match_id: running.match_id.clone(),
            host: running.host.clone(),
            guest: running.guest.clone(),
            random_seed: running.random_seed,
            role,
            logic,
            config,
            timeline: Timeline::new(),
            current_network_frame: 0,
            initial_join_frame: 0,
            roll_back_to_frame: None,
            readiness: Readiness::NotReady,
        }
    }

    /// Schedule a local input `input_delay` frames ahead and broadcast it.
    pub fn send_input(&mut self, data: G::Input, out: &mut GameOutbox<G>) -> Result<Frame> {
        if !self.role.is_player() {
            return Err(Error::Role(self.role));
        }
        if self.readiness == Readiness::NotReady {
            return Err(Error::invalid_state(
                "game has not received its first snapshot yet",
            ));
        }

        let input = Input {
            network_frame: self.current_network_frame + self.config.input_delay,
            data,
        };
        out.ephemeral(GamePacket::Input {
            match_id: self.match_id.clone(),
            input: input.clone(),
        });
        self.add_input(input.network_frame, self.role, input.data);
        Ok(input.network_frame)
    }

    /// Apply a game packet from `sender`. Packets for other matches are
    /// ignored, packets from peers that are not playing are rejected.
    pub fn receive_message(
        &mut self,
        sender: &PeerId,
        packet: &GamePacketOf<G>,
        out: &mut GameOutbox<G>,
    ) -> Result<()> {
        if *packet.match_id() != self.match_id {
            debug!(match_id = %packet.match_id(), "ignoring packet for another match");
            return Ok(());
        }
        let sender_role = self.role_of(sender).ok_or_else(|| {
            Error::consistency(format!(
                "{sender} sent a game packet for {} but is neither host nor guest",
                self.match_id
            ))
        })?;

        match packet {
            GamePacket::Input { input, .. } => {
                self.add_input(input.network_frame, sender_role, input.data.clone());
            }
            GamePacket::Snapshot { snapshot, .. } => {
                self.adopt_snapshot(&snapshot.state, out);
            }
        }
        Ok(())
    }

    /// Advance one network tick, replaying history first if a late input
    /// arrived. An `Err` here means the timeline is broken and the game has
    /// to be abandoned.
    pub fn next_frame(&mut self, out: &mut GameOutbox<G>) -> Result<()> {
        if self.readiness == Readiness::NotReady {
            debug!(match_id = %self.match_id, "not ready, waiting for a snapshot");
            return Ok(());
        }

        if let Some(roll_back_to) = self.roll_back_to_frame {
            let anchor = roll_back_to.min(self.initial_join_frame);
            let from = anchor + 1;
            for frame in from..=self.current_network_frame {
                self.compute(frame)?;
            }
            self.roll_back_to_frame = None;
            debug!(
                match_id = %self.match_id,
                late_frame = roll_back_to,
                from,
                to = self.current_network_frame,
                "rolled back"
            );
            out.emit(GameEvent::RolledBack {
                from,
                to: self.current_network_frame,
            });
        }

        self.current_network_frame += 1;
        let frame = self.current_network_frame;
        self.compute(frame)?;
        out.emit(GameEvent::FrameAdvanced { frame });

        if self.role.is_player()
            && self.config.snapshot_interval > 0
            && frame % self.config.snapshot_interval == 0
        {
            self.broadcast_snapshot(frame, out)?;
        }
        self.prune();
        Ok(())
    }

    fn role_of(&self, peer: &PeerId) -> Option<Role> {
        if *peer == self.host {
            Some(Role::Host)
        } else if *peer == self.guest {
            Some(Role::Guest)
        } else {
            None
        }
    }

    fn add_input(&mut self, frame: Frame, role: Role, data: G::Input) {
        if !self.timeline.set_input(frame, role, data) {
            return;
        }
        let already_simulated = self.readiness == Readiness::Ready
            && frame <= self.current_network_frame;
        if !already_simulated {
            return;
        }
        if frame <= self.initial_join_frame {
            debug!(
                match_id = %self.match_id,
                frame,
                oldest = self.initial_join_frame,
                "input is older than our history and can not be rolled back"
            );
            return;
        }
        let earliest = self
            .roll_back_to_frame
            .map_or(frame, |pending| pending.min(frame));
        self.roll_back_to_frame = Some(earliest);
    }

    fn adopt_snapshot(&mut self, snapshot: &GameState<G::State>, out: &mut GameOutbox<G>) {
        let frame = snapshot.network_frame;
        match self.readiness {
            Readiness::NotReady => {
                self.timeline.set_state(frame, snapshot.state.clone());
                self.timeline.prune_before(frame);
                self.current_network_frame = frame;
                self.initial_join_frame = frame;
                self.readiness = Readiness::Ready;
                info!(match_id = %self.match_id, frame, "joined from snapshot");
                out.emit(GameEvent::Ready { frame });
            }
            Readiness::Ready if self.timeline.has_state(frame) => {
                debug!(match_id = %self.match_id, frame, "already have this frame");
            }
            Readiness::Ready => {
                debug!(
                    match_id = %self.match_id,
                    frame,
                    current = self.current_network_frame,
                    "snapshot outside of our history window"
                );
            }
        }
    }

    fn compute(&mut self, frame: Frame) -> Result<()> {
        let Some(previous) = frame.checked_sub(1).and_then(|f| self.timeline.state(f)) else {
            return Err(Error::InvariantViolation {
                frame,
                reason: "state of the previous frame is missing".to_string(),
            });
        };
        let next = match self.timeline.inputs(frame) {
            Some(inputs) => self.logic.calculate_frame(previous, inputs),
            None => self.logic.calculate_frame(previous, &FrameInputs::default()),
        };
        self.timeline.set_state(frame, next);
        Ok(())
    }

    fn broadcast_snapshot(&self, frame: Frame, out: &mut GameOutbox<G>) -> Result<()> {
        let state = self
            .timeline
            .state(frame)
            .cloned()
            .ok_or_else(|| Error::InvariantViolation {
                frame,
                reason: "no state to snapshot".to_string(),
            })?;
        out.ephemeral(GamePacket::Snapshot {
            match_id: self.match_id.clone(),
            snapshot: GameSnapshot {
                state: GameState {
                    network_frame: frame,
                    state,
                },
            },
        });
        Ok(())
    }

    fn prune(&mut self) {
        let window = self.config.max_rollback_frames;
        if window == 0 || self.current_network_frame <= window {
            return;
        }
        let oldest = self.current_network_frame - window;
        if oldest > self.initial_join_frame {
            self.timeline.prune_before(oldest);
            self.initial_join_frame = oldest;
        }
    }
}

impl<G: GameLogic> ActiveGame<G> {
    pub fn match_id(&self) -> &MatchId {
        &self.match_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn random_seed(&self) -> u32 {
        self.random_seed
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    pub fn current_network_frame(&self) -> Frame {
        self.current_network_frame
    }

    pub fn initial_join_frame(&self) -> Frame {
        self.initial_join_frame
    }

    /// Earliest frame waiting to be replayed on the next tick.
    pub fn roll_back_to_frame(&self) -> Option<Frame> {
        self.roll_back_to_frame
    }

    pub fn state_at(&self, frame: Frame) -> Option<&G::State> {
        self.timeline.state(frame)
    }

    pub fn current_state(&self) -> Option<&G::State> {
        self.timeline.state(self.current_network_frame)
    }

    pub fn inputs_at(&self, frame: Frame) -> Option<&FrameInputs<G::Input>> {
        self.timeline.inputs(frame)
    }

    /// Number of frames of state currently held.
    pub fn history_len(&self) -> usize {
        self.timeline.len()
    }
}

#[cfg(test)]
impl<G: GameLogic> ActiveGame<G> {
    /// Drop every saved state, leaving nothing to advance from.
    pub(crate) fn forget_history(&mut self) {
        self.timeline.prune_before(self.current_network_frame + 1);
    }
}
