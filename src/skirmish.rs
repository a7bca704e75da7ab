//! Lane skirmish: a tiny reference game for the engine.
//!
//! Each player spawns units on their own baseline and the units march
//! toward the other side. A unit that crosses the far baseline scores a
//! point for its team. Positions are fixed point (1/1000 of a field unit)
//! so every peer computes bit-identical states.

use serde::{Deserialize, Serialize};

use crate::matchmaking::{MatchResult, Winner};
use crate::{FrameInputs, GameLogic, Role};

/// Field units are stored in thousandths.
pub const SCALE: i32 = 1000;
/// Distance between the host and guest baselines.
pub const FIELD_LENGTH: i32 = 50 * SCALE;
pub const LANE_OFFSET: i32 = 2 * SCALE;
pub const UNIT_HP: u32 = 100;
/// Distance a unit covers per network frame (0.02 field units).
pub const UNIT_SPEED: i32 = 20;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    Host,
    Guest,
}

impl Team {
    /// +1 for host units marching up the field, -1 for guest units.
    fn direction(self) -> i32 {
        match self {
            Team::Host => 1,
            Team::Guest => -1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unit {
    pub position: Position,
    pub hp: u32,
    pub team: Team,
    pub speed: i32,
}

impl Unit {
    fn new(position: Position, team: Team) -> Self {
        Self {
            position,
            hp: UNIT_HP,
            team,
            speed: UNIT_SPEED,
        }
    }

    fn reached_far_side(&self) -> bool {
        match self.team {
            Team::Host => self.position.y >= FIELD_LENGTH,
            Team::Guest => self.position.y <= 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkirmishInput {
    SpawnUnit { position: Position },
}

impl SkirmishInput {
    /// Spawn on our own baseline. Lanes are mirrored for the guest so
    /// "left" is left from each player's point of view.
    pub fn spawn(role: Role, lane: Lane) -> Self {
        let (y, mirror) = match role {
            Role::Guest => (FIELD_LENGTH, -1),
            Role::Host | Role::Spectator => (0, 1),
        };
        let side = match lane {
            Lane::Left => 1,
            Lane::Right => -1,
        };
        SkirmishInput::SpawnUnit {
            position: Position {
                x: side * LANE_OFFSET * mirror,
                y,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SkirmishState {
    pub units: Vec<Unit>,
    pub host_score: u32,
    pub guest_score: u32,
}

impl SkirmishState {
    pub fn units_of(&self, team: Team) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(move |u| u.team == team)
    }

    /// Result to report if the match ended now.
    pub fn result(&self) -> MatchResult {
        let winner = match self.host_score.cmp(&self.guest_score) {
            std::cmp::Ordering::Greater => Winner::Host,
            std::cmp::Ordering::Less => Winner::Guest,
            std::cmp::Ordering::Equal => Winner::Tie,
        };
        MatchResult {
            winner,
            score: format!("{}:{}", self.host_score, self.guest_score),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Skirmish;

impl GameLogic for Skirmish {
    type State = SkirmishState;
    type Input = SkirmishInput;

    fn initial_state(&self, _random_seed: u32) -> SkirmishState {
        SkirmishState::default()
    }

    fn calculate_frame(
        &self,
        previous: &SkirmishState,
        inputs: &FrameInputs<SkirmishInput>,
    ) -> SkirmishState {
        let mut next = previous.clone();

        // host first, so both peers push in the same order
        if let Some(SkirmishInput::SpawnUnit { position }) = &inputs.host {
            next.units.push(Unit::new(*position, Team::Host));
        }
        if let Some(SkirmishInput::SpawnUnit { position }) = &inputs.guest {
            next.units.push(Unit::new(*position, Team::Guest));
        }

        for unit in &mut next.units {
            unit.position.y += unit.team.direction() * unit.speed;
        }

        let (arrived, marching): (Vec<Unit>, Vec<Unit>) = next
            .units
            .into_iter()
            .partition(Unit::reached_far_side);
        for unit in &arrived {
            match unit.team {
                Team::Host => next.host_score += 1,
                Team::Guest => next.guest_score += 1,
            }
        }
        next.units = marching;
        next
    }
}
