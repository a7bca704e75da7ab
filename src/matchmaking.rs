//! Matchmaking handshake
//!
//! `request -> accept -> confirm -> result`, evaluated independently by every
//! peer. Local actions and inbound packets both end up in
//! [`Matchmaking::process_packet`], so a peer's own packets change its state
//! exactly like a remote copy would.

mod actions;
mod queries;

use std::fmt::Display;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::packet::{MatchPacket, Outbox};
use crate::peer::PeerId;

/// Locally generated, globally unique with overwhelming probability.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(String);

impl MatchId {
    pub fn generate(rng: &mut impl Rng) -> Self {
        Self(format!("{:032x}", rng.random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MatchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRequest {
    pub match_id: MatchId,
    pub host: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningMatch {
    pub match_id: MatchId,
    pub host: PeerId,
    pub guest: PeerId,
    pub random_seed: u32,
}

impl RunningMatch {
    pub fn is_participant(&self, peer: &PeerId) -> bool {
        self.host == *peer || self.guest == *peer
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Host,
    Guest,
    Tie,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub winner: Winner,
    pub score: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastMatch {
    pub match_id: MatchId,
    pub host: PeerId,
    pub guest: PeerId,
    pub result: MatchResult,
}

/// Changes to the local matchmaking view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    RequestOpened(MatchRequest),
    MatchStarted(RunningMatch),
    MatchEnded(PastMatch),
    CurrentGameChanged(Option<MatchId>),
}

pub type MatchOutbox = Outbox<MatchPacket, MatchEvent>;

/// One peer's view of every match it has heard about.
#[derive(Debug)]
pub struct Matchmaking {
    my_id: PeerId,
    requests: Vec<MatchRequest>,
    running: Vec<RunningMatch>,
    past: Vec<PastMatch>,
    current_join_request: Option<MatchId>,
    current_game: Option<MatchId>,
    rng: StdRng,
}

impl Matchmaking {
    pub fn new(my_id: PeerId) -> Self {
        Self::with_rng(my_id, StdRng::from_os_rng())
    }

    /// Deterministic ids and seeds, for tests and replays.
    pub fn with_seed(my_id: PeerId, seed: u64) -> Self {
        Self::with_rng(my_id, StdRng::seed_from_u64(seed))
    }

    fn with_rng(my_id: PeerId, rng: StdRng) -> Self {
        Self {
            my_id,
            requests: Vec::new(),
            running: Vec::new(),
            past: Vec::new(),
            current_join_request: None,
            current_game: None,
            rng,
        }
    }

    /// Apply one matchmaking packet sent by `sender`.
    ///
    /// Duplicates and packets addressed to somebody else are ignored and
    /// return `Ok`. Packets that contradict what we know return
    /// [`Error::Consistency`] and leave the state untouched.
    pub fn process_packet(
        &mut self,
        sender: &PeerId,
        packet: &MatchPacket,
        out: &mut MatchOutbox,
    ) -> Result<()> {
        match packet {
            MatchPacket::Request { match_id } => {
                self.on_request(sender, match_id, out);
                Ok(())
            }
            MatchPacket::Accept { match_id } => self.on_accept(sender, match_id, out),
            MatchPacket::Confirm {
                match_id,
                host,
                guest,
                random_seed,
            } => {
                let confirmed = RunningMatch {
                    match_id: match_id.clone(),
                    host: host.clone(),
                    guest: guest.clone(),
                    random_seed: *random_seed,
                };
                self.on_confirm(sender, confirmed, out)
            }
            MatchPacket::Result {
                match_id,
                host,
                guest,
                result,
            } => self.on_result(sender, match_id, host, guest, result, out),
        }
    }

    fn is_known(&self, match_id: &MatchId) -> bool {
        self.requests.iter().any(|r| r.match_id == *match_id)
            || self.running.iter().any(|m| m.match_id == *match_id)
            || self.past.iter().any(|m| m.match_id == *match_id)
    }

    fn on_request(&mut self, sender: &PeerId, match_id: &MatchId, out: &mut MatchOutbox) {
        if self.is_known(match_id) {
            debug!(%match_id, "ignoring known match request");
            return;
        }
        let request = MatchRequest {
            match_id: match_id.clone(),
            host: sender.clone(),
        };
        info!(%match_id, host = %sender, "match request opened");
        self.requests.push(request.clone());
        out.emit(MatchEvent::RequestOpened(request));
    }

    fn on_accept(
        &mut self,
        sender: &PeerId,
        match_id: &MatchId,
        out: &mut MatchOutbox,
    ) -> Result<()> {
        if self.running.iter().any(|m| m.match_id == *match_id) {
            // somebody else's accept got here first
            debug!(%match_id, guest = %sender, "dropping late accept");
            self.requests.retain(|r| r.match_id != *match_id);
            return Ok(());
        }
        let Some(request) = self.requests.iter().find(|r| r.match_id == *match_id) else {
            return Ok(());
        };
        if request.host != self.my_id {
            return Ok(());
        }
        if *sender == self.my_id {
            return Err(Error::consistency(format!(
                "host can not accept its own request {match_id}"
            )));
        }

        let confirm = MatchPacket::Confirm {
            match_id: match_id.clone(),
            host: self.my_id.clone(),
            guest: sender.clone(),
            random_seed: self.rng.random(),
        };
        out.persistent(confirm.clone());
        let me = self.my_id.clone();
        self.process_packet(&me, &confirm, out)
    }

    fn on_confirm(
        &mut self,
        sender: &PeerId,
        confirmed: RunningMatch,
        out: &mut MatchOutbox,
    ) -> Result<()> {
        let match_id = confirmed.match_id.clone();
        if *sender != confirmed.host {
            return Err(Error::consistency(format!(
                "confirm for {match_id} sent by {sender}, not by host {}",
                confirmed.host
            )));
        }
        if confirmed.host == confirmed.guest {
            return Err(Error::consistency(format!(
                "confirm for {match_id} pairs {} with itself",
                confirmed.host
            )));
        }
        if self.running.iter().any(|m| m.match_id == match_id)
            || self.past.iter().any(|m| m.match_id == match_id)
        {
            debug!(%match_id, "ignoring known match confirm");
            return Ok(());
        }

        if self.current_join_request.as_ref() == Some(&match_id) {
            self.current_join_request = None;
        }
        self.requests.retain(|r| r.match_id != match_id);
        info!(
            %match_id,
            host = %confirmed.host,
            guest = %confirmed.guest,
            "match started"
        );
        let is_mine = confirmed.is_participant(&self.my_id);
        self.running.push(confirmed.clone());
        out.emit(MatchEvent::MatchStarted(confirmed));
        if is_mine {
            self.current_game = Some(match_id.clone());
            out.emit(MatchEvent::CurrentGameChanged(Some(match_id)));
        }
        Ok(())
    }

    fn on_result(
        &mut self,
        sender: &PeerId,
        match_id: &MatchId,
        host: &PeerId,
        guest: &PeerId,
        result: &MatchResult,
        out: &mut MatchOutbox,
    ) -> Result<()> {
        let Some(index) = self.running.iter().position(|m| m.match_id == *match_id) else {
            debug!(%match_id, "ignoring result for a match that is not running");
            return Ok(());
        };
        let running = &self.running[index];
        if running.host != *host || running.guest != *guest {
            return Err(Error::consistency(format!(
                "result for {match_id} names {host} vs {guest}, expected {} vs {}",
                running.host, running.guest
            )));
        }
        if !running.is_participant(sender) {
            return Err(Error::consistency(format!(
                "{sender} is not a participant of {match_id} and can not end it"
            )));
        }

        let running = self.running.remove(index);
        let past = PastMatch {
            match_id: running.match_id,
            host: running.host,
            guest: running.guest,
            result: result.clone(),
        };
        info!(%match_id, winner = ?past.result.winner, "match ended");
        self.past.push(past.clone());
        out.emit(MatchEvent::MatchEnded(past));
        if self.current_game.as_ref() == Some(match_id) {
            self.current_game = None;
            out.emit(MatchEvent::CurrentGameChanged(None));
        }
        Ok(())
    }
}
