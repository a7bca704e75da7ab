//! Packet routing for one peer.
//!
//! The dispatcher owns every piece of per-peer state and routes each packet
//! to exactly one component by namespace. It never touches the network:
//! each call fills an [`Outbox`] that the room flushes to the transport.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::display_name::{DisplayNames, NameOutbox};
use crate::error::{Error, Result};
use crate::game::{ActiveGame, GameConfig, GameEvent, GameOutbox};
use crate::liveness::{PeerEvent, PeerStore, PingOutbox};
use crate::matchmaking::{MatchEvent, MatchId, MatchOutbox, MatchResult, Matchmaking};
use crate::packet::{Channel, Envelope, MatchPacket, Outbox, Packet};
use crate::peer::PeerId;
use crate::room::UiEvent;
use crate::{Frame, GameLogic, Role};

pub type PacketOf<G> = Packet<<G as GameLogic>::Input, <G as GameLogic>::State>;
pub type EnvelopeOf<G> = Envelope<<G as GameLogic>::Input, <G as GameLogic>::State>;
pub type DispatchOutbox<G> = Outbox<PacketOf<G>, UiEvent<<G as GameLogic>::State>>;

/// How a game we take part in comes into view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GameStart {
    /// The match was confirmed just now, the host owns frame 0.
    Fresh,
    /// The match has been running for a while, wait for a snapshot.
    Resume,
}

pub struct Dispatcher<G: GameLogic> {
    my_id: PeerId,
    logic: Arc<G>,
    game_config: GameConfig,
    matchmaking: Matchmaking,
    game: Option<ActiveGame<G>>,
    peers: PeerStore,
    names: DisplayNames,
}

impl<G: GameLogic> Dispatcher<G> {
    pub fn new(my_id: PeerId, logic: Arc<G>, config: &Config) -> Self {
        let matchmaking = Matchmaking::new(my_id.clone());
        Self::with_matchmaking(my_id, logic, config, matchmaking)
    }

    /// Like [`Dispatcher::new`] with deterministic match ids and seeds.
    pub fn with_seed(my_id: PeerId, logic: Arc<G>, config: &Config, seed: u64) -> Self {
        let matchmaking = Matchmaking::with_seed(my_id.clone(), seed);
        Self::with_matchmaking(my_id, logic, config, matchmaking)
    }

    fn with_matchmaking(
        my_id: PeerId,
        logic: Arc<G>,
        config: &Config,
        matchmaking: Matchmaking,
    ) -> Self {
        Self {
            peers: PeerStore::new(my_id.clone(), config.offline_timeout),
            names: DisplayNames::new(my_id.clone(), config.display_name.clone()),
            game_config: GameConfig::from(config),
            my_id,
            logic,
            matchmaking,
            game: None,
        }
    }

    /// Route one inbound packet.
    pub fn handle(
        &mut self,
        envelope: &EnvelopeOf<G>,
        channel: Channel,
        now: Instant,
        out: &mut DispatchOutbox<G>,
    ) {
        let sender = &envelope.peer_id;
        if *sender == self.my_id && channel == Channel::Ephemeral {
            trace!(kind = envelope.payload.kind(), "ignoring echo of our own packet");
            return;
        }
        debug!(peer = %sender, kind = envelope.payload.kind(), ?channel, "[IN]");

        match &envelope.payload {
            Packet::Ping(packet) => {
                let mut ping_out = PingOutbox::default();
                self.peers.process_packet(sender, packet, now, &mut ping_out);
                self.absorb_peers(ping_out, out);
            }
            Packet::DisplayName(packet) => {
                let mut name_out = NameOutbox::default();
                self.names.process_packet(sender, packet, &mut name_out);
                self.absorb_names(name_out, out);
            }
            Packet::Match(packet) => {
                // accepts are never logged, so only a live one can confirm a
                // brand new match; a confirm on its own comes from the log
                let start = match packet {
                    MatchPacket::Accept { .. } => GameStart::Fresh,
                    _ => GameStart::Resume,
                };
                let mut match_out = MatchOutbox::default();
                let applied = self
                    .matchmaking
                    .process_packet(sender, packet, &mut match_out);
                if let Err(e) = applied {
                    warn!(peer = %sender, kind = envelope.payload.kind(), "dropping packet: {e}");
                }
                self.absorb_matchmaking(match_out, start, out);
            }
            Packet::Game(packet) => {
                let Some(game) = self.game.as_mut() else {
                    trace!(match_id = %packet.match_id(), "no active game, ignoring");
                    return;
                };
                let mut game_out = GameOutbox::<G>::default();
                if let Err(e) = game.receive_message(sender, packet, &mut game_out) {
                    warn!(peer = %sender, kind = envelope.payload.kind(), "dropping packet: {e}");
                }
                self.absorb_game(game_out, out);
            }
        }
    }

    /// Advance the active game by one network frame. A broken timeline
    /// aborts the game.
    pub fn tick(&mut self, out: &mut DispatchOutbox<G>) {
        let Some(game) = self.game.as_mut() else {
            return;
        };
        let mut game_out = GameOutbox::<G>::default();
        match game.next_frame(&mut game_out) {
            Ok(()) => self.absorb_game(game_out, out),
            Err(e) => {
                let match_id = game.match_id().clone();
                error!(%match_id, "aborting simulation: {e}");
                self.game = None;
                out.emit(UiEvent::GameAborted {
                    match_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    pub fn request_match(&mut self, out: &mut DispatchOutbox<G>) -> Result<MatchId> {
        let mut match_out = MatchOutbox::default();
        let match_id = self.matchmaking.send_match_request(&mut match_out)?;
        self.absorb_matchmaking(match_out, GameStart::Resume, out);
        Ok(match_id)
    }

    pub fn join_match(&mut self, match_id: &MatchId, out: &mut DispatchOutbox<G>) -> Result<()> {
        let mut match_out = MatchOutbox::default();
        self.matchmaking
            .send_join_request(match_id, &mut match_out)?;
        self.absorb_matchmaking(match_out, GameStart::Resume, out);
        Ok(())
    }

    pub fn cancel_join(&mut self) -> Option<MatchId> {
        self.matchmaking.cancel_join_request()
    }

    pub fn end_match(
        &mut self,
        match_id: &MatchId,
        result: MatchResult,
        out: &mut DispatchOutbox<G>,
    ) -> Result<()> {
        let mut match_out = MatchOutbox::default();
        self.matchmaking
            .end_match(match_id, result, &mut match_out)?;
        self.absorb_matchmaking(match_out, GameStart::Resume, out);
        Ok(())
    }

    pub fn send_input(&mut self, data: G::Input, out: &mut DispatchOutbox<G>) -> Result<Frame> {
        let Some(game) = self.game.as_mut() else {
            return Err(Error::invalid_state("there is no active game"));
        };
        let mut game_out = GameOutbox::<G>::default();
        let frame = game.send_input(data, &mut game_out)?;
        self.absorb_game(game_out, out);
        Ok(frame)
    }

    /// Show a running match. Spectators and players coming back to their
    /// own match both wait for the next snapshot.
    pub fn spectate(&mut self, match_id: &MatchId, out: &mut DispatchOutbox<G>) -> Result<()> {
        if let Some(game) = &self.game {
            return Err(Error::invalid_state(format!(
                "already showing match {}",
                game.match_id()
            )));
        }
        let Some(role) = self.matchmaking.role_in(match_id, &self.my_id) else {
            return Err(Error::invalid_state(format!(
                "match {match_id} is not running"
            )));
        };
        self.start_game(match_id, role, GameStart::Resume, out);
        Ok(())
    }

    /// Stop showing the current game without ending the match.
    pub fn leave_game(&mut self) -> Option<MatchId> {
        self.game.take().map(|game| game.match_id().clone())
    }

    pub fn send_ping(&mut self, now: Instant, out: &mut DispatchOutbox<G>) {
        let mut ping_out = PingOutbox::default();
        self.peers.send_ping(now, &mut ping_out);
        self.absorb_peers(ping_out, out);
    }

    pub fn send_ping_report(&mut self, out: &mut DispatchOutbox<G>) {
        let mut ping_out = PingOutbox::default();
        self.peers.send_ping_report(&mut ping_out);
        self.absorb_peers(ping_out, out);
    }

    pub fn request_names(&mut self, out: &mut DispatchOutbox<G>) {
        let mut name_out = NameOutbox::default();
        self.names.request_names(&mut name_out);
        self.absorb_names(name_out, out);
    }

    fn start_game(
        &mut self,
        match_id: &MatchId,
        role: Role,
        start: GameStart,
        out: &mut DispatchOutbox<G>,
    ) {
        let Some(running) = self.matchmaking.running_match(match_id) else {
            return;
        };
        let logic = self.logic.clone();
        let mut game_out = GameOutbox::<G>::default();
        let game = match start {
            GameStart::Fresh => {
                ActiveGame::new(running, role, logic, self.game_config, &mut game_out)
            }
            GameStart::Resume => ActiveGame::resume(running, role, logic, self.game_config),
        };
        self.game = Some(game);
        self.absorb_game(game_out, out);
    }

    fn stop_game(&mut self, match_id: &MatchId) {
        if self.game.as_ref().is_some_and(|g| g.match_id() == match_id) {
            info!(%match_id, "game stopped");
            self.game = None;
        }
    }

    fn absorb_matchmaking(
        &mut self,
        match_out: MatchOutbox,
        start: GameStart,
        out: &mut DispatchOutbox<G>,
    ) {
        let Outbox { packets, events } = match_out;
        out.absorb(
            Outbox {
                packets,
                events: Vec::<UiEvent<G::State>>::new(),
            },
            Packet::Match,
            |e| e,
        );
        for event in events {
            match &event {
                MatchEvent::CurrentGameChanged(Some(match_id)) => {
                    if self.game.as_ref().is_some_and(|g| g.match_id() != match_id) {
                        self.game = None;
                    }
                    if self.game.is_none()
                        && let Some(role) = self.matchmaking.role_in(match_id, &self.my_id)
                    {
                        self.start_game(match_id, role, start, out);
                    }
                }
                MatchEvent::MatchEnded(past) => self.stop_game(&past.match_id),
                MatchEvent::RequestOpened(_)
                | MatchEvent::MatchStarted(_)
                | MatchEvent::CurrentGameChanged(None) => {}
            }
            out.emit(UiEvent::from(event));
        }
    }

    fn absorb_game(&mut self, game_out: GameOutbox<G>, out: &mut DispatchOutbox<G>) {
        let Outbox { packets, events } = game_out;
        out.absorb(
            Outbox {
                packets,
                events: Vec::<UiEvent<G::State>>::new(),
            },
            Packet::Game,
            |e| e,
        );
        let Some(game) = self.game.as_ref() else {
            return;
        };
        let match_id = game.match_id().clone();
        for event in events {
            let ui = match event {
                GameEvent::Ready { frame } => UiEvent::GameReady {
                    match_id: match_id.clone(),
                    frame,
                },
                GameEvent::FrameAdvanced { frame } => match game.state_at(frame) {
                    Some(state) => UiEvent::FrameAdvanced {
                        match_id: match_id.clone(),
                        frame,
                        state: state.clone(),
                    },
                    None => continue,
                },
                GameEvent::RolledBack { from, to } => UiEvent::RolledBack {
                    match_id: match_id.clone(),
                    from,
                    to,
                },
            };
            out.emit(ui);
        }
    }

    fn absorb_peers(&mut self, ping_out: PingOutbox, out: &mut DispatchOutbox<G>) {
        out.absorb(ping_out, Packet::Ping, |event| match event {
            PeerEvent::Discovered(peer) => UiEvent::PeerDiscovered(peer),
            PeerEvent::PingMeasured { peer, rtt } => UiEvent::PingMeasured { peer, rtt },
        });
    }

    fn absorb_names(&mut self, name_out: NameOutbox, out: &mut DispatchOutbox<G>) {
        out.absorb(name_out, Packet::DisplayName, |learned| UiEvent::NameLearned {
            peer: learned.peer,
            name: learned.name,
        });
    }
}

impl<G: GameLogic> Dispatcher<G> {
    pub fn my_id(&self) -> &PeerId {
        &self.my_id
    }

    pub fn matchmaking(&self) -> &Matchmaking {
        &self.matchmaking
    }

    pub fn game(&self) -> Option<&ActiveGame<G>> {
        self.game.as_ref()
    }

    pub fn peers(&self) -> &PeerStore {
        &self.peers
    }

    pub fn names(&self) -> &DisplayNames {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameInputs;
    use crate::packet::Delivery;

    struct Counter;

    impl GameLogic for Counter {
        type State = u32;
        type Input = u32;

        fn initial_state(&self, random_seed: u32) -> u32 {
            random_seed
        }

        fn calculate_frame(&self, previous: &u32, inputs: &FrameInputs<u32>) -> u32 {
            previous
                .wrapping_add(1)
                .wrapping_add(inputs.host.unwrap_or(0))
                .wrapping_add(inputs.guest.unwrap_or(0))
        }
    }

    fn dispatcher(name: &str) -> Dispatcher<Counter> {
        let config = Config::default();
        Dispatcher::with_seed(PeerId::from(name), Arc::new(Counter), &config, 1)
    }

    /// Hand everything `from` sent to `to` as a live packet.
    fn relay(
        from: &PeerId,
        out: DispatchOutbox<Counter>,
        to: &mut Dispatcher<Counter>,
    ) -> DispatchOutbox<Counter> {
        let mut next = DispatchOutbox::<Counter>::default();
        for packet in out.packets {
            let envelope = Envelope {
                peer_id: from.clone(),
                payload: packet.payload,
            };
            to.handle(&envelope, Channel::Ephemeral, Instant::now(), &mut next);
        }
        next
    }

    /// Host `h` and guest `g` in a running match, as seen by the host.
    fn hosting() -> (Dispatcher<Counter>, MatchId, Vec<EnvelopeOf<Counter>>) {
        let mut host = dispatcher("h");
        let mut guest = dispatcher("g");
        let (h, g) = (host.my_id().clone(), guest.my_id().clone());

        let mut out = DispatchOutbox::<Counter>::default();
        let match_id = host.request_match(&mut out).unwrap();
        relay(&h, out, &mut guest);

        let mut out = DispatchOutbox::<Counter>::default();
        guest.join_match(&match_id, &mut out).unwrap();
        let confirmed = relay(&g, out, &mut host);
        let log = confirmed
            .packets
            .into_iter()
            .filter(|p| p.delivery == Delivery::Persistent)
            .map(|p| Envelope {
                peer_id: h.clone(),
                payload: p.payload,
            })
            .collect();
        (host, match_id, log)
    }

    #[test]
    fn live_accept_gives_the_host_frame_zero() {
        let (host, _, log) = hosting();
        let game = host.game().expect("game");
        assert_eq!(game.role(), Role::Host);
        assert!(game.is_ready());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn host_replaying_its_confirm_waits_for_a_snapshot() {
        let (_, match_id, log) = hosting();
        let mut restarted = dispatcher("h");
        let mut out = DispatchOutbox::<Counter>::default();
        for envelope in &log {
            restarted.handle(envelope, Channel::Durable, Instant::now(), &mut out);
        }
        let game = restarted.game().expect("game");
        assert_eq!(game.match_id(), &match_id);
        assert_eq!(game.role(), Role::Host);
        assert!(!game.is_ready());
        assert!(out.packets.is_empty(), "no frame 0 snapshot");
    }

    #[test]
    fn host_coming_back_to_its_match_waits_for_a_snapshot() {
        let (mut host, match_id, _) = hosting();
        let mut out = DispatchOutbox::<Counter>::default();
        for _ in 0..20 {
            host.tick(&mut out);
        }
        assert_eq!(host.leave_game(), Some(match_id.clone()));

        let mut out = DispatchOutbox::<Counter>::default();
        host.spectate(&match_id, &mut out).unwrap();
        let game = host.game().expect("game");
        assert_eq!(game.role(), Role::Host);
        assert!(!game.is_ready());
        assert!(out.packets.is_empty());
    }

    #[test]
    fn broken_timeline_aborts_the_game() {
        let (mut host, match_id, _) = hosting();
        let mut out = DispatchOutbox::<Counter>::default();
        host.tick(&mut out);
        host.game.as_mut().expect("game").forget_history();

        let mut out = DispatchOutbox::<Counter>::default();
        host.tick(&mut out);
        assert!(host.game().is_none());
        assert!(matches!(
            out.events.as_slice(),
            [UiEvent::GameAborted { match_id: aborted, .. }] if *aborted == match_id
        ));
        // the match itself is still running
        assert!(host.matchmaking().running_match(&match_id).is_some());
    }
}
