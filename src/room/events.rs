use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::commands::Command;
use crate::config::Config;
use crate::dispatch::{DispatchOutbox, Dispatcher, EnvelopeOf};
use crate::matchmaking::{MatchEvent, MatchId, MatchRequest, PastMatch, RunningMatch};
use crate::packet::Envelope;
use crate::peer::PeerId;
use crate::transport::{Inbound, Outbound};
use crate::{Frame, GameLogic};

/// Public events the room sends to the game UI
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent<S> {
    RequestOpened(MatchRequest),
    MatchStarted(RunningMatch),
    MatchEnded(PastMatch),
    /// The match we play in changed. `None` once it is over.
    CurrentGameChanged(Option<MatchId>),
    GameReady {
        match_id: MatchId,
        frame: Frame,
    },
    FrameAdvanced {
        match_id: MatchId,
        frame: Frame,
        state: S,
    },
    RolledBack {
        match_id: MatchId,
        from: Frame,
        to: Frame,
    },
    /// The simulation hit a broken timeline and was dropped.
    GameAborted {
        match_id: MatchId,
        reason: String,
    },
    PeerDiscovered(PeerId),
    PingMeasured {
        peer: PeerId,
        rtt: Duration,
    },
    NameLearned {
        peer: PeerId,
        name: String,
    },
}

impl<S> From<MatchEvent> for UiEvent<S> {
    fn from(event: MatchEvent) -> Self {
        match event {
            MatchEvent::RequestOpened(request) => UiEvent::RequestOpened(request),
            MatchEvent::MatchStarted(running) => UiEvent::MatchStarted(running),
            MatchEvent::MatchEnded(past) => UiEvent::MatchEnded(past),
            MatchEvent::CurrentGameChanged(current) => UiEvent::CurrentGameChanged(current),
        }
    }
}

impl<S> UiEvent<S> {
    /// Superseded by the next event of its kind, so it can be skipped when
    /// the UI falls behind.
    fn is_droppable(&self) -> bool {
        matches!(
            self,
            UiEvent::FrameAdvanced { .. }
                | UiEvent::PingMeasured { .. }
                | UiEvent::RolledBack { .. }
        )
    }
}

/// Most events we hold for a UI that stopped reading.
const MAX_BACKLOG: usize = 1024;

/// Events the UI must see that did not fit its channel yet. The loop never
/// waits on the UI, a slow reader only grows this queue.
struct Backlog<S> {
    events: VecDeque<UiEvent<S>>,
}

impl<S> Backlog<S> {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn push(&mut self, event: UiEvent<S>) {
        if self.events.len() >= MAX_BACKLOG {
            self.events.pop_front();
            warn!(held = MAX_BACKLOG, "ui is not reading events, dropping the oldest");
        }
        self.events.push_back(event);
    }

    fn pop(&mut self) -> Option<UiEvent<S>> {
        self.events.pop_front()
    }
}

/// Channels the event loop talks through.
pub(crate) struct LoopChannels<G: GameLogic> {
    pub(crate) commands: mpsc::Receiver<Command<G>>,
    pub(crate) inbound: mpsc::Receiver<Inbound>,
    pub(crate) outbound: mpsc::Sender<Outbound>,
    pub(crate) ui: mpsc::Sender<UiEvent<G::State>>,
}

pub(crate) fn start_event_loop<G: GameLogic>(
    mut dispatcher: Dispatcher<G>,
    mut channels: LoopChannels<G>,
    config: Config,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.tick_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ping = interval(config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = interval(config.ping_report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut backlog = Backlog::new();

        // say hello so the others learn our name right away
        let mut out = DispatchOutbox::<G>::default();
        dispatcher.request_names(&mut out);
        if !flush(&dispatcher, out, &channels, &mut backlog).await {
            return;
        }

        loop {
            let mut out = DispatchOutbox::<G>::default();
            tokio::select! {
                _ = cancel.cancelled() => break,
                inbound = channels.inbound.recv() => match inbound {
                    Some(inbound) => handle_inbound(&mut dispatcher, inbound, &mut out),
                    None => {
                        warn!("transport closed");
                        break;
                    }
                },
                command = channels.commands.recv() => match command {
                    Some(command) => command.execute(&mut dispatcher, &mut out),
                    None => break,
                },
                _ = tick.tick() => dispatcher.tick(&mut out),
                _ = ping.tick() => dispatcher.send_ping(Instant::now(), &mut out),
                _ = report.tick() => dispatcher.send_ping_report(&mut out),
                permit = channels.ui.reserve(), if !backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(event) = backlog.pop() {
                            permit.send(event);
                        }
                    }
                    Err(_) => break,
                },
            }
            if !flush(&dispatcher, out, &channels, &mut backlog).await {
                break;
            }
        }
        info!(peer = %dispatcher.my_id(), "event loop stopped");
    })
}

fn handle_inbound<G: GameLogic>(
    dispatcher: &mut Dispatcher<G>,
    inbound: Inbound,
    out: &mut DispatchOutbox<G>,
) {
    match EnvelopeOf::<G>::decode(&inbound.bytes) {
        Ok(envelope) => dispatcher.handle(&envelope, inbound.channel, Instant::now(), out),
        Err(e) => warn!(len = inbound.bytes.len(), "dropping undecodable packet: {e}"),
    }
}

/// Hand packets to the transport and events to the UI. Returns false
/// once either side has gone away.
async fn flush<G: GameLogic>(
    dispatcher: &Dispatcher<G>,
    out: DispatchOutbox<G>,
    channels: &LoopChannels<G>,
    backlog: &mut Backlog<G::State>,
) -> bool {
    for packet in out.packets {
        let envelope = Envelope {
            peer_id: dispatcher.my_id().clone(),
            payload: packet.payload,
        };
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(kind = envelope.payload.kind(), "could not encode packet: {e}");
                continue;
            }
        };
        debug!(kind = envelope.payload.kind(), delivery = ?packet.delivery, "[OUT]");
        let outbound = Outbound {
            delivery: packet.delivery,
            bytes,
        };
        if channels.outbound.send(outbound).await.is_err() {
            warn!("transport closed");
            return false;
        }
    }

    for event in out.events {
        // queued events go first, nothing may overtake them
        if !backlog.is_empty() {
            if !event.is_droppable() {
                backlog.push(event);
            }
            continue;
        }
        match channels.ui.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) if event.is_droppable() => {
                trace!("ui is behind, skipping update");
            }
            Err(mpsc::error::TrySendError::Full(event)) => backlog.push(event),
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
        }
    }
    true
}
