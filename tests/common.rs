#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use p2p_skirmish::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Keeps a running fold of every input so a missed, duplicated or
/// misplaced input always shows up in the state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tally;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TallyState {
    pub seed: u32,
    pub host: u64,
    pub guest: u64,
    pub frames: u32,
}

impl GameLogic for Tally {
    type State = TallyState;
    type Input = u8;

    fn initial_state(&self, random_seed: u32) -> TallyState {
        TallyState {
            seed: random_seed,
            host: 0,
            guest: 0,
            frames: 0,
        }
    }

    fn calculate_frame(&self, previous: &TallyState, inputs: &FrameInputs<u8>) -> TallyState {
        TallyState {
            seed: previous.seed,
            host: previous
                .host
                .wrapping_mul(31)
                .wrapping_add(inputs.host.map_or(0, u64::from)),
            guest: previous
                .guest
                .wrapping_mul(17)
                .wrapping_add(inputs.guest.map_or(0, u64::from)),
            frames: previous.frames + 1,
        }
    }
}

/// A packet on its way to one peer.
#[derive(Debug, Clone)]
pub struct InFlight<G: GameLogic> {
    pub to: usize,
    pub channel: Channel,
    pub envelope: EnvelopeOf<G>,
}

/// Synchronous swarm of dispatchers. Nothing moves until the test says so,
/// which lets tests drop, duplicate and reorder packets at will.
pub struct TestNet<G: GameLogic> {
    logic: Arc<G>,
    config: Config,
    pub peers: Vec<Dispatcher<G>>,
    pub queue: VecDeque<InFlight<G>>,
    /// Everything ever sent as persistent, in send order.
    pub log: Vec<EnvelopeOf<G>>,
    pub events: Vec<Vec<UiEventOf<G>>>,
}

pub fn peer_name(index: usize) -> PeerId {
    PeerId::new(format!("peer-{index}"))
}

impl<G: GameLogic> TestNet<G> {
    pub fn new(logic: G, peers: usize) -> Self {
        Self::with_config(logic, peers, Config::default())
    }

    pub fn with_config(logic: G, peers: usize, config: Config) -> Self {
        let mut net = Self {
            logic: Arc::new(logic),
            config,
            peers: Vec::new(),
            queue: VecDeque::new(),
            log: Vec::new(),
            events: Vec::new(),
        };
        for _ in 0..peers {
            net.add_peer();
        }
        net
    }

    fn dispatcher(&self, index: usize) -> Dispatcher<G> {
        Dispatcher::with_seed(
            peer_name(index),
            self.logic.clone(),
            &self.config,
            index as u64 + 1,
        )
    }

    /// A new peer that has already received the whole durable log.
    pub fn add_peer(&mut self) -> usize {
        let index = self.peers.len();
        let dispatcher = self.dispatcher(index);
        self.peers.push(dispatcher);
        self.events.push(Vec::new());
        self.replay_log(index);
        index
    }

    /// Throw away a peer's memory and bring it back from the durable log.
    pub fn restart(&mut self, index: usize) {
        self.peers[index] = self.dispatcher(index);
        self.events[index].clear();
        self.queue.retain(|p| p.to != index);
        self.replay_log(index);
    }

    fn replay_log(&mut self, index: usize) {
        for envelope in self.log.clone() {
            self.queue.push_back(InFlight {
                to: index,
                channel: Channel::Durable,
                envelope,
            });
        }
    }

    pub fn id(&self, index: usize) -> PeerId {
        self.peers[index].my_id().clone()
    }

    /// Run a local action on one peer and put what it sends on the wire.
    pub fn act<R>(
        &mut self,
        index: usize,
        action: impl FnOnce(&mut Dispatcher<G>, &mut DispatchOutbox<G>) -> R,
    ) -> R {
        let mut out = DispatchOutbox::<G>::default();
        let result = action(&mut self.peers[index], &mut out);
        self.send(index, out);
        result
    }

    fn send(&mut self, from: usize, out: DispatchOutbox<G>) {
        let sender = self.id(from);
        for packet in out.packets {
            let envelope = Envelope {
                peer_id: sender.clone(),
                payload: packet.payload,
            };
            // through the real codec
            let bytes = envelope.encode().expect("encodes");
            let envelope = EnvelopeOf::<G>::decode(&bytes).expect("decodes");

            for to in (0..self.peers.len()).filter(|to| *to != from) {
                self.queue.push_back(InFlight {
                    to,
                    channel: Channel::Ephemeral,
                    envelope: envelope.clone(),
                });
            }
            if packet.delivery == Delivery::Persistent {
                self.log.push(envelope.clone());
                for to in 0..self.peers.len() {
                    self.queue.push_back(InFlight {
                        to,
                        channel: Channel::Durable,
                        envelope: envelope.clone(),
                    });
                }
            }
        }
        self.events[from].extend(out.events);
    }

    pub fn deliver(&mut self, packet: InFlight<G>) {
        let InFlight {
            to,
            channel,
            envelope,
        } = packet;
        self.act(to, |peer, out| {
            peer.handle(&envelope, channel, Instant::now(), out)
        });
    }

    /// Deliver the oldest packet in flight. False if there was none.
    pub fn deliver_next(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(packet) => {
                self.deliver(packet);
                true
            }
            None => false,
        }
    }

    pub fn deliver_all(&mut self) {
        let mut budget = 100_000;
        while self.deliver_next() {
            budget -= 1;
            assert!(budget > 0, "packets keep generating packets");
        }
    }

    /// Drop every packet in flight matching `filter`.
    pub fn drop_where(&mut self, filter: impl Fn(&InFlight<G>) -> bool) -> usize {
        let before = self.queue.len();
        self.queue.retain(|p| !filter(p));
        before - self.queue.len()
    }

    pub fn tick(&mut self, index: usize) {
        self.act(index, |peer, out| peer.tick(out));
    }

    /// One network frame on every peer, then deliver everything.
    pub fn tick_all(&mut self) {
        for index in 0..self.peers.len() {
            self.tick(index);
        }
        self.deliver_all();
    }

    pub fn take_events(&mut self, index: usize) -> Vec<UiEventOf<G>> {
        std::mem::take(&mut self.events[index])
    }

    pub fn game(&self, index: usize) -> Option<&ActiveGame<G>> {
        self.peers[index].game()
    }

    pub fn matchmaking(&self, index: usize) -> &Matchmaking {
        self.peers[index].matchmaking()
    }

    /// Open a request on `host`, accept it from `guest`, deliver everything.
    pub fn start_match(&mut self, host: usize, guest: usize) -> MatchId {
        let match_id = self
            .act(host, |peer, out| peer.request_match(out))
            .expect("request");
        self.deliver_all();
        self.act(guest, |peer, out| peer.join_match(&match_id, out))
            .expect("join");
        self.deliver_all();
        match_id
    }
}

pub fn is_match_packet<G: GameLogic>(packet: &InFlight<G>, kind: &str) -> bool {
    packet.envelope.payload.kind() == kind
}

/// Config with a short rollback horizon and frequent snapshots.
pub fn fast_config() -> Config {
    Config {
        input_delay_frames: 2,
        snapshot_interval: 5,
        max_rollback_frames: 40,
        tick_rate_hz: 100,
        ping_interval: Duration::from_millis(50),
        ping_report_interval: Duration::from_millis(200),
        ..Config::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn await_event<S>(
    events: &mut mpsc::Receiver<UiEvent<S>>,
) -> anyhow::Result<UiEvent<S>> {
    let duration = Duration::from_secs(5);
    tokio::time::timeout(duration, events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("event channel closed"))
}

/// Wait for the first event `pick` accepts, skipping the rest.
pub async fn wait_for<S, T>(
    events: &mut mpsc::Receiver<UiEvent<S>>,
    mut pick: impl FnMut(UiEvent<S>) -> Option<T>,
) -> anyhow::Result<T> {
    loop {
        if let Some(found) = pick(await_event(events).await?) {
            return Ok(found);
        }
    }
}
