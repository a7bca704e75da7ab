//! Packet taxonomy and wire codec
//!
//! Every packet belongs to one namespace. Dispatch happens on the outer
//! [`Packet`] variant, so adding a packet kind is a compile error until
//! every handler deals with it.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::game::{GameSnapshot, Input};
use crate::matchmaking::{MatchId, MatchResult};
use crate::peer::{PeerId, PingReportEntry};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PingPacket {
    Ping { ping_id: String },
    Pong { ping_id: String },
    Report { report: Vec<PingReportEntry> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum DisplayNamePacket {
    Request { my_name: String },
    Response { my_name: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum MatchPacket {
    Request {
        match_id: MatchId,
    },
    Accept {
        match_id: MatchId,
    },
    Confirm {
        match_id: MatchId,
        host: PeerId,
        guest: PeerId,
        random_seed: u32,
    },
    Result {
        match_id: MatchId,
        host: PeerId,
        guest: PeerId,
        result: MatchResult,
    },
}

impl MatchPacket {
    pub fn match_id(&self) -> &MatchId {
        match self {
            MatchPacket::Request { match_id }
            | MatchPacket::Accept { match_id }
            | MatchPacket::Confirm { match_id, .. }
            | MatchPacket::Result { match_id, .. } => match_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum GamePacket<I, S> {
    Input { match_id: MatchId, input: Input<I> },
    Snapshot { match_id: MatchId, snapshot: GameSnapshot<S> },
}

impl<I, S> GamePacket<I, S> {
    pub fn match_id(&self) -> &MatchId {
        match self {
            GamePacket::Input { match_id, .. } | GamePacket::Snapshot { match_id, .. } => match_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Packet<I, S> {
    Ping(PingPacket),
    DisplayName(DisplayNamePacket),
    Match(MatchPacket),
    Game(GamePacket<I, S>),
}

impl<I, S> Packet<I, S> {
    /// Dotted `namespace.verb` name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Ping(PingPacket::Ping { .. }) => "ping.ping",
            Packet::Ping(PingPacket::Pong { .. }) => "ping.pong",
            Packet::Ping(PingPacket::Report { .. }) => "ping.report",
            Packet::DisplayName(DisplayNamePacket::Request { .. }) => "displayname.request",
            Packet::DisplayName(DisplayNamePacket::Response { .. }) => "displayname.response",
            Packet::Match(MatchPacket::Request { .. }) => "match.request",
            Packet::Match(MatchPacket::Accept { .. }) => "match.accept",
            Packet::Match(MatchPacket::Confirm { .. }) => "match.confirm",
            Packet::Match(MatchPacket::Result { .. }) => "match.result",
            Packet::Game(GamePacket::Input { .. }) => "game.input",
            Packet::Game(GamePacket::Snapshot { .. }) => "game.snapshot",
        }
    }
}

/// What crosses the wire: the sender plus one packet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope<I, S> {
    pub peer_id: PeerId,
    pub payload: Packet<I, S>,
}

impl<I: Serialize, S: Serialize> Envelope<I, S> {
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(postcard::to_stdvec(self)?))
    }
}

impl<I: DeserializeOwned, S: DeserializeOwned> Envelope<I, S> {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// How far an outbound packet should travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Realtime channel only; lost for peers that are offline.
    Ephemeral,
    /// Realtime channel and the durable status log.
    Persistent,
}

/// Which channel an inbound packet arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ephemeral,
    Durable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing<P> {
    pub delivery: Delivery,
    pub payload: P,
}

/// Side effects produced by a reducer call: packets to broadcast and events
/// for the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbox<P, E> {
    pub packets: Vec<Outgoing<P>>,
    pub events: Vec<E>,
}

impl<P, E> Default for Outbox<P, E> {
    fn default() -> Self {
        Self {
            packets: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl<P, E> Outbox<P, E> {
    pub fn ephemeral(&mut self, payload: P) {
        self.packets.push(Outgoing {
            delivery: Delivery::Ephemeral,
            payload,
        });
    }

    pub fn persistent(&mut self, payload: P) {
        self.packets.push(Outgoing {
            delivery: Delivery::Persistent,
            payload,
        });
    }

    pub fn emit(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.events.is_empty()
    }

    /// Move everything from a component outbox into this one.
    pub fn absorb<Q, F>(
        &mut self,
        other: Outbox<Q, F>,
        wrap: impl Fn(Q) -> P,
        lift: impl Fn(F) -> E,
    ) {
        self.packets
            .extend(other.packets.into_iter().map(|out| Outgoing {
                delivery: out.delivery,
                payload: wrap(out.payload),
            }));
        self.events.extend(other.events.into_iter().map(lift));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameState;
    use crate::matchmaking::Winner;

    type TestEnvelope = Envelope<u8, Vec<u16>>;

    #[test]
    fn kind_names_follow_namespace_dot_verb() {
        let packet: Packet<u8, u8> = Packet::Match(MatchPacket::Accept {
            match_id: MatchId::from("m1"),
        });
        assert_eq!(packet.kind(), "match.accept");
        let packet: Packet<u8, u8> = Packet::Ping(PingPacket::Report { report: vec![] });
        assert_eq!(packet.kind(), "ping.report");
    }

    #[test]
    fn envelope_survives_the_wire() {
        let envelope = TestEnvelope {
            peer_id: PeerId::from("host"),
            payload: Packet::Game(GamePacket::Snapshot {
                match_id: MatchId::from("m1"),
                snapshot: GameSnapshot {
                    state: GameState {
                        network_frame: 12,
                        state: vec![1, 2, 3],
                    },
                },
            }),
        };
        let bytes = envelope.encode().unwrap();
        assert_eq!(TestEnvelope::decode(&bytes).unwrap(), envelope);

        let result = TestEnvelope {
            peer_id: PeerId::from("guest"),
            payload: Packet::Match(MatchPacket::Result {
                match_id: MatchId::from("m1"),
                host: PeerId::from("host"),
                guest: PeerId::from("guest"),
                result: MatchResult {
                    winner: Winner::Tie,
                    score: "3:3".to_string(),
                },
            }),
        };
        let bytes = result.encode().unwrap();
        assert_eq!(TestEnvelope::decode(&bytes).unwrap(), result);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = TestEnvelope::decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, crate::Error::Codec(_)));
    }

    #[test]
    fn absorb_wraps_packets_and_events() {
        let mut inner: Outbox<u8, &'static str> = Outbox::default();
        inner.persistent(7);
        inner.emit("seen");
        let mut outer: Outbox<u16, String> = Outbox::default();
        outer.absorb(inner, u16::from, |e| e.to_string());
        assert_eq!(outer.packets.len(), 1);
        assert_eq!(outer.packets[0].delivery, Delivery::Persistent);
        assert_eq!(outer.packets[0].payload, 7u16);
        assert_eq!(outer.events, vec!["seen".to_string()]);
    }
}
