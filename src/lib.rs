//! Serverless two-player matches over a peer-to-peer swarm.
//!
//! Peers find each other through a matchmaking handshake that every peer
//! evaluates on its own, then run a lock-step, rollback capable simulation
//! of any [`GameLogic`].

mod config;
mod dispatch;
mod display_name;
mod error;
mod game;
mod iroh;
mod liveness;
mod logic;
mod matchmaking;
mod packet;
mod peer;
mod room;
pub mod skirmish;
pub mod transport;

pub use config::{Config, ConfigError};
pub use dispatch::{DispatchOutbox, Dispatcher, EnvelopeOf, PacketOf};
pub use display_name::{DisplayNames, NameLearned, NameOutbox};
pub use error::{Error, Result};
pub use game::{
    ActiveGame, GameConfig, GameEvent, GameOutbox, GamePacketOf, GameSnapshot, GameState, Input,
    Readiness,
};
pub use liveness::{PeerEvent, PeerStore, PingOutbox};
pub use logic::{Frame, FrameInputs, GameLogic, Role};
pub use matchmaking::{
    MatchEvent, MatchId, MatchOutbox, MatchRequest, MatchResult, Matchmaking, PastMatch,
    RunningMatch, Winner,
};
pub use packet::{
    Channel, Delivery, DisplayNamePacket, Envelope, GamePacket, MatchPacket, Outbox, Outgoing,
    Packet, PingPacket,
};
pub use peer::{LastPing, PeerId, PeerInfo, PeerMap, PeerStatus, PingReportEntry};
pub use room::{GameRoom, GameView, LobbyView, OpenRequest, UiEvent, UiEventOf};
