//! Carriers for encoded envelopes.
//!
//! A transport moves opaque bytes between the room and the rest of the
//! swarm over two channels: a realtime broadcast that peers only see while
//! they are online, and a durable log that is replayed to anybody who
//! connects later. The room never looks inside the transport.

pub mod iroh;
pub mod memory;

use std::future::Future;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::packet::{Channel, Delivery};

pub use self::iroh::IrohTransport;
pub use memory::{MemoryNetwork, MemoryTransport};

/// Bytes received from the swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub channel: Channel,
    pub bytes: Bytes,
}

/// Bytes to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub delivery: Delivery,
    pub bytes: Bytes,
}

pub trait Transport: Send + 'static {
    /// Pump packets until `outgoing` closes or `incoming` is dropped.
    ///
    /// Persistent packets must come back to their own sender on the durable
    /// channel, and everything already in the durable log is delivered on
    /// start, so a restarted peer sees its own history.
    fn run(
        self,
        incoming: mpsc::Sender<Inbound>,
        outgoing: mpsc::Receiver<Outbound>,
    ) -> impl Future<Output = Result<()>> + Send;
}
