//! In-process swarm for tests and local play.
//!
//! Every transport connected to the same [`MemoryNetwork`] sees every
//! other transport's broadcasts. Persistent packets are also appended to a
//! shared log that is replayed to each transport when it starts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Inbound, Outbound, Transport};
use crate::packet::{Channel, Delivery};

#[derive(Default)]
struct Hub {
    next_id: u64,
    peers: HashMap<u64, mpsc::UnboundedSender<Inbound>>,
    log: Vec<Bytes>,
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that joins this network once it is run.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
        }
    }

    /// Number of entries in the durable log.
    pub fn log_len(&self) -> usize {
        self.hub().log.len()
    }

    /// Number of transports currently running.
    pub fn connected(&self) -> usize {
        self.hub().peers.len()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self) -> (u64, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.hub();
        for bytes in &hub.log {
            let _ = tx.send(Inbound {
                channel: Channel::Durable,
                bytes: bytes.clone(),
            });
        }
        let id = hub.next_id;
        hub.next_id += 1;
        debug!(id, replayed = hub.log.len(), "memory transport attached");
        hub.peers.insert(id, tx);
        (id, rx)
    }

    fn detach(&self, id: u64) {
        self.hub().peers.remove(&id);
        debug!(id, "memory transport detached");
    }

    fn publish(&self, from: u64, outbound: Outbound) {
        let mut hub = self.hub();
        for (id, peer) in &hub.peers {
            if *id != from {
                let _ = peer.send(Inbound {
                    channel: Channel::Ephemeral,
                    bytes: outbound.bytes.clone(),
                });
            }
        }
        if outbound.delivery == Delivery::Persistent {
            for peer in hub.peers.values() {
                let _ = peer.send(Inbound {
                    channel: Channel::Durable,
                    bytes: outbound.bytes.clone(),
                });
            }
            hub.log.push(outbound.bytes);
        }
        trace!(from, peers = hub.peers.len(), "published");
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    async fn run(
        self,
        incoming: mpsc::Sender<Inbound>,
        mut outgoing: mpsc::Receiver<Outbound>,
    ) -> Result<()> {
        let (id, mut from_network) = self.network.attach();
        loop {
            tokio::select! {
                Some(inbound) = from_network.recv() => {
                    if incoming.send(inbound).await.is_err() {
                        break;
                    }
                }
                outbound = outgoing.recv() => match outbound {
                    Some(outbound) => self.network.publish(id, outbound),
                    None => break,
                },
            }
        }
        self.network.detach(id);
        Ok(())
    }
}
