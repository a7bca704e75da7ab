//! Transport over an iroh node.
//!
//! The realtime channel is a gossip topic derived from the document
//! namespace. The durable log lives in that document under keys of the
//! form `status.{unix_millis}.{endpoint}.{counter}`, so sorting keys gives
//! a stable replay order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr as _;

use anyhow::Result;
use bytes::Bytes;
use iroh_blobs::Hash;
use iroh_docs::engine::LiveEvent;
use iroh_docs::store::Query;
use iroh_docs::sync::Entry;
use iroh_docs::{ContentStatus, DocTicket};
use iroh_gossip::api::{Event, GossipSender};
use iroh_gossip::proto::TopicId;
use n0_future::StreamExt as _;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{Inbound, Outbound, Transport};
use crate::iroh::{IrohNode, Swarm};
use crate::packet::{Channel, Delivery};
use crate::peer::{PeerId, unix_millis};

const PREFIX_STATUS: &[u8] = b"status.";

pub struct IrohTransport {
    node: IrohNode,
    swarm: Swarm,
}

impl IrohTransport {
    /// Start a new swarm. Share [`IrohTransport::ticket`] with other peers.
    pub async fn create(store_path: Option<PathBuf>) -> Result<Self> {
        let node = IrohNode::start(store_path).await?;
        let swarm = node.create_swarm().await?;
        Ok(Self { node, swarm })
    }

    /// Join the swarm behind `ticket`.
    pub async fn join(ticket: &str, store_path: Option<PathBuf>) -> Result<Self> {
        let ticket = DocTicket::from_str(ticket)?;
        let node = IrohNode::start(store_path).await?;
        let swarm = node.join_swarm(ticket).await?;
        Ok(Self { node, swarm })
    }

    pub fn peer_id(&self) -> PeerId {
        self.node.peer_id()
    }

    pub fn ticket(&self) -> &DocTicket {
        &self.swarm.ticket
    }

    /// Deliver every status entry we already hold, oldest first. Entries
    /// whose content has not arrived yet are parked until it does.
    async fn replay(
        &self,
        incoming: &mpsc::Sender<Inbound>,
        pending: &mut HashMap<Hash, Entry>,
    ) -> Result<bool> {
        let query = self
            .swarm
            .doc
            .get_many(Query::single_latest_per_key().key_prefix(PREFIX_STATUS));
        let mut stream = Box::pin(query.await?);
        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await {
            entries.push(entry?);
        }
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        debug!(entries = entries.len(), "replaying status log");

        for entry in entries {
            match self.node.content(&entry).await {
                Ok(bytes) => {
                    if !forward(incoming, Channel::Durable, bytes).await {
                        return Ok(false);
                    }
                }
                Err(_) => {
                    pending.insert(entry.content_hash(), entry);
                }
            }
        }
        Ok(true)
    }

    async fn publish(
        &self,
        sender: &GossipSender,
        counter: &mut u64,
        outbound: Outbound,
    ) -> Result<()> {
        sender.broadcast(outbound.bytes.clone()).await?;
        if outbound.delivery == Delivery::Persistent {
            let key = format!(
                "status.{:016}.{}.{}",
                unix_millis(),
                self.node.endpoint_id(),
                counter
            );
            *counter += 1;
            self.swarm
                .doc
                .set_bytes(self.swarm.author, key.into_bytes(), outbound.bytes)
                .await?;
        }
        Ok(())
    }
}

impl Transport for IrohTransport {
    async fn run(
        self,
        incoming: mpsc::Sender<Inbound>,
        mut outgoing: mpsc::Receiver<Outbound>,
    ) -> Result<()> {
        let topic = TopicId::from_bytes(*self.swarm.doc.id().as_bytes());
        let (sender, mut receiver) = self
            .node
            .gossip()
            .subscribe(topic, self.swarm.bootstrap.clone())
            .await?
            .split();
        // replayed entries may show up again live, which is harmless
        let mut live = self.swarm.doc.subscribe().await?;
        let mut pending: HashMap<Hash, Entry> = HashMap::new();
        let mut counter = 0u64;

        if self.replay(&incoming, &mut pending).await? {
            loop {
                tokio::select! {
                    outbound = outgoing.recv() => match outbound {
                        Some(outbound) => self.publish(&sender, &mut counter, outbound).await?,
                        None => break,
                    },
                    Some(event) = receiver.next() => match event? {
                        Event::Received(message) => {
                            if !forward(&incoming, Channel::Ephemeral, message.content).await {
                                break;
                            }
                        }
                        Event::Lagged => warn!("gossip receiver lagged, packets were lost"),
                        other => trace!(?other, "gossip event"),
                    },
                    Some(Ok(event)) = live.next() => {
                        let Some(entry) = parse_live_event(event, &mut pending) else {
                            continue;
                        };
                        if !entry.key().starts_with(PREFIX_STATUS) {
                            continue;
                        }
                        let bytes = self.node.content(&entry).await?;
                        if !forward(&incoming, Channel::Durable, bytes).await {
                            break;
                        }
                    },
                    else => break,
                }
            }
        }
        debug!("iroh transport stopping");
        self.node.shutdown().await
    }
}

/// False once the room has gone away.
async fn forward(incoming: &mpsc::Sender<Inbound>, channel: Channel, bytes: Bytes) -> bool {
    trace!(?channel, len = bytes.len(), "received");
    incoming.send(Inbound { channel, bytes }).await.is_ok()
}

/// Output a doc entry when its content is available locally.
fn parse_live_event(event: LiveEvent, pending_entries: &mut HashMap<Hash, Entry>) -> Option<Entry> {
    use ContentStatus::{Complete, Incomplete, Missing};
    match event {
        LiveEvent::InsertLocal { entry } => Some(entry),
        LiveEvent::InsertRemote {
            entry,
            content_status: Complete,
            ..
        } => Some(entry),
        LiveEvent::InsertRemote {
            entry,
            content_status: Missing | Incomplete,
            ..
        } => {
            pending_entries.insert(entry.content_hash(), entry);
            None
        }
        LiveEvent::ContentReady { hash } => pending_entries.remove(&hash),
        _other => None,
    }
}
