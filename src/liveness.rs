//! Ping bookkeeping and gossip about who is online.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::packet::{Outbox, PingPacket};
use crate::peer::{LastPing, PeerId, PeerInfo, PeerMap, PeerStatus, PingReportEntry, unix_millis};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// First packet ever seen from this peer.
    Discovered(PeerId),
    PingMeasured { peer: PeerId, rtt: Duration },
}

pub type PingOutbox = Outbox<PingPacket, PeerEvent>;

#[derive(Debug, Clone)]
struct SentPing {
    id: String,
    at: Instant,
}

#[derive(Debug)]
pub struct PeerStore {
    my_id: PeerId,
    peers: PeerMap,
    last_sent_ping: Option<SentPing>,
    offline_timeout: Duration,
}

impl PeerStore {
    pub fn new(my_id: PeerId, offline_timeout: Duration) -> Self {
        Self {
            my_id,
            peers: PeerMap::default(),
            last_sent_ping: None,
            offline_timeout,
        }
    }

    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    pub fn status(&self, peer: &PeerId, now: Instant) -> PeerStatus {
        if *peer == self.my_id {
            return PeerStatus::Online;
        }
        self.peers
            .get(peer)
            .map_or(PeerStatus::Offline, |info| {
                info.status(now, self.offline_timeout)
            })
    }

    pub fn online_count(&self, now: Instant) -> usize {
        self.peers
            .values()
            .filter(|p| p.status(now, self.offline_timeout) == PeerStatus::Online)
            .count()
    }

    pub fn process_packet(
        &mut self,
        sender: &PeerId,
        packet: &PingPacket,
        now: Instant,
        out: &mut PingOutbox,
    ) {
        if *sender == self.my_id {
            trace!("ignoring ping packet from ourselves");
            return;
        }
        self.touch(sender, now, out);

        match packet {
            PingPacket::Ping { ping_id } => out.ephemeral(PingPacket::Pong {
                ping_id: ping_id.clone(),
            }),
            PingPacket::Pong { ping_id } => {
                let Some(sent) = &self.last_sent_ping else {
                    return;
                };
                if sent.id != *ping_id {
                    debug!(peer = %sender, "ignoring pong for an older ping");
                    return;
                }
                let rtt = now.saturating_duration_since(sent.at);
                if let Some(info) = self.peers.get_mut(sender) {
                    info.last_ping = Some(LastPing { received: now, rtt });
                }
                out.emit(PeerEvent::PingMeasured {
                    peer: sender.clone(),
                    rtt,
                });
            }
            PingPacket::Report { report } => {
                if let Some(info) = self.peers.get_mut(sender) {
                    info.reported = report.clone();
                }
            }
        }
    }

    pub fn send_ping(&mut self, now: Instant, out: &mut PingOutbox) {
        let id = format!("{:x}", rand::rng().random::<u64>());
        out.ephemeral(PingPacket::Ping {
            ping_id: id.clone(),
        });
        self.last_sent_ping = Some(SentPing { id, at: now });
    }

    /// Tell everybody how well we can hear the peers we know.
    pub fn send_ping_report(&self, out: &mut PingOutbox) {
        let mut report: Vec<PingReportEntry> = self
            .peers
            .values()
            .map(|info| PingReportEntry {
                peer_id: info.id.clone(),
                ping: info.last_ping.map(|p| p.rtt.as_millis() as u64),
                received_time: Some(info.last_seen_unix),
            })
            .collect();
        report.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        out.ephemeral(PingPacket::Report { report });
    }

    fn touch(&mut self, peer: &PeerId, now: Instant, out: &mut PingOutbox) {
        let now_unix = unix_millis();
        match self.peers.get_mut(peer) {
            Some(info) => {
                info.last_seen = now;
                info.last_seen_unix = now_unix;
            }
            None => {
                self.peers
                    .insert(peer.clone(), PeerInfo::new(peer.clone(), now, now_unix));
                out.emit(PeerEvent::Discovered(peer.clone()));
            }
        }
    }
}
