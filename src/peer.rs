use std::{
    collections::HashMap,
    fmt::Display,
    ops::{Deref, DerefMut},
    time::Duration,
};

use iroh::EndpointId;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Stable per-device identifier. No central authority issues these.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<EndpointId> for PeerId {
    fn from(id: EndpointId) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Online,
    Offline,
}

/// Round trip measured by us against a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastPing {
    pub received: Instant,
    pub rtt: Duration,
}

/// One line of a peer's gossip about somebody else.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PingReportEntry {
    pub peer_id: PeerId,
    /// Round trip in milliseconds, if the reporter has measured one.
    pub ping: Option<u64>,
    /// Unix time in milliseconds when the reporter last heard from this peer.
    pub received_time: Option<u64>,
}

/// Liveness information about a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub last_seen: Instant,
    /// unix millis matching `last_seen`, used when gossiping about this peer
    pub last_seen_unix: u64,
    pub last_ping: Option<LastPing>,
    /// What this peer told us about its own pings to others
    pub reported: Vec<PingReportEntry>,
}

impl Display for PeerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_ping {
            Some(ping) => write!(f, "{} ({} ms)", self.id, ping.rtt.as_millis()),
            None => write!(f, "{} (-)", self.id),
        }
    }
}

impl PeerInfo {
    pub fn new(id: PeerId, now: Instant, now_unix: u64) -> Self {
        Self {
            id,
            last_seen: now,
            last_seen_unix: now_unix,
            last_ping: None,
            reported: Vec::new(),
        }
    }

    pub fn status(&self, now: Instant, offline_timeout: Duration) -> PeerStatus {
        if now.saturating_duration_since(self.last_seen) <= offline_timeout {
            PeerStatus::Online
        } else {
            PeerStatus::Offline
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMap(HashMap<PeerId, PeerInfo>);

impl Deref for PeerMap {
    type Target = HashMap<PeerId, PeerInfo>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PeerMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Display for PeerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut peers: Vec<&PeerInfo> = self.0.values().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        for peer in peers {
            let mut id = peer.id.to_string();
            id.truncate(10);
            writeln!(f, "[{}...]: '{}'", id, peer)?;
        }
        Ok(())
    }
}

/// Current unix time in milliseconds.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
