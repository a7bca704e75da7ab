use std::collections::HashMap;

use crate::packet::{DisplayNamePacket, Outbox};
use crate::peer::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameLearned {
    pub peer: PeerId,
    pub name: String,
}

pub type NameOutbox = Outbox<DisplayNamePacket, NameLearned>;

/// Human readable names other peers introduced themselves with.
#[derive(Debug)]
pub struct DisplayNames {
    my_id: PeerId,
    my_name: String,
    names: HashMap<PeerId, String>,
}

impl DisplayNames {
    pub fn new(my_id: PeerId, my_name: impl Into<String>) -> Self {
        Self {
            my_id,
            my_name: my_name.into(),
            names: HashMap::new(),
        }
    }

    /// Name for a peer, falling back to its id.
    pub fn name_of(&self, peer: &PeerId) -> String {
        self.names
            .get(peer)
            .cloned()
            .unwrap_or_else(|| peer.to_string())
    }

    pub fn process_packet(
        &mut self,
        sender: &PeerId,
        packet: &DisplayNamePacket,
        out: &mut NameOutbox,
    ) {
        match packet {
            DisplayNamePacket::Request { my_name } => {
                self.learn(sender, my_name, out);
                out.ephemeral(DisplayNamePacket::Response {
                    my_name: self.my_name.clone(),
                });
            }
            DisplayNamePacket::Response { my_name } => self.learn(sender, my_name, out),
        }
    }

    /// Introduce ourselves and ask everybody else to do the same.
    pub fn request_names(&mut self, out: &mut NameOutbox) {
        let me = self.my_id.clone();
        let name = self.my_name.clone();
        self.learn(&me, &name, out);
        out.ephemeral(DisplayNamePacket::Request { my_name: name });
    }

    fn learn(&mut self, peer: &PeerId, name: &str, out: &mut NameOutbox) {
        if self.names.get(peer).map(String::as_str) == Some(name) {
            return;
        }
        self.names.insert(peer.clone(), name.to_string());
        out.emit(NameLearned {
            peer: peer.clone(),
            name: name.to_string(),
        });
    }
}
