use std::collections::HashMap;

use hyper_tungstenite::tungstenite::Message;
use log::{debug, info, warn};
use presence_protocol::{encode_signal, Role, Signal, REASON_PEER_LEFT};
use tokio::sync::mpsc;

use crate::config::PeerLossPolicy;
use crate::error::RelayError;

pub type ConnId = String;
pub type Address = String;

/// Maximum members per room.
pub const ROOM_CAPACITY: usize = 2;

/// Work items for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(Message),
    /// Drop the socket without a close handshake
    Terminate,
}

pub type ConnSender = mpsc::UnboundedSender<Outbound>;

/// One live connection as seen by the relay
#[derive(Debug, Clone)]
struct Member {
    /// `None` for registry-only connections
    address: Option<Address>,
    role: Option<Role>,
    sender: ConnSender,
    /// A probe went out and no pong came back yet
    awaiting_pong: bool,
}

impl Member {
    fn send_signal(&self, signal: &Signal) {
        match encode_signal(signal) {
            Ok(json) => {
                let _ = self.sender.send(Outbound::Frame(Message::Text(json)));
            }
            Err(e) => warn!("Failed to encode {} notice: {}", signal.kind(), e),
        }
    }
}

/// Result of one liveness sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    pub evicted: Vec<ConnId>,
}

/// Room membership and role bookkeeping.
/// All mutation goes through `&mut self`, so callers serialize it behind one lock.
pub struct SignalingState {
    /// address -> member conn ids in arrival order
    rooms: HashMap<Address, Vec<ConnId>>,
    members: HashMap<ConnId, Member>,
    peer_loss: PeerLossPolicy,
    grace_seconds: u64,
}

impl SignalingState {
    pub fn new(peer_loss: PeerLossPolicy, grace_seconds: u64) -> Self {
        Self {
            rooms: HashMap::new(),
            members: HashMap::new(),
            peer_loss,
            grace_seconds,
        }
    }

    /// Track a connection that never joins a room (registry traffic only).
    pub fn attach(&mut self, conn_id: ConnId, sender: ConnSender) {
        self.members.insert(
            conn_id,
            Member {
                address: None,
                role: None,
                sender,
                awaiting_pong: false,
            },
        );
    }

    /// Admit a connection into `address`'s room.
    ///
    /// When the room reaches two members both receive `ready`. A fresh pair gets
    /// polite (first arrival) / initiator (second arrival); a survivor of an
    /// earlier pair keeps its role and the newcomer takes the other one.
    pub fn join(
        &mut self,
        conn_id: ConnId,
        address: &str,
        sender: ConnSender,
    ) -> Result<usize, RelayError> {
        let occupants = self.rooms.get(address).map_or(0, |room| room.len());
        if occupants >= ROOM_CAPACITY {
            return Err(RelayError::RoomFull(address.to_string()));
        }

        self.members.insert(
            conn_id.clone(),
            Member {
                address: Some(address.to_string()),
                role: None,
                sender,
                awaiting_pong: false,
            },
        );
        let room = self.rooms.entry(address.to_string()).or_insert_with(Vec::new);
        room.push(conn_id.clone());
        let size = room.len();

        info!("Connection {} joined room {} ({}/{})", conn_id, address, size, ROOM_CAPACITY);

        if size == ROOM_CAPACITY {
            self.assign_roles(address);
        }
        Ok(size)
    }

    fn assign_roles(&mut self, address: &str) {
        let Some(room) = self.rooms.get(address) else {
            return;
        };
        let (first, second) = (room[0].clone(), room[1].clone());

        let first_role = self
            .members
            .get(&first)
            .and_then(|m| m.role)
            .unwrap_or(Role::Polite);

        for (conn_id, role) in [(&first, first_role), (&second, first_role.other())] {
            if let Some(member) = self.members.get_mut(conn_id) {
                member.role = Some(role);
                member.send_signal(&Signal::Ready { role });
            }
        }
        info!(
            "Room {} paired: {} is {:?}, {} is {:?}",
            address,
            first,
            first_role,
            second,
            first_role.other()
        );
    }

    /// Forward a frame verbatim to the other member of the sender's room.
    /// Returns false when there is nobody to forward to.
    pub fn forward(&self, conn_id: &str, raw: &str) -> Result<bool, RelayError> {
        let member = self
            .members
            .get(conn_id)
            .ok_or_else(|| RelayError::UnknownConnection(conn_id.to_string()))?;
        let Some(address) = member.address.as_ref() else {
            return Ok(false);
        };
        let Some(peer) = self.peer_of(conn_id, address) else {
            return Ok(false);
        };
        debug!("Forwarding frame from {} to {} in room {}", conn_id, peer.0, address);
        Ok(peer
            .1
            .sender
            .send(Outbound::Frame(Message::Text(raw.to_string())))
            .is_ok())
    }

    fn peer_of(&self, conn_id: &str, address: &str) -> Option<(&ConnId, &Member)> {
        self.rooms
            .get(address)?
            .iter()
            .find(|other| other.as_str() != conn_id)
            .and_then(|other| self.members.get(other).map(|m| (other, m)))
    }

    /// Remove a connection; the surviving room member (if any) is notified per policy.
    /// Returns the survivor's id when one was notified.
    pub fn detach(&mut self, conn_id: &str) -> Option<ConnId> {
        let member = self.members.remove(conn_id)?;
        let address = member.address?;

        let survivor = {
            let room = self.rooms.get_mut(&address)?;
            room.retain(|id| id != conn_id);
            if room.is_empty() {
                self.rooms.remove(&address);
                None
            } else {
                room.first().cloned()
            }
        };

        info!("Connection {} left room {}", conn_id, address);

        let survivor_id = survivor?;
        if let Some(other) = self.members.get(&survivor_id) {
            let notice = match self.peer_loss {
                PeerLossPolicy::Obstruct => Signal::PeerObstructed {
                    seconds: self.grace_seconds,
                    reason: Some(REASON_PEER_LEFT.to_string()),
                },
                PeerLossPolicy::Collapse => Signal::Collapse {
                    reason: Some(REASON_PEER_LEFT.to_string()),
                },
            };
            other.send_signal(&notice);
        }
        Some(survivor_id)
    }

    /// Record a transport-level pong.
    pub fn mark_alive(&mut self, conn_id: &str) {
        if let Some(member) = self.members.get_mut(conn_id) {
            member.awaiting_pong = false;
        }
    }

    /// One liveness round: evict every connection that ignored the previous probe,
    /// then probe the rest.
    pub fn probe(&mut self) -> ProbeReport {
        let mut report = ProbeReport::default();

        for (conn_id, member) in self.members.iter_mut() {
            if member.awaiting_pong {
                report.evicted.push(conn_id.clone());
                continue;
            }
            member.awaiting_pong = true;
            let _ = member.sender.send(Outbound::Frame(Message::Ping(Vec::new())));
            report.probed += 1;
        }

        for conn_id in &report.evicted {
            let sender = self.members.get(conn_id).map(|m| m.sender.clone());
            self.detach(conn_id);
            if let Some(sender) = sender {
                let _ = sender.send(Outbound::Terminate);
            }
        }
        report
    }

    pub fn role_of(&self, conn_id: &str) -> Option<Role> {
        self.members.get(conn_id).and_then(|m| m.role)
    }

    pub fn room_members(&self, address: &str) -> Vec<ConnId> {
        self.rooms.get(address).cloned().unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.members.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for SignalingState {
    fn default() -> Self {
        Self::new(PeerLossPolicy::default(), crate::config::DEFAULT_GRACE_SECS)
    }
}
