//! Node record: the routing descriptor for a ring participant.

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::identifier::Identifier;

/// A participant's routing descriptor, as carried inside Chord messages and
/// cached in node tables and finger tables.
///
/// `last_seen` and `routable` are local bookkeeping, never serialized on
/// the wire (see `message.rs`); every other field round-trips through the
/// Node record wire format of `spec.md` §6.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub id: Identifier,
    /// Human-readable handle; a local-only convenience, never serialized.
    pub name: Option<String>,
    pub ip: Ipv4Addr,
    pub chord_port: u16,
    pub app_port: u16,
    pub object_port: u16,
    pub last_seen: Instant,
    /// Suppresses this node from finger/successor selection while it is
    /// still stabilizing (`spec.md` §3 invariant 4).
    pub routable: bool,
}

impl NodeRecord {
    pub fn new(id: Identifier, ip: Ipv4Addr, chord_port: u16, app_port: u16, object_port: u16) -> Self {
        Self {
            id,
            name: None,
            ip,
            chord_port,
            app_port,
            object_port,
            last_seen: Instant::now(),
            routable: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

impl PartialEq for NodeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for NodeRecord {}
