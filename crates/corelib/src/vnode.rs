//! Virtual node (VNode) state: the data a single ring participant carries.
//!
//! This module only holds state and the pure invariant checks of
//! `spec.md` §3; the state *transitions* driven by messages, timers, and
//! user requests live in the `chordnet` engine crate, which wraps a
//! `VNodeState` together with the transaction map and retry timers a live
//! engine needs (`chordnet::VNodeRuntime`).

use std::collections::HashMap;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::identifier::Identifier;
use crate::node::NodeRecord;
use crate::node_table::NodeTable;

/// A single Chord participant hosted by this process.
///
/// Invariants maintained by callers in `chordnet` (never by this type
/// alone, since they depend on message exchange):
/// 1. `predecessor[0]` and `successor[0]` lie on opposite sides of `id` on
///    the circle (or both equal `id` when alone).
/// 2. Every locally stored object's key lies in `(predecessor[0], id]`.
/// 3. The successor list is ordered clockwise, without duplicates, and
///    contains `id` itself only when this VNode is alone in its ring.
/// 4. A VNode with `routable = false` answers only its own owner queries.
pub struct VNodeState {
    pub id: Identifier,
    pub name: Option<String>,
    pub routable: bool,

    /// Element 0 is the current successor (used for routing); the rest are
    /// standby replacements. Length is always in `1..=successor_list_max`.
    successor_list: Vec<NodeRecord>,
    /// Element 0 is the current predecessor. Length is always in
    /// `1..=predecessor_list_max`.
    predecessor_list: Vec<NodeRecord>,

    /// Best-known node for each finger target, keyed by the resolved
    /// node's own identifier so routing can reuse `NodeTable::find_nearest`.
    pub finger_table: NodeTable,
    /// The `m` precomputed targets `id + 2^i`, `i` in `[0, m)`.
    pub finger_targets: Vec<Identifier>,
}

impl VNodeState {
    /// A freshly created VNode: alone, with `successor := self`,
    /// `predecessor := self`, not yet routable (`spec.md` §3 lifecycles).
    pub fn new(id: Identifier, config: &NodeConfig, self_record: NodeRecord) -> Result<Self> {
        let finger_targets = id.finger_targets(config.m)?;
        Ok(Self {
            id,
            name: self_record.name.clone(),
            routable: false,
            successor_list: vec![self_record.clone()],
            predecessor_list: vec![self_record],
            finger_table: NodeTable::new(),
            finger_targets,
        })
    }

    pub fn successor(&self) -> &NodeRecord {
        &self.successor_list[0]
    }

    pub fn predecessor(&self) -> &NodeRecord {
        &self.predecessor_list[0]
    }

    pub fn successor_list(&self) -> &[NodeRecord] {
        &self.successor_list
    }

    pub fn predecessor_list(&self) -> &[NodeRecord] {
        &self.predecessor_list
    }

    pub fn is_alone(&self) -> bool {
        self.successor_list[0].id == self.id
    }

    /// `key` falls in the half-open arc this VNode owns.
    pub fn is_owner(&self, key: &Identifier) -> Result<bool> {
        key.in_between(&self.predecessor().id, &self.id)
    }

    /// Replaces the successor list wholesale (e.g. on Join-Rsp, or when
    /// adopting a predecessor as successor on an empty ring).
    pub fn set_successor(&mut self, node: NodeRecord) {
        self.successor_list = vec![node];
    }

    pub fn set_predecessor(&mut self, node: NodeRecord) {
        self.predecessor_list = vec![node];
    }

    /// Pops the dead successor at the head of the list. Returns `true` if
    /// the list is now empty (the VNode has lost every standby and, unless
    /// it is the lone bootstrap, has failed).
    pub fn shift_successor(&mut self) -> bool {
        if !self.successor_list.is_empty() {
            self.successor_list.remove(0);
        }
        self.successor_list.is_empty()
    }

    pub fn shift_predecessor(&mut self) -> bool {
        if !self.predecessor_list.is_empty() {
            self.predecessor_list.remove(0);
        }
        self.predecessor_list.is_empty()
    }

    pub fn reset_successor_to_self(&mut self, self_record: NodeRecord) {
        self.successor_list = vec![self_record];
    }

    pub fn reset_predecessor_to_self(&mut self, self_record: NodeRecord) {
        self.predecessor_list = vec![self_record];
    }

    /// Overwrites the tail of the local successor list from a peer's
    /// advertised list, stopping before any entry equal to `self.id` (to
    /// prevent wrap-around loops) and capping at `max_len`.
    pub fn merge_successor_tail(&mut self, current: NodeRecord, advertised: &[NodeRecord], max_len: usize) {
        let mut merged = vec![current];
        for node in advertised {
            if node.id == self.id || merged.len() >= max_len {
                break;
            }
            merged.push(node.clone());
        }
        self.successor_list = merged;
    }

    pub fn merge_predecessor_tail(&mut self, current: NodeRecord, advertised: &[NodeRecord], max_len: usize) {
        let mut merged = vec![current];
        for node in advertised {
            if node.id == self.id || merged.len() >= max_len {
                break;
            }
            merged.push(node.clone());
        }
        self.predecessor_list = merged;
    }
}

/// A local VNode is addressed by name for the user-facing command surface
/// (`InsertVNode`, `RemoveVNode`, `DumpVNodeInfo`, ...); this is the host's
/// set of hosted VNodes.
pub struct VNodeHost {
    by_name: HashMap<String, Identifier>,
}

impl Default for VNodeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl VNodeHost {
    pub fn new() -> Self {
        Self { by_name: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, id: Identifier) {
        self.by_name.insert(name.into(), id);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Identifier> {
        self.by_name.remove(name)
    }

    pub fn id_of(&self, name: &str) -> Option<&Identifier> {
        self.by_name.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn cfg() -> NodeConfig {
        NodeConfig { m: 32, ..Default::default() }
    }

    fn rec(n: u8) -> NodeRecord {
        NodeRecord::new(Identifier::from_le_bytes(vec![n, 0, 0, 0]), Ipv4Addr::LOCALHOST, 9000, 9001, 9002)
    }

    #[test]
    fn fresh_vnode_is_alone_and_not_routable() {
        let config = cfg();
        let self_rec = rec(5);
        let vnode = VNodeState::new(self_rec.id.clone(), &config, self_rec).unwrap();
        assert!(vnode.is_alone());
        assert!(!vnode.routable);
        assert_eq!(vnode.finger_targets.len(), 32);
    }

    #[test]
    fn shift_successor_empties_and_reports_it() {
        let config = cfg();
        let self_rec = rec(5);
        let mut vnode = VNodeState::new(self_rec.id.clone(), &config, self_rec.clone()).unwrap();
        vnode.set_successor(rec(6));
        assert!(!vnode.shift_successor());
        assert!(vnode.successor_list().is_empty());
    }

    #[test]
    fn merge_tail_stops_before_self_and_caps_length() {
        let config = cfg();
        let self_rec = rec(5);
        let mut vnode = VNodeState::new(self_rec.id.clone(), &config, self_rec.clone()).unwrap();
        let advertised = vec![rec(6), rec(7), self_rec.clone(), rec(8)];
        vnode.merge_successor_tail(rec(6), &advertised, 8);
        assert_eq!(vnode.successor_list().len(), 3);
        assert!(vnode.successor_list().iter().all(|n| n.id != vnode.id));
    }
}
