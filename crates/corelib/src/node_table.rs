//! Node table: an ordered mapping from identifier to node record.
//!
//! Used both for the per-host VNode set and for each VNode's finger table.
//! Grounded on `ChordNodeTable` (`chord-node-table.cc` in the original
//! model), but backed by a `BTreeMap` so `find_nearest` stays O(log n)
//! instead of the original's linear scan.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::node::NodeRecord;

/// Ordered `Identifier -> NodeRecord` map with a secondary name index.
#[derive(Debug, Default)]
pub struct NodeTable {
    by_id: BTreeMap<Identifier, NodeRecord>,
    by_name: HashMap<String, Identifier>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Insert-or-touch by identifier (and by name, if named); refreshes
    /// `last_seen` on every call, matching a heartbeat/stabilize "I've
    /// heard from this peer" signal.
    pub fn upsert(&mut self, mut node: NodeRecord) {
        node.touch();
        if let Some(name) = node.name.clone() {
            self.by_name.insert(name, node.id.clone());
        }
        self.by_id.insert(node.id.clone(), node);
    }

    pub fn find_by_id(&self, id: &Identifier) -> Option<&NodeRecord> {
        self.by_id.get(id)
    }

    pub fn find_by_id_mut(&mut self, id: &Identifier) -> Option<&mut NodeRecord> {
        self.by_id.get_mut(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&NodeRecord> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Removes an entry by identifier from both indices.
    pub fn remove_by_id(&mut self, id: &Identifier) -> Option<NodeRecord> {
        let removed = self.by_id.remove(id)?;
        if let Some(name) = &removed.name {
            self.by_name.remove(name);
        }
        Some(removed)
    }

    /// Removes an entry by name from both indices.
    pub fn remove_by_name(&mut self, name: &str) -> Option<NodeRecord> {
        let id = self.by_name.remove(name)?;
        self.by_id.remove(&id)
    }

    /// The routable node whose id maximises "furthest clockwise from 0 but
    /// not past target" — i.e. the greatest routable id `<= target`. Falls
    /// back to the routable node with the greatest id overall (wrapping
    /// around past zero) when every routable id is past `target`.
    /// Non-routable nodes are never returned. Fails only when the table
    /// holds no routable node at all.
    pub fn find_nearest(&self, target: &Identifier) -> Result<&NodeRecord> {
        let not_past = self
            .by_id
            .range(..=target.clone())
            .rev()
            .find(|(_, n)| n.routable);
        if let Some((_, node)) = not_past {
            return Ok(node);
        }
        self.by_id
            .iter()
            .rev()
            .find(|(_, n)| n.routable)
            .map(|(_, n)| n)
            .ok_or(Error::NoRoutableNode)
    }

    /// Evicts every entry whose `last_seen` is older than `now - window`.
    pub fn audit(&mut self, window: Duration) {
        let cutoff = Instant::now().checked_sub(window);
        let Some(cutoff) = cutoff else { return };
        let stale: Vec<Identifier> = self
            .by_id
            .iter()
            .filter(|(_, n)| n.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.remove_by_id(&id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn node(n: u8, routable: bool) -> NodeRecord {
        let mut rec = NodeRecord::new(
            Identifier::from_le_bytes(vec![n]),
            Ipv4Addr::LOCALHOST,
            9000,
            9001,
            9002,
        );
        rec.routable = routable;
        rec
    }

    #[test]
    fn find_nearest_picks_predecessor_of_target() {
        let mut table = NodeTable::new();
        table.upsert(node(10, true));
        table.upsert(node(20, true));
        table.upsert(node(30, true));
        let target = Identifier::from_le_bytes(vec![25]);
        let found = table.find_nearest(&target).unwrap();
        assert_eq!(found.id, Identifier::from_le_bytes(vec![20]));
    }

    #[test]
    fn find_nearest_wraps_to_greatest_when_all_past_target() {
        let mut table = NodeTable::new();
        table.upsert(node(50, true));
        table.upsert(node(60, true));
        let target = Identifier::from_le_bytes(vec![10]);
        let found = table.find_nearest(&target).unwrap();
        assert_eq!(found.id, Identifier::from_le_bytes(vec![60]));
    }

    #[test]
    fn find_nearest_skips_non_routable() {
        let mut table = NodeTable::new();
        table.upsert(node(20, false));
        table.upsert(node(10, true));
        let target = Identifier::from_le_bytes(vec![25]);
        let found = table.find_nearest(&target).unwrap();
        assert_eq!(found.id, Identifier::from_le_bytes(vec![10]));
    }

    #[test]
    fn find_nearest_fails_when_empty_of_routable_nodes() {
        let mut table = NodeTable::new();
        table.upsert(node(20, false));
        let target = Identifier::from_le_bytes(vec![25]);
        assert!(table.find_nearest(&target).is_err());
    }

    #[test]
    fn remove_clears_both_indices() {
        let mut table = NodeTable::new();
        let rec = node(1, true).with_name("alice");
        let id = rec.id.clone();
        table.upsert(rec);
        assert!(table.find_by_name("alice").is_some());
        table.remove_by_id(&id);
        assert!(table.find_by_name("alice").is_none());
        assert!(table.find_by_id(&id).is_none());
    }
}
