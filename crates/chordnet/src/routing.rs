//! Routing rules for forwarding a request toward a target identifier
//! (`spec.md` §4.4).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use corelib::{Identifier, NodeRecord, NodeTable};

use crate::runtime::VNodeRuntime;

/// Step 1: among local VNodes, choose the one whose id is nearest to
/// `target` clockwise, reusing `NodeTable::find_nearest`'s metric (skip
/// non-routable, fall back to the greatest id overall).
pub fn choose_local_vnode<'a>(
    vnodes: &'a BTreeMap<Identifier, VNodeRuntime>,
    target: &Identifier,
) -> Option<&'a VNodeRuntime> {
    let mut table = NodeTable::new();
    for (id, rt) in vnodes {
        let mut rec = NodeRecord::new(id.clone(), Ipv4Addr::UNSPECIFIED, 0, 0, 0);
        rec.routable = rt.state.routable;
        table.upsert(rec);
    }
    let nearest_id = table.find_nearest(target).ok()?.id.clone();
    vnodes.get(&nearest_id)
}

/// Step 2: from `vnode`'s finger table, pick the finger nearest to
/// `target`; fall back to the VNode's immediate successor if the finger
/// table has no suitable entry.
pub fn choose_next_hop(vnode: &VNodeRuntime, target: &Identifier) -> NodeRecord {
    vnode
        .state
        .finger_table
        .find_nearest(target)
        .cloned()
        .unwrap_or_else(|_| vnode.state.successor().clone())
}

/// Step 3: no local VNode is routable — fall back to the first local VNode
/// (in identifier order, for determinism) whose successor isn't itself,
/// and route via that successor.
pub fn fallback_via_any_successor(vnodes: &BTreeMap<Identifier, VNodeRuntime>) -> Option<NodeRecord> {
    vnodes
        .values()
        .find(|rt| rt.state.successor().id != rt.state.id)
        .map(|rt| rt.state.successor().clone())
}

/// The full routing decision for forwarding a request toward `target`: the
/// next-hop node to send it to, or `None` if this host has no way to route
/// at all (the caller falls back to the bootstrap address for Join only).
pub fn route(vnodes: &BTreeMap<Identifier, VNodeRuntime>, target: &Identifier) -> Option<NodeRecord> {
    if let Some(vnode) = choose_local_vnode(vnodes, target) {
        return Some(choose_next_hop(vnode, target));
    }
    fallback_via_any_successor(vnodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::NodeConfig;

    fn id(n: u8) -> Identifier {
        Identifier::from_le_bytes(vec![n, 0, 0, 0])
    }

    #[test]
    fn routes_via_nearest_local_vnode_finger_or_successor() {
        let config = NodeConfig { m: 32, ..Default::default() };
        let mut vnodes = BTreeMap::new();
        let mut rt = VNodeRuntime::new(id(10), &config, Some("a".into())).unwrap();
        rt.state.routable = true;
        rt.state.set_successor(NodeRecord::new(id(50), Ipv4Addr::LOCALHOST, 9100, 9101, 9102));
        vnodes.insert(id(10), rt);

        let next = route(&vnodes, &id(40)).unwrap();
        // no finger cached, so falls back to the successor
        assert_eq!(next.id, id(50));
    }

    #[test]
    fn falls_back_when_nothing_is_routable() {
        let config = NodeConfig { m: 32, ..Default::default() };
        let mut vnodes = BTreeMap::new();
        let mut rt = VNodeRuntime::new(id(10), &config, Some("a".into())).unwrap();
        rt.state.routable = false;
        rt.state.set_successor(NodeRecord::new(id(50), Ipv4Addr::LOCALHOST, 9100, 9101, 9102));
        vnodes.insert(id(10), rt);

        let next = route(&vnodes, &id(40)).unwrap();
        assert_eq!(next.id, id(50));
    }
}
