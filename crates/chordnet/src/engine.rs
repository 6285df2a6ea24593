//! The Chord engine: the node's top-level protocol actor (`spec.md` §4.3,
//! §4.4, §4.5, §5).
//!
//! Runs as a single-threaded cooperative loop driven by three event
//! sources — inbound datagrams, periodic timers, and user commands — each
//! dispatched through `&mut self` so no lock is ever needed.
//!
//! Addressing note (resolved ambiguity, `spec.md` §9): several request
//! payloads that are unicast directly to a known peer rather than routed
//! (`Stabilize-Req`, `Heartbeat-Req`) carry, in their identifier field, the
//! id of the *addressed* VNode — exactly as a peer would address a
//! specific mailbox on a host that may be running several VNodes behind
//! one socket. `TraceRing` follows the same addressing convention for its
//! `successor_id` field, but detects a completed circuit by comparing the
//! datagram's `requestor` (which persists unchanged across every forwarded
//! hop) against the locally addressed VNode's id, not the payload field.

use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use rand_distr::{Distribution, Normal};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use corelib::message::ChordMessage;
use corelib::{Identifier, NodeConfig, NodeRecord, Originator, VNodeHost};

use crate::error::Result;
use crate::events::Event;
use crate::routing::{choose_local_vnode, route};
use crate::runtime::VNodeRuntime;
use crate::socket::ChordSocket;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of one VNode's routing state, for introspection commands.
#[derive(Clone, Debug)]
pub struct VNodeInfo {
    pub id: Identifier,
    pub successor_id: Identifier,
    pub predecessor_id: Identifier,
    pub successor_list_len: usize,
    pub predecessor_list_len: usize,
    pub routable: bool,
}

pub struct ChordEngine {
    config: NodeConfig,
    socket: ChordSocket,
    vnodes: BTreeMap<Identifier, VNodeRuntime>,
    host: VNodeHost,
    events: broadcast::Sender<Event>,
}

impl ChordEngine {
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        let addr = SocketAddrV4::new(config.local_ip, config.chord_port);
        let socket = ChordSocket::bind(addr).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { config, socket, vnodes: BTreeMap::new(), host: VNodeHost::new(), events })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn self_is_bootstrap(&self) -> bool {
        self.config.bootstrap.ip() == &self.config.local_ip && self.config.bootstrap.port() == self.config.chord_port
    }

    /// Creates a VNode locally and either seats it as a complete one-node
    /// ring (bootstrap, no other local VNode yet) or sends it out to Join.
    pub async fn insert_vnode(&mut self, name: String, id: Identifier) -> Result<()> {
        let mut runtime = VNodeRuntime::new(id.clone(), &self.config, Some(name.clone()))?;
        if self.vnodes.is_empty() && self.self_is_bootstrap() {
            runtime.state.routable = true;
            self.host.register(name.clone(), id.clone());
            self.vnodes.insert(id.clone(), runtime);
            let _ = self.events.send(Event::JoinSuccess { name, id });
            return Ok(());
        }
        self.host.register(name, id.clone());
        self.vnodes.insert(id.clone(), runtime);
        self.begin_join(&id).await
    }

    async fn begin_join(&mut self, id: &Identifier) -> Result<()> {
        let target = self.join_route_target(id);
        let self_record = self.vnodes[id].self_record.clone();
        let runtime = self.vnodes.get_mut(id).expect("vnode just inserted");
        let txid = runtime.register_transaction(ChordMessage::JoinReq, id.clone(), Originator::Application, &self.config);
        let datagram = corelib::ChordDatagram::new(txid, self_record, ChordMessage::JoinReq);
        self.socket.send_to(&datagram, target).await?;
        Ok(())
    }

    /// Step 4.4's "for Join-Req only" carve-out: route via any other local
    /// routable VNode's successor first, falling back to the configured
    /// bootstrap address.
    /// The joining VNode itself is not yet `routable`, so `route` naturally
    /// skips it and falls through to any other (already-routable) local
    /// VNode; with no such VNode, fall back to the configured bootstrap.
    fn join_route_target(&self, joining: &Identifier) -> SocketAddrV4 {
        if let Some(node) = route(&self.vnodes, joining) {
            return SocketAddrV4::new(node.ip, node.chord_port);
        }
        self.config.bootstrap
    }

    pub async fn remove_vnode(&mut self, name: &str) -> Result<()> {
        let Some(id) = self.host.id_of(name).cloned() else { return Ok(()) };
        let Some(runtime) = self.vnodes.get(&id) else { return Ok(()) };
        let successor = runtime.state.successor().clone();
        let predecessor = runtime.state.predecessor().clone();
        let self_record = runtime.self_record.clone();
        if successor.id != id {
            let dgram = corelib::ChordDatagram::new(0, self_record.clone(), ChordMessage::LeaveReq { successor: successor.clone(), predecessor: predecessor.clone() });
            self.socket.send_to(&dgram, SocketAddrV4::new(successor.ip, successor.chord_port)).await?;
        }
        if predecessor.id != id && predecessor.id != successor.id {
            let dgram = corelib::ChordDatagram::new(0, self_record, ChordMessage::LeaveReq { successor, predecessor: predecessor.clone() });
            self.socket.send_to(&dgram, SocketAddrV4::new(predecessor.ip, predecessor.chord_port)).await?;
        }
        self.vnodes.remove(&id);
        self.host.unregister(name);
        Ok(())
    }

    pub async fn lookup(&mut self, key: Identifier, originator: Originator) -> Result<()> {
        let Some(local) = choose_local_vnode(&self.vnodes, &key) else {
            let _ = self.events.send(Event::LookupFailure { key });
            return Ok(());
        };
        let local_id = local.state.id.clone();
        if local.state.is_owner(&key)? {
            let resolved = local.self_record.clone();
            let _ = self.events.send(Event::LookupSuccess { key, ip: resolved.ip, app_port: resolved.app_port });
            return Ok(());
        }
        let next_hop = crate::routing::choose_next_hop(local, &key);
        let self_record = local.self_record.clone();
        let runtime = self.vnodes.get_mut(&local_id).expect("vnode just looked up");
        let txid = runtime.register_transaction(ChordMessage::LookupReq { requested_id: key.clone() }, key, originator, &self.config);
        let dgram = corelib::ChordDatagram::new(txid, self_record, ChordMessage::LookupReq { requested_id: runtime.transactions[&txid].data.requested_id.clone() });
        self.socket.send_to(&dgram, SocketAddrV4::new(next_hop.ip, next_hop.chord_port)).await?;
        Ok(())
    }

    pub async fn trace_ring(&mut self, name: &str) -> Result<()> {
        let Some(id) = self.host.id_of(name).cloned() else { return Ok(()) };
        let Some(runtime) = self.vnodes.get(&id) else { return Ok(()) };
        let successor = runtime.state.successor().clone();
        let self_record = runtime.self_record.clone();
        let dgram = corelib::ChordDatagram::new(0, self_record, ChordMessage::TraceRing { successor_id: successor.id.clone() });
        self.socket.send_to(&dgram, SocketAddrV4::new(successor.ip, successor.chord_port)).await?;
        Ok(())
    }

    /// Runs the node forever: inbound datagrams, the three periodic
    /// timers, and transaction-timeout sweeping all interleave on this one
    /// task.
    pub async fn run(&mut self) -> Result<()> {
        let mut stabilize_timer = interval(self.config.stabilize_interval);
        stabilize_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_timer = interval(self.config.heartbeat_interval);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fix_finger_timer = interval(self.config.fix_finger_interval);
        fix_finger_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_timer = interval(Duration::from_millis(100));
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                recvd = self.socket.recv() => {
                    let (datagram, from) = recvd?;
                    self.handle_datagram(datagram, from).await?;
                }
                _ = stabilize_timer.tick() => self.stabilize_tick().await?,
                _ = heartbeat_timer.tick() => self.heartbeat_tick().await?,
                _ = fix_finger_timer.tick() => self.fix_finger_tick().await?,
                _ = sweep_timer.tick() => self.sweep_transactions().await?,
            }
        }
    }

    /// Waits for one inbound datagram and dispatches it. Exposed alongside
    /// the individual tick methods so a driver that also owns a DHash
    /// engine can interleave both on one combined `tokio::select!` instead
    /// of handing this engine the whole loop via `run`.
    pub async fn recv_datagram_and_dispatch(&mut self) -> Result<()> {
        let (datagram, from) = self.socket.recv().await?;
        self.handle_datagram(datagram, from).await
    }

    async fn handle_datagram(&mut self, datagram: corelib::ChordDatagram, from: SocketAddrV4) -> Result<()> {
        match datagram.message {
            ChordMessage::JoinReq => self.handle_join_req(datagram.transaction_id, datagram.requestor).await,
            ChordMessage::JoinRsp { successor } => self.handle_join_rsp(datagram.transaction_id, successor).await,
            ChordMessage::StabilizeReq { successor_id } => self.handle_stabilize_req(datagram.transaction_id, successor_id, datagram.requestor).await,
            ChordMessage::StabilizeRsp { predecessor, successor_list } => {
                self.handle_stabilize_rsp(datagram.transaction_id, predecessor, successor_list).await
            }
            ChordMessage::FingerReq { requested_id } => self.handle_finger_req(requested_id, datagram.requestor).await,
            ChordMessage::FingerRsp { requested_id, finger } => self.handle_finger_rsp(requested_id, finger),
            ChordMessage::HeartbeatReq { predecessor_id } => self.handle_heartbeat_req(datagram.transaction_id, predecessor_id, datagram.requestor).await,
            ChordMessage::HeartbeatRsp { successor, predecessor_list } => {
                self.handle_heartbeat_rsp(datagram.transaction_id, successor, predecessor_list).await
            }
            ChordMessage::LookupReq { requested_id } => self.handle_lookup_req(datagram.transaction_id, requested_id, datagram.requestor).await,
            ChordMessage::LookupRsp { resolved } => self.handle_lookup_rsp(datagram.transaction_id, resolved),
            ChordMessage::LeaveReq { successor, predecessor } => self.handle_leave_req(datagram.requestor, successor, predecessor).await,
            ChordMessage::LeaveRsp { .. } => Ok(()),
            ChordMessage::TraceRing { successor_id } => self.handle_trace_ring(successor_id, datagram.requestor).await,
        }
        .map(|_| ())
        .or_else(|err| {
            tracing::warn!(%err, %from, "dropping datagram after handler error");
            Ok(())
        })
    }

    async fn handle_join_req(&mut self, transaction_id: u32, requestor: NodeRecord) -> Result<()> {
        if let Some(owner) = self.find_owner(&requestor.id)? {
            let self_record = self.vnodes[&owner].self_record.clone();
            let dgram = corelib::ChordDatagram::new(transaction_id, self_record.clone(), ChordMessage::JoinRsp { successor: self_record });
            self.socket.send_to(&dgram, SocketAddrV4::new(requestor.ip, requestor.chord_port)).await?;
            return Ok(());
        }
        if let Some(next_hop) = route(&self.vnodes, &requestor.id) {
            let dgram = corelib::ChordDatagram { ttl: 0, transaction_id, requestor, message: ChordMessage::JoinReq };
            self.socket.send_to(&dgram, SocketAddrV4::new(next_hop.ip, next_hop.chord_port)).await?;
        }
        Ok(())
    }

    async fn handle_join_rsp(&mut self, transaction_id: u32, successor: NodeRecord) -> Result<()> {
        let Some(vnode_id) = self.find_transaction_owner(transaction_id) else { return Ok(()) };
        {
            let runtime = self.vnodes.get_mut(&vnode_id).expect("owner located");
            runtime.transactions.remove(&transaction_id);
            runtime.state.set_successor(successor);
            runtime.state.routable = true;
        }
        let name = self.vnodes[&vnode_id].state.name.clone().unwrap_or_default();
        let _ = self.events.send(Event::JoinSuccess { name, id: vnode_id.clone() });
        self.stabilize_one(&vnode_id).await?;
        self.fix_finger_one(&vnode_id).await?;
        Ok(())
    }

    async fn handle_stabilize_req(&mut self, transaction_id: u32, target_id: Identifier, requestor: NodeRecord) -> Result<()> {
        let Some(runtime) = self.vnodes.get_mut(&target_id) else { return Ok(()) };
        let was_alone = runtime.state.is_alone();
        if was_alone || requestor.id.in_between(&runtime.state.predecessor().id, &runtime.state.id)? {
            let old_pred = runtime.state.predecessor().clone();
            runtime.state.set_predecessor(requestor.clone());
            if was_alone {
                runtime.state.set_successor(requestor.clone());
            }
            let self_record = runtime.self_record.clone();
            let name = runtime.state.name.clone().unwrap_or_default();
            let _ = self.events.send(Event::KeyOwnership {
                name,
                self_id: target_id.clone(),
                new_pred_id: requestor.id.clone(),
                old_pred_id: old_pred.id,
                pred_ip: requestor.ip,
                pred_app_port: requestor.app_port,
                pred_object_port: requestor.object_port,
            });
            let runtime = self.vnodes.get(&target_id).expect("just updated");
            let rsp = corelib::ChordDatagram::new(
                transaction_id,
                self_record,
                ChordMessage::StabilizeRsp { predecessor: runtime.state.predecessor().clone(), successor_list: runtime.state.successor_list().to_vec() },
            );
            self.socket.send_to(&rsp, SocketAddrV4::new(requestor.ip, requestor.chord_port)).await?;
            if was_alone {
                self.stabilize_one(&target_id).await?;
                self.fix_finger_one(&target_id).await?;
            }
            return Ok(());
        }
        let runtime = self.vnodes.get(&target_id).expect("vnode present");
        let self_record = runtime.self_record.clone();
        let rsp = corelib::ChordDatagram::new(
            transaction_id,
            self_record,
            ChordMessage::StabilizeRsp { predecessor: runtime.state.predecessor().clone(), successor_list: runtime.state.successor_list().to_vec() },
        );
        self.socket.send_to(&rsp, SocketAddrV4::new(requestor.ip, requestor.chord_port)).await?;
        Ok(())
    }

    async fn handle_stabilize_rsp(&mut self, transaction_id: u32, predecessor: NodeRecord, successor_list: Vec<NodeRecord>) -> Result<()> {
        let Some(vnode_id) = self.find_transaction_owner(transaction_id) else { return Ok(()) };
        let runtime = self.vnodes.get_mut(&vnode_id).expect("owner located");
        runtime.transactions.remove(&transaction_id);
        if predecessor.id != runtime.state.id {
            runtime.state.set_successor(predecessor);
            drop(runtime);
            self.stabilize_one(&vnode_id).await?;
            return Ok(());
        }
        let mut current_successor = runtime.state.successor().clone();
        current_successor.touch();
        runtime.state.merge_successor_tail(current_successor, &successor_list, self.config.successor_list_max);
        Ok(())
    }

    async fn handle_heartbeat_req(&mut self, transaction_id: u32, target_id: Identifier, requestor: NodeRecord) -> Result<()> {
        let Some(runtime) = self.vnodes.get_mut(&target_id) else { return Ok(()) };
        if runtime.state.is_alone() {
            runtime.state.set_predecessor(requestor.clone());
        }
        let self_record = runtime.self_record.clone();
        let rsp = corelib::ChordDatagram::new(
            transaction_id,
            self_record,
            ChordMessage::HeartbeatRsp { successor: runtime.state.successor().clone(), predecessor_list: runtime.state.predecessor_list().to_vec() },
        );
        self.socket.send_to(&rsp, SocketAddrV4::new(requestor.ip, requestor.chord_port)).await?;
        Ok(())
    }

    async fn handle_heartbeat_rsp(&mut self, transaction_id: u32, successor: NodeRecord, predecessor_list: Vec<NodeRecord>) -> Result<()> {
        let Some(vnode_id) = self.find_transaction_owner(transaction_id) else { return Ok(()) };
        let runtime = self.vnodes.get_mut(&vnode_id).expect("owner located");
        runtime.transactions.remove(&transaction_id);
        let mut current_predecessor = runtime.state.predecessor().clone();
        current_predecessor.touch();
        runtime.state.merge_predecessor_tail(current_predecessor, &predecessor_list, self.config.predecessor_list_max);
        let _ = successor;
        Ok(())
    }

    async fn handle_finger_req(&mut self, requested_id: Identifier, requestor: NodeRecord) -> Result<()> {
        if let Some(owner) = self.find_owner(&requested_id)? {
            let owner_record = self.vnodes[&owner].self_record.clone();
            let dgram = corelib::ChordDatagram::new(
                0,
                owner_record.clone(),
                ChordMessage::FingerRsp { requested_id, finger: owner_record },
            );
            self.socket.send_to(&dgram, SocketAddrV4::new(requestor.ip, requestor.chord_port)).await?;
            return Ok(());
        }
        if let Some(next_hop) = route(&self.vnodes, &requested_id) {
            let dgram = corelib::ChordDatagram::new(0, requestor, ChordMessage::FingerReq { requested_id });
            self.socket.send_to(&dgram, SocketAddrV4::new(next_hop.ip, next_hop.chord_port)).await?;
        }
        Ok(())
    }

    fn handle_finger_rsp(&mut self, requested_id: Identifier, finger: NodeRecord) -> Result<()> {
        for runtime in self.vnodes.values_mut() {
            if runtime.state.finger_targets.iter().any(|t| t == &requested_id) {
                let mut node = finger.clone();
                node.routable = true;
                runtime.state.finger_table.upsert(node);
                break;
            }
        }
        Ok(())
    }

    async fn handle_lookup_req(&mut self, transaction_id: u32, requested_id: Identifier, requestor: NodeRecord) -> Result<()> {
        if let Some(owner) = self.find_owner(&requested_id)? {
            let owner_record = self.vnodes[&owner].self_record.clone();
            let dgram = corelib::ChordDatagram::new(transaction_id, owner_record.clone(), ChordMessage::LookupRsp { resolved: owner_record });
            self.socket.send_to(&dgram, SocketAddrV4::new(requestor.ip, requestor.chord_port)).await?;
            return Ok(());
        }
        if let Some(next_hop) = route(&self.vnodes, &requested_id) {
            let dgram = corelib::ChordDatagram::new(transaction_id, requestor, ChordMessage::LookupReq { requested_id });
            self.socket.send_to(&dgram, SocketAddrV4::new(next_hop.ip, next_hop.chord_port)).await?;
        }
        Ok(())
    }

    fn handle_lookup_rsp(&mut self, transaction_id: u32, resolved: NodeRecord) -> Result<()> {
        let Some(vnode_id) = self.find_transaction_owner(transaction_id) else { return Ok(()) };
        let runtime = self.vnodes.get_mut(&vnode_id).expect("owner located");
        let Some(pending) = runtime.transactions.remove(&transaction_id) else { return Ok(()) };
        let key = pending.data.requested_id;
        match pending.data.originator {
            Originator::Application => {
                let _ = self.events.send(Event::LookupSuccess { key, ip: resolved.ip, app_port: resolved.app_port });
            }
            Originator::ObjectLayer => {
                let _ = self.events.send(Event::ObjectLookupSuccess { key, node: resolved });
            }
        }
        Ok(())
    }

    async fn handle_leave_req(&mut self, requestor: NodeRecord, successor: NodeRecord, predecessor: NodeRecord) -> Result<()> {
        let ids: Vec<Identifier> = self.vnodes.keys().cloned().collect();
        for id in ids {
            let (is_successor_side, is_predecessor_side, self_record, name) = {
                let runtime = &self.vnodes[&id];
                (
                    runtime.state.predecessor().id == requestor.id,
                    runtime.state.successor().id == requestor.id,
                    runtime.self_record.clone(),
                    runtime.state.name.clone().unwrap_or_default(),
                )
            };
            if is_successor_side {
                let old_pred = self.vnodes[&id].state.predecessor().clone();
                let runtime = self.vnodes.get_mut(&id).expect("present");
                runtime.state.set_predecessor(predecessor.clone());
                let _ = self.events.send(Event::KeyOwnership {
                    name: name.clone(),
                    self_id: id.clone(),
                    new_pred_id: predecessor.id.clone(),
                    old_pred_id: old_pred.id,
                    pred_ip: predecessor.ip,
                    pred_app_port: predecessor.app_port,
                    pred_object_port: predecessor.object_port,
                });
                let rsp = corelib::ChordDatagram::new(0, self_record.clone(), ChordMessage::LeaveRsp { successor: self_record.clone(), predecessor: predecessor.clone() });
                self.socket.send_to(&rsp, SocketAddrV4::new(requestor.ip, requestor.chord_port)).await?;
            }
            if is_predecessor_side {
                let runtime = self.vnodes.get_mut(&id).expect("present");
                runtime.state.set_successor(successor.clone());
            }
        }
        Ok(())
    }

    async fn handle_trace_ring(&mut self, target_id: Identifier, requestor: NodeRecord) -> Result<()> {
        let Some(runtime) = self.vnodes.get(&target_id) else { return Ok(()) };
        if target_id == requestor.id {
            return Ok(());
        }
        let name = runtime.state.name.clone().unwrap_or_default();
        let _ = self.events.send(Event::TraceRing { name, id: target_id.clone() });
        let next_successor = runtime.state.successor().clone();
        let dgram = corelib::ChordDatagram::new(0, requestor, ChordMessage::TraceRing { successor_id: next_successor.id.clone() });
        self.socket.send_to(&dgram, SocketAddrV4::new(next_successor.ip, next_successor.chord_port)).await?;
        Ok(())
    }

    /// Finds the local VNode (if any) that owns `key` per `is_owner`.
    fn find_owner(&self, key: &Identifier) -> Result<Option<Identifier>> {
        for (id, runtime) in &self.vnodes {
            if runtime.state.is_owner(key)? {
                return Ok(Some(id.clone()));
            }
        }
        Ok(None)
    }

    /// Public counterpart of `find_owner` for the object layer: returns the
    /// full record (needed for `object_port`) rather than just the id.
    pub fn local_owner(&self, key: &Identifier) -> Result<Option<NodeRecord>> {
        for runtime in self.vnodes.values() {
            if runtime.state.is_owner(key)? {
                return Ok(Some(runtime.self_record.clone()));
            }
        }
        Ok(None)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Drops every local VNode and its state, as if the process had just
    /// started, without closing the already-bound socket (`Restart`).
    pub fn reset(&mut self) {
        self.vnodes.clear();
        self.host = VNodeHost::new();
    }

    /// Snapshot of one local VNode's routing state, for `DumpVNodeInfo`.
    pub fn vnode_info(&self, name: &str) -> Option<VNodeInfo> {
        let id = self.host.id_of(name)?;
        let runtime = self.vnodes.get(id)?;
        Some(VNodeInfo {
            id: id.clone(),
            successor_id: runtime.state.successor().id.clone(),
            predecessor_id: runtime.state.predecessor().id.clone(),
            successor_list_len: runtime.state.successor_list().len(),
            predecessor_list_len: runtime.state.predecessor_list().len(),
            routable: runtime.state.routable,
        })
    }

    /// Manually triggers one Fix-Finger pass for a named local VNode
    /// (the `FixFinger <name>` command), outside its periodic schedule.
    pub async fn fix_finger_vnode(&mut self, name: &str) -> Result<()> {
        let Some(id) = self.host.id_of(name).cloned() else { return Ok(()) };
        self.fix_finger_one(&id).await
    }

    fn find_transaction_owner(&self, transaction_id: u32) -> Option<Identifier> {
        self.vnodes.iter().find(|(_, rt)| rt.transactions.contains_key(&transaction_id)).map(|(id, _)| id.clone())
    }

    pub async fn stabilize_tick(&mut self) -> Result<()> {
        let ids: Vec<Identifier> = self.vnodes.keys().cloned().collect();
        for id in ids {
            self.stabilize_one(&id).await?;
        }
        Ok(())
    }

    async fn stabilize_one(&mut self, id: &Identifier) -> Result<()> {
        let is_bootstrap_alone = self.self_is_bootstrap() && self.vnodes.len() == 1;
        let Some(runtime) = self.vnodes.get_mut(id) else { return Ok(()) };
        if runtime.state.successor().id == *id {
            return Ok(());
        }
        let miss_window = self.config.stabilize_interval * self.config.max_missed_keepalives;
        if runtime.state.successor().last_seen.elapsed() > miss_window {
            let emptied = runtime.state.shift_successor();
            if emptied {
                if is_bootstrap_alone {
                    let self_record = runtime.self_record.clone();
                    runtime.state.reset_successor_to_self(self_record);
                    runtime.state.routable = false;
                } else {
                    let name = runtime.state.name.clone().unwrap_or_default();
                    let _ = self.events.send(Event::VNodeFailure { name, id: id.clone() });
                    self.vnodes.remove(id);
                }
                return Ok(());
            }
        }
        let runtime = self.vnodes.get_mut(id).expect("still present");
        let successor = runtime.state.successor().clone();
        let self_record = runtime.self_record.clone();
        let txid = runtime.register_transaction(
            ChordMessage::StabilizeReq { successor_id: successor.id.clone() },
            successor.id.clone(),
            Originator::Application,
            &self.config,
        );
        let dgram = corelib::ChordDatagram::new(txid, self_record, ChordMessage::StabilizeReq { successor_id: successor.id.clone() });
        self.socket.send_to(&dgram, SocketAddrV4::new(successor.ip, successor.chord_port)).await?;
        Ok(())
    }

    pub async fn heartbeat_tick(&mut self) -> Result<()> {
        let ids: Vec<Identifier> = self.vnodes.keys().cloned().collect();
        for id in ids {
            self.heartbeat_one(&id).await?;
        }
        Ok(())
    }

    async fn heartbeat_one(&mut self, id: &Identifier) -> Result<()> {
        let Some(runtime) = self.vnodes.get_mut(id) else { return Ok(()) };
        if runtime.state.predecessor().id == *id {
            return Ok(());
        }
        let miss_window = self.config.heartbeat_interval * self.config.max_missed_keepalives;
        if runtime.state.predecessor().last_seen.elapsed() > miss_window {
            let emptied = runtime.state.shift_predecessor();
            if emptied {
                let self_record = runtime.self_record.clone();
                runtime.state.reset_predecessor_to_self(self_record);
            } else {
                let name = runtime.state.name.clone().unwrap_or_default();
                let new_pred = runtime.state.predecessor().clone();
                let _ = self.events.send(Event::KeyOwnership {
                    name,
                    self_id: id.clone(),
                    new_pred_id: new_pred.id.clone(),
                    old_pred_id: new_pred.id,
                    pred_ip: new_pred.ip,
                    pred_app_port: new_pred.app_port,
                    pred_object_port: new_pred.object_port,
                });
            }
            return Ok(());
        }
        let predecessor = runtime.state.predecessor().clone();
        let self_record = runtime.self_record.clone();
        let txid = runtime.register_transaction(
            ChordMessage::HeartbeatReq { predecessor_id: predecessor.id.clone() },
            predecessor.id.clone(),
            Originator::Application,
            &self.config,
        );
        let dgram = corelib::ChordDatagram::new(txid, self_record, ChordMessage::HeartbeatReq { predecessor_id: predecessor.id.clone() });
        self.socket.send_to(&dgram, SocketAddrV4::new(predecessor.ip, predecessor.chord_port)).await?;
        Ok(())
    }

    pub async fn fix_finger_tick(&mut self) -> Result<()> {
        let jitter = Normal::new(0.0f64, 100.0f64).expect("fixed, valid normal parameters");
        let delay_ms = jitter.sample(&mut rand::thread_rng()).abs();
        tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;

        let ids: Vec<Identifier> = self.vnodes.keys().cloned().collect();
        for id in ids {
            self.fix_finger_one(&id).await?;
        }
        Ok(())
    }

    async fn fix_finger_one(&mut self, id: &Identifier) -> Result<()> {
        let Some(runtime) = self.vnodes.get_mut(id) else { return Ok(()) };
        runtime.state.finger_table.audit(self.config.fix_finger_interval);
        let targets = runtime.state.finger_targets.clone();
        let successor = runtime.state.successor().clone();
        let self_record = runtime.self_record.clone();
        let vnode_id = id.clone();

        for target in targets {
            if target.in_between(&vnode_id, &successor.id)? {
                let runtime = self.vnodes.get_mut(id).expect("present");
                let mut rec = successor.clone();
                rec.routable = true;
                runtime.state.finger_table.upsert(rec);
                continue;
            }
            if self.find_owner(&target)?.is_some() {
                continue;
            }
            if let Some(next_hop) = route(&self.vnodes, &target) {
                let dgram = corelib::ChordDatagram::new(0, self_record.clone(), ChordMessage::FingerReq { requested_id: target });
                self.socket.send_to(&dgram, SocketAddrV4::new(next_hop.ip, next_hop.chord_port)).await?;
            }
        }
        Ok(())
    }

    pub async fn sweep_transactions(&mut self) -> Result<()> {
        let now = Instant::now();
        let ids: Vec<Identifier> = self.vnodes.keys().cloned().collect();
        for id in ids {
            self.sweep_one(&id, now).await?;
        }
        Ok(())
    }

    async fn sweep_one(&mut self, id: &Identifier, now: Instant) -> Result<()> {
        let request_timeout = self.config.request_timeout;

        // Phase 1: mutate only the transaction map, collecting what needs to
        // happen next without holding a borrow of `self` across it.
        let mut resends = Vec::new();
        let mut lookup_failures = Vec::new();
        let mut join_failed = false;
        {
            let Some(runtime) = self.vnodes.get_mut(id) else { return Ok(()) };
            let expired: Vec<u32> = runtime.transactions.iter().filter(|(_, p)| p.deadline <= now).map(|(txid, _)| *txid).collect();
            for txid in expired {
                let can_retry = {
                    let pending = runtime.transactions.get_mut(&txid).expect("just collected");
                    let can_retry = pending.data.record_retry();
                    pending.deadline = now + request_timeout;
                    can_retry
                };
                if can_retry {
                    let pending = &runtime.transactions[&txid];
                    resends.push((txid, pending.data.message.clone(), runtime.self_record.clone()));
                } else {
                    let pending = runtime.transactions.remove(&txid).expect("just collected");
                    if matches!(pending.data.originator, Originator::Application) && matches!(pending.data.message, ChordMessage::JoinReq) {
                        join_failed = true;
                    } else if matches!(pending.data.message, ChordMessage::LookupReq { .. }) {
                        lookup_failures.push((pending.data.requested_id, pending.data.originator));
                    }
                    // Stabilize/Heartbeat timeouts are handled solely by the
                    // successor/predecessor miss-detection shift in
                    // `stabilize_one`/`heartbeat_one`; they never surface a
                    // user-facing Lookup-Failure upcall.
                }
            }
        }

        for (key, originator) in lookup_failures {
            match originator {
                Originator::Application => {
                    let _ = self.events.send(Event::LookupFailure { key });
                }
                Originator::ObjectLayer => {
                    let _ = self.events.send(Event::ObjectLookupFailure { key });
                }
            }
        }

        if join_failed {
            let name = self.vnodes.get(id).and_then(|rt| rt.state.name.clone()).unwrap_or_default();
            let _ = self.events.send(Event::VNodeFailure { name, id: id.clone() });
            self.vnodes.remove(id);
            return Ok(());
        }

        for (txid, message, self_record) in resends {
            if let Some(target) = self.resend_target(id, &message) {
                let dgram = corelib::ChordDatagram::new(txid, self_record, message);
                self.socket.send_to(&dgram, target).await?;
            }
        }
        Ok(())
    }

    fn resend_target(&self, id: &Identifier, message: &ChordMessage) -> Option<SocketAddrV4> {
        let runtime = self.vnodes.get(id)?;
        match message {
            ChordMessage::JoinReq => Some(self.join_route_target(id)),
            ChordMessage::StabilizeReq { .. } => {
                let s = runtime.state.successor();
                Some(SocketAddrV4::new(s.ip, s.chord_port))
            }
            ChordMessage::HeartbeatReq { .. } => {
                let p = runtime.state.predecessor();
                Some(SocketAddrV4::new(p.ip, p.chord_port))
            }
            ChordMessage::LookupReq { requested_id } => {
                route(&self.vnodes, requested_id).map(|n| SocketAddrV4::new(n.ip, n.chord_port))
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for ChordEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChordEngine").field("vnodes", &self.vnodes.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn config(port: u16) -> NodeConfig {
        NodeConfig { m: 32, local_ip: Ipv4Addr::LOCALHOST, chord_port: port, app_port: port + 1, object_port: port + 2, bootstrap: std::net::SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), ..Default::default() }
    }

    #[tokio::test]
    async fn bootstrap_alone_vnode_is_routable_and_self_owned() {
        let mut engine = ChordEngine::bind(config(19500)).await.unwrap();
        let id = Identifier::from_le_bytes(vec![1, 0, 0, 0]);
        engine.insert_vnode("A".into(), id.clone()).await.unwrap();
        let runtime = &engine.vnodes[&id];
        assert!(runtime.state.is_alone());
        assert!(runtime.state.routable);
    }
}
