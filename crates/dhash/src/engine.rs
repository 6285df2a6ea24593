//! The DHash engine: owner-aware object placement and automatic
//! re-replication on predecessor changes (`spec.md` §4.6).
//!
//! Has no timer loop of its own (no background `run`, unlike
//! `chordnet::ChordEngine`): it exposes one entry point per event source —
//! `insert`/`retrieve` for user commands, `handle_chord_event` for Chord
//! upcalls, `accept_inbound`/`pump_tick` for the stream transport, and
//! `audit_tick` for the periodic re-check — so a single combined driver
//! loop (the `cli` crate) can interleave them with the Chord engine's own
//! event sources on one `tokio::select!`, matching the single-threaded
//! cooperative model of `spec.md` §5 without needing two independently
//! scheduled actors to coordinate through a lock.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::Duration;

use chordnet::{ChordEngine, Connection, ConnectionPool, DHashMessage, Event as ChordEvent, Object, Status};
use corelib::{Identifier, NodeConfig, NodeRecord, Originator, TransactionIdAllocator};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::Event;
use crate::store::ObjectStore;
use crate::transaction::{Kind, PendingDHash};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `pump_tick` waits on each pooled connection before moving to
/// the next one. Short enough that a quiet connection doesn't stall the
/// sweep, long enough to catch a response that's mid-flight.
const POLL_SLICE: Duration = Duration::from_millis(20);

/// Snapshot for the `DumpDHashInfo` command.
#[derive(Clone, Debug)]
pub struct DHashInfo {
    pub stored_objects: usize,
    pub pooled_connections: usize,
}

pub struct DHashEngine {
    store: ObjectStore,
    pool: ConnectionPool,
    listener: TcpListener,
    /// Keyed by object id: every DHash-level operation waiting on a Chord
    /// lookup for that key. More than one can be pending on the same key
    /// at once (two overlapping inserts), per `spec.md` §4.6.
    pending_lookups: HashMap<Identifier, Vec<PendingDHash>>,
    /// Keyed by DHash transaction id: operations waiting on a Store-Rsp or
    /// Retrieve-Rsp on whichever stream connection carries them.
    stream_waiters: HashMap<u32, PendingDHash>,
    alloc: TransactionIdAllocator,
    events: broadcast::Sender<Event>,
}

impl DHashEngine {
    pub async fn bind(config: &NodeConfig) -> Result<Self> {
        let self_addr = SocketAddrV4::new(config.local_ip, config.object_port);
        let listener = TcpListener::bind(self_addr).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            store: ObjectStore::new(),
            pool: ConnectionPool::new(config),
            listener,
            pending_lookups: HashMap::new(),
            stream_waiters: HashMap::new(),
            alloc: TransactionIdAllocator::default(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn object_count(&self) -> usize {
        self.store.len()
    }

    pub fn dump_info(&self) -> DHashInfo {
        DHashInfo { stored_objects: self.store.len(), pooled_connections: self.pool.len() }
    }

    /// Drops all stored objects and in-flight transactions, as if the
    /// process had just started, without closing the listening socket or
    /// the connection pool (`Restart`).
    pub fn reset(&mut self) {
        self.store = ObjectStore::new();
        self.pending_lookups.clear();
        self.stream_waiters.clear();
    }

    /// Stores `bytes` under `key` if this host owns it; otherwise resolves
    /// the owner via a Chord lookup and forwards a Store-Req once it
    /// answers.
    pub async fn insert(&mut self, chord: &mut ChordEngine, key: Identifier, bytes: Vec<u8>) -> Result<()> {
        if chord.local_owner(&key)?.is_some() {
            self.store.put(key.clone(), bytes);
            let _ = self.events.send(Event::InsertSuccess { key });
            return Ok(());
        }
        self.pending_lookups.entry(key.clone()).or_default().push(PendingDHash {
            kind: Kind::Insert,
            object_id: key.clone(),
            originator: Originator::Application,
            payload: Some(bytes),
        });
        chord.lookup(key, Originator::ObjectLayer).await?;
        Ok(())
    }

    /// Reads `key` if this host owns it; otherwise resolves the owner via
    /// a Chord lookup and requests it over the object-layer stream.
    pub async fn retrieve(&mut self, chord: &mut ChordEngine, key: Identifier) -> Result<()> {
        if chord.local_owner(&key)?.is_some() {
            match self.store.get(&key) {
                Some(bytes) => {
                    let _ = self.events.send(Event::RetrieveSuccess { key, object: bytes.clone() });
                }
                None => {
                    let _ = self.events.send(Event::RetrieveFailure { key });
                }
            }
            return Ok(());
        }
        self.pending_lookups.entry(key.clone()).or_default().push(PendingDHash {
            kind: Kind::Retrieve,
            object_id: key.clone(),
            originator: Originator::Application,
            payload: None,
        });
        chord.lookup(key, Originator::ObjectLayer).await?;
        Ok(())
    }

    /// Feeds one Chord-engine upcall into the object layer: resolves
    /// pending lookups, or migrates objects on a predecessor change.
    pub async fn handle_chord_event(&mut self, event: &ChordEvent) -> Result<()> {
        match event {
            ChordEvent::ObjectLookupSuccess { key, node } => self.resolve_lookup(key.clone(), Some(node.clone())).await,
            ChordEvent::ObjectLookupFailure { key } => self.resolve_lookup(key.clone(), None).await,
            ChordEvent::KeyOwnership { new_pred_id, old_pred_id, pred_ip, pred_object_port, .. } => {
                self.handle_key_ownership(old_pred_id, new_pred_id, *pred_ip, *pred_object_port).await
            }
            _ => Ok(()),
        }
    }

    async fn resolve_lookup(&mut self, key: Identifier, resolved: Option<NodeRecord>) -> Result<()> {
        let Some(pendings) = self.pending_lookups.remove(&key) else { return Ok(()) };
        for pending in pendings {
            match &resolved {
                Some(node) => self.dispatch_stream_request(SocketAddrV4::new(node.ip, node.object_port), pending).await?,
                None => self.fail_pending(pending),
            }
        }
        Ok(())
    }

    fn fail_pending(&self, pending: PendingDHash) {
        match pending.kind {
            Kind::Insert => {
                let _ = self.events.send(Event::InsertFailure { key: pending.object_id });
            }
            Kind::Retrieve => {
                let _ = self.events.send(Event::RetrieveFailure { key: pending.object_id });
            }
            // A failed audit/handoff re-lookup just leaves the object where
            // it is; the next audit pass tries again.
            Kind::Transfer => {}
        }
    }

    async fn dispatch_stream_request(&mut self, peer: SocketAddrV4, pending: PendingDHash) -> Result<()> {
        let txid = self.alloc.next_id();
        let message = match pending.kind {
            Kind::Retrieve => DHashMessage::RetrieveReq { object_id: pending.object_id.clone() },
            Kind::Insert => {
                let bytes = pending.payload.clone().unwrap_or_default();
                DHashMessage::StoreReq { object: Object { id: pending.object_id.clone(), bytes } }
            }
            Kind::Transfer => {
                let bytes = self.store.get(&pending.object_id).cloned().unwrap_or_default();
                DHashMessage::StoreReq { object: Object { id: pending.object_id.clone(), bytes } }
            }
        };
        let connection = self.pool.get_or_connect(peer).await?;
        connection.enqueue(txid, &message);
        self.stream_waiters.insert(txid, pending);
        Ok(())
    }

    /// `spec.md` §4.6: objects whose id falls in the sub-arc the new
    /// predecessor just took over are forwarded to it and dropped locally
    /// once the forward is acknowledged. The destination is already known
    /// from the event, so this skips the lookup round-trip `insert`/
    /// `retrieve` need.
    async fn handle_key_ownership(
        &mut self,
        old_pred_id: &Identifier,
        new_pred_id: &Identifier,
        pred_ip: std::net::Ipv4Addr,
        pred_object_port: u16,
    ) -> Result<()> {
        let migrating: Vec<Identifier> =
            self.store.ids().filter(|oid| oid.in_between(old_pred_id, new_pred_id).unwrap_or(false)).cloned().collect();
        if migrating.is_empty() {
            return Ok(());
        }
        let peer = SocketAddrV4::new(pred_ip, pred_object_port);
        for object_id in migrating {
            let pending = PendingDHash { kind: Kind::Transfer, object_id, originator: Originator::ObjectLayer, payload: None };
            self.dispatch_stream_request(peer, pending).await?;
        }
        Ok(())
    }

    /// `spec.md` §4.6, every `T_audit`: re-checks every locally stored
    /// object against current ownership and re-launches a transfer for any
    /// that stabilization has moved out from under this host without a
    /// direct `KeyOwnership` event.
    pub async fn audit_tick(&mut self, chord: &mut ChordEngine) -> Result<()> {
        let ids: Vec<Identifier> = self.store.ids().cloned().collect();
        for id in ids {
            if chord.local_owner(&id)?.is_none() {
                self.pending_lookups.entry(id.clone()).or_default().push(PendingDHash {
                    kind: Kind::Transfer,
                    object_id: id.clone(),
                    originator: Originator::ObjectLayer,
                    payload: None,
                });
                chord.lookup(id, Originator::ObjectLayer).await?;
            }
        }
        Ok(())
    }

    /// Accepts one inbound object-layer connection, if any is waiting.
    pub async fn accept_inbound(&mut self) -> Result<()> {
        let (stream, from) = self.listener.accept().await?;
        let std::net::SocketAddr::V4(from) = from else {
            tracing::warn!(%from, "dropping non-ipv4 dhash connection");
            return Ok(());
        };
        self.pool.adopt_inbound(from, Connection::new(stream));
        Ok(())
    }

    /// Sweeps every pooled connection once for completed records. A
    /// connection with nothing to say yields within `POLL_SLICE` rather
    /// than blocking the sweep.
    pub async fn pump_tick(&mut self) -> Result<()> {
        for peer in self.pool.peers() {
            match self.pool.try_pump(peer, POLL_SLICE).await {
                None => continue,
                Some(Ok(records)) => {
                    for (txid, message) in records {
                        self.handle_stream_message(peer, txid, message).await?;
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(%err, %peer, "dhash connection failed, dropping in-flight transactions");
                    self.fail_transactions_on(peer);
                }
            }
        }
        self.pool.reap_idle();
        Ok(())
    }

    /// A reaped/reset connection fails whatever `stream_waiters` entries it
    /// was carrying; there is no way to tell which txids lived on it, so
    /// conservatively fail all pending `Retrieve`/`Insert` (the only
    /// upcall-visible kinds) and leave `Transfer`s to the next audit.
    fn fail_transactions_on(&mut self, _peer: SocketAddrV4) {
        let stuck: Vec<u32> = self.stream_waiters.keys().copied().collect();
        for txid in stuck {
            if let Some(pending) = self.stream_waiters.remove(&txid) {
                self.fail_pending(pending);
            }
        }
    }

    async fn handle_stream_message(&mut self, from: SocketAddrV4, txid: u32, message: DHashMessage) -> Result<()> {
        match message {
            DHashMessage::StoreReq { object } => self.handle_store_req(from, txid, object).await,
            DHashMessage::RetrieveReq { object_id } => self.handle_retrieve_req(from, txid, object_id).await,
            DHashMessage::StoreRsp { status, object_id } => self.handle_store_rsp(txid, status, object_id),
            DHashMessage::RetrieveRsp { status, object } => self.handle_retrieve_rsp(txid, status, object),
        }
    }

    /// `spec.md` §9: the source accepts a Store-Req without verifying
    /// ownership; this reimplementation keeps that behaviour explicitly
    /// (accept + periodic audit) rather than rejecting with `NotOwner`.
    async fn handle_store_req(&mut self, from: SocketAddrV4, txid: u32, object: Object) -> Result<()> {
        let object_id = object.id.clone();
        self.store.put(object.id, object.bytes);
        let reply = DHashMessage::StoreRsp { status: Status::StoreSuccess, object_id };
        let connection = self.pool.get_or_connect(from).await?;
        connection.enqueue(txid, &reply);
        Ok(())
    }

    async fn handle_retrieve_req(&mut self, from: SocketAddrV4, txid: u32, object_id: Identifier) -> Result<()> {
        let reply = match self.store.get(&object_id) {
            Some(bytes) => DHashMessage::RetrieveRsp { status: Status::ObjectFound, object: Some(Object { id: object_id, bytes: bytes.clone() }) },
            None => DHashMessage::RetrieveRsp { status: Status::ObjectNotFound, object: None },
        };
        let connection = self.pool.get_or_connect(from).await?;
        connection.enqueue(txid, &reply);
        Ok(())
    }

    fn handle_store_rsp(&mut self, txid: u32, status: Status, object_id: Identifier) -> Result<()> {
        let Some(pending) = self.stream_waiters.remove(&txid) else { return Ok(()) };
        match pending.kind {
            Kind::Insert => {
                if status == Status::StoreSuccess {
                    let _ = self.events.send(Event::InsertSuccess { key: object_id });
                } else {
                    let _ = self.events.send(Event::InsertFailure { key: object_id });
                }
            }
            Kind::Transfer => {
                if status == Status::StoreSuccess {
                    self.store.remove(&object_id);
                }
            }
            Kind::Retrieve => {}
        }
        Ok(())
    }

    fn handle_retrieve_rsp(&mut self, txid: u32, status: Status, object: Option<Object>) -> Result<()> {
        let Some(pending) = self.stream_waiters.remove(&txid) else { return Ok(()) };
        if pending.kind != Kind::Retrieve {
            return Ok(());
        }
        match (status, object) {
            (Status::ObjectFound, Some(obj)) => {
                let _ = self.events.send(Event::RetrieveSuccess { key: obj.id, object: obj.bytes });
            }
            _ => {
                let _ = self.events.send(Event::RetrieveFailure { key: pending.object_id });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn config(port: u16) -> NodeConfig {
        NodeConfig {
            m: 32,
            local_ip: Ipv4Addr::LOCALHOST,
            chord_port: port,
            app_port: port + 1,
            object_port: port + 2,
            bootstrap: std::net::SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
            ..Default::default()
        }
    }

    fn oid(n: u8) -> Identifier {
        Identifier::from_le_bytes(vec![n, 0, 0, 0])
    }

    #[tokio::test]
    async fn insert_on_bootstrap_owner_stores_locally_without_a_lookup() {
        let cfg = config(19700);
        let mut chord = ChordEngine::bind(cfg.clone()).await.unwrap();
        let mut dhash = DHashEngine::bind(&cfg).await.unwrap();
        let mut events = dhash.subscribe();

        let vnode_id = oid(1);
        chord.insert_vnode("A".into(), vnode_id).await.unwrap();
        dhash.insert(&mut chord, oid(1), b"2.2.2.2".to_vec()).await.unwrap();

        assert_eq!(dhash.object_count(), 1);
        match events.try_recv().unwrap() {
            Event::InsertSuccess { key } => assert_eq!(key, oid(1)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn retrieve_miss_on_owner_reports_failure() {
        let cfg = config(19710);
        let mut chord = ChordEngine::bind(cfg.clone()).await.unwrap();
        let mut dhash = DHashEngine::bind(&cfg).await.unwrap();
        let mut events = dhash.subscribe();

        chord.insert_vnode("A".into(), oid(1)).await.unwrap();
        dhash.retrieve(&mut chord, oid(9)).await.unwrap();

        match events.try_recv().unwrap() {
            Event::RetrieveFailure { key } => assert_eq!(key, oid(9)),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
