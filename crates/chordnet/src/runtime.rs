//! Runtime wrapper around `corelib::VNodeState`: adds the transaction map,
//! id allocator, and per-host self-record a live engine needs but a pure
//! data type should not own.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use corelib::message::ChordMessage;
use corelib::{Identifier, NodeConfig, NodeRecord, Originator, Transaction, TransactionIdAllocator, VNodeState};

/// A transaction with the deadline at which it should be retransmitted or
/// failed, alongside the retry bookkeeping `corelib::Transaction` tracks.
pub struct PendingTransaction {
    pub data: Transaction<ChordMessage>,
    pub deadline: Instant,
}

pub struct VNodeRuntime {
    pub state: VNodeState,
    /// This host's address/ports with this VNode's own id — what gets
    /// attached as the `requestor` field of outgoing datagrams.
    pub self_record: NodeRecord,
    pub transactions: HashMap<u32, PendingTransaction>,
    pub alloc: TransactionIdAllocator,
}

impl VNodeRuntime {
    pub fn new(id: Identifier, config: &NodeConfig, name: Option<String>) -> corelib::Result<Self> {
        let mut self_record = NodeRecord::new(id.clone(), config.local_ip, config.chord_port, config.app_port, config.object_port);
        if let Some(n) = &name {
            self_record = self_record.with_name(n.clone());
        }
        let state = VNodeState::new(id, config, self_record.clone())?;
        Ok(Self { state, self_record, transactions: HashMap::new(), alloc: TransactionIdAllocator::default() })
    }

    pub fn register_transaction(
        &mut self,
        message: ChordMessage,
        requested_id: Identifier,
        originator: Originator,
        config: &NodeConfig,
    ) -> u32 {
        let id = self.alloc.next_id();
        let data = Transaction::new(id, message, requested_id, originator, config.max_request_retries);
        let deadline = Instant::now() + config.request_timeout;
        self.transactions.insert(id, PendingTransaction { data, deadline });
        id
    }

    pub fn self_ip(&self) -> Ipv4Addr {
        self.self_record.ip
    }
}
