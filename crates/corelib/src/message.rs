//! Chord datagram wire format: the envelope and its thirteen payload
//! variants (`spec.md` §6). Multi-byte fields are big-endian on the wire;
//! identifiers keep their own little-endian byte order inside the Node
//! record encoding.

use bytes::{Buf, BufMut, BytesMut};
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::node::NodeRecord;

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(Error::MalformedMessage(format!(
            "need {} more bytes, have {}",
            n,
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

/// Encodes a Node record: `u8 id_len | id_len bytes id | u32 ip | u16 chord_port | u16 app_port | u16 object_port`.
pub fn encode_node(out: &mut BytesMut, node: &NodeRecord) {
    let id_bytes = node.id.as_le_bytes();
    out.put_u8(id_bytes.len() as u8);
    out.put_slice(id_bytes);
    out.put_u32(u32::from(node.ip));
    out.put_u16(node.chord_port);
    out.put_u16(node.app_port);
    out.put_u16(node.object_port);
}

pub fn decode_node(buf: &mut impl Buf) -> Result<NodeRecord> {
    need(buf, 1)?;
    let id_len = buf.get_u8() as usize;
    need(buf, id_len + 4 + 2 + 2 + 2)?;
    let mut id_bytes = vec![0u8; id_len];
    buf.copy_to_slice(&mut id_bytes);
    let ip = Ipv4Addr::from(buf.get_u32());
    let chord_port = buf.get_u16();
    let app_port = buf.get_u16();
    let object_port = buf.get_u16();
    Ok(NodeRecord {
        id: Identifier::from_le_bytes(id_bytes),
        name: None,
        ip,
        chord_port,
        app_port,
        object_port,
        last_seen: Instant::now(),
        // A node is only ever placed in a wire message by a peer that
        // considers it live; locally we still re-evaluate routability via
        // stabilize/heartbeat evidence rather than trusting this blindly.
        routable: true,
    })
}

fn encode_identifier(out: &mut BytesMut, id: &Identifier) {
    let bytes = id.as_le_bytes();
    out.put_u8(bytes.len() as u8);
    out.put_slice(bytes);
}

fn decode_identifier(buf: &mut impl Buf) -> Result<Identifier> {
    need(buf, 1)?;
    let len = buf.get_u8() as usize;
    need(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(Identifier::from_le_bytes(bytes))
}

/// The thirteen Chord payload variants.
#[derive(Clone, Debug)]
pub enum ChordMessage {
    JoinReq,
    JoinRsp { successor: NodeRecord },
    StabilizeReq { successor_id: Identifier },
    StabilizeRsp { predecessor: NodeRecord, successor_list: Vec<NodeRecord> },
    FingerReq { requested_id: Identifier },
    FingerRsp { requested_id: Identifier, finger: NodeRecord },
    HeartbeatReq { predecessor_id: Identifier },
    HeartbeatRsp { successor: NodeRecord, predecessor_list: Vec<NodeRecord> },
    LookupReq { requested_id: Identifier },
    LookupRsp { resolved: NodeRecord },
    LeaveReq { successor: NodeRecord, predecessor: NodeRecord },
    LeaveRsp { successor: NodeRecord, predecessor: NodeRecord },
    TraceRing { successor_id: Identifier },
}

impl ChordMessage {
    fn type_tag(&self) -> u8 {
        match self {
            ChordMessage::JoinReq => 1,
            ChordMessage::JoinRsp { .. } => 2,
            ChordMessage::StabilizeReq { .. } => 3,
            ChordMessage::StabilizeRsp { .. } => 4,
            ChordMessage::FingerReq { .. } => 5,
            ChordMessage::FingerRsp { .. } => 6,
            ChordMessage::HeartbeatReq { .. } => 7,
            ChordMessage::HeartbeatRsp { .. } => 8,
            ChordMessage::LookupReq { .. } => 9,
            ChordMessage::LookupRsp { .. } => 10,
            ChordMessage::LeaveReq { .. } => 11,
            ChordMessage::LeaveRsp { .. } => 12,
            ChordMessage::TraceRing { .. } => 20,
        }
    }

    fn encode_payload(&self, out: &mut BytesMut) {
        match self {
            ChordMessage::JoinReq => {}
            ChordMessage::JoinRsp { successor } => encode_node(out, successor),
            ChordMessage::StabilizeReq { successor_id } => encode_identifier(out, successor_id),
            ChordMessage::StabilizeRsp { predecessor, successor_list } => {
                encode_node(out, predecessor);
                out.put_u8(successor_list.len() as u8);
                for n in successor_list {
                    encode_node(out, n);
                }
            }
            ChordMessage::FingerReq { requested_id } => encode_identifier(out, requested_id),
            ChordMessage::FingerRsp { requested_id, finger } => {
                encode_identifier(out, requested_id);
                encode_node(out, finger);
            }
            ChordMessage::HeartbeatReq { predecessor_id } => encode_identifier(out, predecessor_id),
            ChordMessage::HeartbeatRsp { successor, predecessor_list } => {
                encode_node(out, successor);
                out.put_u8(predecessor_list.len() as u8);
                for n in predecessor_list {
                    encode_node(out, n);
                }
            }
            ChordMessage::LookupReq { requested_id } => encode_identifier(out, requested_id),
            ChordMessage::LookupRsp { resolved } => encode_node(out, resolved),
            ChordMessage::LeaveReq { successor, predecessor } | ChordMessage::LeaveRsp { successor, predecessor } => {
                encode_node(out, successor);
                encode_node(out, predecessor);
            }
            ChordMessage::TraceRing { successor_id } => encode_identifier(out, successor_id),
        }
    }

    fn decode_payload(tag: u8, buf: &mut impl Buf) -> Result<Self> {
        Ok(match tag {
            1 => ChordMessage::JoinReq,
            2 => ChordMessage::JoinRsp { successor: decode_node(buf)? },
            3 => ChordMessage::StabilizeReq { successor_id: decode_identifier(buf)? },
            4 => {
                let predecessor = decode_node(buf)?;
                need(buf, 1)?;
                let count = buf.get_u8() as usize;
                let successor_list = (0..count).map(|_| decode_node(buf)).collect::<Result<_>>()?;
                ChordMessage::StabilizeRsp { predecessor, successor_list }
            }
            5 => ChordMessage::FingerReq { requested_id: decode_identifier(buf)? },
            6 => {
                let requested_id = decode_identifier(buf)?;
                let finger = decode_node(buf)?;
                ChordMessage::FingerRsp { requested_id, finger }
            }
            7 => ChordMessage::HeartbeatReq { predecessor_id: decode_identifier(buf)? },
            8 => {
                let successor = decode_node(buf)?;
                need(buf, 1)?;
                let count = buf.get_u8() as usize;
                let predecessor_list = (0..count).map(|_| decode_node(buf)).collect::<Result<_>>()?;
                ChordMessage::HeartbeatRsp { successor, predecessor_list }
            }
            9 => ChordMessage::LookupReq { requested_id: decode_identifier(buf)? },
            10 => ChordMessage::LookupRsp { resolved: decode_node(buf)? },
            11 => {
                let successor = decode_node(buf)?;
                let predecessor = decode_node(buf)?;
                ChordMessage::LeaveReq { successor, predecessor }
            }
            12 => {
                let successor = decode_node(buf)?;
                let predecessor = decode_node(buf)?;
                ChordMessage::LeaveRsp { successor, predecessor }
            }
            20 => ChordMessage::TraceRing { successor_id: decode_identifier(buf)? },
            other => return Err(Error::MalformedMessage(format!("unknown message_type {other}"))),
        })
    }
}

/// The full on-wire datagram: header + payload.
#[derive(Clone, Debug)]
pub struct ChordDatagram {
    pub ttl: u8,
    pub transaction_id: u32,
    pub requestor: NodeRecord,
    pub message: ChordMessage,
}

impl ChordDatagram {
    pub fn new(transaction_id: u32, requestor: NodeRecord, message: ChordMessage) -> Self {
        Self { ttl: 64, transaction_id, requestor, message }
    }

    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::new();
        out.put_u8(self.message.type_tag());
        out.put_u8(self.ttl);
        out.put_u32(self.transaction_id);
        encode_node(&mut out, &self.requestor);
        self.message.encode_payload(&mut out);
        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(&buf, 1 + 1 + 4)?;
        let tag = buf.get_u8();
        let ttl = buf.get_u8();
        let transaction_id = buf.get_u32();
        let requestor = decode_node(&mut buf)?;
        let message = ChordMessage::decode_payload(tag, &mut buf)?;
        Ok(Self { ttl, transaction_id, requestor, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_node(n: u8) -> NodeRecord {
        NodeRecord::new(Identifier::from_le_bytes(vec![n, 0, 0, 0]), Ipv4Addr::new(10, 0, 0, n), 9000, 9001, 9002)
    }

    fn roundtrip(msg: ChordMessage) {
        let dgram = ChordDatagram::new(42, sample_node(1), msg);
        let encoded = dgram.encode();
        let decoded = ChordDatagram::decode(&encoded).unwrap();
        assert_eq!(decoded.transaction_id, 42);
        assert_eq!(decoded.requestor.id, dgram.requestor.id);
        assert_eq!(format!("{:?}", decoded.message), format!("{:?}", dgram.message));
    }

    #[test]
    fn join_req_roundtrips() {
        roundtrip(ChordMessage::JoinReq);
    }

    #[test]
    fn join_rsp_roundtrips() {
        roundtrip(ChordMessage::JoinRsp { successor: sample_node(2) });
    }

    #[test]
    fn stabilize_rsp_roundtrips_with_successor_list() {
        roundtrip(ChordMessage::StabilizeRsp {
            predecessor: sample_node(3),
            successor_list: vec![sample_node(4), sample_node(5)],
        });
    }

    #[test]
    fn heartbeat_rsp_roundtrips_with_empty_list() {
        roundtrip(ChordMessage::HeartbeatRsp { successor: sample_node(6), predecessor_list: vec![] });
    }

    #[test]
    fn trace_ring_roundtrips() {
        roundtrip(ChordMessage::TraceRing { successor_id: Identifier::from_le_bytes(vec![9, 9, 9, 9]) });
    }

    #[test]
    fn leave_req_roundtrips() {
        roundtrip(ChordMessage::LeaveReq { successor: sample_node(7), predecessor: sample_node(8) });
    }

    #[test]
    fn truncated_buffer_is_malformed_not_a_panic() {
        let dgram = ChordDatagram::new(1, sample_node(1), ChordMessage::JoinReq);
        let encoded = dgram.encode();
        let truncated = &encoded[..encoded.len() - 2];
        assert!(ChordDatagram::decode(truncated).is_err());
    }

    #[test]
    fn unknown_type_tag_is_malformed() {
        let mut out = BytesMut::new();
        out.put_u8(255);
        out.put_u8(64);
        out.put_u32(1);
        encode_node(&mut out, &sample_node(1));
        assert!(ChordDatagram::decode(&out).is_err());
    }
}
