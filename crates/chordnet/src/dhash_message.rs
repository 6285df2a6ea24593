//! DHash wire message: the four payload variants carried inside each
//! length-prefixed stream record (`spec.md` §6).

use bytes::{Buf, BufMut, BytesMut};

use corelib::Identifier;

use crate::error::{Error, Result};

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(Error::MalformedMessage(format!("need {n} more bytes, have {}", buf.remaining())))
    } else {
        Ok(())
    }
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

/// An object as carried in Store-Req and a successful Retrieve-Rsp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub id: Identifier,
    pub bytes: Vec<u8>,
}

fn encode_object(out: &mut BytesMut, object: &Object) {
    encode_identifier(out, &object.id);
    out.put_u32(object.bytes.len() as u32);
    out.put_slice(&object.bytes);
}

fn decode_object(buf: &mut impl Buf) -> Result<Object> {
    let id = decode_identifier(buf)?;
    need(buf, 4)?;
    let size = buf.get_u32() as usize;
    need(buf, size)?;
    let mut bytes = vec![0u8; size];
    buf.copy_to_slice(&mut bytes);
    Ok(Object { id, bytes })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    ObjectFound = 1,
    ObjectNotFound = 2,
    NotOwner = 3,
    StoreSuccess = 4,
    StoreFailure = 5,
}

impl Status {
    fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Status::ObjectFound,
            2 => Status::ObjectNotFound,
            3 => Status::NotOwner,
            4 => Status::StoreSuccess,
            5 => Status::StoreFailure,
            other => return Err(Error::MalformedMessage(format!("unknown dhash status {other}"))),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DHashMessage {
    StoreReq { object: Object },
    StoreRsp { status: Status, object_id: Identifier },
    RetrieveReq { object_id: Identifier },
    RetrieveRsp { status: Status, object: Option<Object> },
}

impl DHashMessage {
    fn type_tag(&self) -> u8 {
        match self {
            DHashMessage::StoreReq { .. } => 1,
            DHashMessage::StoreRsp { .. } => 2,
            DHashMessage::RetrieveReq { .. } => 3,
            DHashMessage::RetrieveRsp { .. } => 4,
        }
    }

    /// Encodes the full record body (`message_type | transaction_id | payload`)
    /// without the outer 4-byte length prefix, which the connection framer
    /// owns.
    pub fn encode(&self, transaction_id: u32) -> BytesMut {
        let mut out = BytesMut::new();
        out.put_u8(self.type_tag());
        out.put_u32(transaction_id);
        match self {
            DHashMessage::StoreReq { object } => encode_object(&mut out, object),
            DHashMessage::StoreRsp { status, object_id } => {
                out.put_u8(*status as u8);
                encode_identifier(&mut out, object_id);
            }
            DHashMessage::RetrieveReq { object_id } => encode_identifier(&mut out, object_id),
            DHashMessage::RetrieveRsp { status, object } => {
                out.put_u8(*status as u8);
                if *status == Status::ObjectFound {
                    encode_object(&mut out, object.as_ref().expect("ObjectFound status must carry an object"));
                }
            }
        }
        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<(u32, Self)> {
        need(&buf, 1 + 4)?;
        let tag = buf.get_u8();
        let txid = buf.get_u32();
        let message = match tag {
            1 => DHashMessage::StoreReq { object: decode_object(&mut buf)? },
            2 => {
                need(&buf, 1)?;
                let status = Status::from_u8(buf.get_u8())?;
                let object_id = decode_identifier(&mut buf)?;
                DHashMessage::StoreRsp { status, object_id }
            }
            3 => DHashMessage::RetrieveReq { object_id: decode_identifier(&mut buf)? },
            4 => {
                need(&buf, 1)?;
                let status = Status::from_u8(buf.get_u8())?;
                let object = if status == Status::ObjectFound { Some(decode_object(&mut buf)?) } else { None };
                DHashMessage::RetrieveRsp { status, object }
            }
            other => return Err(Error::MalformedMessage(format!("unknown dhash message_type {other}"))),
        };
        Ok((txid, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> Identifier {
        Identifier::from_le_bytes(vec![n, 0, 0, 0])
    }

    #[test]
    fn store_req_roundtrips() {
        let msg = DHashMessage::StoreReq { object: Object { id: oid(1), bytes: b"2.2.2.2".to_vec() } };
        let encoded = msg.encode(7);
        let (txid, decoded) = DHashMessage::decode(&encoded).unwrap();
        assert_eq!(txid, 7);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn retrieve_rsp_not_found_carries_no_object() {
        let msg = DHashMessage::RetrieveRsp { status: Status::ObjectNotFound, object: None };
        let encoded = msg.encode(1);
        let (_, decoded) = DHashMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn retrieve_rsp_found_roundtrips_object() {
        let msg = DHashMessage::RetrieveRsp {
            status: Status::ObjectFound,
            object: Some(Object { id: oid(2), bytes: b"hello".to_vec() }),
        };
        let encoded = msg.encode(1);
        let (_, decoded) = DHashMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
