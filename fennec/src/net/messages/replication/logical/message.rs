use crate::net::c_string_buf;

use super::super::super::code;
use super::super::super::prelude::*;

/// Logical decoding message ('M'), emitted by `pg_logical_emit_message`.
///
/// Schema-change event triggers write their payloads through this channel
/// so DDL arrives in WAL order with the data it affects.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    pub transactional: bool,
    pub lsn: i64,
    pub prefix: String,
    pub content: Bytes,
}

impl LogicalMessage {
    pub fn new(prefix: &str, content: &[u8]) -> Self {
        Self {
            transactional: true,
            lsn: 0,
            prefix: prefix.to_string(),
            content: Bytes::copy_from_slice(content),
        }
    }

    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

impl FromBytes for LogicalMessage {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'M');
        let transactional = bytes.get_u8() == 1;
        let lsn = bytes.get_i64();
        let prefix = c_string_buf(&mut bytes);
        let len = bytes.get_i32() as usize;
        if bytes.remaining() < len {
            return Err(Error::Eof);
        }

        Ok(Self {
            transactional,
            lsn,
            prefix,
            content: bytes.slice(..len),
        })
    }
}

impl ToBytes for LogicalMessage {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'M');
        payload.put_u8(self.transactional as u8);
        payload.put_i64(self.lsn);
        payload.put_slice(self.prefix.as_bytes());
        payload.put_u8(0);
        payload.put_i32(self.content.len() as i32);
        payload.put_slice(&self.content);

        Ok(payload.freeze())
    }
}
