use super::code;
use super::prelude::*;
use super::replication::{ReplicationMeta, XLogData};

/// CopyData ('d') frame. During logical replication both directions ride
/// inside these: WAL data and keepalives downstream, status updates up.
#[derive(Debug, Clone)]
pub struct CopyData {
    payload: Bytes,
}

impl CopyData {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(payload),
        }
    }

    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    /// Interpret the payload as WAL data, if it is one.
    pub fn xlog_data(&self) -> Option<XLogData> {
        if self.payload.first() == Some(&b'w') {
            XLogData::from_bytes(self.payload.clone()).ok()
        } else {
            None
        }
    }

    /// Interpret the payload as a keepalive or status message.
    pub fn replication_meta(&self) -> Result<ReplicationMeta, Error> {
        ReplicationMeta::from_bytes(self.payload.clone())
    }
}

impl FromBytes for CopyData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'd');
        if bytes.remaining() < 4 {
            return Err(Error::Eof);
        }
        let len = bytes.get_i32() as usize;
        // Length includes itself.
        let payload_len = len.saturating_sub(4);
        if bytes.remaining() < payload_len {
            return Err(Error::Eof);
        }

        Ok(Self {
            payload: bytes.slice(..payload_len),
        })
    }
}

impl ToBytes for CopyData {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 5);
        buf.put_u8(b'd');
        buf.put_i32(self.payload.len() as i32 + 4);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}
