use super::super::super::code;
use super::super::super::prelude::*;

/// Begin ('B'): opens a decoded transaction. `final_lsn` is the LSN of the
/// commit record that will close it.
#[derive(Debug, Clone, Copy)]
pub struct Begin {
    pub final_lsn: i64,
    pub commit_timestamp: i64,
    pub xid: i32,
}

impl FromBytes for Begin {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'B');

        Ok(Self {
            final_lsn: bytes.get_i64(),
            commit_timestamp: bytes.get_i64(),
            xid: bytes.get_i32(),
        })
    }
}

impl ToBytes for Begin {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'B');
        payload.put_i64(self.final_lsn);
        payload.put_i64(self.commit_timestamp);
        payload.put_i32(self.xid);

        Ok(payload.freeze())
    }
}
