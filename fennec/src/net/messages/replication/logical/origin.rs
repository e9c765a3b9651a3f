use crate::net::c_string_buf;

use super::super::super::code;
use super::super::super::prelude::*;

/// Origin ('O'): replication origin of the following transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub commit_lsn: i64,
    pub name: String,
}

impl FromBytes for Origin {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'O');

        Ok(Self {
            commit_lsn: bytes.get_i64(),
            name: c_string_buf(&mut bytes),
        })
    }
}

impl ToBytes for Origin {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'O');
        payload.put_i64(self.commit_lsn);
        payload.put_slice(self.name.as_bytes());
        payload.put_u8(0);

        Ok(payload.freeze())
    }
}
