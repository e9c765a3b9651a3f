use super::super::super::code;
use super::super::super::prelude::*;
use super::tuple_data::{Column, TupleData};

/// Insert ('I').
#[derive(Debug, Clone)]
pub struct Insert {
    pub oid: i32,
    pub tuple: TupleData,
}

impl Insert {
    /// Get column at index.
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.tuple.columns.get(index)
    }
}

impl FromBytes for Insert {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'I');
        let oid = bytes.get_i32();
        let tuple = TupleData::from_bytes(bytes)?;

        Ok(Self { oid, tuple })
    }
}

impl ToBytes for Insert {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'I');
        payload.put_i32(self.oid);
        payload.put_u8(b'N');
        self.tuple.to_buffer(&mut payload)?;

        Ok(payload.freeze())
    }
}
