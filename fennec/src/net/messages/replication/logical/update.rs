use super::super::super::code;
use super::super::super::prelude::*;
use super::tuple_data::{Column, TupleData};

/// Update ('U'). `key` carries the replica identity when it changed;
/// `old` carries the full previous row under REPLICA IDENTITY FULL.
#[derive(Debug, Clone)]
pub struct Update {
    pub oid: i32,
    pub key: Option<TupleData>,
    pub old: Option<TupleData>,
    pub new: TupleData,
}

impl Update {
    /// Get column at index of the new row.
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.new.columns.get(index)
    }
}

impl FromBytes for Update {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'U');
        let oid = bytes.get_i32();
        let identifier = bytes.get_u8() as char;

        let key = if identifier == 'K' {
            Some(TupleData::from_buffer(&mut bytes)?)
        } else {
            None
        };

        let old = if identifier == 'O' {
            Some(TupleData::from_buffer(&mut bytes)?)
        } else {
            None
        };

        let new = if identifier == 'N' {
            TupleData::from_buffer(&mut bytes)?
        } else {
            code!(bytes, 'N');
            TupleData::from_buffer(&mut bytes)?
        };

        Ok(Self { oid, key, old, new })
    }
}

impl ToBytes for Update {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'U');
        payload.put_i32(self.oid);

        if let Some(key) = &self.key {
            payload.put_u8(b'K');
            key.to_buffer(&mut payload)?;
        } else if let Some(old) = &self.old {
            payload.put_u8(b'O');
            old.to_buffer(&mut payload)?;
        }

        payload.put_u8(b'N');
        self.new.to_buffer(&mut payload)?;

        Ok(payload.freeze())
    }
}
