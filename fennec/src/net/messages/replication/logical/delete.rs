use super::super::super::code;
use super::super::super::prelude::*;
use super::tuple_data::TupleData;

/// Delete ('D'). Carries either the replica identity key or the full old
/// row, depending on REPLICA IDENTITY.
#[derive(Debug, Clone)]
pub struct Delete {
    pub oid: i32,
    pub key: Option<TupleData>,
    pub old: Option<TupleData>,
}

impl Delete {
    /// The identifying tuple, whichever form it took.
    pub fn identity(&self) -> Option<&TupleData> {
        self.key.as_ref().or(self.old.as_ref())
    }
}

impl FromBytes for Delete {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'D');
        let oid = bytes.get_i32();
        let identifier = bytes.get_u8() as char;

        let (key, old) = match identifier {
            'K' => (Some(TupleData::from_buffer(&mut bytes)?), None),
            'O' => (None, Some(TupleData::from_buffer(&mut bytes)?)),
            c => return Err(Error::UnexpectedTupleMarker(c)),
        };

        Ok(Self { oid, key, old })
    }
}

impl ToBytes for Delete {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'D');
        payload.put_i32(self.oid);

        if let Some(key) = &self.key {
            payload.put_u8(b'K');
            key.to_buffer(&mut payload)?;
        } else if let Some(old) = &self.old {
            payload.put_u8(b'O');
            old.to_buffer(&mut payload)?;
        }

        Ok(payload.freeze())
    }
}
