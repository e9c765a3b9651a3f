use super::super::code;
use super::super::prelude::*;
use super::logical::XLogPayload;

/// XLogData ('w'): a chunk of WAL carrying one logical decoding message.
#[derive(Debug, Clone)]
pub struct XLogData {
    pub starting_point: i64,
    pub current_end: i64,
    pub system_clock: i64,
    payload: Bytes,
}

impl XLogData {
    pub fn wrap(payload: Bytes, lsn: i64) -> Self {
        Self {
            starting_point: lsn,
            current_end: lsn,
            system_clock: 0,
            payload,
        }
    }

    /// Decode the logical replication message inside.
    pub fn payload(&self) -> Result<XLogPayload, Error> {
        XLogPayload::from_bytes(self.payload.clone())
    }
}

impl FromBytes for XLogData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'w');
        if bytes.remaining() < 24 {
            return Err(Error::Eof);
        }

        Ok(Self {
            starting_point: bytes.get_i64(),
            current_end: bytes.get_i64(),
            system_clock: bytes.get_i64(),
            payload: bytes,
        })
    }
}

impl ToBytes for XLogData {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 25);
        buf.put_u8(b'w');
        buf.put_i64(self.starting_point);
        buf.put_i64(self.current_end);
        buf.put_i64(self.system_clock);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod test {
    use super::super::logical::begin::Begin;
    use super::*;

    #[test]
    fn test_roundtrip() {
        let begin = Begin {
            final_lsn: 100,
            commit_timestamp: 5,
            xid: 42,
        };
        let xlog = XLogData::wrap(begin.to_bytes().unwrap(), 100);
        let xlog = XLogData::from_bytes(xlog.to_bytes().unwrap()).unwrap();
        assert_eq!(xlog.starting_point, 100);

        match xlog.payload().unwrap() {
            XLogPayload::Begin(begin) => {
                assert_eq!(begin.final_lsn, 100);
                assert_eq!(begin.xid, 42);
            }
            other => panic!("expected begin, got {:?}", other),
        }
    }
}
