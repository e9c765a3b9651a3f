use super::super::code;
use super::super::prelude::*;

/// Primary keepalive ('k'). `reply == 1` asks us to send a status update
/// without waiting for the next ack interval.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    pub wal_end: i64,
    pub system_clock: i64,
    pub reply: u8,
}

impl FromBytes for KeepAlive {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'k');

        Ok(Self {
            wal_end: bytes.get_i64(),
            system_clock: bytes.get_i64(),
            reply: bytes.get_u8(),
        })
    }
}

impl ToBytes for KeepAlive {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'k');
        payload.put_i64(self.wal_end);
        payload.put_i64(self.system_clock);
        payload.put_u8(self.reply);

        Ok(payload.freeze())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keep_alive() {
        let ka = KeepAlive {
            wal_end: 42,
            system_clock: 7,
            reply: 1,
        };
        let ka = KeepAlive::from_bytes(ka.to_bytes().unwrap()).unwrap();
        assert_eq!(ka.wal_end, 42);
        assert_eq!(ka.system_clock, 7);
        assert_eq!(ka.reply, 1);
    }
}
