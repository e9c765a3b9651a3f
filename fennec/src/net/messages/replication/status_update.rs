use crate::net::CopyData;
use crate::util::postgres_now;

use super::super::code;
use super::super::prelude::*;
use super::KeepAlive;

/// Standby status update ('r'). Pushing one of these with the durable
/// watermark's LSN advances the slot's confirmed flush position.
#[derive(Debug, Clone, Copy)]
pub struct StatusUpdate {
    pub last_written: i64,
    pub last_flushed: i64,
    pub last_applied: i64,
    pub system_clock: i64,
    pub reply: u8,
}

impl StatusUpdate {
    pub fn wrapped(self) -> Result<CopyData, Error> {
        Ok(CopyData::new(&self.to_bytes()?))
    }

    /// Acknowledge everything up to and including `lsn`.
    pub fn ack(lsn: i64) -> Self {
        Self {
            last_written: lsn,
            last_flushed: lsn,
            last_applied: lsn,
            system_clock: postgres_now(),
            reply: 0,
        }
    }
}

impl From<KeepAlive> for StatusUpdate {
    fn from(value: KeepAlive) -> Self {
        Self {
            last_written: value.wal_end,
            last_flushed: value.wal_end,
            last_applied: value.wal_end,
            system_clock: postgres_now(),
            reply: 0,
        }
    }
}

impl FromBytes for StatusUpdate {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'r');

        Ok(Self {
            last_written: bytes.get_i64(),
            last_flushed: bytes.get_i64(),
            last_applied: bytes.get_i64(),
            system_clock: bytes.get_i64(),
            reply: bytes.get_u8(),
        })
    }
}

impl ToBytes for StatusUpdate {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'r');
        payload.put_i64(self.last_written);
        payload.put_i64(self.last_flushed);
        payload.put_i64(self.last_applied);
        payload.put_i64(self.system_clock);
        payload.put_u8(self.reply);

        Ok(payload.freeze())
    }
}
