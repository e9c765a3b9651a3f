//! Binary message codecs.

pub mod copy_data;
pub mod replication;

pub use copy_data::CopyData;

use bytes::Bytes;

use super::Error;

/// Decode a message from its wire representation.
pub trait FromBytes: Sized {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error>;
}

/// Encode a message into its wire representation.
pub trait ToBytes {
    fn to_bytes(&self) -> Result<Bytes, Error>;
}

/// Assert the message type byte, consuming it.
macro_rules! code {
    ($bytes:expr, $code:expr) => {
        let code = $bytes.get_u8() as char;
        if code != $code {
            return Err(crate::net::Error::UnexpectedCode(code, $code));
        }
    };
}

pub(crate) use code;

pub mod prelude {
    pub use super::super::Error;
    pub use super::{FromBytes, ToBytes};
    pub use bytes::{Buf, BufMut, Bytes, BytesMut};
}
