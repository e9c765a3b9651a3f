//! The change source: consumes PostgreSQL logical replication and emits a
//! watermarked, language-neutral change stream.

pub mod copy;
pub mod ddl;
pub mod decode;
pub mod error;
pub mod init;
pub mod publication;
pub mod stream;
pub mod watermark;

pub use decode::{ChangeDecoder, ChangeStreamMessage, ControlMessage, DataChange};
pub use error::Error;
pub use stream::{AckSender, ChangeSource, ChangeStream, ReplicationConnection, StreamState};
pub use watermark::{Lsn, Watermark};
