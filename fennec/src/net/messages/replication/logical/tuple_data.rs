use super::super::super::code;
use super::super::super::prelude::*;

/// A decoded tuple: the column values of one row, in relation order.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleData {
    pub columns: Vec<Column>,
}

/// One column of a tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// SQL NULL ('n').
    Null,
    /// Unchanged TOAST value ('u'); the replica keeps what it has.
    UnchangedToast,
    /// Text-format value ('t').
    Text(String),
}

impl Column {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Column::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl TupleData {
    /// Decode from a buffer positioned at the column count, leaving any
    /// trailing bytes in place. Used when two tuples share one message.
    pub fn from_buffer(bytes: &mut Bytes) -> Result<Self, Error> {
        let num_columns = bytes.get_i16();
        let mut columns = Vec::with_capacity(num_columns as usize);

        for _ in 0..num_columns {
            let marker = bytes.get_u8() as char;
            columns.push(match marker {
                'n' => Column::Null,
                'u' => Column::UnchangedToast,
                't' => {
                    let len = bytes.get_i32() as usize;
                    if bytes.remaining() < len {
                        return Err(Error::Eof);
                    }
                    let value = bytes.split_to(len);
                    Column::Text(String::from_utf8(value.to_vec())?)
                }
                c => return Err(Error::UnexpectedTupleMarker(c)),
            });
        }

        Ok(Self { columns })
    }

    pub fn to_buffer(&self, buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_i16(self.columns.len() as i16);

        for column in &self.columns {
            match column {
                Column::Null => buf.put_u8(b'n'),
                Column::UnchangedToast => buf.put_u8(b'u'),
                Column::Text(value) => {
                    buf.put_u8(b't');
                    buf.put_i32(value.len() as i32);
                    buf.put_slice(value.as_bytes());
                }
            }
        }

        Ok(())
    }
}

impl FromBytes for TupleData {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'N');
        Self::from_buffer(&mut bytes)
    }
}
