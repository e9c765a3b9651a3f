use crate::net::c_string_buf;
use crate::net::messages::replication::logical::string::escape;

use super::super::super::code;
use super::super::super::prelude::*;

/// Relation ('R'): schema of a table referenced by subsequent data
/// messages. Sent once per table per stream, and again after DDL.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub oid: i32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: i8,
    pub columns: Vec<Column>,
}

impl Relation {
    pub fn to_sql(&self) -> String {
        format!(
            r#""{}"."{}""#,
            escape(&self.namespace, '"'),
            escape(&self.name, '"')
        )
    }

    /// Names of the replica identity columns (flag bit 0).
    pub fn key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.flag & 1 == 1)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub flag: i8,
    pub name: String,
    pub oid: i32,
    pub type_modifier: i32,
}

impl FromBytes for Relation {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'R');
        let oid = bytes.get_i32();
        let namespace = c_string_buf(&mut bytes);
        let name = c_string_buf(&mut bytes);
        let replica_identity = bytes.get_i8();
        let num_columns = bytes.get_i16();

        let mut columns = vec![];

        for _ in 0..num_columns {
            let flag = bytes.get_i8();
            let name = c_string_buf(&mut bytes);
            let oid = bytes.get_i32();
            let type_modifier = bytes.get_i32();

            columns.push(Column {
                flag,
                name,
                oid,
                type_modifier,
            });
        }

        Ok(Self {
            oid,
            namespace,
            name,
            replica_identity,
            columns,
        })
    }
}

impl ToBytes for Relation {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'R');
        payload.put_i32(self.oid);
        payload.put_slice(self.namespace.as_bytes());
        payload.put_u8(0);
        payload.put_slice(self.name.as_bytes());
        payload.put_u8(0);
        payload.put_i8(self.replica_identity);
        payload.put_i16(self.columns.len() as i16);

        for column in &self.columns {
            payload.put_i8(column.flag);
            payload.put_slice(column.name.as_bytes());
            payload.put_u8(0);
            payload.put_i32(column.oid);
            payload.put_i32(column.type_modifier);
        }

        Ok(payload.freeze())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let relation = Relation {
            oid: 16384,
            namespace: "public".into(),
            name: "issue".into(),
            replica_identity: b'd' as i8,
            columns: vec![
                Column {
                    flag: 1,
                    name: "id".into(),
                    oid: 25,
                    type_modifier: -1,
                },
                Column {
                    flag: 0,
                    name: "title".into(),
                    oid: 25,
                    type_modifier: -1,
                },
            ],
        };

        let decoded = Relation::from_bytes(relation.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, relation);
        assert_eq!(decoded.key_columns(), vec!["id"]);
        assert_eq!(decoded.to_sql(), r#""public"."issue""#);
    }
}
