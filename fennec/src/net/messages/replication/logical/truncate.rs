use super::super::super::code;
use super::super::super::prelude::*;

/// Truncate ('T'). One message may cover several relations when tables are
/// truncated together with CASCADE.
#[derive(Debug, Clone, PartialEq)]
pub struct Truncate {
    pub options: i8,
    pub oids: Vec<i32>,
}

impl FromBytes for Truncate {
    fn from_bytes(mut bytes: Bytes) -> Result<Self, Error> {
        code!(bytes, 'T');
        let num_relations = bytes.get_i32();
        let options = bytes.get_i8();

        let mut oids = Vec::with_capacity(num_relations as usize);
        for _ in 0..num_relations {
            oids.push(bytes.get_i32());
        }

        Ok(Self { options, oids })
    }
}

impl ToBytes for Truncate {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut payload = BytesMut::new();
        payload.put_u8(b'T');
        payload.put_i32(self.oids.len() as i32);
        payload.put_i8(self.options);
        for oid in &self.oids {
            payload.put_i32(*oid);
        }

        Ok(payload.freeze())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let truncate = Truncate {
            options: 0,
            oids: vec![16384, 16390],
        };
        let truncate = Truncate::from_bytes(truncate.to_bytes().unwrap()).unwrap();
        assert_eq!(truncate.oids, vec![16384, 16390]);
    }
}
