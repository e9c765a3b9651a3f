use serde::{Deserialize, Serialize};

/// Correlated field tuples of equal length: a row in the source matches
/// rows in the destination whose `dest_fields` equal its `source_fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    pub source_fields: Vec<String>,
    pub dest_fields: Vec<String>,
}

impl Correlation {
    pub fn new(source_fields: &[&str], dest_fields: &[&str]) -> Self {
        assert_eq!(source_fields.len(), dest_fields.len());
        Self {
            source_fields: source_fields.iter().map(|f| f.to_string()).collect(),
            dest_fields: dest_fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// How a relationship reaches its destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipPath {
    /// Single correlation into the destination.
    Direct {
        correlation: Correlation,
        dest_table: String,
    },
    /// Two correlations composed through a junction table. The junction
    /// level is hidden from materialized output.
    Junction {
        first: Correlation,
        junction_table: String,
        second: Correlation,
        dest_table: String,
    },
}

impl RelationshipPath {
    pub fn dest_table(&self) -> &str {
        match self {
            RelationshipPath::Direct { dest_table, .. } => dest_table,
            RelationshipPath::Junction { dest_table, .. } => dest_table,
        }
    }
}

/// A named edge from a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub name: String,
    pub source_table: String,
    pub path: RelationshipPath,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dest_table() {
        let direct = RelationshipPath::Direct {
            correlation: Correlation::new(&["id"], &["issueId"]),
            dest_table: "comment".into(),
        };
        assert_eq!(direct.dest_table(), "comment");

        let junction = RelationshipPath::Junction {
            first: Correlation::new(&["id"], &["issueId"]),
            junction_table: "issueLabel".into(),
            second: Correlation::new(&["labelId"], &["id"]),
            dest_table: "label".into(),
        };
        assert_eq!(junction.dest_table(), "label");
    }
}
