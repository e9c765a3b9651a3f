use std::collections::BTreeMap;

/// Shape of the materialized output at one level: singular or ordered, and
/// the formats of nested relationships.
///
/// A hidden level (junction hop) contributes no rows of its own: changes
/// addressed to it are applied to its single visible child instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewFormat {
    pub singular: bool,
    pub hidden: bool,
    pub relationships: BTreeMap<String, ViewFormat>,
}

impl ViewFormat {
    pub fn ordered() -> Self {
        Self::default()
    }

    pub fn singular() -> Self {
        Self {
            singular: true,
            ..Default::default()
        }
    }

    pub fn hidden(inner_name: &str, inner: ViewFormat) -> Self {
        Self {
            singular: false,
            hidden: true,
            relationships: BTreeMap::from([(inner_name.to_string(), inner)]),
        }
    }

    pub fn with_relationship(mut self, name: &str, format: ViewFormat) -> Self {
        self.relationships.insert(name.to_string(), format);
        self
    }

    /// The single visible child of a hidden level.
    pub fn inner(&self) -> Option<(&String, &ViewFormat)> {
        self.relationships.iter().next()
    }
}
