//! Source listings
//!
//! A listing is a named browse view a source exposes besides search
//! (e.g. "Popular", "Latest").

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How a listing is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListingKind {
    #[default]
    Default = 0,
    List = 1,
}

impl ListingKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::List,
            _ => Self::Default,
        }
    }
}

impl Serialize for ListingKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ListingKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_u8(u8::deserialize(deserializer)?))
    }
}

/// A browse view exposed by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: ListingKind,
}

impl Listing {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ListingKind::Default,
        }
    }
}
