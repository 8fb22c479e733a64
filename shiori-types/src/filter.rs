//! Search filter descriptors and selected filter values
//!
//! `Filter` describes the filters a source offers (as returned by
//! `get_filters` or declared in the manifest); `FilterValue` is a selection
//! the host sends back with a search call. Variant order on both enums is
//! fixed by the wire format.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default ordering for a sort filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortDefault {
    pub index: i32,
    pub ascending: bool,
}

/// Tri-state selection of a single genre option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionState {
    Excluded = -1,
    #[default]
    None = 0,
    Included = 1,
}

impl SelectionState {
    pub fn from_i32(value: i32) -> Self {
        match value {
            -1 => Self::Excluded,
            1 => Self::Included,
            _ => Self::None,
        }
    }
}

// The wire carries the state as a zigzag varint, which is exactly the
// postcard encoding of an i32.
impl Serialize for SelectionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for SelectionState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_i32(i32::deserialize(deserializer)?))
    }
}

/// A genre option pre-selected by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreSelection {
    pub index: i32,
    pub state: SelectionState,
}

/// A filter a source offers to searches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Free-text title query
    Title { name: String },
    /// Free-text author query
    Author { name: String },
    /// Single choice from a fixed option list
    Select {
        name: String,
        options: Vec<String>,
        default_index: i32,
    },
    /// Result ordering
    Sort {
        name: String,
        options: Vec<String>,
        default: SortDefault,
        can_ascend: bool,
    },
    /// On/off toggle
    Check { name: String, default: bool },
    /// A named group of nested filters
    Group { name: String, filters: Vec<Filter> },
    /// Include/exclude genre selection
    Genre {
        name: String,
        options: Vec<String>,
        can_exclude: bool,
        defaults: Vec<GenreSelection>,
    },
}

impl Filter {
    pub fn name(&self) -> &str {
        match self {
            Filter::Title { name }
            | Filter::Author { name }
            | Filter::Select { name, .. }
            | Filter::Sort { name, .. }
            | Filter::Check { name, .. }
            | Filter::Group { name, .. }
            | Filter::Genre { name, .. } => name,
        }
    }
}

/// A filter selection sent with a search call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Text {
        id: String,
        value: String,
    },
    Sort {
        id: String,
        index: i32,
        ascending: bool,
    },
    /// The checked flag travels as a zigzag i32.
    Check {
        id: String,
        value: i32,
    },
    Select {
        id: String,
        value: String,
    },
    MultiSelect {
        id: String,
        included: Vec<String>,
        excluded: Vec<String>,
    },
    /// Accepted on the wire; the host preserves it without interpreting
    /// the endpoints.
    Range {
        id: String,
        from: Option<f32>,
        to: Option<f32>,
    },
}

impl FilterValue {
    pub fn text(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            id: id.into(),
            value: value.into(),
        }
    }

    pub fn check(id: impl Into<String>, checked: bool) -> Self {
        Self::Check {
            id: id.into(),
            value: checked as i32,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            FilterValue::Text { id, .. }
            | FilterValue::Sort { id, .. }
            | FilterValue::Check { id, .. }
            | FilterValue::Select { id, .. }
            | FilterValue::MultiSelect { id, .. }
            | FilterValue::Range { id, .. } => id,
        }
    }

    pub fn is_checked(&self) -> bool {
        matches!(self, FilterValue::Check { value, .. } if *value != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_state_zigzag() {
        // -1 zigzags to 1, 1 zigzags to 2
        assert_eq!(
            postcard::to_allocvec(&SelectionState::Excluded).unwrap(),
            vec![1]
        );
        assert_eq!(postcard::to_allocvec(&SelectionState::None).unwrap(), vec![0]);
        assert_eq!(
            postcard::to_allocvec(&SelectionState::Included).unwrap(),
            vec![2]
        );
    }

    #[test]
    fn test_filter_value_variant_tags() {
        let text = FilterValue::text("t", "query");
        assert_eq!(postcard::to_allocvec(&text).unwrap()[0], 0);

        let check = FilterValue::check("c", true);
        let bytes = postcard::to_allocvec(&check).unwrap();
        assert_eq!(bytes[0], 2);
        // zigzag(1) == 2 at the tail
        assert_eq!(*bytes.last().unwrap(), 2);
    }

    #[test]
    fn test_filter_roundtrip() {
        let filter = Filter::Sort {
            name: "Sort".into(),
            options: vec!["a".into(), "b".into()],
            default: SortDefault {
                index: 0,
                ascending: false,
            },
            can_ascend: true,
        };
        let bytes = postcard::to_allocvec(&filter).unwrap();
        assert_eq!(bytes[0], 3);
        let back: Filter = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_genre_defaults_roundtrip() {
        let filter = Filter::Genre {
            name: "Genres".into(),
            options: vec!["x".into()],
            can_exclude: true,
            defaults: vec![GenreSelection {
                index: 0,
                state: SelectionState::Excluded,
            }],
        };
        let bytes = postcard::to_allocvec(&filter).unwrap();
        let back: Filter = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, filter);
    }
}
