//! Home layout components
//!
//! A source's home screen is an ordered sequence of components. Components
//! may arrive progressively through the partial-result protocol during a
//! home call.

use crate::entry::{Manga, MangaWithChapter};
use crate::filter::FilterValue;
use crate::listing::Listing;
use serde::{Deserialize, Serialize};

/// A tappable link inside a home component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub title: String,
    pub subtitle: Option<String>,
    pub image_url: Option<String>,
    pub url: Option<String>,
}

impl Link {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            image_url: None,
            url: None,
        }
    }
}

/// The payload of a home component. Variant order is fixed by the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HomeComponentValue {
    ImageScroller {
        links: Vec<Link>,
    },
    BigScroller {
        entries: Vec<Manga>,
    },
    Scroller {
        entries: Vec<MangaWithChapter>,
        listing: Option<Listing>,
    },
    MangaList {
        ranking: bool,
        page_size: Option<i32>,
        entries: Vec<MangaWithChapter>,
        listing: Option<Listing>,
    },
    MangaChapterList {
        page_size: Option<i32>,
        entries: Vec<MangaWithChapter>,
        listing: Option<Listing>,
    },
    Filters(Vec<FilterValue>),
    Links(Vec<Link>),
}

/// One section of the home screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeComponent {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub value: HomeComponentValue,
}

/// The full home screen layout
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HomeLayout {
    pub components: Vec<HomeComponent>,
}

impl HomeLayout {
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// One emission of the partial-result stream during a home call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HomePartialResult {
    /// A complete layout snapshot.
    Layout(HomeLayout),
    /// A single component, replacing any earlier component with the
    /// same title.
    Component(HomeComponent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_variant_tags() {
        let layout = HomePartialResult::Layout(HomeLayout::default());
        assert_eq!(postcard::to_allocvec(&layout).unwrap()[0], 0);

        let component = HomePartialResult::Component(HomeComponent {
            title: Some("Hot".into()),
            subtitle: None,
            value: HomeComponentValue::Links(vec![]),
        });
        assert_eq!(postcard::to_allocvec(&component).unwrap()[0], 1);
    }

    #[test]
    fn test_component_roundtrip() {
        let component = HomeComponent {
            title: Some("Popular".into()),
            subtitle: Some("This week".into()),
            value: HomeComponentValue::MangaList {
                ranking: true,
                page_size: Some(6),
                entries: vec![],
                listing: Some(Listing::new("popular", "Popular")),
            },
        };
        let bytes = postcard::to_allocvec(&component).unwrap();
        let back: HomeComponent = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, component);
    }
}
