//! Manga, chapter, and page entities
//!
//! These are the logical payloads exchanged across the plugin ABI. The
//! struct field order is the postcard wire order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Publication status of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MangaStatus {
    #[default]
    Unknown = 0,
    Ongoing = 1,
    Completed = 2,
    Cancelled = 3,
    Hiatus = 4,
}

impl MangaStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ongoing,
            2 => Self::Completed,
            3 => Self::Cancelled,
            4 => Self::Hiatus,
            _ => Self::Unknown,
        }
    }
}

/// Content rating of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentRating {
    #[default]
    Safe = 0,
    Suggestive = 1,
    Nsfw = 2,
}

impl ContentRating {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Suggestive,
            2 => Self::Nsfw,
            _ => Self::Safe,
        }
    }
}

/// Preferred reader presentation for a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Viewer {
    #[default]
    Unknown = 0,
    RightToLeft = 1,
    LeftToRight = 2,
    Vertical = 3,
    Webtoon = 4,
}

impl Viewer {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::RightToLeft,
            2 => Self::LeftToRight,
            3 => Self::Vertical,
            4 => Self::Webtoon,
            _ => Self::Unknown,
        }
    }
}

/// How the library should schedule refreshes for a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateStrategy {
    #[default]
    Always = 0,
    Never = 1,
}

impl UpdateStrategy {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Never,
            _ => Self::Always,
        }
    }
}

macro_rules! byte_enum_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u8(*self as u8)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                Ok(Self::from_u8(u8::deserialize(deserializer)?))
            }
        }
    };
}

byte_enum_serde!(MangaStatus);
byte_enum_serde!(ContentRating);
byte_enum_serde!(Viewer);
byte_enum_serde!(UpdateStrategy);

/// A series as exposed by a content source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manga {
    pub key: String,
    pub title: String,
    pub cover: Option<String>,
    pub authors: Option<Vec<String>>,
    pub artists: Option<Vec<String>>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: MangaStatus,
    pub content_rating: ContentRating,
    pub viewer: Viewer,
    pub update_strategy: UpdateStrategy,
    pub next_update_time: Option<i64>,
    pub chapters: Option<Vec<Chapter>>,
}

impl Manga {
    /// A minimal entry with only the required fields set
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            cover: None,
            authors: None,
            artists: None,
            description: None,
            url: None,
            tags: None,
            status: MangaStatus::Unknown,
            content_rating: ContentRating::Safe,
            viewer: Viewer::Unknown,
            update_strategy: UpdateStrategy::Always,
            next_update_time: None,
            chapters: None,
        }
    }

    /// Merge details fetched later into an existing entry, preferring the
    /// newer value wherever the update carries one.
    pub fn copy_from(&mut self, other: Manga) {
        self.title = other.title;
        if other.cover.is_some() {
            self.cover = other.cover;
        }
        if other.authors.is_some() {
            self.authors = other.authors;
        }
        if other.artists.is_some() {
            self.artists = other.artists;
        }
        if other.description.is_some() {
            self.description = other.description;
        }
        if other.url.is_some() {
            self.url = other.url;
        }
        if other.tags.is_some() {
            self.tags = other.tags;
        }
        self.status = other.status;
        self.content_rating = other.content_rating;
        self.viewer = other.viewer;
        self.update_strategy = other.update_strategy;
        if other.next_update_time.is_some() {
            self.next_update_time = other.next_update_time;
        }
        if other.chapters.is_some() {
            self.chapters = other.chapters;
        }
    }
}

/// One chapter of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub key: String,
    pub title: Option<String>,
    pub chapter_number: Option<f32>,
    pub volume_number: Option<f32>,
    /// Upload time, seconds since the Unix epoch
    pub date_uploaded: Option<i64>,
    pub scanlators: Option<Vec<String>>,
    pub url: Option<String>,
    pub language: Option<String>,
    pub thumbnail: Option<String>,
    pub locked: bool,
}

impl Chapter {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: None,
            chapter_number: None,
            volume_number: None,
            date_uploaded: None,
            scanlators: None,
            url: None,
            language: None,
            thumbnail: None,
            locked: false,
        }
    }
}

/// Request-context map attached to a page or image request
pub type PageContext = BTreeMap<String, String>;

/// The content of a single reader page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageContent {
    /// An image URL, optionally with a context map the source needs when
    /// the image is fetched or post-processed.
    Url(String, Option<PageContext>),
    /// Literal text content.
    Text(String),
    /// A file inside an externally hosted zip archive.
    Zip(String, String),
}

/// One page of a chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub content: PageContent,
    pub thumbnail: Option<String>,
    pub has_description: bool,
    pub description: Option<String>,
}

impl Page {
    /// A plain image-url page
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            content: PageContent::Url(url.into(), None),
            thumbnail: None,
            has_description: false,
            description: None,
        }
    }
}

/// One page of search or listing results
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MangaPageResult {
    pub entries: Vec<Manga>,
    pub has_next_page: bool,
}

/// A series paired with its latest chapter, as used by home components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangaWithChapter {
    pub manga: Manga,
    pub chapter: Option<Chapter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_u8_fallback() {
        assert_eq!(MangaStatus::from_u8(2), MangaStatus::Completed);
        assert_eq!(MangaStatus::from_u8(200), MangaStatus::Unknown);
    }

    #[test]
    fn test_manga_wire_prefix() {
        // key and title lead the encoding, followed by the six optional
        // metadata fields as None bytes and the four enum bytes.
        let manga = Manga::new("m1", "T");
        let bytes = postcard::to_allocvec(&manga).unwrap();
        assert_eq!(&bytes[..2], &[2, b'm']);
        assert_eq!(&bytes[2..4], &[b'1', 1]);
        assert_eq!(bytes[4], b'T');
        // cover..tags (6 Nones), status, rating, viewer, strategy,
        // next_update_time (None), chapters (None)
        assert_eq!(&bytes[5..], &[0u8; 12]);
    }

    #[test]
    fn test_page_roundtrip() {
        let page = Page::url("https://example.com/1.png");
        let bytes = postcard::to_allocvec(&page).unwrap();
        // Url variant tag is 0
        assert_eq!(bytes[0], 0);
        let back: Page = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_chapter_roundtrip() {
        let mut chapter = Chapter::new("c1");
        chapter.chapter_number = Some(3.5);
        chapter.scanlators = Some(vec!["group".into()]);
        let bytes = postcard::to_allocvec(&chapter).unwrap();
        let back: Chapter = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, chapter);
    }

    #[test]
    fn test_copy_from_keeps_existing_metadata() {
        let mut base = Manga::new("m1", "Old");
        base.cover = Some("cover.png".into());
        let update = Manga::new("m1", "New");
        base.copy_from(update);
        assert_eq!(base.title, "New");
        assert_eq!(base.cover.as_deref(), Some("cover.png"));
    }
}
