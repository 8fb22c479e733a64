//! Shared types for shiori
//!
//! This crate provides the domain entities exchanged between the shiori
//! runtime and content-source plugins: manga entries, chapters, pages,
//! filters, home layouts, listings, and the plugin manifest.
//!
//! Field and variant order on these types is the plugin wire order
//! (postcard encoding) and must not be re-arranged.

pub mod entry;
pub mod filter;
pub mod home;
pub mod listing;
pub mod manifest;

pub use entry::{
    Chapter, ContentRating, Manga, MangaPageResult, MangaStatus, MangaWithChapter, Page,
    PageContent, PageContext, UpdateStrategy, Viewer,
};

pub use filter::{Filter, FilterValue, GenreSelection, SelectionState, SortDefault};

pub use home::{HomeComponent, HomeComponentValue, HomeLayout, HomePartialResult, Link};

pub use listing::{Listing, ListingKind};

pub use manifest::{LanguageSelectType, SourceConfig, SourceInfo, SourceManifest};
