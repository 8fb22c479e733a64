//! Plugin manifest (`source.json`) model
//!
//! The package extractor hands the runtime a parsed manifest; a separate
//! `filters.json` array, when present, is merged into [`SourceManifest::filters`]
//! by the extractor before the runtime sees it.

use crate::entry::ContentRating;
use crate::filter::Filter;
use crate::listing::Listing;
use serde::{Deserialize, Serialize};

/// Identity block of a source manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub content_rating: Option<ContentRating>,
}

/// How the source wants the language picker to behave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageSelectType {
    #[default]
    Single,
    Multi,
}

/// Optional behavior switches in the manifest
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default)]
    pub hides_filters_while_searching: bool,
    #[serde(default)]
    pub supports_author_search: bool,
    #[serde(default)]
    pub supports_tag_search: bool,
    #[serde(default)]
    pub allows_base_url_select: bool,
    #[serde(default)]
    pub language_select_type: LanguageSelectType,
    #[serde(default)]
    pub handles_basic_login: bool,
    #[serde(default)]
    pub handles_web_login: bool,
}

/// A parsed `source.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceManifest {
    pub info: SourceInfo,
    #[serde(default)]
    pub listings: Vec<Listing>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub config: Option<SourceConfig>,
}

impl SourceManifest {
    /// A minimal manifest, mostly useful in tests
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: SourceInfo {
                id: id.into(),
                name: name.into(),
                lang: None,
                version: 1,
                urls: Vec::new(),
                languages: Vec::new(),
                content_rating: None,
            },
            listings: Vec::new(),
            filters: Vec::new(),
            config: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parses_with_defaults() {
        let manifest: SourceManifest = serde_json::from_str(
            r#"{"info": {"id": "en.example", "name": "Example", "version": 3}}"#,
        )
        .unwrap();
        assert_eq!(manifest.info.id, "en.example");
        assert_eq!(manifest.info.version, 3);
        assert!(manifest.listings.is_empty());
        assert!(manifest.config.is_none());
    }

    #[test]
    fn test_manifest_config_flags() {
        let manifest: SourceManifest = serde_json::from_str(
            r#"{
                "info": {"id": "en.example", "name": "Example"},
                "config": {"supportsAuthorSearch": true, "languageSelectType": "multi"}
            }"#,
        )
        .unwrap();
        let config = manifest.config.unwrap();
        assert!(config.supports_author_search);
        assert_eq!(config.language_select_type, LanguageSelectType::Multi);
    }
}
