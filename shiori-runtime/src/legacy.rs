//! Legacy object-descriptor ABI conversions
//!
//! The earlier calling convention exchanges generic object values with
//! well-known field names instead of postcard payloads. This module maps
//! between those objects and the domain types.

use crate::value::Value;
use shiori_types::{
    Chapter, ContentRating, FilterValue, Manga, MangaPageResult, MangaStatus, Page, PageContent,
    Viewer,
};
use std::collections::BTreeMap;

fn set_string(map: &mut BTreeMap<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        if !value.is_empty() {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
}

/// Build a legacy manga object (`id`/`title`/`cover`/...).
pub fn manga_to_object(manga: &Manga) -> Value {
    let mut map = BTreeMap::new();
    map.insert("id".to_string(), Value::String(manga.key.clone()));
    map.insert("title".to_string(), Value::String(manga.title.clone()));
    set_string(&mut map, "cover", manga.cover.as_deref());
    set_string(
        &mut map,
        "author",
        manga.authors.as_ref().and_then(|a| a.first()).map(String::as_str),
    );
    set_string(
        &mut map,
        "artist",
        manga.artists.as_ref().and_then(|a| a.first()).map(String::as_str),
    );
    set_string(&mut map, "description", manga.description.as_deref());
    set_string(&mut map, "url", manga.url.as_deref());
    if let Some(tags) = &manga.tags {
        map.insert(
            "categories".to_string(),
            Value::Array(tags.iter().cloned().map(Value::String).collect()),
        );
    }
    map.insert("status".to_string(), Value::Int(manga.status as i64));
    map.insert("nsfw".to_string(), Value::Int(manga.content_rating as i64));
    map.insert("viewer".to_string(), Value::Int(manga.viewer as i64));
    Value::Object(map)
}

fn get_str(map: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::to_display_string).filter(|s| !s.is_empty())
}

fn get_int(map: &BTreeMap<String, Value>, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_int)
}

fn get_float(map: &BTreeMap<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_float)
}

/// Read a legacy manga object back into the domain type.
pub fn object_to_manga(value: &Value) -> Option<Manga> {
    let Value::Object(map) = value else {
        return None;
    };
    let key = get_str(map, "id")?;
    let mut manga = Manga::new(key, get_str(map, "title").unwrap_or_default());
    manga.cover = get_str(map, "cover");
    manga.authors = get_str(map, "author").map(|a| vec![a]);
    manga.artists = get_str(map, "artist").map(|a| vec![a]);
    manga.description = get_str(map, "description");
    manga.url = get_str(map, "url");
    if let Some(Value::Array(items)) = map.get("categories") {
        let tags: Vec<String> = items
            .iter()
            .filter_map(Value::to_display_string)
            .collect();
        if !tags.is_empty() {
            manga.tags = Some(tags);
        }
    }
    manga.status = MangaStatus::from_u8(get_int(map, "status").unwrap_or(0) as u8);
    manga.content_rating = ContentRating::from_u8(get_int(map, "nsfw").unwrap_or(0) as u8);
    manga.viewer = Viewer::from_u8(get_int(map, "viewer").unwrap_or(0) as u8);
    Some(manga)
}

/// Read a legacy `{manga: [...], hasMore: bool}` result object.
pub fn object_to_page_result(value: &Value) -> Option<MangaPageResult> {
    let Value::Object(map) = value else {
        return None;
    };
    let entries = match map.get("manga") {
        Some(Value::Array(items)) => items.iter().filter_map(object_to_manga).collect(),
        _ => Vec::new(),
    };
    let has_next_page = map
        .get("hasMore")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some(MangaPageResult {
        entries,
        has_next_page,
    })
}

/// Read a legacy chapter object back into the domain type.
pub fn object_to_chapter(value: &Value) -> Option<Chapter> {
    let Value::Object(map) = value else {
        return None;
    };
    let mut chapter = Chapter::new(get_str(map, "id")?);
    chapter.title = get_str(map, "title");
    chapter.volume_number = get_float(map, "volume").filter(|v| *v >= 0.0).map(|v| v as f32);
    chapter.chapter_number = get_float(map, "chapter").filter(|v| *v >= 0.0).map(|v| v as f32);
    chapter.date_uploaded = map
        .get("dateUpdated")
        .and_then(Value::as_date)
        .filter(|d| *d > 0.0)
        .map(|d| d as i64);
    chapter.scanlators = get_str(map, "scanlator").map(|s| vec![s]);
    chapter.url = get_str(map, "url");
    chapter.language = get_str(map, "lang");
    Some(chapter)
}

/// Read a legacy page object back into the domain type.
pub fn object_to_page(value: &Value) -> Option<Page> {
    let Value::Object(map) = value else {
        return None;
    };
    let content = if let Some(url) = get_str(map, "url") {
        PageContent::Url(url, None)
    } else if let Some(text) = get_str(map, "text") {
        PageContent::Text(text)
    } else if let Some(base64) = get_str(map, "base64") {
        PageContent::Url(format!("data:;base64,{base64}"), None)
    } else {
        return None;
    };
    Some(Page {
        content,
        thumbnail: None,
        has_description: false,
        description: None,
    })
}

/// Build the legacy filter object for a selected filter value.
pub fn filter_value_to_object(filter: &FilterValue) -> Value {
    let mut map = BTreeMap::new();
    map.insert("name".to_string(), Value::String(filter.id().to_string()));
    let value = match filter {
        FilterValue::Text { value, .. } | FilterValue::Select { value, .. } => {
            Value::String(value.clone())
        }
        FilterValue::Sort {
            index, ascending, ..
        } => {
            let mut sort = BTreeMap::new();
            sort.insert("index".to_string(), Value::Int(*index as i64));
            sort.insert("ascending".to_string(), Value::Bool(*ascending));
            Value::Object(sort)
        }
        FilterValue::Check { value, .. } => Value::Int(*value as i64),
        FilterValue::MultiSelect { included, excluded, .. } => {
            let mut select = BTreeMap::new();
            select.insert(
                "included".to_string(),
                Value::Array(included.iter().cloned().map(Value::String).collect()),
            );
            select.insert(
                "excluded".to_string(),
                Value::Array(excluded.iter().cloned().map(Value::String).collect()),
            );
            Value::Object(select)
        }
        FilterValue::Range { from, to, .. } => {
            let mut range = BTreeMap::new();
            if let Some(from) = from {
                range.insert("from".to_string(), Value::Float(*from as f64));
            }
            if let Some(to) = to {
                range.insert("to".to_string(), Value::Float(*to as f64));
            }
            Value::Object(range)
        }
    };
    map.insert("value".to_string(), value);
    Value::Object(map)
}

/// Legacy search calls carry the query as a synthetic title filter.
pub fn query_to_object(query: &str) -> Value {
    let mut map = BTreeMap::new();
    map.insert("name".to_string(), Value::String("title".to_string()));
    map.insert("value".to_string(), Value::String(query.to_string()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manga_object_roundtrip() {
        let mut manga = Manga::new("m1", "Title");
        manga.cover = Some("c.png".into());
        manga.authors = Some(vec!["Author".into()]);
        manga.tags = Some(vec!["action".into()]);
        manga.status = MangaStatus::Ongoing;
        manga.content_rating = ContentRating::Nsfw;

        let object = manga_to_object(&manga);
        let back = object_to_manga(&object).unwrap();
        assert_eq!(back.key, "m1");
        assert_eq!(back.cover.as_deref(), Some("c.png"));
        assert_eq!(back.status, MangaStatus::Ongoing);
        assert_eq!(back.content_rating, ContentRating::Nsfw);
        assert_eq!(back.tags, Some(vec!["action".to_string()]));
    }

    #[test]
    fn test_page_result_object() {
        let mut map = BTreeMap::new();
        map.insert(
            "manga".to_string(),
            Value::Array(vec![manga_to_object(&Manga::new("a", "A"))]),
        );
        map.insert("hasMore".to_string(), Value::Bool(true));
        let result = object_to_page_result(&Value::Object(map)).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert!(result.has_next_page);
    }

    #[test]
    fn test_page_object_variants() {
        let mut url = BTreeMap::new();
        url.insert("index".to_string(), Value::Int(0));
        url.insert("url".to_string(), Value::String("https://x/1.png".into()));
        let page = object_to_page(&Value::Object(url)).unwrap();
        assert!(matches!(page.content, PageContent::Url(_, None)));

        let mut text = BTreeMap::new();
        text.insert("text".to_string(), Value::String("hello".into()));
        let page = object_to_page(&Value::Object(text)).unwrap();
        assert!(matches!(page.content, PageContent::Text(_)));
    }
}
