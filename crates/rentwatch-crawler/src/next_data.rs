//! Readers for the `__NEXT_DATA__` JSON block that Next.js pages embed.
//!
//! Search pages carry an Apollo cache under `props.pageProps.apolloCache`:
//! `ROOT_QUERY` holds the result count, and every `Advert:<id>` entry carries
//! the listing's relative `uri`. Listing pages additionally carry
//! `props.pageProps.origAdvert`, whose `publicImages` are either inline
//! objects or `{"__ref": "<cache key>"}` pointers into the same cache.

use regex::Regex;
use serde_json::{Map, Value};

use rentwatch_core::NewImage;

use crate::error::CrawlError;

const NEXT_DATA_ELEMENT: &str =
    r#"(?is)<script[^>]*\bid\s*=\s*["']__NEXT_DATA__["'][^>]*>(.*?)</script>"#;

fn element_pattern() -> Result<Regex, CrawlError> {
    Regex::new(NEXT_DATA_ELEMENT).map_err(|e| CrawlError::parse("__NEXT_DATA__ pattern", e.to_string()))
}

/// Locates the `<script id="__NEXT_DATA__">` element in `html`.
///
/// Returns `(element, body)`: the whole element including its tags, and the
/// raw JSON text inside it.
pub(crate) fn find_element(html: &str) -> Result<Option<(&str, &str)>, CrawlError> {
    let pattern = element_pattern()?;
    Ok(pattern.captures(html).and_then(|cap| {
        let element = cap.get(0)?.as_str();
        let body = cap.get(1)?.as_str();
        Some((element, body))
    }))
}

/// Extracts and parses the `__NEXT_DATA__` block.
///
/// # Errors
///
/// Returns [`CrawlError::Parse`] if the element is missing, empty, or not JSON.
pub fn read_next_data(html: &str) -> Result<Value, CrawlError> {
    let (_, body) = find_element(html)?
        .ok_or_else(|| CrawlError::parse("__NEXT_DATA__", "script element not found"))?;
    let body = body.trim();
    if body.is_empty() {
        return Err(CrawlError::parse("__NEXT_DATA__", "script element is empty"));
    }
    serde_json::from_str(body).map_err(|e| CrawlError::parse("__NEXT_DATA__", e.to_string()))
}

fn page_props(data: &Value) -> Option<&Map<String, Value>> {
    data.get("props")?.get("pageProps")?.as_object()
}

fn apollo_cache(data: &Value) -> Option<&Map<String, Value>> {
    page_props(data)?.get("apolloCache")?.as_object()
}

/// Reads the total number of search results.
///
/// `ROOT_QUERY` is keyed by the serialised query arguments, so the count is
/// taken from the first entry that carries an integer `totalCount`.
///
/// # Errors
///
/// Returns [`CrawlError::Parse`] if no such entry exists.
pub fn total_count(data: &Value) -> Result<u64, CrawlError> {
    let root = apollo_cache(data)
        .and_then(|cache| cache.get("ROOT_QUERY"))
        .and_then(Value::as_object)
        .ok_or_else(|| CrawlError::parse("apolloCache.ROOT_QUERY", "missing"))?;

    root.values()
        .find_map(|entry| entry.get("totalCount").and_then(Value::as_u64))
        .ok_or_else(|| CrawlError::parse("apolloCache.ROOT_QUERY", "no entry carries totalCount"))
}

/// `ceil(total / page_size)`; zero when `page_size` is zero.
#[must_use]
pub fn page_count(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size))
}

/// Relative URIs of every `Advert:` entry in the cache, in cache key order.
#[must_use]
pub fn advert_uris(data: &Value) -> Vec<String> {
    let Some(cache) = apollo_cache(data) else {
        return Vec::new();
    };
    cache
        .iter()
        .filter(|(key, _)| key.starts_with("Advert:"))
        .filter_map(|(_, entry)| entry.get("uri").and_then(Value::as_str))
        .filter(|uri| !uri.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Joins a listing `uri` onto the listing base URL.
#[must_use]
pub fn listing_url(base_url: &str, uri: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        uri.trim_start_matches('/')
    )
}

/// Image references of a listing page, ready to be stored as pending rows.
///
/// Returns an empty list when the page has no `origAdvert`. Images whose URL
/// cannot be resolved are skipped.
#[must_use]
pub fn image_refs(data: &Value, object_prefix: &str) -> Vec<NewImage> {
    let Some(props) = page_props(data) else {
        return Vec::new();
    };
    let Some(advert) = props.get("origAdvert") else {
        return Vec::new();
    };
    let Some(listing_id) = advert.get("id").and_then(scalar_text) else {
        return Vec::new();
    };
    let cache = props.get("apolloCache").and_then(Value::as_object);
    let prefix = object_prefix.trim_end_matches('/');

    advert
        .get("publicImages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|reference| resolve_image(reference, cache))
        .filter_map(image_url)
        .filter_map(|url| {
            let filename = url_filename(&url)?;
            Some(NewImage {
                listing_id: listing_id.clone(),
                object_name: format!("{prefix}/{listing_id}/{filename}"),
                filename,
                url,
            })
        })
        .collect()
}

fn resolve_image<'a>(reference: &'a Value, cache: Option<&'a Map<String, Value>>) -> Option<&'a Value> {
    match reference.get("__ref").and_then(Value::as_str) {
        Some(key) => cache?.get(key),
        None => Some(reference),
    }
}

/// `url` if present, otherwise the first string field whose key starts with
/// `url` (the cache stores size variants as `url({"size":...})`).
fn image_url(image: &Value) -> Option<String> {
    let object = image.as_object()?;
    if let Some(url) = object.get("url").and_then(Value::as_str) {
        return Some(url.to_owned());
    }
    object
        .iter()
        .filter(|(key, _)| key.starts_with("url"))
        .find_map(|(_, value)| value.as_str())
        .map(str::to_owned)
}

fn url_filename(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    (!name.is_empty()).then(|| name.to_owned())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
