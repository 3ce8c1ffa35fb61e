//! Scrubbing applied to free-text event fields before they are stored.
//!
//! The scrub is best-effort: it removes query strings, fragments and the most
//! common contact-detail shapes, it does not guarantee complete PII removal.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const MAX_PAGE_PATH_CHARS: usize = 500;
pub const MAX_ELEMENT_TEXT_CHARS: usize = 200;

static PLACEHOLDER_BASE: Lazy<Url> =
    Lazy::new(|| Url::parse("https://example.com").expect("placeholder base url is valid"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9_.-]+@[A-Za-z0-9_.-]+\.[A-Za-z0-9_]+").expect("email pattern is valid")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[0-9]{3}[-.]?[0-9]{3}[-.]?[0-9]{4}\b").expect("phone pattern is valid")
});

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Reduce a page location to its path component. Relative paths are resolved
/// against a placeholder origin; the origin never leaks into the result.
pub fn sanitize_page_path(page_path: Option<&str>) -> Option<String> {
    let page_path = blank(page_path)?;

    let path = match PLACEHOLDER_BASE.join(page_path) {
        Ok(url) => url.path().to_owned(),
        Err(_) => {
            let end = page_path.find(['?', '#']).unwrap_or(page_path.len());
            page_path[..end].to_owned()
        }
    };

    Some(truncate_chars(&path, MAX_PAGE_PATH_CHARS))
}

/// Mask email addresses and North-American phone numbers, then truncate.
pub fn sanitize_element_text(element_text: Option<&str>) -> Option<String> {
    let element_text = blank(element_text)?;

    let scrubbed = EMAIL.replace_all(element_text, "[email]");
    let scrubbed = PHONE.replace_all(&scrubbed, "[phone]");

    Some(truncate_chars(&scrubbed, MAX_ELEMENT_TEXT_CHARS))
}
