//! URL classification and canonicalization.
//!
//! Canonical URLs are the frontier's deduplication key: scheme
//! normalization, `ref` segment stripping and query-parameter allow-listing
//! collapse tracking and session variants onto one row. Canonicalization is
//! idempotent, and a malformed URL canonicalizes to the empty string, which
//! callers treat as "drop".

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const AMAZON_BASE_URL: &str = "https://amazon.com";

static ASIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"dp(?:/|%2[Ff])([A-Z0-9]{10})").expect("valid asin pattern"));

// Language-specific variants like /-/es/ duplicate the English catalog.
static LOCALE_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/-/[a-z]{2}/").expect("valid locale pattern"));

/// Query parameters that change which results a search/category page shows.
/// Everything else is tracking or session state and gets dropped.
const ALLOWED_SEARCH_PARAMS: [&str; 13] = [
    "rnid",
    "node",
    "bbn",
    "keywords",
    "k",
    "c",
    "i",
    "page",
    "sprefix",
    "search-alias",
    "field-author",
    "field-keywords",
    "text",
];

/// Extracts the 10-character ASIN following `dp/` (also in URL-encoded
/// form). `None` when the URL carries no product id.
pub fn asin_from_url(url: &str) -> Option<String> {
    ASIN_RE
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str().trim().to_string())
}

/// Canonical product-detail URL for an ASIN.
pub fn product_url(asin: &str) -> String {
    format!("{AMAZON_BASE_URL}/dp/{asin}")
}

/// Whether the URL leads to more catalog: search or category pages.
/// Locale-prefixed and Amazon-Video URLs are never relevant.
pub fn is_relevant_url(url: &str) -> bool {
    if LOCALE_SEGMENT_RE.is_match(url) {
        return false;
    }
    is_search_url(url) || is_category_url(url)
}

fn is_search_url(url: &str) -> bool {
    url.contains("/s?") || url.contains("/s/")
}

fn is_category_url(url: &str) -> bool {
    if url.contains("/Amazon-Video/") {
        return false;
    }
    url.contains("/b?") || url.contains("/b/")
}

/// Canonicalizes an href: absolutizes against the site base when the scheme
/// is missing, then strips `ref` path segments and non-allow-listed query
/// parameters. Returns the empty string for URLs that don't parse.
pub fn with_base_url(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return filter_query_params(href);
    }

    let href = if href.starts_with('/') {
        format!("{AMAZON_BASE_URL}{href}")
    } else {
        format!("{AMAZON_BASE_URL}/{href}")
    };
    filter_query_params(&href)
}

fn filter_query_params(raw_url: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw_url) else {
        return String::new();
    };

    // Allow-listed parameters only, re-encoded in sorted key order so
    // equivalent URLs compare equal as strings.
    let mut kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| ALLOWED_SEARCH_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    kept.sort();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        parsed.set_query(Some(&query));
    }

    // Drop "ref=..." / "ref-..." path segments.
    let segments: Vec<String> = parsed
        .path()
        .split('/')
        .filter(|segment| {
            !segment.is_empty() && !segment.starts_with("ref=") && !segment.starts_with("ref-")
        })
        .map(str::to_string)
        .collect();
    parsed.set_path(&format!("/{}", segments.join("/")));

    parsed.to_string()
}
