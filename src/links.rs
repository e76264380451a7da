use crate::error::LinkResolutionError;
use itertools::Itertools;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

lazy_static! {
    static ref A: Selector = Selector::parse("a[href]").expect("Invalid selector");
}

/// Raw `href` values of every anchor in document order, trimmed, without
/// duplicates.
pub fn extract_hrefs(doc: &Html) -> Vec<&str> {
    doc.select(&A)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .unique()
        .collect()
}

/// Resolves `href` against `base` and keeps only http(s) targets.
pub fn resolve(base: &Url, href: &str) -> Result<Url, LinkResolutionError> {
    let url = base
        .join(href)
        .map_err(|source| LinkResolutionError::Invalid {
            base: base.to_string(),
            href: href.to_string(),
            source,
        })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(LinkResolutionError::UnsupportedScheme {
            scheme: scheme.to_string(),
            url: url.to_string(),
        }),
    }
}
