//! Polymarket event URL validation and title derivation

use url::Url;

use crate::{Error, Result};

const POLYMARKET_HOST: &str = "polymarket.com";

/// A validated Polymarket event URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventUrl {
    /// Normalized URL
    pub url: Url,
    /// Event slug (path segment after `/event/`), if present
    pub slug: Option<String>,
    /// Human-readable title derived from the slug
    pub title: Option<String>,
}

impl EventUrl {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

/// Validate a user-submitted event URL and derive its title
pub fn parse_event_url(input: &str) -> Result<EventUrl> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("event_url is required".to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| Error::InvalidInput(format!("event_url is not a valid URL: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::InvalidInput(format!(
            "event_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let is_polymarket =
        host == POLYMARKET_HOST || host.ends_with(&format!(".{}", POLYMARKET_HOST));
    if !is_polymarket {
        return Err(Error::InvalidInput(format!(
            "event_url must point to {}, got '{}'",
            POLYMARKET_HOST, host
        )));
    }

    let slug = event_slug(&url);
    let title = derive_title(&url);

    Ok(EventUrl { url, slug, title })
}

/// Derive a title from any URL with an `/event/<slug>` path
///
/// `https://polymarket.com/event/what-will-be-the-top-global-netflix-movie-this-week-638`
/// becomes `What Will Be The Top Global Netflix Movie This Week`.
pub fn derive_title(url: &Url) -> Option<String> {
    event_slug(url).as_deref().and_then(title_from_slug)
}

fn event_slug(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == "event")?;
    segments
        .next()
        .filter(|slug| !slug.is_empty())
        .map(str::to_string)
}

fn title_from_slug(slug: &str) -> Option<String> {
    let slug = strip_numeric_suffix(slug);

    let title = slug
        .split('-')
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Drop a trailing `-<digits>` market id
fn strip_numeric_suffix(slug: &str) -> &str {
    match slug.rsplit_once('-') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => head,
        _ => slug,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
