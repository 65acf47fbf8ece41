//! Site profiles and the HTML listing parser shared by every strategy.

use indexmap::IndexMap;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ExtractorError, ExtractorResult};
use crate::extractors::Candidate;
use crate::types::property::Property;

const DEFAULT_IMAGE_SELECTOR: &str = "img";
const DEFAULT_ADDRESS_SELECTOR: &str = "h1";
const DEFAULT_IMAGE_PATTERN: &str = r#"https?://[^\s"'<>()]+?\.(?:jpe?g|png|webp)(?:\?[^\s"'<>()]*)?"#;

// Attributes that may carry the image URL, most specific first.
const IMAGE_ATTRS: &[&str] = &["data-src", "data-lazy-src", "srcset", "src", "content", "href"];
const CAPTION_ATTRS: &[&str] = &["alt", "title", "data-caption", "aria-label"];

/// How to search one listing site and read its pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Source name recorded for every image from this site
    pub name: String,

    /// Search URL with placeholders: `{address}`, `{street}`, `{city}`,
    /// `{state}`, `{zip}` (all URL-encoded)
    pub search_url_template: String,

    #[serde(default = "default_image_selector")]
    pub image_selector: String,

    #[serde(default = "default_address_selector")]
    pub address_selector: String,

    /// Regex used when selectors find no images
    #[serde(default)]
    pub image_url_pattern: Option<String>,

    /// Use `Property::listing_url` instead of searching when it is on this site
    #[serde(default = "default_true")]
    pub prefer_listing_url: bool,
}

fn default_image_selector() -> String {
    DEFAULT_IMAGE_SELECTOR.to_string()
}

fn default_address_selector() -> String {
    DEFAULT_ADDRESS_SELECTOR.to_string()
}

fn default_true() -> bool {
    true
}

impl SiteProfile {
    pub fn new(name: impl Into<String>, search_url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search_url_template: search_url_template.into(),
            image_selector: default_image_selector(),
            address_selector: default_address_selector(),
            image_url_pattern: None,
            prefer_listing_url: true,
        }
    }

    pub fn with_image_selector(mut self, selector: impl Into<String>) -> Self {
        self.image_selector = selector.into();
        self
    }

    pub fn with_address_selector(mut self, selector: impl Into<String>) -> Self {
        self.address_selector = selector.into();
        self
    }

    pub fn with_image_url_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.image_url_pattern = Some(pattern.into());
        self
    }

    pub fn with_prefer_listing_url(mut self, prefer: bool) -> Self {
        self.prefer_listing_url = prefer;
        self
    }

    /// Fill the template for `property`.
    pub fn search_url(&self, property: &Property) -> ExtractorResult<String> {
        let template = Url::parse(&self.search_url_template).map_err(|_| {
            ExtractorError::InvalidUrl {
                url: self.search_url_template.clone(),
            }
        })?;

        if self.prefer_listing_url {
            if let Some(listing) = property.listing_url.as_deref() {
                if let Ok(url) = Url::parse(listing) {
                    if url.host_str() == template.host_str() {
                        return Ok(url.to_string());
                    }
                }
            }
        }

        let filled = self
            .search_url_template
            .replace("{address}", &encode(&property.full_address()))
            .replace("{street}", &encode(&property.street))
            .replace("{city}", &encode(&property.city))
            .replace("{state}", &encode(&property.state))
            .replace("{zip}", &encode(&property.zip));

        Url::parse(&filled)
            .map(|u| u.to_string())
            .map_err(|_| ExtractorError::InvalidUrl { url: filled })
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.trim().as_bytes()).collect()
}

/// What a listing page yielded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedListing {
    pub address: Option<String>,
    pub candidates: Vec<Candidate>,
}

/// Compiled selectors for one profile.
#[derive(Debug)]
pub struct ListingParser {
    images: Selector,
    address: Selector,
    pattern: Regex,
}

impl ListingParser {
    pub fn new(profile: &SiteProfile) -> ExtractorResult<Self> {
        let selector = |s: &str| {
            Selector::parse(s)
                .map_err(|e| ExtractorError::Validation(format!("bad selector '{s}': {e}")))
        };
        let pattern = profile
            .image_url_pattern
            .as_deref()
            .unwrap_or(DEFAULT_IMAGE_PATTERN);

        Ok(Self {
            images: selector(&profile.image_selector)?,
            address: selector(&profile.address_selector)?,
            pattern: Regex::new(pattern)
                .map_err(|e| ExtractorError::Validation(format!("bad image pattern: {e}")))?,
        })
    }

    /// Extract the displayed address and image candidates from `html`.
    ///
    /// Relative URLs resolve against `base_url`. Duplicate URLs keep their
    /// first position and the first caption seen.
    pub fn parse(&self, html: &str, base_url: &str) -> ParsedListing {
        let document = Html::parse_document(html);
        let base = Url::parse(base_url).ok();

        let address = document
            .select(&self.address)
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .find(|text| !text.is_empty());

        let mut found: IndexMap<String, Option<String>> = IndexMap::new();
        for el in document.select(&self.images) {
            let element = el.value();
            let Some(raw) = IMAGE_ATTRS.iter().find_map(|a| element.attr(a)) else {
                continue;
            };
            let Some(url) = resolve(base.as_ref(), first_srcset_url(raw)) else {
                continue;
            };
            let caption = CAPTION_ATTRS
                .iter()
                .find_map(|a| element.attr(a))
                .map(collapse_whitespace)
                .filter(|c| !c.is_empty());
            found.entry(url).or_insert(caption);
        }

        if found.is_empty() {
            for m in self.pattern.find_iter(html) {
                if let Some(url) = resolve(base.as_ref(), m.as_str()) {
                    found.entry(url).or_insert(None);
                }
            }
        }

        ParsedListing {
            address,
            candidates: found
                .into_iter()
                .map(|(url, caption)| Candidate::Url { url, caption })
                .collect(),
        }
    }
}

fn first_srcset_url(raw: &str) -> &str {
    raw.split(',')
        .next()
        .and_then(|s| s.split_whitespace().next())
        .unwrap_or(raw)
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <h1 class="address">  4732 W Davis Rd,
              Glendale, AZ 85306 </h1>
          <div class="gallery">
            <img src="/photos/1.jpg" alt="Kitchen with island">
            <img data-src="https://cdn.example/2.webp" src="data:image/gif;base64,AAAA" alt="Backyard pool">
            <img srcset="https://cdn.example/3.jpg 1x, https://cdn.example/3@2x.jpg 2x">
            <img src="/photos/1.jpg" alt="dup">
          </div>
          <img class="logo" src="/logo.png">
        </body></html>
    "#;

    fn profile() -> SiteProfile {
        SiteProfile::new("listings", "https://listings.example/search?q={address}")
            .with_image_selector("div.gallery img")
            .with_address_selector("h1.address")
    }

    #[test]
    fn test_parse_listing() {
        let parser = ListingParser::new(&profile()).unwrap();
        let parsed = parser.parse(LISTING, "https://listings.example/home/1");

        assert_eq!(parsed.address.as_deref(), Some("4732 W Davis Rd, Glendale, AZ 85306"));
        assert_eq!(
            parsed.candidates,
            vec![
                Candidate::url_with_caption("https://listings.example/photos/1.jpg", "Kitchen with island"),
                Candidate::url_with_caption("https://cdn.example/2.webp", "Backyard pool"),
                Candidate::url("https://cdn.example/3.jpg"),
            ]
        );
    }

    #[test]
    fn test_regex_fallback() {
        let parser = ListingParser::new(&profile()).unwrap();
        let html = r#"<script>var photos = ["https://cdn.example/a.jpg","https://cdn.example/b.png?w=800"];</script>"#;
        let parsed = parser.parse(html, "https://listings.example/");
        assert_eq!(parsed.candidates.len(), 2);
        assert!(parsed.address.is_none());
    }

    #[test]
    fn test_bad_selector_rejected() {
        let err = ListingParser::new(&profile().with_image_selector("div[")).unwrap_err();
        assert!(matches!(err, ExtractorError::Validation(_)));
    }

    #[test]
    fn test_search_url_encodes_address() {
        let property = Property::new("4732 W Davis Rd", "Glendale", "AZ", "85306");
        let url = profile().search_url(&property).unwrap();
        assert_eq!(
            url,
            "https://listings.example/search?q=4732+W+Davis+Rd%2C+Glendale%2C+AZ+85306"
        );
    }

    #[test]
    fn test_search_url_prefers_listing_url_on_same_host() {
        let property = Property::new("1 A St", "Phoenix", "AZ", "85001")
            .with_listing_url("https://listings.example/home/42");
        assert_eq!(
            profile().search_url(&property).unwrap(),
            "https://listings.example/home/42"
        );

        let elsewhere = Property::new("1 A St", "Phoenix", "AZ", "85001")
            .with_listing_url("https://other.example/home/42");
        assert!(profile()
            .search_url(&elsewhere)
            .unwrap()
            .starts_with("https://listings.example/search"));
    }
}
