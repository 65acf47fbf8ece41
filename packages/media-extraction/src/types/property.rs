//! Property records and address hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A listing supplied by the domain layer.
///
/// Immutable from the pipeline's point of view; only the address is used for
/// identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,

    #[serde(default)]
    pub price: Option<u64>,

    #[serde(default)]
    pub beds: Option<f32>,

    #[serde(default)]
    pub baths: Option<f32>,

    #[serde(default)]
    pub sqft: Option<u32>,

    /// Direct listing URL when the domain layer already knows it
    #[serde(default)]
    pub listing_url: Option<String>,
}

impl Property {
    /// Create a property from its address parts.
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            zip: zip.into(),
            price: None,
            beds: None,
            baths: None,
            sqft: None,
            listing_url: None,
        }
    }

    /// Set the listing URL.
    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing_url = Some(url.into());
        self
    }

    /// Set the asking price.
    pub fn with_price(mut self, price: u64) -> Self {
        self.price = Some(price);
        self
    }

    /// `"<street>, <city>, <state> <zip>"`
    pub fn full_address(&self) -> String {
        format!(
            "{}, {}, {} {}",
            self.street.trim(),
            self.city.trim(),
            self.state.trim(),
            self.zip.trim()
        )
    }

    /// Short hash of the normalized full address.
    pub fn property_hash(&self) -> String {
        property_hash(&self.full_address())
    }
}

/// Lower-case and trim an address.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// First 8 hex characters of `sha256(normalize(address))`.
///
/// Deterministic and insensitive to case and surrounding whitespace.
pub fn property_hash(address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_address(address).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..8].to_string()
}
