//! Image categories: where in the property a photo was taken and what it shows.

use serde::{Deserialize, Serialize};

pub const UNKNOWN_LABEL: &str = "unknown";

/// One `(location, subject, property_hash)` membership of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryKey {
    pub location: String,
    pub subject: String,
    pub property_hash: String,
}

impl CategoryKey {
    pub fn new(
        location: impl AsRef<str>,
        subject: impl AsRef<str>,
        property_hash: impl Into<String>,
    ) -> Self {
        Self {
            location: normalize_label(location.as_ref()),
            subject: normalize_label(subject.as_ref()),
            property_hash: property_hash.into(),
        }
    }
}

/// Lower-case, trimmed, spaces to underscores; empty becomes `unknown`.
pub fn normalize_label(label: &str) -> String {
    let label = label.trim().to_lowercase().replace([' ', '-'], "_");
    if label.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        label
    }
}

// (keyword, location, subject); first match wins, so specific rooms precede
// generic terms.
const CAPTION_RULES: &[(&str, &str, &str)] = &[
    ("floor plan", "plan", "floor_plan"),
    ("floorplan", "plan", "floor_plan"),
    ("aerial", "aerial", "overview"),
    ("drone", "aerial", "overview"),
    ("kitchen", "interior", "kitchen"),
    ("bath", "interior", "bathroom"),
    ("bedroom", "interior", "bedroom"),
    ("primary suite", "interior", "bedroom"),
    ("living", "interior", "living_room"),
    ("family room", "interior", "living_room"),
    ("dining", "interior", "dining_room"),
    ("laundry", "interior", "laundry"),
    ("office", "interior", "office"),
    ("pool", "exterior", "pool"),
    ("patio", "exterior", "patio"),
    ("backyard", "exterior", "yard"),
    ("back yard", "exterior", "yard"),
    ("yard", "exterior", "yard"),
    ("garage", "exterior", "garage"),
    ("front", "exterior", "facade"),
    ("exterior", "exterior", "facade"),
    ("street", "exterior", "street_view"),
];

/// Best-effort `(location, subject)` from a listing caption or alt text.
pub fn categorize_caption(caption: Option<&str>) -> (String, String) {
    let Some(caption) = caption else {
        return (UNKNOWN_LABEL.to_string(), UNKNOWN_LABEL.to_string());
    };
    let lower = caption.to_lowercase();
    CAPTION_RULES
        .iter()
        .find(|(keyword, _, _)| lower.contains(keyword))
        .map(|(_, location, subject)| (location.to_string(), subject.to_string()))
        .unwrap_or_else(|| (UNKNOWN_LABEL.to_string(), UNKNOWN_LABEL.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label(" Living Room "), "living_room");
        assert_eq!(normalize_label("front-yard"), "front_yard");
        assert_eq!(normalize_label("   "), UNKNOWN_LABEL);
    }

    #[test]
    fn test_categorize_caption() {
        assert_eq!(
            categorize_caption(Some("Remodeled Kitchen with island")),
            ("interior".to_string(), "kitchen".to_string())
        );
        assert_eq!(
            categorize_caption(Some("Sparkling POOL")),
            ("exterior".to_string(), "pool".to_string())
        );
        assert_eq!(
            categorize_caption(None),
            (UNKNOWN_LABEL.to_string(), UNKNOWN_LABEL.to_string())
        );
    }

    #[test]
    fn test_category_key_normalizes() {
        let key = CategoryKey::new("Interior", "Living Room", "abcd1234");
        assert_eq!(key.location, "interior");
        assert_eq!(key.subject, "living_room");
    }
}
