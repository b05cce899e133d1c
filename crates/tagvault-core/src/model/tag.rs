//! The `category:value` tag type.

use crate::error::VaultError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single tag attached to a media record.
///
/// Case is preserved as written; comparisons made by index and filter
/// consumers go through [`Tag::matches_ignore_case`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Tag {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub value: String,
}

impl Tag {
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
        }
    }

    /// Compare category and value without regard to ASCII case.
    pub fn matches_ignore_case(&self, category: &str, value: &str) -> bool {
        self.category.eq_ignore_ascii_case(category) && self.value.eq_ignore_ascii_case(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.value)
    }
}

impl FromStr for Tag {
    type Err = VaultError;

    /// Split on the first `:`; the value may itself contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((category, value)) => Ok(Tag::new(category, value)),
            None => Err(VaultError::Validation {
                field: "tag".to_string(),
                message: format!("expected category:value, got {:?}", s),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let tag = Tag::new("class", "cat");
        assert_eq!(tag.to_string(), "class:cat");

        let parsed: Tag = "meta:url:http://x".parse().unwrap();
        assert_eq!(parsed.category, "meta");
        assert_eq!(parsed.value, "url:http://x");
    }

    #[test]
    fn test_parse_without_colon_fails() {
        assert!("nocolon".parse::<Tag>().is_err());
    }

    #[test]
    fn test_matches_ignore_case() {
        let tag = Tag::new("Class", "Cat");
        assert!(tag.matches_ignore_case("class", "CAT"));
        assert!(!tag.matches_ignore_case("class", "dog"));
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let tag: Tag = serde_json::from_str(r#"{"category": "style"}"#).unwrap();
        assert_eq!(tag, Tag::new("style", ""));
    }
}
