//! Document metadata record

use serde::Serialize;
use std::collections::HashMap;
use url::Url;

/// Metadata read from the document head
///
/// Every field is independently optional; a missing node or an empty value
/// is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub og_title: Option<String>,
    pub og_image: Option<Url>,
    pub canonical: Option<Url>,
    pub lang: Option<String>,
}

impl Metadata {
    /// Build from the fields returned by the metadata query
    pub(crate) fn from_fields(mut fields: HashMap<String, String>) -> Self {
        let mut text = |key: &str| fields.remove(key).filter(|value| !value.trim().is_empty());

        let title = text("title");
        let description = text("description");
        let og_title = text("ogTitle");
        let og_image = text("ogImage").and_then(|value| Url::parse(&value).ok());
        let canonical = text("canonical").and_then(|value| Url::parse(&value).ok());
        let lang = text("lang");

        Self {
            title,
            description,
            og_title,
            og_image,
            canonical,
            lang,
        }
    }
}
