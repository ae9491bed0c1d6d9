//! URL absolutization helpers

use std::collections::HashSet;
use url::Url;

/// Resolve a reference against a base
///
/// Strings that already parse as absolute URLs come back unchanged.
fn resolve(value: &str, base: &Url) -> Option<Url> {
    match Url::parse(value) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(value).ok(),
        Err(_) => None,
    }
}

/// Absolute form of every string, as strings
///
/// Scheme-bearing entries pass through verbatim; schemeless entries are
/// resolved against `base`; entries that cannot be resolved are dropped.
pub fn to_absolute_strings<I, S>(values: I, base: &Url) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|value| {
            let value = value.as_ref();
            match Url::parse(value) {
                Ok(_) => Some(value.to_string()),
                Err(_) => resolve(value, base).map(String::from),
            }
        })
        .collect()
}

/// Absolute form of every string, as URLs
pub fn to_absolute_urls<I, S>(values: I, base: &Url) -> HashSet<Url>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|value| resolve(value.as_ref(), base))
        .collect()
}

/// Entries that are already absolute, for when no base is known
pub fn absolute_only<I, S>(values: I) -> HashSet<Url>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|value| Url::parse(value.as_ref()).ok())
        .collect()
}
