//! Fetcher options, results and errors

use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Fetch validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The response could not be read
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Non-2xx status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Declared content type differs from the expected one
    #[error("Content type mismatch: expected {expected}, found {found}")]
    ContentTypeMismatch { expected: String, found: String },

    /// Body larger than allowed
    #[error("Response of {size} bytes exceeds the {max} byte limit")]
    ExceedMaxSize { max: usize, size: usize },

    /// Body is not valid in the requested encoding
    #[error("Body is not valid {0}")]
    Decoding(TextEncoding),

    /// The request did not complete in time
    #[error("Request timed out")]
    Timeout,
}

/// Text encodings the fetcher can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

impl TextEncoding {
    /// Decode bytes, `None` when they are invalid in this encoding
    pub fn decode(&self, data: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(data).ok().map(str::to_string),
            TextEncoding::Ascii => data
                .is_ascii()
                .then(|| data.iter().map(|&b| b as char).collect()),
            TextEncoding::Latin1 => Some(data.iter().map(|&b| b as char).collect()),
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Ascii => "ASCII",
            TextEncoding::Latin1 => "ISO-8859-1",
        })
    }
}

/// Per-request option
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOption {
    /// Extra request headers
    AdditionalHeaders(HashMap<String, String>),
    /// Encoding used when decoding the body as text
    Encoding(TextEncoding),
    /// Required MIME type (parameters and case ignored)
    ExpectedContentType(String),
    /// Maximum body size in bytes
    MaxSize(usize),
    /// Request timeout
    Timeout(Duration),
}

/// Options folded from a list of [`FetchOption`]s; later options win
#[derive(Debug, Clone)]
pub(crate) struct FetchOptions {
    pub headers: HashMap<String, String>,
    pub encoding: TextEncoding,
    pub expected_content_type: Option<String>,
    pub max_size: Option<usize>,
    pub timeout: Duration,
}

impl FetchOptions {
    pub(crate) fn from_options(options: &[FetchOption]) -> Self {
        let mut folded = Self {
            headers: HashMap::new(),
            encoding: TextEncoding::Utf8,
            expected_content_type: None,
            max_size: None,
            timeout: Duration::from_secs(30),
        };

        for option in options {
            match option {
                FetchOption::AdditionalHeaders(headers) => {
                    folded
                        .headers
                        .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                FetchOption::Encoding(encoding) => folded.encoding = *encoding,
                FetchOption::ExpectedContentType(mime) => {
                    folded.expected_content_type = Some(mime.clone())
                }
                FetchOption::MaxSize(max) => folded.max_size = Some(*max),
                FetchOption::Timeout(timeout) => folded.timeout = *timeout,
            }
        }

        folded
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Decoded body, when decoding was requested
    pub content: Option<String>,
    /// `Content-Type` header value
    pub content_type: Option<String>,
    /// Raw body
    pub data: Bytes,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Body size in bytes
    pub size: usize,
    pub status_code: u16,
    /// Final URL after redirects
    pub url: Url,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// MIME type without parameters, lowercased
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
