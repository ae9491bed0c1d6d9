//! # Plain HTTP fetcher
//!
//! Fetches a resource without rendering it, validating status, content type
//! and size before optionally decoding the body as text.

pub mod types;

use std::collections::HashMap;
use tracing::{debug, info};
use url::Url;

use crate::{Error, Result};
pub use types::{FetchError, FetchOption, FetchResult, TextEncoding};
use types::{essence, FetchOptions};

/// HTTP fetcher
#[derive(Debug, Clone, Default)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetcher sharing an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch a URL and validate the response
    ///
    /// Checks run in order: status, content type, size, then decoding when
    /// `decode_as_string` is set.
    pub async fn fetch(&self, url: &Url, options: &[FetchOption], decode_as_string: bool) -> Result<FetchResult> {
        let options = FetchOptions::from_options(options);
        info!("Fetching {}", url);

        let mut request = self.client.get(url.clone()).timeout(options.timeout);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(Self::map_transport_error)?;

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(status_code).into());
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let content_type = headers.get("content-type").cloned();

        if let (Some(expected), Some(found)) = (&options.expected_content_type, &content_type) {
            if essence(expected) != essence(found) {
                return Err(FetchError::ContentTypeMismatch {
                    expected: essence(expected),
                    found: essence(found),
                }
                .into());
            }
        }

        if let (Some(max), Some(declared)) = (options.max_size, response.content_length()) {
            let declared = usize::try_from(declared).unwrap_or(usize::MAX);
            if declared > max {
                return Err(FetchError::ExceedMaxSize { max, size: declared }.into());
            }
        }

        let final_url = response.url().clone();
        let data = response.bytes().await.map_err(Self::map_transport_error)?;
        let size = data.len();
        debug!("Fetched {} bytes from {}", size, final_url);

        if let Some(max) = options.max_size {
            if size > max {
                return Err(FetchError::ExceedMaxSize { max, size }.into());
            }
        }

        let content = if decode_as_string {
            Some(
                options
                    .encoding
                    .decode(&data)
                    .ok_or(FetchError::Decoding(options.encoding))?,
            )
        } else {
            None
        };

        Ok(FetchResult {
            content,
            content_type,
            data,
            headers,
            size,
            status_code,
            url: final_url,
        })
    }

    /// Fetch and decode the body as text
    pub async fn fetch_content(&self, url: &Url, options: &[FetchOption]) -> Result<String> {
        let result = self.fetch(url, options, true).await?;
        result
            .content
            .ok_or_else(|| FetchError::InvalidResponse("Body was not decoded".to_string()).into())
    }

    /// Fetch the raw body
    pub async fn fetch_data(&self, url: &Url, options: &[FetchOption]) -> Result<bytes::Bytes> {
        Ok(self.fetch(url, options, false).await?.data)
    }

    fn map_transport_error(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            FetchError::Timeout.into()
        } else if e.is_body() || e.is_decode() {
            FetchError::InvalidResponse(e.to_string()).into()
        } else {
            Error::Http(e)
        }
    }
}
