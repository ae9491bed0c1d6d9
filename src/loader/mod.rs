//! # Render-and-extract loader
//!
//! A [`WebLoader`] owns one engine and one loaded document. It applies a
//! [`Configuration`] before navigation, waits for the document to stop
//! mutating, and then answers typed extraction queries.
//!
//! ## Module structure
//! - `config`: immutable load-time policy
//! - `resource_gate`: pre-navigation subresource blocking
//! - `readiness`: mutation observer + debounce + hard timeout
//! - `extraction`: typed evaluation of query programs
//! - `handle`: exclusive, serialized access to the engine
//! - `scripts`: query programs
//! - `text`: whitespace normalization
//! - `metadata`: metadata record
//! - `session`: the loader itself
//!
//! ## Example
//! ```rust,no_run
//! use page_harvest::cdp::CdpBrowserImpl;
//! use page_harvest::engine::CdpEngine;
//! use page_harvest::loader::{Configuration, WebLoader};
//! use std::sync::Arc;
//!
//! # async fn example() -> page_harvest::Result<()> {
//! let config = Arc::new(Configuration::default());
//! let browser = Arc::new(CdpBrowserImpl::new("ws://localhost:9222"));
//! let engine = Arc::new(CdpEngine::launch(browser, &config).await?);
//!
//! let loader = WebLoader::from_url_str(engine, "https://example.com/", config).await?;
//! let metadata = loader.get_metadata().await?;
//! println!("{:?}", metadata.title);
//! loader.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod extraction;
pub mod handle;
pub mod metadata;
pub mod readiness;
pub mod resource_gate;
pub mod scripts;
pub mod session;
pub mod text;

#[cfg(test)]
mod tests;

pub use config::{
    ConfigurationBuilder, Configuration, ContentMode, Cookie, PreprocessingTiming, SanitizeTarget,
    Sanitization,
};
pub use extraction::FromEngineValue;
pub use metadata::Metadata;
pub use readiness::ReadinessState;
pub use session::{LifecycleState, WebLoader};
