//! Page-Harvest: render pages in a headless browser and extract structured data
//!
//! A [`loader::WebLoader`] drives a rendering engine (Chrome over the DevTools
//! Protocol, or any [`engine::RenderEngine`]) to load a URL or inline markup,
//! waits until the DOM stops mutating, then answers typed extraction queries.

pub mod error;
pub mod config;

pub mod cdp;
pub mod engine;
pub mod fetch;
pub mod loader;
pub mod urls;

// Re-exports
pub use error::{Error, Result};
pub use fetch::{FetchError, FetchOption, FetchResult, Fetcher};
pub use loader::{Configuration, Metadata, ReadinessState, WebLoader};

/// Page-Harvest library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
