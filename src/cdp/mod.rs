//! # Chrome DevTools Protocol (CDP) layer
//!
//! WebSocket transport to Chrome/Chromium used by the CDP rendering engine.
//!
//! ## Module structure
//! - `traits`: connection and browser traits
//! - `types`: protocol message and parameter types
//! - `connection`: WebSocket connection with request/response correlation and
//!   event fan-out
//! - `browser`: target discovery, page creation and disposal
//!
//! ## Example
//! ```rust,no_run
//! use page_harvest::cdp::{CdpBrowser, CdpBrowserImpl};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let browser = CdpBrowserImpl::new("ws://localhost:9222");
//! let target = browser.create_target(true).await?;
//! let connection = browser.connect(&target).await?;
//! connection.send_command("Page.enable", serde_json::json!({})).await?;
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod types;
pub mod connection;
pub mod browser;

pub use traits::{
    BrowserVersion, CdpBrowser, CdpConnection, CdpError, CdpEvent, CdpResponse, TargetHandle,
};

pub use browser::CdpBrowserImpl;
pub use connection::CdpWebSocketConnection;
