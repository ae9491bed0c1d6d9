//! Rendering engine trait
//!
//! The operations the loader needs from a page-rendering engine. One engine
//! instance owns one page; callers serialize access themselves.

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::types::*;
use crate::Error;

/// Page-rendering engine
#[async_trait]
pub trait RenderEngine: Send + Sync + std::fmt::Debug {
    /// Begin navigating to a URL
    async fn load(&self, url: &Url) -> Result<(), Error>;

    /// Begin rendering inline markup, resolving relative references against `base_url`
    async fn load_markup(&self, html: &str, base_url: Option<&Url>) -> Result<(), Error>;

    /// Install a script that runs once per navigation
    async fn inject_script(
        &self,
        source: &str,
        at_document_end: bool,
        main_frame_only: bool,
    ) -> Result<ScriptId, Error>;

    /// Execute a program against the current document
    async fn evaluate(&self, program: &str) -> Result<EngineValue, Error>;

    /// Register a channel scripts can post string messages on
    async fn register_message_channel(&self, name: &str) -> Result<mpsc::Receiver<String>, Error>;

    /// Stop delivering messages for a channel
    async fn unregister_message_channel(&self, name: &str) -> Result<(), Error>;

    /// Subscribe to navigation progress
    async fn navigation_events(&self) -> Result<mpsc::Receiver<NavigationEvent>, Error>;

    /// Install request filtering rules (best effort)
    async fn install_content_blocking_rules(&self, rules: &ContentRuleSet) -> Result<(), Error>;

    /// Allow or forbid page scripts
    async fn set_script_enabled(&self, enabled: bool) -> Result<(), Error>;

    /// Inject cookies
    async fn apply_cookies(&self, cookies: &[Cookie]) -> Result<(), Error>;

    /// Override the user agent
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), Error>;

    /// Select the emulated layout
    async fn set_content_mode(&self, mode: ContentMode) -> Result<(), Error>;

    /// Stop any in-flight load
    async fn stop(&self) -> Result<(), Error>;

    /// Remove every hook and release the page
    async fn detach_all(&self) -> Result<(), Error>;

    /// JavaScript expression posting `payload_js` on a registered channel
    fn post_message_expression(&self, channel: &str, payload_js: &str) -> String;
}
