//! CDP browser control implementation
//!
//! This module provides browser-level operations via CDP: target discovery,
//! page creation in shared or isolated browser contexts, and target disposal.

use super::connection::CdpWebSocketConnection;
use super::traits::*;
use crate::Error;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// CDP browser implementation
#[derive(Debug)]
pub struct CdpBrowserImpl {
    /// Browser WebSocket endpoint (e.g., "ws://localhost:9222")
    endpoint: String,
    /// HTTP client for the DevTools JSON endpoints
    http: reqwest::Client,
    /// Browser-level connection, opened lazily for context management
    browser_connection: Mutex<Option<Arc<CdpWebSocketConnection>>>,
}

impl CdpBrowserImpl {
    /// Create a new CDP browser controller
    ///
    /// # Arguments
    /// * `endpoint` - Browser WebSocket endpoint (e.g., "ws://localhost:9222")
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        info!("Creating CDP browser controller for endpoint: {}", endpoint);
        Self {
            endpoint,
            http: reqwest::Client::new(),
            browser_connection: Mutex::new(None),
        }
    }

    /// Endpoint this controller talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn http_endpoint(&self) -> String {
        self.endpoint
            .replace("ws://", "http://")
            .replace("wss://", "https://")
    }

    fn page_ws_url(&self, target_id: &str) -> String {
        format!("{}/devtools/page/{}", self.endpoint, target_id)
    }

    async fn fetch_json(&self, path: &str) -> Result<serde_json::Value, Error> {
        let url = format!("{}{}", self.http_endpoint(), path);
        debug!("Fetching {}", url);

        let value = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(value)
    }

    /// Browser-level connection used for `Target.*` commands
    async fn browser_connection(&self) -> Result<Arc<CdpWebSocketConnection>, Error> {
        let mut guard = self.browser_connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            if connection.is_active() {
                return Ok(Arc::clone(connection));
            }
        }

        let version = self.get_version().await?;
        let ws_url = version
            .ws_url
            .ok_or_else(|| Error::cdp("No webSocketDebuggerUrl in browser version response"))?;

        let connection = CdpWebSocketConnection::new(ws_url).await?;
        *guard = Some(Arc::clone(&connection));
        Ok(connection)
    }

    async fn browser_command(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Error> {
        let connection = self.browser_connection().await?;
        let response = connection.send_command(method, params).await?;
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl CdpBrowser for CdpBrowserImpl {
    async fn create_target(&self, ephemeral: bool) -> Result<TargetHandle, Error> {
        if !ephemeral {
            let url = format!("{}/json/new?about:blank", self.http_endpoint());
            debug!("Creating new page via HTTP API: {}", url);

            let target_json: serde_json::Value = self
                .http
                .put(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let target_id = target_json
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::cdp("No id in new target response"))?;
            let ws_url = target_json
                .get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| self.page_ws_url(target_id));

            info!("Created target {}", target_id);
            return Ok(TargetHandle {
                target_id: target_id.to_string(),
                ws_url,
                browser_context_id: None,
            });
        }

        let context = self
            .browser_command("Target.createBrowserContext", serde_json::json!({ "disposeOnDetach": true }))
            .await?;
        let browser_context_id = context
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::cdp("No browserContextId in createBrowserContext response"))?
            .to_string();

        let target = self
            .browser_command(
                "Target.createTarget",
                serde_json::json!({ "url": "about:blank", "browserContextId": browser_context_id }),
            )
            .await?;
        let target_id = target
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::cdp("No targetId in createTarget response"))?
            .to_string();

        info!("Created target {} in isolated context {}", target_id, browser_context_id);
        Ok(TargetHandle {
            ws_url: self.page_ws_url(&target_id),
            target_id,
            browser_context_id: Some(browser_context_id),
        })
    }

    async fn connect(&self, target: &TargetHandle) -> Result<Arc<dyn CdpConnection>, Error> {
        let connection = CdpWebSocketConnection::new(target.ws_url.clone()).await?;
        Ok(connection as Arc<dyn CdpConnection>)
    }

    async fn close_target(&self, target: &TargetHandle) -> Result<(), Error> {
        info!("Closing target {}", target.target_id);

        match &target.browser_context_id {
            Some(context_id) => {
                self.browser_command(
                    "Target.closeTarget",
                    serde_json::json!({ "targetId": target.target_id }),
                )
                .await?;
                self.browser_command(
                    "Target.disposeBrowserContext",
                    serde_json::json!({ "browserContextId": context_id }),
                )
                .await?;
            }
            None => {
                let url = format!("{}/json/close/{}", self.http_endpoint(), target.target_id);
                self.http.get(&url).send().await?.error_for_status()?;
            }
        }

        Ok(())
    }

    async fn get_version(&self) -> Result<BrowserVersion, Error> {
        let version_json = self.fetch_json("/json/version").await?;
        let field = |name: &str| {
            version_json
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string()
        };

        Ok(BrowserVersion {
            protocol_version: field("Protocol-Version"),
            product: field("Browser"),
            user_agent: field("User-Agent"),
            ws_url: version_json
                .get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}
