//! Rendering engine backed by a Chrome DevTools Protocol page target

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::traits::RenderEngine;
use super::types::*;
use crate::cdp::types::{EvaluateParams, EvaluateResponse, NavigateParams, RemoteObject, RequestPattern};
use crate::cdp::{CdpBrowser, CdpConnection, TargetHandle};
use crate::loader::Configuration;
use crate::Error;

/// Opening `<head>` tag; `<header>` does not match
static HEAD_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").unwrap());

/// CDP-backed rendering engine for one page target
#[derive(Debug)]
pub struct CdpEngine {
    /// Page connection
    connection: Arc<dyn CdpConnection>,
    /// Browser that owns the target, when the engine opened it
    browser: Option<Arc<dyn CdpBrowser>>,
    /// Target to close on detach
    target: Option<TargetHandle>,
    /// Identifiers of scripts added with `Page.addScriptToEvaluateOnNewDocument`
    scripts: Mutex<Vec<String>>,
    /// Binding forwarders (binding name -> task)
    bindings: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Request interceptor and navigation forwarders
    background: Mutex<Vec<JoinHandle<()>>>,
    /// Set once `detach_all` ran
    detached: AtomicBool,
}

impl CdpEngine {
    /// Wrap an existing page connection
    pub async fn attach(connection: Arc<dyn CdpConnection>) -> Result<Self, Error> {
        Self::attach_target(connection, None, None).await
    }

    /// Open a new page target for a loader configuration
    ///
    /// The page gets its own browser context when ephemeral cookies are requested.
    pub async fn launch(browser: Arc<dyn CdpBrowser>, config: &Configuration) -> Result<Self, Error> {
        let target = browser.create_target(config.use_ephemeral_cookies()).await?;
        let connection = match browser.connect(&target).await {
            Ok(connection) => connection,
            Err(e) => {
                if let Err(close_err) = browser.close_target(&target).await {
                    warn!("Failed to close target {} after connect error: {}", target.target_id, close_err);
                }
                return Err(e);
            }
        };

        Self::attach_target(connection, Some(browser), Some(target)).await
    }

    async fn attach_target(
        connection: Arc<dyn CdpConnection>,
        browser: Option<Arc<dyn CdpBrowser>>,
        target: Option<TargetHandle>,
    ) -> Result<Self, Error> {
        let engine = Self {
            connection,
            browser,
            target,
            scripts: Mutex::new(Vec::new()),
            bindings: Mutex::new(HashMap::new()),
            background: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        };

        engine.call_method("Page.enable", serde_json::json!({})).await?;
        engine.call_method("Runtime.enable", serde_json::json!({})).await?;

        Ok(engine)
    }

    /// Call a raw CDP method
    async fn call_method(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Error> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(Error::cdp("Engine is detached"));
        }

        let response = self.connection.send_command(method, params).await?;
        response.result.ok_or_else(|| Error::cdp("No result in response"))
    }

    /// Convert an evaluation result object into an engine value
    fn parse_remote_object(obj: &RemoteObject) -> EngineValue {
        if obj.r#type == "undefined" || obj.subtype.as_deref() == Some("null") {
            return EngineValue::Null;
        }

        if let Some(value) = &obj.value {
            return EngineValue::from(value.clone());
        }

        match &obj.unserializable_value {
            Some(raw) => match raw.parse::<f64>() {
                Ok(number) => EngineValue::Number(number),
                Err(_) => EngineValue::String(raw.clone()),
            },
            None => EngineValue::Null,
        }
    }

    /// Wrap a script so that it only runs in the main frame and/or after parsing
    fn wrap_injected_script(source: &str, at_document_end: bool, main_frame_only: bool) -> String {
        let mut script = String::from("(function () {\n");
        if main_frame_only {
            script.push_str("  if (window.top !== window) { return; }\n");
        }
        script.push_str("  const run = function () {\n");
        script.push_str(source);
        script.push_str("\n  };\n");
        if at_document_end {
            script.push_str(
                "  if (document.readyState === 'loading') { document.addEventListener('DOMContentLoaded', run, { once: true }); } else { run(); }\n",
            );
        } else {
            script.push_str("  run();\n");
        }
        script.push_str("})();");
        script
    }

    /// Translate a rule-list URL regex into a `Fetch` wildcard pattern
    fn url_filter_to_pattern(filter: &str) -> Option<String> {
        let pattern = filter.replace(".*", "*").replace("\\.", ".");
        let unsupported = ['[', ']', '(', ')', '|', '+', '?', '^', '$', '{', '}', '\\'];
        if pattern.contains(unsupported) {
            return None;
        }
        Some(pattern)
    }

    /// Compile a content rule set into `Fetch.enable` request patterns
    fn compile_rules(rules: &ContentRuleSet) -> Result<Vec<RequestPattern>, Error> {
        let mut patterns = Vec::new();

        for rule in &rules.rules {
            match rule.action.kind {
                RuleActionKind::Block => {}
            }

            let url_pattern = Self::url_filter_to_pattern(&rule.trigger.url_filter).ok_or_else(|| {
                Error::configuration(format!("Unsupported url-filter: {}", rule.trigger.url_filter))
            })?;

            if rule.trigger.resource_type.is_empty() {
                return Err(Error::configuration(
                    "Rules without resource types would block the document itself",
                ));
            }

            for resource_type in &rule.trigger.resource_type {
                let cdp_type = resource_type.cdp_name().ok_or_else(|| {
                    Error::configuration(format!("Unsupported resource type: {}", resource_type))
                })?;
                let pattern = RequestPattern {
                    url_pattern: url_pattern.clone(),
                    resource_type: cdp_type.to_string(),
                    request_stage: "Request".to_string(),
                };
                if !patterns.contains(&pattern) {
                    patterns.push(pattern);
                }
            }
        }

        if patterns.is_empty() {
            return Err(Error::configuration("Rule set blocks nothing"));
        }

        Ok(patterns)
    }

    /// Markup with a `<base>` element so relative references resolve against `base_url`
    fn with_base_href(html: &str, base_url: &Url) -> String {
        let href = base_url
            .as_str()
            .replace('&', "&amp;")
            .replace('"', "&quot;")
            .replace('<', "&lt;");
        let base = format!("<base href=\"{}\">", href);

        match HEAD_TAG.find(html) {
            Some(head) => format!("{}{}{}", &html[..head.end()], base, &html[head.end()..]),
            None => format!("{}{}", base, html),
        }
    }
}

#[async_trait]
impl RenderEngine for CdpEngine {
    async fn load(&self, url: &Url) -> Result<(), Error> {
        info!("Navigating to {}", url);

        let params = NavigateParams {
            url: url.to_string(),
            referrer: None,
        };
        let result = self.call_method("Page.navigate", serde_json::to_value(params)?).await?;

        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::cdp(format!("Navigation to {} failed: {}", url, error_text)));
        }

        Ok(())
    }

    async fn load_markup(&self, html: &str, base_url: Option<&Url>) -> Result<(), Error> {
        let markup = match base_url {
            Some(base) => Self::with_base_href(html, base),
            None => html.to_string(),
        };
        debug!("Rendering {} bytes of inline markup", markup.len());

        let data_url = format!("data:text/html;charset=utf-8;base64,{}", BASE64.encode(markup));
        let params = NavigateParams {
            url: data_url,
            referrer: None,
        };
        let result = self.call_method("Page.navigate", serde_json::to_value(params)?).await?;

        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::cdp(format!("Rendering inline markup failed: {}", error_text)));
        }

        Ok(())
    }

    async fn inject_script(
        &self,
        source: &str,
        at_document_end: bool,
        main_frame_only: bool,
    ) -> Result<ScriptId, Error> {
        let script = Self::wrap_injected_script(source, at_document_end, main_frame_only);
        let result = self
            .call_method(
                "Page.addScriptToEvaluateOnNewDocument",
                serde_json::json!({ "source": script }),
            )
            .await?;

        let identifier = result
            .get("identifier")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::cdp("No identifier in addScriptToEvaluateOnNewDocument response"))?
            .to_string();

        debug!("Injected script {}", identifier);
        self.scripts.lock().await.push(identifier.clone());

        Ok(ScriptId(identifier))
    }

    async fn evaluate(&self, program: &str) -> Result<EngineValue, Error> {
        debug!("Evaluating program ({} bytes)", program.len());

        let params = EvaluateParams {
            expression: program.to_string(),
            await_promise: Some(false),
            return_by_value: Some(true),
        };
        let result = self.call_method("Runtime.evaluate", serde_json::to_value(params)?).await?;

        let response: EvaluateResponse = serde_json::from_value(result)
            .map_err(|e| Error::cdp(format!("Failed to parse EvaluateResponse: {}", e)))?;

        if let Some(exception) = response.exception_details {
            return Err(Error::script_execution_failed(exception.describe()));
        }

        Ok(Self::parse_remote_object(&response.result))
    }

    async fn register_message_channel(&self, name: &str) -> Result<mpsc::Receiver<String>, Error> {
        let mut events = self.connection.listen_events().await?;
        self.call_method("Runtime.addBinding", serde_json::json!({ "name": name }))
            .await?;

        let (tx, rx) = mpsc::channel(16);
        let channel = name.to_string();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.method != "Runtime.bindingCalled" {
                    continue;
                }
                if event.params.get("name").and_then(|v| v.as_str()) != Some(channel.as_str()) {
                    continue;
                }
                let payload = event
                    .params
                    .get("payload")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.bindings.lock().await.insert(name.to_string(), forwarder) {
            previous.abort();
        }

        Ok(rx)
    }

    async fn unregister_message_channel(&self, name: &str) -> Result<(), Error> {
        if let Some(forwarder) = self.bindings.lock().await.remove(name) {
            forwarder.abort();
        }

        self.call_method("Runtime.removeBinding", serde_json::json!({ "name": name }))
            .await?;
        Ok(())
    }

    async fn navigation_events(&self) -> Result<mpsc::Receiver<NavigationEvent>, Error> {
        let mut events = self.connection.listen_events().await?;
        let (tx, rx) = mpsc::channel(16);

        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let navigation = match event.method.as_str() {
                    "Page.frameNavigated" => {
                        let frame = &event.params["frame"];
                        // Subframes carry a parentId
                        if frame.get("parentId").is_some() {
                            continue;
                        }
                        NavigationEvent::Committed {
                            url: frame
                                .get("url")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                        }
                    }
                    "Page.loadEventFired" => NavigationEvent::Finished,
                    _ => continue,
                };
                if tx.send(navigation).await.is_err() {
                    break;
                }
            }
        });

        self.background.lock().await.push(forwarder);
        Ok(rx)
    }

    async fn install_content_blocking_rules(&self, rules: &ContentRuleSet) -> Result<(), Error> {
        let patterns = Self::compile_rules(rules)?;
        let mut events = self.connection.listen_events().await?;

        self.call_method("Fetch.enable", serde_json::json!({ "patterns": patterns }))
            .await?;

        // Only requests matching a block pattern are paused, so every one is failed
        let connection = Arc::clone(&self.connection);
        let interceptor = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.method != "Fetch.requestPaused" {
                    continue;
                }
                let Some(request_id) = event.params.get("requestId").and_then(|v| v.as_str()) else {
                    continue;
                };
                let params = serde_json::json!({
                    "requestId": request_id,
                    "errorReason": "BlockedByClient",
                });
                if let Err(e) = connection.send_command("Fetch.failRequest", params).await {
                    debug!("Failed to block request {}: {}", request_id, e);
                }
            }
        });

        self.background.lock().await.push(interceptor);
        info!("Content blocking installed ({} patterns)", patterns.len());
        Ok(())
    }

    async fn set_script_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.call_method(
            "Emulation.setScriptExecutionDisabled",
            serde_json::json!({ "value": !enabled }),
        )
        .await?;
        Ok(())
    }

    async fn apply_cookies(&self, cookies: &[Cookie]) -> Result<(), Error> {
        if cookies.is_empty() {
            return Ok(());
        }

        self.call_method("Network.setCookies", serde_json::json!({ "cookies": cookies }))
            .await?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), Error> {
        self.call_method(
            "Emulation.setUserAgentOverride",
            serde_json::json!({ "userAgent": user_agent }),
        )
        .await?;
        Ok(())
    }

    async fn set_content_mode(&self, mode: ContentMode) -> Result<(), Error> {
        let (width, height, scale, mobile) = match mode {
            ContentMode::Recommended => return Ok(()),
            ContentMode::Mobile => (390, 844, 3.0, true),
            ContentMode::Desktop => (1440, 900, 1.0, false),
        };

        self.call_method(
            "Emulation.setDeviceMetricsOverride",
            serde_json::json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": scale,
                "mobile": mobile,
            }),
        )
        .await?;
        self.call_method(
            "Emulation.setTouchEmulationEnabled",
            serde_json::json!({ "enabled": mobile }),
        )
        .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.call_method("Page.stopLoading", serde_json::json!({})).await?;
        Ok(())
    }

    async fn detach_all(&self) -> Result<(), Error> {
        if self.detached.load(Ordering::SeqCst) {
            return Ok(());
        }

        let identifiers: Vec<String> = self.scripts.lock().await.drain(..).collect();
        for identifier in identifiers {
            if let Err(e) = self
                .call_method(
                    "Page.removeScriptToEvaluateOnNewDocument",
                    serde_json::json!({ "identifier": identifier }),
                )
                .await
            {
                debug!("Failed to remove script {}: {}", identifier, e);
            }
        }

        self.detached.store(true, Ordering::SeqCst);

        for (_, forwarder) in self.bindings.lock().await.drain() {
            forwarder.abort();
        }
        for task in self.background.lock().await.drain(..) {
            task.abort();
        }

        if let Err(e) = self.connection.close().await {
            warn!("Failed to close page connection: {}", e);
        }

        if let (Some(browser), Some(target)) = (&self.browser, &self.target) {
            if let Err(e) = browser.close_target(target).await {
                warn!("Failed to close target {}: {}", target.target_id, e);
            }
        }

        info!("CDP engine detached");
        Ok(())
    }

    fn post_message_expression(&self, channel: &str, payload_js: &str) -> String {
        format!("window.{}({})", channel, payload_js)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_object_string() {
        let obj = RemoteObject {
            r#type: "string".to_string(),
            value: Some(serde_json::json!("test")),
            ..Default::default()
        };

        assert_eq!(CdpEngine::parse_remote_object(&obj), EngineValue::from("test"));
    }

    #[test]
    fn test_parse_remote_object_null_and_undefined() {
        let undefined = RemoteObject {
            r#type: "undefined".to_string(),
            ..Default::default()
        };
        let null = RemoteObject {
            r#type: "object".to_string(),
            subtype: Some("null".to_string()),
            value: Some(serde_json::Value::Null),
            ..Default::default()
        };

        assert_eq!(CdpEngine::parse_remote_object(&undefined), EngineValue::Null);
        assert_eq!(CdpEngine::parse_remote_object(&null), EngineValue::Null);
    }

    #[test]
    fn test_parse_remote_object_unserializable_number() {
        let obj = RemoteObject {
            r#type: "number".to_string(),
            unserializable_value: Some("-Infinity".to_string()),
            ..Default::default()
        };

        assert_eq!(
            CdpEngine::parse_remote_object(&obj),
            EngineValue::Number(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn test_compile_default_block_rules() {
        let rules = ContentRuleSet::block(&[
            ResourceType::Image,
            ResourceType::StyleSheet,
            ResourceType::Media,
            ResourceType::Font,
        ]);

        let patterns = CdpEngine::compile_rules(&rules).unwrap();
        let types: Vec<&str> = patterns.iter().map(|p| p.resource_type.as_str()).collect();
        assert_eq!(types, vec!["Image", "Stylesheet", "Media", "Font"]);
        assert!(patterns.iter().all(|p| p.url_pattern == "*"));
    }

    #[test]
    fn test_compile_rejects_regex_filters() {
        let mut rules = ContentRuleSet::block(&[ResourceType::Image]);
        rules.rules[0].trigger.url_filter = "^https?://(ads|tracker)\\.".to_string();

        assert!(CdpEngine::compile_rules(&rules).is_err());
    }

    #[test]
    fn test_compile_rejects_empty_rule_set() {
        assert!(CdpEngine::compile_rules(&ContentRuleSet::default()).is_err());
    }

    #[test]
    fn test_with_base_href_inserts_after_head() {
        let base = Url::parse("https://example.com/a/").unwrap();
        let html = "<!DOCTYPE html><html><HEAD><title>t</title></HEAD><body></body></html>";

        let result = CdpEngine::with_base_href(html, &base);
        assert_eq!(
            result,
            "<!DOCTYPE html><html><HEAD><base href=\"https://example.com/a/\"><title>t</title></HEAD><body></body></html>"
        );
    }

    #[test]
    fn test_with_base_href_without_head() {
        let base = Url::parse("https://example.com/?a=1&b=2").unwrap();

        let result = CdpEngine::with_base_href("<p>x</p>", &base);
        assert_eq!(result, "<base href=\"https://example.com/?a=1&amp;b=2\"><p>x</p>");
    }

    #[test]
    fn test_with_base_href_skips_header_element() {
        let base = Url::parse("https://example.com/").unwrap();

        let result = CdpEngine::with_base_href("<header><h1>x</h1></header>", &base);
        assert_eq!(result, "<base href=\"https://example.com/\"><header><h1>x</h1></header>");

        let result = CdpEngine::with_base_href("<head lang=\"en\"><header></header>", &base);
        assert_eq!(
            result,
            "<head lang=\"en\"><base href=\"https://example.com/\"><header></header>"
        );
    }

    #[test]
    fn test_wrap_injected_script() {
        let script = CdpEngine::wrap_injected_script("console.log(1);", true, true);
        assert!(script.contains("window.top !== window"));
        assert!(script.contains("DOMContentLoaded"));
        assert!(script.contains("console.log(1);"));

        let eager = CdpEngine::wrap_injected_script("x();", false, false);
        assert!(!eager.contains("window.top"));
        assert!(!eager.contains("DOMContentLoaded"));
    }
}
