//! Scriptable in-memory engine for testing
//!
//! `MockEngine` records every call, answers evaluations from a table of
//! canned responses matched by substring, and can post the readiness signal
//! some time after a load, which is enough to drive the loader without a
//! browser.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use super::traits::RenderEngine;
use super::types::*;
use crate::Error;

/// Canned answer to an evaluation
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return a value
    Value(EngineValue),
    /// Fail with a script error
    Fail(String),
    /// Never complete
    Hang,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<String>,
    responses: Vec<(String, MockResponse)>,
    channels: HashMap<String, mpsc::Sender<String>>,
    navigation: Vec<mpsc::Sender<NavigationEvent>>,
}

/// Mock rendering engine
#[derive(Debug)]
pub struct MockEngine {
    state: Mutex<MockState>,
    settle_after: Mutex<Option<Duration>>,
    fail_content_blocking: AtomicBool,
    inject_count: AtomicUsize,
    evaluate_count: AtomicUsize,
    detach_count: AtomicUsize,
}

impl MockEngine {
    /// Create an engine that signals readiness 50 ms after each load
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            settle_after: Mutex::new(Some(Duration::from_millis(50))),
            fail_content_blocking: AtomicBool::new(false),
            inject_count: AtomicUsize::new(0),
            evaluate_count: AtomicUsize::new(0),
            detach_count: AtomicUsize::new(0),
        }
    }

    /// Delay between a load and the "ready" message; `None` never signals
    pub async fn settle_after(&self, delay: Option<Duration>) {
        *self.settle_after.lock().await = delay;
    }

    /// Make `install_content_blocking_rules` fail
    pub fn fail_content_blocking(&self, fail: bool) {
        self.fail_content_blocking.store(fail, Ordering::SeqCst);
    }

    /// Answer evaluations whose program contains `pattern`
    ///
    /// Earlier registrations win.
    pub async fn respond<S: Into<String>>(&self, pattern: S, response: MockResponse) {
        self.state.lock().await.responses.push((pattern.into(), response));
    }

    /// Post a message on a registered channel
    pub async fn emit_message(&self, channel: &str, payload: &str) -> bool {
        let sender = self.state.lock().await.channels.get(channel).cloned();
        match sender {
            Some(sender) => sender.send(payload.to_string()).await.is_ok(),
            None => false,
        }
    }

    /// Every call made so far, in order
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Index of the first call starting with `prefix`
    pub async fn position(&self, prefix: &str) -> Option<usize> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .position(|call| call.starts_with(prefix))
    }

    /// Number of `inject_script` calls
    pub fn inject_count(&self) -> usize {
        self.inject_count.load(Ordering::SeqCst)
    }

    /// Number of `evaluate` calls
    pub fn evaluate_count(&self) -> usize {
        self.evaluate_count.load(Ordering::SeqCst)
    }

    /// Number of `detach_all` calls
    pub fn detach_count(&self) -> usize {
        self.detach_count.load(Ordering::SeqCst)
    }

    async fn record<S: Into<String>>(&self, call: S) {
        self.state.lock().await.calls.push(call.into());
    }

    async fn navigated(&self, url: String) {
        let (subscribers, channels) = {
            let state = self.state.lock().await;
            (
                state.navigation.clone(),
                state.channels.values().cloned().collect::<Vec<_>>(),
            )
        };

        for subscriber in &subscribers {
            let _ = subscriber.send(NavigationEvent::Committed { url: url.clone() }).await;
            let _ = subscriber.send(NavigationEvent::Finished).await;
        }

        if let Some(delay) = *self.settle_after.lock().await {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for channel in channels {
                    let _ = channel.send("ready".to_string()).await;
                }
            });
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RenderEngine for MockEngine {
    async fn load(&self, url: &Url) -> Result<(), Error> {
        self.record(format!("load {}", url)).await;
        self.navigated(url.to_string()).await;
        Ok(())
    }

    async fn load_markup(&self, html: &str, base_url: Option<&Url>) -> Result<(), Error> {
        let base = base_url.map(Url::as_str).unwrap_or("about:blank");
        self.record(format!("load_markup {} {}", base, html)).await;
        self.navigated(base.to_string()).await;
        Ok(())
    }

    async fn inject_script(
        &self,
        source: &str,
        at_document_end: bool,
        main_frame_only: bool,
    ) -> Result<ScriptId, Error> {
        let count = self.inject_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(format!(
            "inject_script end={} main={} {}",
            at_document_end, main_frame_only, source
        ))
        .await;
        Ok(ScriptId(count.to_string()))
    }

    async fn evaluate(&self, program: &str) -> Result<EngineValue, Error> {
        self.evaluate_count.fetch_add(1, Ordering::SeqCst);

        let response = {
            let mut state = self.state.lock().await;
            state.calls.push(format!("evaluate {}", program));
            state
                .responses
                .iter()
                .find(|(pattern, _)| program.contains(pattern.as_str()))
                .map(|(_, response)| response.clone())
        };

        match response {
            Some(MockResponse::Value(value)) => Ok(value),
            Some(MockResponse::Fail(message)) => Err(Error::script_execution_failed(message)),
            Some(MockResponse::Hang) => std::future::pending().await,
            None => Ok(EngineValue::Null),
        }
    }

    async fn register_message_channel(&self, name: &str) -> Result<mpsc::Receiver<String>, Error> {
        let (tx, rx) = mpsc::channel(16);
        let mut state = self.state.lock().await;
        state.calls.push(format!("register_message_channel {}", name));
        state.channels.insert(name.to_string(), tx);
        Ok(rx)
    }

    async fn unregister_message_channel(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("unregister_message_channel {}", name));
        state.channels.remove(name);
        Ok(())
    }

    async fn navigation_events(&self) -> Result<mpsc::Receiver<NavigationEvent>, Error> {
        let (tx, rx) = mpsc::channel(16);
        let mut state = self.state.lock().await;
        state.calls.push("navigation_events".to_string());
        state.navigation.push(tx);
        Ok(rx)
    }

    async fn install_content_blocking_rules(&self, rules: &ContentRuleSet) -> Result<(), Error> {
        self.record(format!("install_content_blocking_rules {}", serde_json::to_string(rules)?))
            .await;
        if self.fail_content_blocking.load(Ordering::SeqCst) {
            return Err(Error::configuration("Rule list failed to compile"));
        }
        Ok(())
    }

    async fn set_script_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.record(format!("set_script_enabled {}", enabled)).await;
        Ok(())
    }

    async fn apply_cookies(&self, cookies: &[Cookie]) -> Result<(), Error> {
        let names: Vec<&str> = cookies.iter().map(|c| c.name.as_str()).collect();
        self.record(format!("apply_cookies {}", names.join(","))).await;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), Error> {
        self.record(format!("set_user_agent {}", user_agent)).await;
        Ok(())
    }

    async fn set_content_mode(&self, mode: ContentMode) -> Result<(), Error> {
        self.record(format!("set_content_mode {:?}", mode)).await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.record("stop").await;
        Ok(())
    }

    async fn detach_all(&self) -> Result<(), Error> {
        self.detach_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.calls.push("detach_all".to_string());
        state.channels.clear();
        state.navigation.clear();
        Ok(())
    }

    fn post_message_expression(&self, channel: &str, payload_js: &str) -> String {
        format!("window.{}({})", channel, payload_js)
    }
}
