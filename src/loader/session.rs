//! Loader session: owns one engine and one loaded document

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::config::{Configuration, SanitizeTarget};
use super::extraction::{self, FromEngineValue};
use super::handle::EngineHandle;
use super::metadata::Metadata;
use super::readiness::{ReadinessDetector, ReadinessState};
use super::{resource_gate, scripts, text};
use crate::engine::{NavigationEvent, RenderEngine};
use crate::urls;
use crate::{Error, Result};

/// Lifecycle of a loader session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    /// Navigation issued, load not finished
    Navigating,
    /// The main frame finished loading
    Ready,
    TornDown,
}

/// What the session loads
#[derive(Debug, Clone)]
enum Source {
    Url(Url),
    Markup { html: String, base_url: Option<Url> },
}

#[derive(Debug, Default)]
struct SessionTasks {
    navigation: Option<JoinHandle<()>>,
    bookkeeping: Option<JoinHandle<()>>,
}

/// Render-and-extract session over one document
///
/// Construction applies the configuration, arms readiness detection and
/// issues navigation without waiting for it. Every extractor first waits for
/// the document to settle; concurrent extractors share that wait.
#[derive(Debug)]
pub struct WebLoader {
    /// Session identifier used in log lines
    id: String,
    config: Arc<Configuration>,
    engine: Arc<EngineHandle>,
    detector: Arc<ReadinessDetector>,
    base_url: Option<Url>,
    lifecycle: Arc<watch::Sender<LifecycleState>>,
    tasks: StdMutex<SessionTasks>,
    closed: AtomicBool,
}

impl WebLoader {
    /// Load a URL
    pub async fn from_url(
        engine: Arc<dyn RenderEngine>,
        url: Url,
        config: Arc<Configuration>,
    ) -> Result<Self> {
        Self::start(engine, Source::Url(url), config).await
    }

    /// Load a URL given as a string
    pub async fn from_url_str(
        engine: Arc<dyn RenderEngine>,
        url: &str,
        config: Arc<Configuration>,
    ) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::invalid_input(format!("Invalid URL '{}': {}", url, e)))?;
        Self::from_url(engine, url, config).await
    }

    /// Render inline markup, resolving relative references against `base_url`
    pub async fn from_html<S: Into<String>>(
        engine: Arc<dyn RenderEngine>,
        html: S,
        base_url: Option<Url>,
        config: Arc<Configuration>,
    ) -> Result<Self> {
        let source = Source::Markup {
            html: html.into(),
            base_url,
        };
        Self::start(engine, source, config).await
    }

    /// Render inline markup with a base URL given as a string
    pub async fn from_html_with_base_str<S: Into<String>>(
        engine: Arc<dyn RenderEngine>,
        html: S,
        base_url: &str,
        config: Arc<Configuration>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::invalid_input(format!("Invalid base URL '{}': {}", base_url, e)))?;
        Self::from_html(engine, html, Some(base_url), config).await
    }

    async fn start(engine: Arc<dyn RenderEngine>, source: Source, config: Arc<Configuration>) -> Result<Self> {
        let (signal, navigation_events) = match Self::prepare(engine.as_ref(), &config).await {
            Ok(hooks) => hooks,
            Err(e) => {
                if let Err(detach_err) = engine.detach_all().await {
                    debug!("Failed to detach engine after setup error: {}", detach_err);
                }
                return Err(e);
            }
        };

        let base_url = match &source {
            Source::Url(url) => Some(url.clone()),
            Source::Markup { base_url, .. } => base_url.clone(),
        };

        let id = uuid::Uuid::new_v4().to_string();
        let handle = Arc::new(EngineHandle::new(engine));
        let detector = ReadinessDetector::new(Arc::clone(&handle), Arc::clone(&config), signal);
        let (lifecycle, _) = watch::channel(LifecycleState::Uninitialized);
        let lifecycle = Arc::new(lifecycle);

        let bookkeeping = tokio::spawn(Self::track_navigation(navigation_events, Arc::clone(&lifecycle)));

        // Taking the first turn here queues navigation ahead of any extraction
        let turn = handle.lock().await?;
        lifecycle.send_replace(LifecycleState::Navigating);
        let session_id = id.clone();
        let navigation = tokio::spawn(async move {
            let outcome = match &source {
                Source::Url(url) => {
                    info!("Session {} loading {}", session_id, url);
                    turn.load(url).await
                }
                Source::Markup { html, base_url } => {
                    info!("Session {} loading {} bytes of markup", session_id, html.len());
                    turn.load_markup(html, base_url.as_ref()).await
                }
            };
            if let Err(e) = outcome {
                warn!("Session {} navigation failed: {}", session_id, e);
            }
        });

        Ok(Self {
            id,
            config,
            engine: handle,
            detector,
            base_url,
            lifecycle,
            tasks: StdMutex::new(SessionTasks {
                navigation: Some(navigation),
                bookkeeping: Some(bookkeeping),
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Apply the configuration and install hooks, before navigation
    async fn prepare(
        engine: &dyn RenderEngine,
        config: &Configuration,
    ) -> Result<(mpsc::Receiver<String>, mpsc::Receiver<NavigationEvent>)> {
        engine.set_script_enabled(config.allow_script()).await?;
        engine.set_content_mode(config.content_mode()).await?;
        if !config.cookies().is_empty() {
            engine.apply_cookies(config.cookies()).await?;
        }
        if let Some(user_agent) = config.user_agent() {
            engine.set_user_agent(user_agent).await?;
        }

        let signal = engine.register_message_channel(scripts::READY_CHANNEL).await?;
        let navigation_events = engine.navigation_events().await?;

        let post_ready = engine.post_message_expression(
            scripts::READY_CHANNEL,
            &scripts::js_string(scripts::READY_MESSAGE),
        );
        let observer = scripts::observer(&post_ready, config.debounce(), config.grace());
        engine.inject_script(&observer, true, true).await?;

        resource_gate::install(engine, config).await;

        Ok((signal, navigation_events))
    }

    async fn track_navigation(
        mut events: mpsc::Receiver<NavigationEvent>,
        lifecycle: Arc<watch::Sender<LifecycleState>>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                NavigationEvent::Committed { url } => debug!("Navigation committed: {}", url),
                NavigationEvent::Finished => {
                    let changed = lifecycle.send_if_modified(|state| {
                        if *state == LifecycleState::Navigating {
                            *state = LifecycleState::Ready;
                            true
                        } else {
                            false
                        }
                    });
                    if changed {
                        info!("Navigation finished");
                    }
                }
            }
        }
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    pub fn readiness(&self) -> ReadinessState {
        self.detector.state()
    }

    /// Number of readiness detection runs so far (never more than one)
    pub fn detection_runs(&self) -> usize {
        self.detector.detection_runs()
    }

    /// Base URL used to absolutize harvested references
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Wait until the document is stable or the readiness timeout fired
    pub async fn wait_until_ready(&self) -> Result<ReadinessState> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        self.detector.wait().await
    }

    /// Evaluate a program right away, without waiting for readiness
    pub async fn evaluate<T: FromEngineValue>(&self, program: &str) -> Result<T> {
        extraction::evaluate(&self.engine, program, self.config.script_timeout()).await
    }

    async fn query<T: FromEngineValue>(&self, program: &str) -> Result<T> {
        self.wait_until_ready().await?;
        self.evaluate(program).await
    }

    /// Run a program once the document is ready, discarding its result
    pub async fn run(&self, program: &str) -> Result<()> {
        self.query::<()>(program).await
    }

    /// Normalized block-structured text of a node, or of the body when `None`
    pub async fn get_text_content(&self, selector: Option<&str>) -> Result<String> {
        let raw: String = self.query(&scripts::text_content(selector)).await?;
        Ok(text::normalize_text(&raw))
    }

    /// Normalized `innerText` of a node, or of the body when `None`
    pub async fn get_inner_text(&self, selector: Option<&str>) -> Result<String> {
        let raw: String = self.query(&scripts::inner_text(selector)).await?;
        Ok(text::normalize_text(&raw))
    }

    /// Inner HTML of a node, or of the body when `None`
    pub async fn get_inner_html(&self, selector: Option<&str>) -> Result<String> {
        self.query(&scripts::inner_html(selector)).await
    }

    /// Attribute of the first node matching `selector`
    pub async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
        self.query(&scripts::attribute(selector, name)).await
    }

    pub async fn get_metadata(&self) -> Result<Metadata> {
        let fields: HashMap<String, String> = self.query(scripts::metadata()).await?;
        Ok(Metadata::from_fields(fields))
    }

    /// Document language from `<html lang>`
    pub async fn get_language(&self) -> Result<Option<String>> {
        let lang: Option<String> = self.query(scripts::language()).await?;
        Ok(lang.filter(|l| !l.trim().is_empty()))
    }

    pub async fn get_canonical_url(&self) -> Result<Option<Url>> {
        let canonical: Option<String> = self.query(scripts::canonical()).await?;
        Ok(canonical.and_then(|c| Url::parse(&c).ok()))
    }

    /// Raw image references (`src` and first `srcset` candidates)
    pub async fn get_images_string(&self) -> Result<HashSet<String>> {
        let sources: Vec<String> = self.query(scripts::image_sources()).await?;
        Ok(sources.into_iter().collect())
    }

    /// Image references made absolute against `base`, or the session's base URL
    pub async fn get_images_absolute_string(&self, base: Option<&Url>) -> Result<HashSet<String>> {
        let sources = self.get_images_string().await?;
        Ok(match base.or(self.base_url.as_ref()) {
            Some(base) => urls::to_absolute_strings(&sources, base),
            None => sources.into_iter().filter(|s| Url::parse(s).is_ok()).collect(),
        })
    }

    pub async fn get_images_url(&self, base: Option<&Url>) -> Result<HashSet<Url>> {
        let sources = self.get_images_string().await?;
        Ok(match base.or(self.base_url.as_ref()) {
            Some(base) => urls::to_absolute_urls(&sources, base),
            None => urls::absolute_only(&sources),
        })
    }

    /// Link targets as resolved by the engine
    pub async fn get_links_string(&self) -> Result<HashSet<String>> {
        let links: Vec<String> = self.query(scripts::links()).await?;
        Ok(links.into_iter().collect())
    }

    pub async fn get_links_absolute_string(&self, base: Option<&Url>) -> Result<HashSet<String>> {
        let links = self.get_links_string().await?;
        Ok(match base.or(self.base_url.as_ref()) {
            Some(base) => urls::to_absolute_strings(&links, base),
            None => links.into_iter().filter(|l| Url::parse(l).is_ok()).collect(),
        })
    }

    pub async fn get_links_url(&self, base: Option<&Url>) -> Result<HashSet<Url>> {
        let links = self.get_links_string().await?;
        Ok(match base.or(self.base_url.as_ref()) {
            Some(base) => urls::to_absolute_urls(&links, base),
            None => urls::absolute_only(&links),
        })
    }

    /// Remove every node matching any of the selectors; returns how many went
    pub async fn remove_nodes<S: AsRef<str>>(&self, selectors: &[S]) -> Result<usize> {
        if selectors.is_empty() {
            return Ok(0);
        }
        let removed: f64 = self.query(&scripts::remove_nodes(selectors)).await?;
        Ok(removed as usize)
    }

    pub async fn remove_scripts(&self) -> Result<usize> {
        self.remove_nodes(&[SanitizeTarget::Script.selector()]).await
    }

    pub async fn remove_styles(&self) -> Result<usize> {
        self.remove_nodes(&[
            SanitizeTarget::Style.selector(),
            SanitizeTarget::Link.selector(),
        ])
        .await
    }

    /// Tear the session down
    ///
    /// Cancels the readiness timeout and any pending wait, detaches the
    /// message channel and navigation observation, stops loading and releases
    /// the engine. Engine errors are logged, never returned. Calling it again
    /// does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing session {}", self.id);

        self.detector.cancel_timeout();
        self.detector.cancel();

        let engine = self.engine.take().await;
        let (navigation, bookkeeping) = self.take_tasks();

        if let Some(engine) = &engine {
            if let Err(e) = engine.unregister_message_channel(scripts::READY_CHANNEL).await {
                debug!("Failed to unregister readiness channel: {}", e);
            }
        }

        if let Some(task) = bookkeeping {
            task.abort();
        }
        if let Some(task) = navigation {
            task.abort();
        }

        if let Some(engine) = engine {
            if let Err(e) = engine.stop().await {
                debug!("Failed to stop loading: {}", e);
            }
            if let Err(e) = engine.detach_all().await {
                warn!("Failed to detach engine: {}", e);
            }
        }

        self.lifecycle.send_replace(LifecycleState::TornDown);
    }

    fn take_tasks(&self) -> (Option<JoinHandle<()>>, Option<JoinHandle<()>>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (tasks.navigation.take(), tasks.bookkeeping.take())
    }
}

impl Drop for WebLoader {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.detector.cancel_timeout();
        self.detector.cancel();

        let (navigation, bookkeeping) = self.take_tasks();
        for task in [bookkeeping, navigation].into_iter().flatten() {
            task.abort();
        }

        let engine = Arc::clone(&self.engine);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(engine) = engine.take().await {
                        let _ = engine.unregister_message_channel(scripts::READY_CHANNEL).await;
                        let _ = engine.stop().await;
                        if let Err(e) = engine.detach_all().await {
                            warn!("Failed to detach engine on drop: {}", e);
                        }
                    }
                });
            }
            Err(_) => warn!("Loader dropped outside a runtime; engine not detached"),
        }
    }
}
