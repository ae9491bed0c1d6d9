//! Load-time policy for one loader session

use std::collections::BTreeSet;
use std::time::Duration;

use crate::{Error, Result};

pub use crate::engine::types::{ContentMode, Cookie};

/// Element groups removed from the document once it is stable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SanitizeTarget {
    Script,
    Iframe,
    Style,
    Link,
}

impl SanitizeTarget {
    /// CSS selector matching the group
    pub fn selector(&self) -> &'static str {
        match self {
            SanitizeTarget::Script => "script, noscript",
            SanitizeTarget::Iframe => "iframe",
            SanitizeTarget::Style => "style",
            SanitizeTarget::Link => "link",
        }
    }
}

/// Set of sanitization targets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sanitization(BTreeSet<SanitizeTarget>);

impl Sanitization {
    /// Remove nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Remove every supported group
    pub fn all() -> Self {
        [
            SanitizeTarget::Script,
            SanitizeTarget::Iframe,
            SanitizeTarget::Style,
            SanitizeTarget::Link,
        ]
        .into_iter()
        .collect()
    }

    /// Add a target
    pub fn with(mut self, target: SanitizeTarget) -> Self {
        self.0.insert(target);
        self
    }

    pub fn contains(&self, target: SanitizeTarget) -> bool {
        self.0.contains(&target)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Selectors of every target, in a stable order
    pub fn selectors(&self) -> Vec<&'static str> {
        self.0.iter().map(SanitizeTarget::selector).collect()
    }
}

impl FromIterator<SanitizeTarget> for Sanitization {
    fn from_iter<I: IntoIterator<Item = SanitizeTarget>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// When the pre-processing script runs relative to stopping the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreprocessingTiming {
    #[default]
    BeforeStopObserver,
    AfterStopObserver,
}

/// Immutable load-time policy
///
/// Build one with [`Configuration::builder`], then share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Configuration {
    allow_script: bool,
    block_resources: bool,
    cookies: Vec<Cookie>,
    content_mode: ContentMode,
    timeout: Duration,
    user_agent: Option<String>,
    use_ephemeral_cookies: bool,
    sanitization: Sanitization,
    pre_processing_script: Option<String>,
    pre_processing_timing: PreprocessingTiming,
    debounce: Duration,
    grace: Duration,
    script_timeout: Option<Duration>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            allow_script: true,
            block_resources: true,
            cookies: Vec::new(),
            content_mode: ContentMode::Recommended,
            timeout: Duration::from_secs(30),
            user_agent: None,
            use_ephemeral_cookies: true,
            sanitization: Sanitization::none(),
            pre_processing_script: None,
            pre_processing_timing: PreprocessingTiming::BeforeStopObserver,
            debounce: Duration::from_millis(300),
            grace: Duration::from_millis(1000),
            script_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Whether page scripts may run
    pub fn allow_script(&self) -> bool {
        self.allow_script
    }

    /// Whether images, stylesheets, media and fonts are blocked
    pub fn block_resources(&self) -> bool {
        self.block_resources
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn content_mode(&self) -> ContentMode {
        self.content_mode
    }

    /// Hard readiness timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Whether the page gets its own, discarded cookie store
    pub fn use_ephemeral_cookies(&self) -> bool {
        self.use_ephemeral_cookies
    }

    pub fn sanitization(&self) -> &Sanitization {
        &self.sanitization
    }

    pub fn pre_processing_script(&self) -> Option<&str> {
        self.pre_processing_script.as_deref()
    }

    pub fn pre_processing_timing(&self) -> PreprocessingTiming {
        self.pre_processing_timing
    }

    /// Quiet period after the last mutation
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Quiet period before the first mutation
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Bound on a single evaluation; `None` waits for the engine
    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout
    }
}

/// Builder for [`Configuration`]
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn allow_script(mut self, allow: bool) -> Self {
        self.config.allow_script = allow;
        self
    }

    pub fn block_resources(mut self, block: bool) -> Self {
        self.config.block_resources = block;
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.config.cookies.push(cookie);
        self
    }

    pub fn cookies<I: IntoIterator<Item = Cookie>>(mut self, cookies: I) -> Self {
        self.config.cookies.extend(cookies);
        self
    }

    pub fn content_mode(mut self, mode: ContentMode) -> Self {
        self.config.content_mode = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn use_ephemeral_cookies(mut self, ephemeral: bool) -> Self {
        self.config.use_ephemeral_cookies = ephemeral;
        self
    }

    pub fn sanitization(mut self, sanitization: Sanitization) -> Self {
        self.config.sanitization = sanitization;
        self
    }

    pub fn pre_processing_script<S: Into<String>>(mut self, script: S, timing: PreprocessingTiming) -> Self {
        self.config.pre_processing_script = Some(script.into());
        self.config.pre_processing_timing = timing;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.config.debounce = debounce;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.config.grace = grace;
        self
    }

    pub fn script_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.script_timeout = timeout;
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<Configuration> {
        let config = self.config;

        if config.timeout.is_zero() {
            return Err(Error::configuration("Readiness timeout must be positive"));
        }
        if config.debounce.is_zero() || config.grace.is_zero() {
            return Err(Error::configuration("Debounce and grace windows must be positive"));
        }
        if config.script_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration("Script timeout must be positive"));
        }
        if config.user_agent.as_deref().is_some_and(str::is_empty) {
            return Err(Error::configuration("User agent must not be empty"));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();

        assert!(config.allow_script());
        assert!(config.block_resources());
        assert!(config.use_ephemeral_cookies());
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.grace(), Duration::from_millis(1000));
        assert_eq!(config.content_mode(), ContentMode::Recommended);
        assert!(config.sanitization().is_empty());
        assert_eq!(config.pre_processing_timing(), PreprocessingTiming::BeforeStopObserver);
    }

    #[test]
    fn test_builder() {
        let config = Configuration::builder()
            .allow_script(false)
            .cookie(Cookie::new("sid", "1", "example.com"))
            .user_agent("harvest/1.0")
            .sanitization(Sanitization::none().with(SanitizeTarget::Iframe))
            .pre_processing_script("window.x = 1;", PreprocessingTiming::AfterStopObserver)
            .build()
            .unwrap();

        assert!(!config.allow_script());
        assert_eq!(config.cookies().len(), 1);
        assert_eq!(config.user_agent(), Some("harvest/1.0"));
        assert!(config.sanitization().contains(SanitizeTarget::Iframe));
        assert_eq!(config.pre_processing_script(), Some("window.x = 1;"));
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = Configuration::builder().timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_sanitization_selectors() {
        assert_eq!(
            Sanitization::all().selectors(),
            vec!["script, noscript", "iframe", "style", "link"]
        );
    }
}
