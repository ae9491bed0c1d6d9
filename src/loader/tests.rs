//! Loader tests over the mock engine
//!
//! Time is paused in most tests so that debounce, settle and timeout windows
//! elapse instantly and deterministically.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use super::*;
use crate::engine::{EngineValue, MockEngine, MockResponse};
use crate::Error;

const STOP_OBSERVER_MARKER: &str = "handle.stop()";
const TEXT_MARKER: &str = "const skipped";

fn default_config() -> Arc<Configuration> {
    Arc::new(Configuration::default())
}

async fn load(engine: &Arc<MockEngine>, config: Arc<Configuration>) -> WebLoader {
    WebLoader::from_url_str(engine.clone(), "https://x.com/", config)
        .await
        .expect("Failed to create loader")
}

async fn count_calls(engine: &MockEngine, needle: &str) -> usize {
    engine
        .calls()
        .await
        .iter()
        .filter(|call| call.starts_with("evaluate") && call.contains(needle))
        .count()
}

async fn position_of(engine: &MockEngine, needle: &str) -> usize {
    engine
        .calls()
        .await
        .iter()
        .position(|call| call.contains(needle))
        .unwrap_or_else(|| panic!("no call containing {needle:?}"))
}

#[tokio::test(start_paused = true)]
async fn test_configuration_applied_before_navigation() {
    let engine = Arc::new(MockEngine::new());
    let config = Configuration::builder()
        .allow_script(false)
        .cookie(Cookie::new("sid", "1", "x.com"))
        .user_agent("harvest-test")
        .content_mode(ContentMode::Mobile)
        .build()
        .unwrap();

    let loader = load(&engine, Arc::new(config)).await;
    loader.wait_until_ready().await.unwrap();

    let script = engine.position("set_script_enabled false").await.unwrap();
    let mode = engine.position("set_content_mode Mobile").await.unwrap();
    let cookies = engine.position("apply_cookies sid").await.unwrap();
    let agent = engine.position("set_user_agent harvest-test").await.unwrap();
    let channel = engine.position("register_message_channel pageHarvestReady").await.unwrap();
    let observer = engine.position("inject_script end=true main=true").await.unwrap();
    let gate = engine.position("install_content_blocking_rules").await.unwrap();
    let navigation = engine.position("load https://x.com/").await.unwrap();

    assert!(script < mode && mode < cookies && cookies < agent);
    assert!(agent < channel && channel < observer && observer < gate);
    assert!(gate < navigation);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_construction_does_not_wait_for_navigation() {
    let engine = Arc::new(MockEngine::new());
    engine.settle_after(None).await;

    let start = Instant::now();
    let loader = load(&engine, default_config()).await;

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(loader.readiness(), ReadinessState::NotStarted);
    assert_eq!(loader.detection_runs(), 0);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_follows_navigation() {
    let engine = Arc::new(MockEngine::new());
    let loader = load(&engine, default_config()).await;

    assert_eq!(loader.wait_until_ready().await.unwrap(), ReadinessState::Stable);
    tokio::task::yield_now().await;
    assert_eq!(loader.lifecycle(), LifecycleState::Ready);

    loader.close().await;
    assert_eq!(loader.lifecycle(), LifecycleState::TornDown);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_have_distinct_ids() {
    let first = load(&Arc::new(MockEngine::new()), default_config()).await;
    let second = load(&Arc::new(MockEngine::new()), default_config()).await;

    assert_ne!(first.id(), second.id());

    first.close().await;
    second.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_extractions_share_one_detection_run() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond(TEXT_MARKER, MockResponse::Value(EngineValue::from("Hello\nWorld\n")))
        .await;
    let loader = load(&engine, default_config()).await;

    let results = join_all((0..8).map(|_| loader.get_text_content(None))).await;

    for result in results {
        assert_eq!(result.unwrap(), "Hello\nWorld");
    }
    assert_eq!(loader.detection_runs(), 1);
    assert_eq!(count_calls(&engine, STOP_OBSERVER_MARKER).await, 1);
    assert_eq!(engine.inject_count(), 1);

    // Resolved state is reused
    loader.get_text_content(None).await.unwrap();
    assert_eq!(loader.detection_runs(), 1);
    assert_eq!(count_calls(&engine, STOP_OBSERVER_MARKER).await, 1);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_never_settling_page_times_out() {
    let engine = Arc::new(MockEngine::new());
    engine.settle_after(None).await;
    let config = Configuration::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let loader = load(&engine, Arc::new(config)).await;

    let start = Instant::now();
    let state = loader.wait_until_ready().await.unwrap();

    assert_eq!(state, ReadinessState::TimedOut);
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
    assert_eq!(count_calls(&engine, STOP_OBSERVER_MARKER).await, 1);

    // Extraction still proceeds against the current document
    assert!(loader.get_inner_html(Some("#app")).await.unwrap_err().is_script_error());

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_early_ready_signal_is_not_lost() {
    let engine = Arc::new(MockEngine::new());
    let loader = load(&engine, default_config()).await;

    // The page settles long before anyone asks
    tokio::time::sleep(Duration::from_secs(2)).await;

    let start = Instant::now();
    assert_eq!(loader.wait_until_ready().await.unwrap(), ReadinessState::Stable);
    assert!(start.elapsed() < Duration::from_secs(1));

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_messages_are_ignored() {
    let engine = Arc::new(MockEngine::new());
    engine.settle_after(None).await;
    let config = Configuration::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .unwrap();
    let loader = load(&engine, Arc::new(config)).await;

    assert!(engine.emit_message(scripts::READY_CHANNEL, "progress").await);
    assert_eq!(loader.wait_until_ready().await.unwrap(), ReadinessState::TimedOut);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_twice_is_noop() {
    let engine = Arc::new(MockEngine::new());
    let loader = load(&engine, default_config()).await;

    loader.close().await;
    let calls_after_first = engine.calls().await.len();
    loader.close().await;

    assert_eq!(engine.detach_count(), 1);
    assert_eq!(engine.calls().await.len(), calls_after_first);
}

#[tokio::test(start_paused = true)]
async fn test_close_without_navigation_or_extraction() {
    let engine = Arc::new(MockEngine::new());
    engine.settle_after(None).await;
    let loader = load(&engine, default_config()).await;

    loader.close().await;

    assert_eq!(loader.readiness(), ReadinessState::Cancelled);
    assert_eq!(engine.detach_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_wait() {
    let engine = Arc::new(MockEngine::new());
    engine.settle_after(None).await;
    let loader = Arc::new(load(&engine, default_config()).await);

    let waiter = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.get_metadata().await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(loader.readiness(), ReadinessState::Observing);

    loader.close().await;

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(Error::SessionClosed)));
    assert_eq!(loader.readiness(), ReadinessState::Cancelled);

    // The hard timeout must not resurrect the detector
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(loader.readiness(), ReadinessState::Cancelled);
    assert_eq!(count_calls(&engine, STOP_OBSERVER_MARKER).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_extraction_after_close_fails() {
    let engine = Arc::new(MockEngine::new());
    let loader = load(&engine, default_config()).await;
    loader.wait_until_ready().await.unwrap();

    loader.close().await;

    assert!(matches!(loader.get_language().await, Err(Error::SessionClosed)));
    assert!(matches!(loader.evaluate::<()>("1").await, Err(Error::SessionClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_order() {
    let engine = Arc::new(MockEngine::new());
    let loader = load(&engine, default_config()).await;
    loader.wait_until_ready().await.unwrap();

    loader.close().await;

    let unregister = engine.position("unregister_message_channel").await.unwrap();
    let stop = engine.position("stop").await.unwrap();
    let detach = engine.position("detach_all").await.unwrap();
    assert!(unregister < stop && stop < detach);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_without_og_image() {
    let engine = Arc::new(MockEngine::new());
    let fields = serde_json::json!({
        "title": "Example",
        "description": "An example page",
        "ogTitle": "",
        "ogImage": "",
        "canonical": "https://x.com/canonical",
        "lang": "en"
    });
    engine
        .respond("ogImage", MockResponse::Value(EngineValue::from(fields)))
        .await;
    let loader = load(&engine, default_config()).await;

    let metadata = loader.get_metadata().await.unwrap();

    assert_eq!(metadata.title.as_deref(), Some("Example"));
    assert_eq!(metadata.og_title, None);
    assert_eq!(metadata.og_image, None);
    assert_eq!(
        metadata.canonical.as_ref().map(|u| u.as_str()),
        Some("https://x.com/canonical")
    );
    assert_eq!(metadata.lang.as_deref(), Some("en"));

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_result_type_keeps_session_alive() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond(
            TEXT_MARKER,
            MockResponse::Value(EngineValue::from(serde_json::json!({ "text": "x" }))),
        )
        .await;
    let loader = load(&engine, default_config()).await;

    let err = loader.get_text_content(None).await.unwrap_err();
    match err {
        Error::UnexpectedResultType { expected, received } => {
            assert_eq!(expected, "string");
            assert_eq!(received, "object<string, string>");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(loader.get_inner_text(None).await.unwrap_err().is_script_error());
    assert_eq!(loader.lifecycle(), LifecycleState::Ready);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_text_content_widens_tabs() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond(TEXT_MARKER, MockResponse::Value(EngineValue::from("col1\tcol2\n")))
        .await;
    let loader = load(&engine, default_config()).await;

    assert_eq!(loader.get_text_content(None).await.unwrap(), "col1  col2");

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_inner_text_is_normalized() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond(
            "innerText",
            MockResponse::Value(EngineValue::from("  a\u{a0}\u{a0}b\tc\n\n\n\nd  ")),
        )
        .await;
    let loader = load(&engine, default_config()).await;

    assert_eq!(loader.get_inner_text(None).await.unwrap(), "a b  c\n\nd");

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_script_failure_is_local_to_the_call() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond("getAttribute(name)", MockResponse::Fail("SyntaxError".to_string()))
        .await;
    engine
        .respond("lang ? lang : null", MockResponse::Value(EngineValue::from("de")))
        .await;
    let loader = load(&engine, default_config()).await;

    let err = loader.get_attribute("a'b", "href").await.unwrap_err();
    assert!(matches!(err, Error::ScriptExecutionFailed(ref m) if m == "SyntaxError"));
    assert_eq!(loader.get_language().await.unwrap().as_deref(), Some("de"));

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_pre_processing_runs_before_stop() {
    let engine = Arc::new(MockEngine::new());
    let config = Configuration::builder()
        .pre_processing_script("window.__prepared = 1", PreprocessingTiming::BeforeStopObserver)
        .build()
        .unwrap();
    let loader = load(&engine, Arc::new(config)).await;

    loader.wait_until_ready().await.unwrap();

    let prepared = position_of(&engine, "window.__prepared = 1").await;
    let stopped = position_of(&engine, STOP_OBSERVER_MARKER).await;
    assert!(prepared < stopped);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_pre_processing_runs_after_stop() {
    let engine = Arc::new(MockEngine::new());
    let config = Configuration::builder()
        .pre_processing_script("window.__prepared = 1", PreprocessingTiming::AfterStopObserver)
        .build()
        .unwrap();
    let loader = load(&engine, Arc::new(config)).await;

    loader.wait_until_ready().await.unwrap();

    let prepared = position_of(&engine, "window.__prepared = 1").await;
    let stopped = position_of(&engine, STOP_OBSERVER_MARKER).await;
    assert!(stopped < prepared);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_pre_processing_still_resolves() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond("window.__broken", MockResponse::Fail("TypeError".to_string()))
        .await;
    let config = Configuration::builder()
        .pre_processing_script("window.__broken()", PreprocessingTiming::BeforeStopObserver)
        .build()
        .unwrap();
    let loader = load(&engine, Arc::new(config)).await;

    assert_eq!(loader.wait_until_ready().await.unwrap(), ReadinessState::Stable);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_sanitization_after_resolution() {
    let engine = Arc::new(MockEngine::new());
    let config = Configuration::builder()
        .sanitization(Sanitization::none().with(SanitizeTarget::Script).with(SanitizeTarget::Iframe))
        .build()
        .unwrap();
    let loader = load(&engine, Arc::new(config)).await;

    loader.wait_until_ready().await.unwrap();

    let stopped = position_of(&engine, STOP_OBSERVER_MARKER).await;
    let sanitized = position_of(&engine, r#"(["script, noscript","iframe"])"#).await;
    assert!(stopped < sanitized);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_resource_gate_fails_open() {
    let engine = Arc::new(MockEngine::new());
    engine.fail_content_blocking(true);

    let loader = load(&engine, default_config()).await;

    assert_eq!(loader.wait_until_ready().await.unwrap(), ReadinessState::Stable);
    assert!(engine.position("load https://x.com/").await.is_some());

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_resource_gate_skipped_when_disabled() {
    let engine = Arc::new(MockEngine::new());
    let config = Configuration::builder().block_resources(false).build().unwrap();

    let loader = load(&engine, Arc::new(config)).await;
    loader.wait_until_ready().await.unwrap();

    assert!(engine.position("install_content_blocking_rules").await.is_none());

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_images_resolved_against_session_url() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond(
            "picture source",
            MockResponse::Value(EngineValue::from(serde_json::json!(["https://x.com/a", "/b"]))),
        )
        .await;
    let loader = load(&engine, default_config()).await;

    let images = loader.get_images_absolute_string(None).await.unwrap();

    let expected: HashSet<String> = ["https://x.com/a", "https://x.com/b"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(images, expected);

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_markup_without_base_keeps_absolute_links_only() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond(
            "a[href]",
            MockResponse::Value(EngineValue::from(serde_json::json!([
                "https://x.com/a",
                "https://x.com/a",
                "relative/b"
            ]))),
        )
        .await;
    let loader = WebLoader::from_html(engine.clone(), "<a href='/a'>a</a>", None, default_config())
        .await
        .unwrap();

    let links = loader.get_links_url(None).await.unwrap();
    assert_eq!(links.len(), 1);
    assert!(engine.position("load_markup about:blank").await.is_some());

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_nodes_count() {
    let engine = Arc::new(MockEngine::new());
    engine
        .respond("removed += 1", MockResponse::Value(EngineValue::Number(3.0)))
        .await;
    let loader = load(&engine, default_config()).await;

    assert_eq!(loader.remove_scripts().await.unwrap(), 3);
    assert_eq!(loader.remove_nodes::<&str>(&[]).await.unwrap(), 0);

    loader.close().await;
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let engine = Arc::new(MockEngine::new());

    let result = WebLoader::from_url_str(engine.clone(), "not a url", default_config()).await;

    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(engine.calls().await.is_empty());
}

#[tokio::test]
async fn test_invalid_base_url_is_rejected() {
    let engine = Arc::new(MockEngine::new());

    let result =
        WebLoader::from_html_with_base_str(engine.clone(), "<p></p>", "::", default_config()).await;

    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test(start_paused = true)]
async fn test_script_timeout_bounds_evaluation() {
    let engine = Arc::new(MockEngine::new());
    engine.respond("slow()", MockResponse::Hang).await;
    let config = Configuration::builder()
        .script_timeout(Some(Duration::from_secs(2)))
        .build()
        .unwrap();
    let loader = load(&engine, Arc::new(config)).await;

    assert!(matches!(loader.run("slow()").await, Err(Error::Timeout(_))));

    loader.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_engine() {
    let engine = Arc::new(MockEngine::new());
    let loader = load(&engine, default_config()).await;
    loader.wait_until_ready().await.unwrap();

    drop(loader);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.detach_count(), 1);
}
