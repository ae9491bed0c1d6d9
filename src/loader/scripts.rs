//! Query programs run against the live document
//!
//! Every program is a function expression applied to JSON-encoded arguments,
//! so selectors and attribute names are always string literals in the
//! generated code.

use std::time::Duration;

/// Message channel the readiness observer posts on
pub const READY_CHANNEL: &str = "pageHarvestReady";

/// Message posted once the document is stable
pub const READY_MESSAGE: &str = "ready";

/// Mutation observer installed into each main-frame document
///
/// `post` is called with no arguments when the document has been quiet for
/// `debounceMs` after a mutation, or for `graceMs` without any mutation.
const OBSERVER_FN: &str = r#"(post, debounceMs, graceMs) => {
    if (window.__pageHarvestObserver) return;

    let signalled = false;
    let timer = null;

    const signal = () => {
        if (signalled) return;
        signalled = true;
        clearTimeout(timer);
        post();
    };

    const observer = new MutationObserver(() => {
        if (signalled) return;
        clearTimeout(timer);
        timer = setTimeout(signal, debounceMs);
    });

    observer.observe(document.documentElement || document, {
        subtree: true,
        childList: true,
        attributes: true,
        characterData: true
    });

    window.__pageHarvestObserver = {
        stop: () => {
            signalled = true;
            clearTimeout(timer);
            observer.disconnect();
        }
    };

    timer = setTimeout(signal, graceMs);
}"#;

const STOP_OBSERVER: &str = r#"(() => {
    const handle = window.__pageHarvestObserver;
    if (handle) handle.stop();
    return null;
})()"#;

/// Recursive text walk producing block-separated lines
const TEXT_CONTENT_FN: &str = r#"(selector) => {
    const root = selector === null
        ? (document.body || document.documentElement)
        : document.querySelector(selector);
    if (!root) return "";

    const skipped = new Set(["SCRIPT", "STYLE", "NOSCRIPT", "IMG", "LINK", "IFRAME"]);
    const breaks = new Set(["BR", "HR"]);
    const blocks = new Set([
        "ADDRESS", "ARTICLE", "ASIDE", "BLOCKQUOTE", "DD", "DETAILS", "DIALOG", "DIV",
        "DL", "DT", "FIELDSET", "FIGCAPTION", "FIGURE", "FOOTER", "FORM", "H1", "H2",
        "H3", "H4", "H5", "H6", "HEADER", "HGROUP", "LI", "MAIN", "NAV", "OL", "P",
        "PRE", "SECTION", "SUMMARY", "TABLE", "TR", "UL"
    ]);

    let out = "";
    const newline = () => {
        if (out.length > 0 && !out.endsWith("\n")) out += "\n";
    };

    const walk = (node) => {
        if (node.nodeType === Node.TEXT_NODE) {
            const text = node.textContent.replace(/[\r\n\f]+/g, " ").trim();
            if (text.length === 0) return;
            if (out.length > 0 && !out.endsWith("\n")) out += " ";
            out += text;
            return;
        }
        if (node.nodeType !== Node.ELEMENT_NODE) return;

        const tag = node.tagName.toUpperCase();
        if (skipped.has(tag)) return;
        if (breaks.has(tag)) {
            out += "\n";
            return;
        }

        const block = blocks.has(tag);
        if (block) newline();
        for (const child of node.childNodes) walk(child);
        if (block) newline();
    };

    walk(root);
    return out;
}"#;

const INNER_TEXT_FN: &str = r#"(selector) => {
    const node = selector === null ? document.body : document.querySelector(selector);
    return node?.innerText ?? "";
}"#;

const INNER_HTML_FN: &str = r#"(selector) => {
    const node = selector === null ? document.body : document.querySelector(selector);
    return node?.innerHTML ?? "";
}"#;

const ATTRIBUTE_FN: &str = r#"(selector, name) => {
    const node = document.querySelector(selector);
    return node ? node.getAttribute(name) : null;
}"#;

const IMAGE_SOURCES: &str = r#"(() => {
    const sources = new Set();
    const firstCandidate = (srcset) => {
        const candidate = srcset.split(",")[0].trim().split(/\s+/)[0];
        if (candidate) sources.add(candidate);
    };

    document.querySelectorAll("img").forEach((img) => {
        const src = img.getAttribute("src");
        if (src) sources.add(src);
        const srcset = img.getAttribute("srcset");
        if (srcset) firstCandidate(srcset);
    });
    document.querySelectorAll("picture source").forEach((source) => {
        const srcset = source.getAttribute("srcset");
        if (srcset) firstCandidate(srcset);
    });

    return Array.from(sources);
})()"#;

const LINKS: &str = r#"(() => {
    const links = new Set();
    document.querySelectorAll("a[href]").forEach((a) => {
        if (a.href) links.add(a.href);
    });
    return Array.from(links);
})()"#;

const METADATA: &str = r#"(() => {
    const content = (selector) => {
        const node = document.querySelector(selector);
        return node ? (node.getAttribute("content") || "").trim() : "";
    };
    const absolute = (value) => {
        if (!value) return "";
        try {
            return new URL(value, document.baseURI).href;
        } catch (e) {
            return "";
        }
    };
    const canonical = document.querySelector("link[rel='canonical']");

    return {
        title: (document.title || "").trim(),
        description: content("meta[name='description']"),
        ogTitle: content("meta[property='og:title']"),
        ogImage: absolute(content("meta[property='og:image']")),
        canonical: canonical ? absolute(canonical.getAttribute("href")) : "",
        lang: document.documentElement ? (document.documentElement.lang || "") : ""
    };
})()"#;

const LANGUAGE: &str = r#"(() => {
    const lang = document.documentElement ? document.documentElement.lang : "";
    return lang ? lang : null;
})()"#;

const CANONICAL: &str = r#"(() => {
    const link = document.querySelector("link[rel='canonical']");
    return link && link.href ? link.href : null;
})()"#;

const REMOVE_NODES_FN: &str = r#"(selectors) => {
    let removed = 0;
    for (const selector of selectors) {
        document.querySelectorAll(selector).forEach((node) => {
            node.remove();
            removed += 1;
        });
    }
    return removed;
}"#;

/// Encode a string as a JavaScript string literal
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn js_selector(selector: Option<&str>) -> String {
    selector.map(js_string).unwrap_or_else(|| "null".to_string())
}

/// Observer source; `post_ready` is an expression posting the ready message
pub fn observer(post_ready: &str, debounce: Duration, grace: Duration) -> String {
    format!(
        "({})(() => {{ {}; }}, {}, {})",
        OBSERVER_FN,
        post_ready,
        debounce.as_millis(),
        grace.as_millis()
    )
}

pub fn stop_observer() -> &'static str {
    STOP_OBSERVER
}

/// Block-structured text of the selected node, or of the body when `None`
pub fn text_content(selector: Option<&str>) -> String {
    format!("({})({})", TEXT_CONTENT_FN, js_selector(selector))
}

pub fn inner_text(selector: Option<&str>) -> String {
    format!("({})({})", INNER_TEXT_FN, js_selector(selector))
}

/// Inner HTML of the selected node, or of the body when `None`
pub fn inner_html(selector: Option<&str>) -> String {
    format!("({})({})", INNER_HTML_FN, js_selector(selector))
}

pub fn attribute(selector: &str, name: &str) -> String {
    format!("({})({}, {})", ATTRIBUTE_FN, js_string(selector), js_string(name))
}

pub fn image_sources() -> &'static str {
    IMAGE_SOURCES
}

pub fn links() -> &'static str {
    LINKS
}

pub fn metadata() -> &'static str {
    METADATA
}

pub fn language() -> &'static str {
    LANGUAGE
}

pub fn canonical() -> &'static str {
    CANONICAL
}

/// Remove every node matching any selector; evaluates to the count removed
pub fn remove_nodes<S: AsRef<str>>(selectors: &[S]) -> String {
    let list: Vec<serde_json::Value> = selectors
        .iter()
        .map(|s| serde_json::Value::String(s.as_ref().to_string()))
        .collect();
    format!("({})({})", REMOVE_NODES_FN, serde_json::Value::Array(list))
}
