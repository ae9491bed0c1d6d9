//! Data exchanged with a rendering engine

use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::fmt;

/// CDP resource type for each content-rule resource type name
static CDP_RESOURCE_TYPES: phf::Map<&'static str, &'static str> = phf_map! {
    "document" => "Document",
    "image" => "Image",
    "style-sheet" => "Stylesheet",
    "script" => "Script",
    "font" => "Font",
    "media" => "Media",
    "raw" => "XHR",
    "websocket" => "WebSocket",
    "fetch" => "Fetch",
};

/// Value produced by evaluating a program in the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    /// `null` or `undefined`
    Null,
    /// Boolean value
    Bool(bool),
    /// Number value
    Number(f64),
    /// String value
    String(String),
    /// Array (as JSON)
    Array(Vec<serde_json::Value>),
    /// Object (as JSON)
    Object(serde_json::Map<String, serde_json::Value>),
}

impl EngineValue {
    /// Shape name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            EngineValue::Null => "null",
            EngineValue::Bool(_) => "boolean",
            EngineValue::Number(_) => "number",
            EngineValue::String(_) => "string",
            EngineValue::Array(_) => "array",
            EngineValue::Object(_) => "object",
        }
    }
}

impl From<serde_json::Value> for EngineValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => EngineValue::Null,
            serde_json::Value::Bool(b) => EngineValue::Bool(b),
            serde_json::Value::Number(n) => EngineValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => EngineValue::String(s),
            serde_json::Value::Array(items) => EngineValue::Array(items),
            serde_json::Value::Object(map) => EngineValue::Object(map),
        }
    }
}

impl From<&str> for EngineValue {
    fn from(value: &str) -> Self {
        EngineValue::String(value.to_string())
    }
}

/// Identifier of a script installed with `inject_script`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptId(pub String);

/// Layout the engine should emulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// Leave the engine's own choice
    #[default]
    Recommended,
    /// Small touch viewport
    Mobile,
    /// Large desktop viewport
    Desktop,
}

/// Cookie injected before navigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// URL the cookie is scoped to (used when `domain` is absent)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    /// Cookie domain
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub domain: Option<String>,
    /// Cookie path
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    /// Secure flag
    #[serde(default)]
    pub secure: bool,
    /// HttpOnly flag
    #[serde(default)]
    pub http_only: bool,
    /// Expiry as seconds since the Unix epoch; session cookie when absent
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires: Option<f64>,
}

impl Cookie {
    /// Cookie scoped to a domain
    pub fn new<N: Into<String>, V: Into<String>, D: Into<String>>(name: N, value: V, domain: D) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            url: None,
            domain: Some(domain.into()),
            path: Some("/".to_string()),
            secure: false,
            http_only: false,
            expires: None,
        }
    }
}

/// Resource category a content rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Document,
    Image,
    StyleSheet,
    Script,
    Font,
    Media,
    Raw,
    Websocket,
    Fetch,
}

impl ResourceType {
    /// Rule-list name of the resource type
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Document => "document",
            ResourceType::Image => "image",
            ResourceType::StyleSheet => "style-sheet",
            ResourceType::Script => "script",
            ResourceType::Font => "font",
            ResourceType::Media => "media",
            ResourceType::Raw => "raw",
            ResourceType::Websocket => "websocket",
            ResourceType::Fetch => "fetch",
        }
    }

    /// Matching CDP `Network.ResourceType`
    pub fn cdp_name(&self) -> Option<&'static str> {
        CDP_RESOURCE_TYPES.get(self.as_str()).copied()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a content rule matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTrigger {
    /// Regular expression over the request URL
    #[serde(rename = "url-filter")]
    pub url_filter: String,
    /// Resource types the rule applies to; empty means all
    #[serde(rename = "resource-type", default, skip_serializing_if = "Vec::is_empty")]
    pub resource_type: Vec<ResourceType>,
}

/// What a matching content rule does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleActionKind {
    Block,
}

/// Action of a content rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: RuleActionKind,
}

/// One content-blocking rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    pub trigger: RuleTrigger,
    pub action: RuleAction,
}

/// Ordered list of content-blocking rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRuleSet {
    pub rules: Vec<ContentRule>,
}

impl ContentRuleSet {
    /// Rule set blocking the given resource types on every URL
    pub fn block(resource_types: &[ResourceType]) -> Self {
        Self {
            rules: vec![ContentRule {
                trigger: RuleTrigger {
                    url_filter: ".*".to_string(),
                    resource_type: resource_types.to_vec(),
                },
                action: RuleAction {
                    kind: RuleActionKind::Block,
                },
            }],
        }
    }

    /// Whether the set contains no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Navigation progress reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    /// The main frame committed to a new document
    Committed { url: String },
    /// The main frame finished loading
    Finished,
}
