//! # Rendering engine seam
//!
//! The loader talks to a page-rendering engine only through [`RenderEngine`].
//!
//! ## Module structure
//! - `traits`: the engine trait
//! - `types`: values, rules and events exchanged with an engine
//! - `cdp`: Chrome DevTools Protocol implementation
//! - `mock`: scriptable in-memory implementation for tests

pub mod traits;
pub mod types;
pub mod cdp;
pub mod mock;

pub use traits::RenderEngine;
pub use types::{
    ContentMode, ContentRule, ContentRuleSet, Cookie, EngineValue, NavigationEvent, ResourceType,
    RuleAction, RuleActionKind, RuleTrigger, ScriptId,
};

pub use cdp::CdpEngine;
pub use mock::{MockEngine, MockResponse};
