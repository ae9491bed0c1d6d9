//! Pre-navigation blocking of non-essential subresources

use tracing::{debug, warn};

use super::config::Configuration;
use crate::engine::{ContentRuleSet, RenderEngine, ResourceType};

/// Resource types blocked when resource blocking is enabled
pub const BLOCKED_RESOURCE_TYPES: [ResourceType; 4] = [
    ResourceType::Image,
    ResourceType::StyleSheet,
    ResourceType::Media,
    ResourceType::Font,
];

/// Rule set blocking images, stylesheets, media and fonts on every URL
pub fn default_rules() -> ContentRuleSet {
    ContentRuleSet::block(&BLOCKED_RESOURCE_TYPES)
}

/// Install the blocking rules if the configuration asks for them
///
/// Fails open: when the engine rejects the rules, navigation proceeds
/// unfiltered. Returns whether rules are in place.
pub async fn install(engine: &dyn RenderEngine, config: &Configuration) -> bool {
    if !config.block_resources() {
        return false;
    }

    match engine.install_content_blocking_rules(&default_rules()).await {
        Ok(()) => {
            debug!("Resource gate installed");
            true
        }
        Err(e) => {
            warn!("Resource gate unavailable, loading unfiltered: {}", e);
            false
        }
    }
}
