//! Topic naming and matching for Tether plugs
//!
//! Input plugs subscribe broadly to `+/+/{plug_name}` so that any agent publishing
//! a plug with that name reaches them. Output plugs publish under a channel unique
//! to the agent instance: `{agent_type}/{agent_id}/{plug_name}`.

use crate::error::{AgentError, AgentResult};

/// Single-level wildcard segment
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Multi-level wildcard segment
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Resolve the topic an input plug subscribes to.
///
/// A non-empty `override_topic` always wins; otherwise the plug listens to
/// every publisher of a plug with the same name.
pub fn resolve_input_topic(name: &str, override_topic: Option<&str>) -> AgentResult<String> {
    ensure_plug_name(name)?;
    Ok(match non_empty(override_topic) {
        Some(topic) => topic.to_string(),
        None => format!("{SINGLE_LEVEL_WILDCARD}/{SINGLE_LEVEL_WILDCARD}/{name}"),
    })
}

/// Resolve the topic an output plug publishes to.
pub fn resolve_output_topic(
    agent_type: &str,
    agent_id: &str,
    name: &str,
    override_topic: Option<&str>,
) -> AgentResult<String> {
    ensure_plug_name(name)?;
    Ok(match non_empty(override_topic) {
        Some(topic) => topic.to_string(),
        None => format!("{agent_type}/{agent_id}/{name}"),
    })
}

fn ensure_plug_name(name: &str) -> AgentResult<()> {
    if name.is_empty() {
        return Err(AgentError::invalid_argument("plug name must not be empty"));
    }
    Ok(())
}

fn non_empty(topic: Option<&str>) -> Option<&str> {
    topic.filter(|t| !t.is_empty())
}

/// Check whether a concrete topic matches a subscription filter.
///
/// Follows MQTT semantics: `+` matches exactly one level, `#` matches the
/// remaining levels (including none) and is only valid as the last level.
/// Topics starting with `$` are never matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter.is_empty() || topic.is_empty() {
        return false;
    }

    let starts_with_wildcard = filter.starts_with(SINGLE_LEVEL_WILDCARD)
        || filter.starts_with(MULTI_LEVEL_WILDCARD);
    if topic.starts_with('$') && starts_with_wildcard {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return filter_levels.next().is_none(),
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Agent type (first level) of a three-part Tether topic
pub fn parse_agent_type(topic: &str) -> Option<&str> {
    topic.split('/').next().filter(|part| !part.is_empty())
}

/// Agent id (second level) of a three-part Tether topic
pub fn parse_agent_id(topic: &str) -> Option<&str> {
    topic.split('/').nth(1)
}

/// Plug name (third level) of a three-part Tether topic
pub fn parse_plug_name(topic: &str) -> Option<&str> {
    topic.split('/').nth(2)
}
