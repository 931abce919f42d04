//! Action definition loading
//!
//! Tracked actions are configured as an action map of
//! `<action id>:<conversion name>` pairs. The action steps themselves come
//! either from a local JSON file or from the PostHog actions API, and are
//! expanded into one [`ActionDefinition`] per step.

use crate::error::{ExportError, Result};
use crate::matching::{ActionDefinition, ElementCriteria, Operator, PropertyFilter};
use crate::posthog::PostHogClient;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Source action as returned by the actions API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Action id
    pub id: u64,
    /// Human-readable action name
    #[serde(default)]
    pub name: Option<String>,
    /// Match steps; an event matching any step matches the action
    #[serde(default)]
    pub steps: Option<Vec<ActionStep>>,
}

/// One step of a source action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionStep {
    /// Event name
    #[serde(default)]
    pub event: Option<String>,
    /// Autocapture tag name
    #[serde(default)]
    pub tag_name: Option<String>,
    /// Autocapture element text
    #[serde(default)]
    pub text: Option<String>,
    /// Autocapture link target
    #[serde(default)]
    pub href: Option<String>,
    /// CSS selector
    #[serde(default)]
    pub selector: Option<String>,
    /// Page URL
    #[serde(default)]
    pub url: Option<String>,
    /// URL operator
    #[serde(default)]
    pub url_matching: Option<Operator>,
    /// Property filters
    #[serde(default)]
    pub properties: Option<Vec<PropertyFilter>>,
}

/// Pairing of a tracked action id with its conversion name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMapping {
    /// Tracked action id
    pub action_id: u64,
    /// Conversion name reported to the webhook
    pub conversion_name: String,
}

/// Parses an action map of the form `12:Signup,13:Purchase`.
///
/// # Errors
///
/// Returns `ExportError::Config` for entries without a `:`, non-numeric
/// ids, empty names or duplicate ids.
///
/// # Examples
///
/// ```
/// use gclid_export::definitions::parse_action_map;
///
/// let mappings = parse_action_map("12:Signup, 13:Purchase").unwrap();
/// assert_eq!(mappings.len(), 2);
/// assert_eq!(mappings[1].action_id, 13);
/// assert_eq!(mappings[1].conversion_name, "Purchase");
/// ```
pub fn parse_action_map(raw: &str) -> Result<Vec<ActionMapping>> {
    let mut mappings = Vec::new();
    let mut seen = HashSet::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, name) = entry.split_once(':').ok_or_else(|| {
            ExportError::Config(format!(
                "action_map entry '{}' must look like <action id>:<conversion name>",
                entry
            ))
        })?;

        let action_id: u64 = id.trim().parse().map_err(|_| {
            ExportError::Config(format!("action_map entry '{}' has a non-numeric id", entry))
        })?;

        let conversion_name = name.trim();
        if conversion_name.is_empty() {
            return Err(ExportError::Config(format!(
                "action_map entry '{}' has an empty conversion name",
                entry
            ))
            .into());
        }

        if !seen.insert(action_id) {
            return Err(ExportError::Config(format!(
                "action_map lists action {} more than once",
                action_id
            ))
            .into());
        }

        mappings.push(ActionMapping {
            action_id,
            conversion_name: conversion_name.to_string(),
        });
    }

    if mappings.is_empty() {
        return Err(ExportError::Config("action_map is empty".to_string()).into());
    }

    Ok(mappings)
}

/// Blank strings count as unset.
fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Expands an action into one definition per step.
///
/// # Errors
///
/// Returns `ExportError::Definition` if the action has no steps or a step
/// has no event name.
pub fn expand_action(action: &Action, conversion_name: &str) -> Result<Vec<ActionDefinition>> {
    let steps = action.steps.as_deref().unwrap_or_default();
    if steps.is_empty() {
        return Err(ExportError::Definition(format!("action {} has no steps", action.id)).into());
    }

    let mut definitions = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let event_name = non_empty(&step.event).ok_or_else(|| {
            ExportError::Definition(format!(
                "step {} of action {} has no event name",
                index, action.id
            ))
        })?;

        let properties = step.properties.clone().unwrap_or_default();
        for filter in properties.iter().filter(|f| !f.is_event_scoped()) {
            warn!(
                action_id = action.id,
                key = %filter.key,
                filter_type = %filter.filter_type,
                "Action uses a non-event property filter; matching events will fail the cycle"
            );
        }

        definitions.push(ActionDefinition {
            id: action.id,
            conversion_name: conversion_name.to_string(),
            event_name,
            elements: ElementCriteria {
                tag_name: non_empty(&step.tag_name),
                text: non_empty(&step.text),
                href: non_empty(&step.href),
                selector: non_empty(&step.selector),
            },
            url: non_empty(&step.url),
            url_matching: step.url_matching,
            properties,
        });
    }

    Ok(definitions)
}

/// Expands every mapped action, in action map order.
///
/// # Errors
///
/// Returns `ExportError::Definition` if a mapped action is missing from
/// `actions` or cannot be expanded.
pub fn build_definitions(
    mappings: &[ActionMapping],
    actions: &[Action],
) -> Result<Vec<ActionDefinition>> {
    let mut definitions = Vec::new();
    for mapping in mappings {
        let action = actions
            .iter()
            .find(|a| a.id == mapping.action_id)
            .ok_or_else(|| {
                ExportError::Definition(format!(
                    "no definition found for action {}",
                    mapping.action_id
                ))
            })?;
        definitions.extend(expand_action(action, &mapping.conversion_name)?);
    }
    Ok(definitions)
}

/// Reads a JSON array of actions from disk.
pub fn load_actions_file(path: &Path) -> Result<Vec<Action>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ExportError::Definition(format!(
            "failed to read definitions file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        ExportError::Definition(format!(
            "failed to parse definitions file {}: {}",
            path.display(),
            e
        ))
        .into()
    })
}

/// Fetches each mapped action from the PostHog actions API.
pub async fn fetch_actions(client: &PostHogClient, mappings: &[ActionMapping]) -> Result<Vec<Action>> {
    let mut actions = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        debug!(action_id = mapping.action_id, "Fetching action definition");
        let action = client.get_action(mapping.action_id).await.map_err(|e| {
            ExportError::Definition(format!(
                "failed to get action definition for {}: {}",
                mapping.action_id, e
            ))
        })?;
        actions.push(action);
    }
    Ok(actions)
}

/// Loads definitions from `definitions_file` when given, otherwise from the API.
pub async fn load_definitions(
    mappings: &[ActionMapping],
    definitions_file: Option<&Path>,
    client: &PostHogClient,
) -> Result<Vec<ActionDefinition>> {
    let actions = match definitions_file {
        Some(path) => load_actions_file(path)?,
        None => fetch_actions(client, mappings).await?,
    };

    let definitions = build_definitions(mappings, &actions)?;
    info!(
        actions = mappings.len(),
        definitions = definitions.len(),
        "Loaded action definitions"
    );
    Ok(definitions)
}
