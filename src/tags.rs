//! Tag hygiene
//!
//! Validation of the mandatory governance tags and normalization of tag
//! capitalization. The checks are deliberately simple: a fixed set of
//! required keys, an allow-list for `Environment`, and two format patterns.

use crate::error::{CopilotError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const REQUIRED_TAGS: [&str; 3] = ["Environment", "Owner", "Project"];
pub const VALID_ENVIRONMENTS: [&str; 3] = ["Production", "Staging", "Development"];

lazy_static! {
    static ref OWNER_PATTERN: Regex = Regex::new(r"^[^@]+@[^@]+\.[^@]+$").expect("owner pattern is valid");
    static ref PROJECT_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9-]+$").expect("project pattern is valid");
}

/// Validation errors for a tag set; empty means the tags are compliant.
pub fn validate_tags(tags: &BTreeMap<String, String>) -> Vec<String> {
    let mut errors: Vec<String> = REQUIRED_TAGS
        .iter()
        .filter(|tag| !tags.contains_key(**tag))
        .map(|tag| format!("Missing required tag: {}", tag))
        .collect();

    if let Some(env) = tags.get("Environment") {
        if !VALID_ENVIRONMENTS.contains(&env.as_str()) {
            errors.push(format!("Invalid Environment value: {}", env));
        }
    }
    if let Some(owner) = tags.get("Owner") {
        if !OWNER_PATTERN.is_match(owner) {
            errors.push(format!("Invalid Owner format: {}", owner));
        }
    }
    if let Some(project) = tags.get("Project") {
        if !PROJECT_PATTERN.is_match(project) {
            errors.push(format!("Invalid Project format: {}", project));
        }
    }
    errors
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValidationResponse {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Handle a `{"tags": {...}}` validation event.
pub fn handle_validation_event(event: &serde_json::Value) -> Result<TagValidationResponse> {
    let tags = event
        .get("tags")
        .ok_or_else(|| CopilotError::Config("Missing 'tags' in event".to_string()))?;
    let tags: BTreeMap<String, String> = serde_json::from_value(tags.clone())?;
    let errors = validate_tags(&tags);
    Ok(TagValidationResponse {
        is_valid: errors.is_empty(),
        errors,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// First character upper-cased, the rest lower-cased.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Capitalized replacements for the tags whose key or value changes.
pub fn correct_tags(tags: &[Tag]) -> Vec<Tag> {
    tags.iter()
        .filter_map(|tag| {
            let corrected = Tag {
                key: capitalize(&tag.key),
                value: capitalize(&tag.value),
            };
            (corrected != *tag).then_some(corrected)
        })
        .collect()
}
