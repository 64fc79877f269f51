//! Named action policies.
//!
//! Each throttled feature picks an action name and gets its own limit and
//! window. Policies are loaded from YAML and fall back to the built-in table
//! used by Builder's Pub.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::window::TimeUnit;
use crate::error::{PubgateError, Result};

/// Limit and window applied to one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
    /// Maximum admitted requests per window
    pub limit: u64,
    /// Window length in seconds
    #[serde(default)]
    pub window_seconds: Option<u64>,
    /// Window length as a unit, alternative to `window_seconds`
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    /// Optional description for logs
    #[serde(default)]
    pub name: Option<String>,
}

impl ActionPolicy {
    pub fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds: Some(window_seconds),
            unit: None,
            name: None,
        }
    }

    /// Effective window length in seconds.
    pub fn window_secs(&self) -> u64 {
        match (self.window_seconds, self.unit) {
            (Some(secs), _) => secs,
            (None, Some(unit)) => unit.as_secs(),
            (None, None) => 0,
        }
    }

    fn validate(&self, action: &str) -> Result<()> {
        if action.is_empty() {
            return Err(PubgateError::Config("policy with empty action name".into()));
        }
        if self.limit == 0 {
            return Err(PubgateError::Config(format!(
                "policy '{}': limit must be positive",
                action
            )));
        }
        match (self.window_seconds, self.unit) {
            (Some(_), Some(_)) => Err(PubgateError::Config(format!(
                "policy '{}': set either window_seconds or unit, not both",
                action
            ))),
            (None, None) => Err(PubgateError::Config(format!(
                "policy '{}': window_seconds or unit is required",
                action
            ))),
            (Some(0), None) => Err(PubgateError::Config(format!(
                "policy '{}': window_seconds must be positive",
                action
            ))),
            (Some(secs), None) if secs.checked_mul(1000).is_none() => Err(PubgateError::Config(
                format!("policy '{}': window_seconds {} is too large", action, secs),
            )),
            _ => Ok(()),
        }
    }
}

/// The full action → policy table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicies {
    #[serde(default)]
    pub actions: HashMap<String, ActionPolicy>,
}

impl RateLimitPolicies {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits used by Builder's Pub features.
    pub fn builtin() -> Self {
        let minute = TimeUnit::Minute.as_secs();
        let day = TimeUnit::Day.as_secs();

        let mut policies = Self::new();
        policies.insert("comment_add", ActionPolicy::new(5, minute));
        policies.insert("collab_comment_add", ActionPolicy::new(5, minute));
        policies.insert("upvote_toggle", ActionPolicy::new(10, minute));
        policies.insert("error_report", ActionPolicy::new(10, minute));
        policies.insert("project_create", ActionPolicy::new(5, day));
        policies.insert("collab_create", ActionPolicy::new(5, day));
        policies
    }

    pub fn insert(&mut self, action: &str, policy: ActionPolicy) {
        self.actions.insert(action.to_string(), policy);
    }

    /// Load a policy table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a policy table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let policies: RateLimitPolicies = serde_yaml::from_str(yaml).map_err(|e| {
            PubgateError::Config(format!("Failed to parse rate limit policies: {}", e))
        })?;
        policies.validate()?;
        Ok(policies)
    }

    /// Check every entry.
    pub fn validate(&self) -> Result<()> {
        for (action, policy) in &self.actions {
            policy.validate(action)?;
        }
        Ok(())
    }

    /// Entries of `overrides` replace or extend this table.
    pub fn merge(mut self, overrides: RateLimitPolicies) -> Self {
        self.actions.extend(overrides.actions);
        self
    }

    /// Get the policy for an action.
    pub fn get(&self, action: &str) -> Option<&ActionPolicy> {
        self.actions.get(action)
    }

    /// Longest window of any configured action, in seconds.
    pub fn longest_window_secs(&self) -> u64 {
        self.actions
            .values()
            .map(ActionPolicy::window_secs)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies() {
        let policies = RateLimitPolicies::builtin();
        assert!(policies.validate().is_ok());

        assert_eq!(policies.get("comment_add"), Some(&ActionPolicy::new(5, 60)));
        assert_eq!(policies.get("collab_comment_add"), Some(&ActionPolicy::new(5, 60)));
        assert_eq!(policies.get("upvote_toggle"), Some(&ActionPolicy::new(10, 60)));
        assert_eq!(policies.get("error_report"), Some(&ActionPolicy::new(10, 60)));
        assert_eq!(policies.get("project_create"), Some(&ActionPolicy::new(5, 86400)));
        assert_eq!(policies.get("collab_create"), Some(&ActionPolicy::new(5, 86400)));
        assert_eq!(policies.longest_window_secs(), 86400);
    }

    #[test]
    fn test_parse_policies() {
        let yaml = r#"
actions:
  comment_add:
    limit: 3
    window_seconds: 30
  upvote_toggle:
    limit: 20
    unit: minute
    name: upvotes
"#;
        let policies = RateLimitPolicies::from_yaml(yaml).unwrap();

        let comment = policies.get("comment_add").unwrap();
        assert_eq!(comment.limit, 3);
        assert_eq!(comment.window_secs(), 30);

        let upvote = policies.get("upvote_toggle").unwrap();
        assert_eq!(upvote.limit, 20);
        assert_eq!(upvote.unit, Some(TimeUnit::Minute));
        assert_eq!(upvote.window_secs(), 60);
        assert_eq!(upvote.name.as_deref(), Some("upvotes"));
    }

    #[test]
    fn test_reject_invalid_policies() {
        let zero_limit = r#"
actions:
  comment_add:
    limit: 0
    window_seconds: 60
"#;
        let both_windows = r#"
actions:
  comment_add:
    limit: 5
    window_seconds: 60
    unit: minute
"#;
        let no_window = r#"
actions:
  comment_add:
    limit: 5
"#;
        let zero_window = r#"
actions:
  comment_add:
    limit: 5
    window_seconds: 0
"#;
        for yaml in [zero_limit, both_windows, no_window, zero_window] {
            assert!(matches!(
                RateLimitPolicies::from_yaml(yaml),
                Err(PubgateError::Config(_))
            ));
        }
    }

    #[test]
    fn test_reject_malformed_yaml() {
        let result = RateLimitPolicies::from_yaml("actions: [not, a, map]");
        assert!(matches!(result, Err(PubgateError::Config(_))));
    }

    #[test]
    fn test_merge_overrides_builtin() {
        let overrides = RateLimitPolicies::from_yaml(
            r#"
actions:
  comment_add:
    limit: 1
    unit: hour
  bio_update:
    limit: 2
    window_seconds: 600
"#,
        )
        .unwrap();

        let merged = RateLimitPolicies::builtin().merge(overrides);

        assert_eq!(merged.get("comment_add").unwrap().limit, 1);
        assert_eq!(merged.get("comment_add").unwrap().window_secs(), 3600);
        assert_eq!(merged.get("bio_update").unwrap().window_secs(), 600);
        assert_eq!(merged.get("upvote_toggle").unwrap().limit, 10);
    }

    #[test]
    fn test_deploy_policy_file_matches_builtin() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/deploy/policies.yaml");
        let policies = RateLimitPolicies::from_file(path).unwrap();

        let builtin = RateLimitPolicies::builtin();
        assert_eq!(policies.actions.len(), builtin.actions.len());
        for (action, policy) in &builtin.actions {
            let loaded = policies.get(action).unwrap();
            assert_eq!(loaded.limit, policy.limit, "{}", action);
            assert_eq!(loaded.window_secs(), policy.window_secs(), "{}", action);
        }
    }

    #[test]
    fn test_unknown_action() {
        let policies = RateLimitPolicies::builtin();
        assert!(policies.get("delete_everything").is_none());
    }
}
