//! Named rate limit policies.
//!
//! A policy binds a name (for example `login` or `create_round`) to a quota.
//! Policies are loaded from YAML, either on their own or as the `policies`
//! section of the service configuration:
//!
//! ```yaml
//! login:
//!   limit: 5
//!   unit: minute
//! create_round:
//!   limit: 10
//!   window_ms: 60000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::quota::{Quota, TimeWindow};
use crate::error::{Result, SlidelogError};

/// A single policy as written in configuration.
///
/// Exactly one of `window_ms` and `unit` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Number of requests admitted per window
    pub limit: u64,
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Window as a named unit
    #[serde(default)]
    pub unit: Option<TimeWindow>,
    /// Optional description for this policy
    #[serde(default)]
    pub description: Option<String>,
}

impl PolicyRule {
    /// Resolve the rule into a validated quota.
    pub fn quota(&self) -> Result<Quota> {
        match (self.window_ms, self.unit) {
            (Some(ms), None) => Quota::new(self.limit, ms),
            (None, Some(unit)) => Quota::per(unit, self.limit),
            (Some(_), Some(_)) => Err(SlidelogError::Config(
                "set either window_ms or unit, not both".to_string(),
            )),
            (None, None) => Err(SlidelogError::Config(
                "one of window_ms or unit is required".to_string(),
            )),
        }
    }
}

/// Validated policies indexed by name.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    quotas: HashMap<String, Quota>,
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a map of rules.
    pub fn from_rules(rules: &HashMap<String, PolicyRule>) -> Result<Self> {
        let mut quotas = HashMap::with_capacity(rules.len());
        for (name, rule) in rules {
            let quota = rule.quota().map_err(|e| {
                SlidelogError::Config(format!("policy '{}': {}", name, e))
            })?;
            quotas.insert(name.clone(), quota);
        }
        Ok(Self { quotas })
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: HashMap<String, PolicyRule> = serde_yaml::from_str(yaml)
            .map_err(|e| SlidelogError::Config(format!("Failed to parse policies: {}", e)))?;
        Self::from_rules(&rules)
    }

    /// Add or replace a policy.
    pub fn insert(&mut self, name: &str, quota: Quota) {
        self.quotas.insert(name.to_string(), quota);
    }

    /// Get the quota for a policy.
    pub fn get(&self, name: &str) -> Option<Quota> {
        self.quotas.get(name).copied()
    }

    /// Largest window among all policies, in milliseconds.
    pub fn max_window_ms(&self) -> Option<u64> {
        self.quotas.values().map(Quota::window_ms).max()
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}
