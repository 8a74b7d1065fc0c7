//! Resource group templates and selector definitions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::util::serde::MemorySize;

/// Policy deciding which waiting query or child group is admitted next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Oldest waiting query first.
    #[default]
    Fifo,
    /// Random child, proportional to `scheduling_weight`.
    Weighted,
    /// Child with the least weighted service so far.
    WeightedFair,
    /// Highest-priority waiting query first.
    QueryPriority,
}

fn default_weight() -> u32 {
    1
}

/// Declarative definition of a resource group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupTemplate {
    /// Literal name or pattern with `${VAR}` placeholders.
    pub name: String,
    /// Maximum concurrently running queries in this subtree.
    pub hard_concurrency_limit: u32,
    /// Maximum waiting queries in this subtree.
    pub max_queued: usize,
    /// Memory usage above which admissions into the subtree pause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_memory_limit: Option<MemorySize>,
    /// Ordering policy for this group's queue or children.
    #[serde(default)]
    pub scheduling_policy: SchedulingPolicy,
    /// Share relative to siblings under weighted policies.
    #[serde(default = "default_weight")]
    pub scheduling_weight: u32,
    /// Child templates; empty means this is a leaf group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_groups: Vec<ResourceGroupTemplate>,
}

impl ResourceGroupTemplate {
    /// Template with the given limits and defaults for everything else.
    pub fn new(name: impl Into<String>, hard_concurrency_limit: u32, max_queued: usize) -> Self {
        Self {
            name: name.into(),
            hard_concurrency_limit,
            max_queued,
            soft_memory_limit: None,
            scheduling_policy: SchedulingPolicy::default(),
            scheduling_weight: default_weight(),
            sub_groups: Vec::new(),
        }
    }

    /// Set the scheduling policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.scheduling_policy = policy;
        self
    }

    /// Set the scheduling weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.scheduling_weight = weight;
        self
    }

    /// Set the soft memory limit.
    #[must_use]
    pub fn with_soft_memory_limit(mut self, limit: impl Into<MemorySize>) -> Self {
        self.soft_memory_limit = Some(limit.into());
        self
    }

    /// Append a child template.
    #[must_use]
    pub fn with_sub_group(mut self, child: Self) -> Self {
        self.sub_groups.push(child);
        self
    }

    /// Validate this template and its descendants.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("group name must not be empty".into());
        }
        if self.name.contains('.') {
            return Err(format!("group name `{}` must not contain `.`", self.name));
        }
        if self.scheduling_weight == 0 {
            return Err(format!(
                "group `{}`: scheduling_weight must be greater than 0",
                self.name
            ));
        }
        if let Some(limit) = &self.soft_memory_limit {
            limit
                .to_bytes()
                .map_err(|e| format!("group `{}`: {e}", self.name))?;
        }
        if self.scheduling_policy == SchedulingPolicy::QueryPriority {
            if let Some(child) = self
                .sub_groups
                .iter()
                .find(|c| c.scheduling_policy != SchedulingPolicy::QueryPriority)
            {
                return Err(format!(
                    "group `{}`: sub-group `{}` must also use query_priority",
                    self.name, child.name
                ));
            }
        }
        validate_siblings(&self.sub_groups).map_err(|e| format!("group `{}`: {e}", self.name))
    }
}

fn validate_siblings(groups: &[ResourceGroupTemplate]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for group in groups {
        if !seen.insert(group.name.as_str()) {
            return Err(format!("duplicate sibling group name `{}`", group.name));
        }
        group.validate()?;
    }
    Ok(())
}

/// Bounds on a query's resource estimate; absent bounds are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceEstimateSpec {
    /// Minimum estimated peak memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_peak_memory: Option<MemorySize>,
    /// Maximum estimated peak memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_peak_memory: Option<MemorySize>,
    /// Minimum estimated execution time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_execution_time_ms: Option<u64>,
    /// Maximum estimated execution time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time_ms: Option<u64>,
}

/// One selection rule: predicates over query attributes plus a target path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorSpec {
    /// Regex the authenticated user must fully match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Regex the original (pre-impersonation) user must fully match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_user: Option<String>,
    /// Regex the client source must fully match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Declared query type, matched exactly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    /// Tags that must all be present on the query.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_tags: Vec<String>,
    /// Bounds on the query's resource estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_estimate: Option<ResourceEstimateSpec>,
    /// Target path template, e.g. `global.adhoc.${USER}`.
    pub group: String,
}

impl SelectorSpec {
    /// Selector matching every query and routing to `group`.
    pub fn for_group(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Self::default()
        }
    }

    /// Require the user to match `pattern`.
    #[must_use]
    pub fn with_user(mut self, pattern: impl Into<String>) -> Self {
        self.user = Some(pattern.into());
        self
    }

    /// Require the source to match `pattern`.
    #[must_use]
    pub fn with_source(mut self, pattern: impl Into<String>) -> Self {
        self.source = Some(pattern.into());
        self
    }

    /// Require the declared query type.
    #[must_use]
    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = Some(query_type.into());
        self
    }

    /// Require a client tag.
    #[must_use]
    pub fn with_client_tag(mut self, tag: impl Into<String>) -> Self {
        self.client_tags.push(tag.into());
        self
    }

    /// Validate fields that do not depend on the template forest.
    pub fn validate(&self) -> Result<(), String> {
        if self.group.is_empty() {
            return Err("selector group must not be empty".into());
        }
        if let Some(estimate) = &self.resource_estimate {
            for size in [&estimate.min_peak_memory, &estimate.max_peak_memory]
                .into_iter()
                .flatten()
            {
                size.to_bytes()?;
            }
        }
        Ok(())
    }
}

/// Complete configuration consumed from a configuration manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupsConfig {
    /// Top-level group templates.
    #[serde(default)]
    pub root_groups: Vec<ResourceGroupTemplate>,
    /// Ordered selection rules.
    #[serde(default)]
    pub selectors: Vec<SelectorSpec>,
    /// Policy the implicit root uses to choose between top-level groups.
    #[serde(default)]
    pub root_scheduling_policy: SchedulingPolicy,
}

impl ResourceGroupsConfig {
    /// Validate the template forest and selectors.
    pub fn validate(&self) -> Result<(), String> {
        validate_siblings(&self.root_groups)?;
        if self.root_scheduling_policy == SchedulingPolicy::QueryPriority {
            if let Some(group) = self
                .root_groups
                .iter()
                .find(|g| g.scheduling_policy != SchedulingPolicy::QueryPriority)
            {
                return Err(format!(
                    "top-level group `{}` must use query_priority like the root",
                    group.name
                ));
            }
        }
        for (idx, selector) in self.selectors.iter().enumerate() {
            selector
                .validate()
                .map_err(|e| format!("selector #{idx} invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
