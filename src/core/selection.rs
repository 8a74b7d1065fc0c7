//! Rule-based mapping from query attributes to a target resource group.
//!
//! Rules are evaluated strictly in configured order and the first match wins.
//! Selection is a pure function of the criteria and the loaded rules.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ResourceEstimateSpec, SelectorSpec};
use crate::core::template::{match_selector_segment, parse_placeholders, substitute, Piece};
use crate::core::{ResourceEstimate, ResourceGroupId, SchedulerError, TemplateForest};

/// Variable bound to the authenticated user.
pub const USER_VARIABLE: &str = "USER";
/// Variable bound to the original user (defaults to the authenticated user).
pub const ORIGINAL_USER_VARIABLE: &str = "ORIGINAL_USER";
/// Variable bound to the client source, when present.
pub const SOURCE_VARIABLE: &str = "SOURCE";

/// Attributes of a query evaluated against selection rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    /// Authenticated user.
    pub user: String,
    /// User before impersonation; `None` means same as `user`.
    pub original_user: Option<String>,
    /// Client source (e.g. the tool submitting the query).
    pub source: Option<String>,
    /// Declared query type (e.g. `SELECT`, `INSERT`).
    pub query_type: Option<String>,
    /// Client-supplied tags.
    pub client_tags: BTreeSet<String>,
    /// Planner resource estimate.
    pub resource_estimate: ResourceEstimate,
}

impl SelectionCriteria {
    /// Criteria for a user with no other attributes.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    /// Set the original user.
    #[must_use]
    pub fn with_original_user(mut self, user: impl Into<String>) -> Self {
        self.original_user = Some(user.into());
        self
    }

    /// Set the client source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the declared query type.
    #[must_use]
    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = Some(query_type.into());
        self
    }

    /// Add a client tag.
    #[must_use]
    pub fn with_client_tag(mut self, tag: impl Into<String>) -> Self {
        self.client_tags.insert(tag.into());
        self
    }

    /// Set the resource estimate.
    #[must_use]
    pub fn with_resource_estimate(mut self, estimate: ResourceEstimate) -> Self {
        self.resource_estimate = estimate;
        self
    }

    fn original_user(&self) -> &str {
        self.original_user.as_deref().unwrap_or(&self.user)
    }
}

/// Result of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionContext {
    /// Leaf group the query should run in.
    pub group_id: ResourceGroupId,
    /// Variables captured while matching.
    pub variables: BTreeMap<String, String>,
    /// Position of the matching rule.
    pub rule_index: usize,
}

impl SelectionContext {
    /// Context targeting `group_id` directly, bypassing rules.
    #[must_use]
    pub const fn for_group(group_id: ResourceGroupId) -> Self {
        Self {
            group_id,
            variables: BTreeMap::new(),
            rule_index: 0,
        }
    }
}

#[derive(Debug, Default)]
struct EstimateRange {
    min: Option<u64>,
    max: Option<u64>,
    min_time: Option<u64>,
    max_time: Option<u64>,
}

impl EstimateRange {
    fn compile(spec: &ResourceEstimateSpec) -> Result<Self, String> {
        Ok(Self {
            min: spec.min_peak_memory.as_ref().map(|m| m.to_bytes()).transpose()?,
            max: spec.max_peak_memory.as_ref().map(|m| m.to_bytes()).transpose()?,
            min_time: spec.min_execution_time_ms,
            max_time: spec.max_execution_time_ms,
        })
    }

    fn matches(&self, estimate: &ResourceEstimate) -> bool {
        in_range(estimate.peak_memory_bytes, self.min, self.max)
            && in_range(estimate.execution_time_ms, self.min_time, self.max_time)
    }
}

fn in_range(value: Option<u64>, min: Option<u64>, max: Option<u64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    value.is_some_and(|v| min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m))
}

#[derive(Debug)]
struct CompiledSelector {
    user: Option<Regex>,
    original_user: Option<Regex>,
    source: Option<Regex>,
    query_type: Option<String>,
    client_tags: Vec<String>,
    estimate: Option<EstimateRange>,
    group: Vec<Vec<Piece>>,
}

fn anchored(pattern: &str, field: &str, idx: usize) -> Result<Regex, SchedulerError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        SchedulerError::Configuration(format!("selector #{idx}: invalid {field} pattern: {e}"))
    })
}

fn capture(regex: &Regex, value: &str, variables: &mut BTreeMap<String, String>) -> bool {
    let Some(captures) = regex.captures(value) else {
        return false;
    };
    for name in regex.capture_names().flatten() {
        if let Some(found) = captures.name(name) {
            variables.insert(name.to_string(), found.as_str().to_string());
        }
    }
    true
}

impl CompiledSelector {
    fn compile(
        idx: usize,
        spec: &SelectorSpec,
        forest: &TemplateForest,
    ) -> Result<Self, SchedulerError> {
        spec.validate()
            .map_err(|e| SchedulerError::Configuration(format!("selector #{idx}: {e}")))?;
        let user = spec.user.as_deref().map(|p| anchored(p, "user", idx)).transpose()?;
        let original_user = spec
            .original_user
            .as_deref()
            .map(|p| anchored(p, "original_user", idx))
            .transpose()?;
        let source = spec.source.as_deref().map(|p| anchored(p, "source", idx)).transpose()?;
        let estimate = spec
            .resource_estimate
            .as_ref()
            .map(EstimateRange::compile)
            .transpose()
            .map_err(|e| SchedulerError::Configuration(format!("selector #{idx}: {e}")))?;

        let mut known: BTreeSet<String> = [USER_VARIABLE, ORIGINAL_USER_VARIABLE, SOURCE_VARIABLE]
            .into_iter()
            .map(str::to_string)
            .collect();
        for regex in [&user, &original_user, &source].into_iter().flatten() {
            known.extend(regex.capture_names().flatten().map(str::to_string));
        }

        let mut group = Vec::new();
        let mut level = forest.roots();
        let mut reaches_leaf = false;
        for segment in spec.group.split('.') {
            let pieces = parse_placeholders(segment)
                .map_err(|e| SchedulerError::Configuration(format!("selector #{idx}: {e}")))?;
            for piece in &pieces {
                if let Piece::Variable(name) = piece {
                    if !known.contains(name) {
                        return Err(SchedulerError::Configuration(format!(
                            "selector #{idx}: unresolved placeholder `${{{name}}}` in `{}`",
                            spec.group
                        )));
                    }
                }
            }
            let template = match_selector_segment(level, segment).ok_or_else(|| {
                SchedulerError::Configuration(format!(
                    "selector #{idx}: group `{}` does not match any template at `{segment}`",
                    spec.group
                ))
            })?;
            reaches_leaf = template.is_leaf();
            level = template.sub_groups();
            group.push(pieces);
        }
        if !reaches_leaf {
            return Err(SchedulerError::Configuration(format!(
                "selector #{idx}: group `{}` is not a leaf group",
                spec.group
            )));
        }

        Ok(Self {
            user,
            original_user,
            source,
            query_type: spec.query_type.clone(),
            client_tags: spec.client_tags.clone(),
            estimate,
            group,
        })
    }

    fn evaluate(&self, criteria: &SelectionCriteria) -> Option<(ResourceGroupId, BTreeMap<String, String>)> {
        let mut variables = BTreeMap::new();
        variables.insert(USER_VARIABLE.to_string(), criteria.user.clone());
        variables.insert(
            ORIGINAL_USER_VARIABLE.to_string(),
            criteria.original_user().to_string(),
        );
        if let Some(source) = &criteria.source {
            variables.insert(SOURCE_VARIABLE.to_string(), source.clone());
        }

        if let Some(regex) = &self.user {
            if !capture(regex, &criteria.user, &mut variables) {
                return None;
            }
        }
        if let Some(regex) = &self.original_user {
            if !capture(regex, criteria.original_user(), &mut variables) {
                return None;
            }
        }
        if let Some(regex) = &self.source {
            let source = criteria.source.as_deref()?;
            if !capture(regex, source, &mut variables) {
                return None;
            }
        }
        if let Some(query_type) = &self.query_type {
            if criteria.query_type.as_deref() != Some(query_type.as_str()) {
                return None;
            }
        }
        if !self.client_tags.iter().all(|t| criteria.client_tags.contains(t)) {
            return None;
        }
        if let Some(range) = &self.estimate {
            if !range.matches(&criteria.resource_estimate) {
                return None;
            }
        }

        let segments = self
            .group
            .iter()
            .map(|pieces| substitute(pieces, &variables))
            .collect::<Option<Vec<_>>>()?;
        Some((ResourceGroupId::from_segments(segments), variables))
    }
}

/// Ordered, compiled selection rules.
#[derive(Debug, Default)]
pub struct SelectionEngine {
    selectors: Vec<CompiledSelector>,
}

impl SelectionEngine {
    /// Compile selectors against a template forest.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Configuration`] when a pattern does not compile,
    /// a placeholder cannot be bound, or a target is not a leaf template.
    pub fn compile(selectors: &[SelectorSpec], forest: &TemplateForest) -> Result<Self, SchedulerError> {
        let selectors = selectors
            .iter()
            .enumerate()
            .map(|(idx, spec)| CompiledSelector::compile(idx, spec, forest))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    /// Whether no rules are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Resolve criteria to a group using the first matching rule.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SelectionFailure`] when no rule matches.
    pub fn select(&self, criteria: &SelectionCriteria) -> Result<SelectionContext, SchedulerError> {
        self.selectors
            .iter()
            .enumerate()
            .find_map(|(rule_index, selector)| {
                selector
                    .evaluate(criteria)
                    .map(|(group_id, variables)| SelectionContext {
                        group_id,
                        variables,
                        rule_index,
                    })
            })
            .ok_or_else(|| {
                SchedulerError::SelectionFailure(format!(
                    "user `{}` (source {:?}, type {:?})",
                    criteria.user, criteria.source, criteria.query_type
                ))
            })
    }
}
