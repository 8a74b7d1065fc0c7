//! Compiled group templates and `${VAR}` placeholder handling.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;

use crate::config::{ResourceGroupTemplate, SchedulingPolicy};
use crate::core::SchedulerError;

/// Effective limits and policy of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    /// Maximum concurrently running queries in the subtree.
    pub hard_concurrency_limit: u32,
    /// Maximum waiting queries in the subtree.
    pub max_queued: usize,
    /// Subtree memory usage at which admissions pause.
    pub soft_memory_limit_bytes: Option<u64>,
    /// Ordering policy.
    pub scheduling_policy: SchedulingPolicy,
    /// Weight relative to siblings.
    pub scheduling_weight: u32,
}

impl GroupSpec {
    /// Spec of the implicit root: unbounded, ordering top-level groups by `policy`.
    #[must_use]
    pub const fn unbounded(policy: SchedulingPolicy) -> Self {
        Self {
            hard_concurrency_limit: u32::MAX,
            max_queued: usize::MAX,
            soft_memory_limit_bytes: None,
            scheduling_policy: policy,
            scheduling_weight: 1,
        }
    }
}

/// Piece of a string containing `${VAR}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    Literal(String),
    Variable(String),
}

/// Split `text` into literal and placeholder pieces.
pub(crate) fn parse_placeholders(text: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            pieces.push(Piece::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in `{text}`"))?;
        let name = &after[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid placeholder `${{{name}}}` in `{text}`"));
        }
        pieces.push(Piece::Variable(name.to_string()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest.to_string()));
    }
    Ok(pieces)
}

/// Substitute variables into pieces; `None` if a variable is unbound or the
/// result is empty or not a single path segment.
pub(crate) fn substitute(pieces: &[Piece], variables: &BTreeMap<String, String>) -> Option<String> {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Variable(name) => out.push_str(variables.get(name)?),
        }
    }
    (!out.is_empty() && !out.contains('.')).then_some(out)
}

#[derive(Debug)]
enum NameMatcher {
    Literal,
    Pattern(Regex),
}

/// A validated template ready for materialization.
#[derive(Debug)]
pub struct CompiledTemplate {
    name: String,
    matcher: NameMatcher,
    spec: GroupSpec,
    sub_groups: Vec<Arc<CompiledTemplate>>,
}

impl CompiledTemplate {
    fn compile(template: &ResourceGroupTemplate) -> Result<Self, SchedulerError> {
        let pieces = parse_placeholders(&template.name).map_err(SchedulerError::Configuration)?;
        let matcher = if pieces.iter().all(|p| matches!(p, Piece::Literal(_))) {
            NameMatcher::Literal
        } else {
            let mut pattern = String::from("^");
            for piece in &pieces {
                match piece {
                    Piece::Literal(text) => pattern.push_str(&regex::escape(text)),
                    Piece::Variable(_) => pattern.push_str("(?:[^.]+)"),
                }
            }
            pattern.push('$');
            let regex = Regex::new(&pattern).map_err(|e| {
                SchedulerError::Configuration(format!("group `{}`: {e}", template.name))
            })?;
            NameMatcher::Pattern(regex)
        };
        let soft_memory_limit_bytes = template
            .soft_memory_limit
            .as_ref()
            .map(crate::util::serde::MemorySize::to_bytes)
            .transpose()
            .map_err(|e| SchedulerError::Configuration(format!("group `{}`: {e}", template.name)))?;
        let sub_groups = template
            .sub_groups
            .iter()
            .map(|child| Self::compile(child).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: template.name.clone(),
            matcher,
            spec: GroupSpec {
                hard_concurrency_limit: template.hard_concurrency_limit,
                max_queued: template.max_queued,
                soft_memory_limit_bytes,
                scheduling_policy: template.scheduling_policy,
                scheduling_weight: template.scheduling_weight,
            },
            sub_groups,
        })
    }

    /// Template name as configured.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Limits and policy this template assigns.
    #[must_use]
    pub const fn spec(&self) -> &GroupSpec {
        &self.spec
    }

    /// Child templates.
    #[must_use]
    pub fn sub_groups(&self) -> &[Arc<Self>] {
        &self.sub_groups
    }

    /// Whether groups built from this template host queries directly.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.sub_groups.is_empty()
    }

    fn matches(&self, segment: &str) -> bool {
        match &self.matcher {
            NameMatcher::Literal => self.name == segment,
            NameMatcher::Pattern(regex) => regex.is_match(segment),
        }
    }
}

/// Pick the template for a concrete segment; literal names win over patterns.
pub(crate) fn match_segment<'a>(
    templates: &'a [Arc<CompiledTemplate>],
    segment: &str,
) -> Option<&'a Arc<CompiledTemplate>> {
    templates
        .iter()
        .find(|t| matches!(t.matcher, NameMatcher::Literal) && t.name == segment)
        .or_else(|| templates.iter().find(|t| t.matches(segment)))
}

/// Pick the template a selector segment refers to: exact text first, so that
/// `${USER}` selects the `${USER}` template, then by matching.
pub(crate) fn match_selector_segment<'a>(
    templates: &'a [Arc<CompiledTemplate>],
    segment: &str,
) -> Option<&'a Arc<CompiledTemplate>> {
    templates
        .iter()
        .find(|t| t.name == segment)
        .or_else(|| match_segment(templates, segment))
}

/// The compiled forest of top-level templates.
#[derive(Debug, Default)]
pub struct TemplateForest {
    roots: Vec<Arc<CompiledTemplate>>,
}

impl TemplateForest {
    /// Compile and validate a list of top-level templates.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Configuration`] for malformed templates.
    pub fn compile(templates: &[ResourceGroupTemplate]) -> Result<Self, SchedulerError> {
        let mut names = std::collections::HashSet::new();
        for template in templates {
            if !names.insert(template.name.as_str()) {
                return Err(SchedulerError::Configuration(format!(
                    "duplicate top-level group name `{}`",
                    template.name
                )));
            }
            template.validate().map_err(SchedulerError::Configuration)?;
        }
        let roots = templates
            .iter()
            .map(|t| CompiledTemplate::compile(t).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { roots })
    }

    /// Top-level templates.
    #[must_use]
    pub fn roots(&self) -> &[Arc<CompiledTemplate>] {
        &self.roots
    }

    /// Find the template a concrete path resolves to.
    pub(crate) fn lookup(&self, segments: &[String]) -> Option<Arc<CompiledTemplate>> {
        let mut level = self.roots.as_slice();
        let mut found = None;
        for segment in segments {
            let template = match_segment(level, segment)?;
            level = template.sub_groups();
            found = Some(Arc::clone(template));
        }
        found
    }
}
