//! Route policy declarations.
//!
//! A route declares an ordered list of entries. Each entry is decided once,
//! when the declaration is built, to be a registered name, an inline policy
//! or a parallel group of registered names.

use std::fmt;

use serde_json::Value;

use crate::error::{PolicyError, Result};
use crate::policy::{Policy, SharedPolicy};

/// One entry of a route's declared policy list.
#[derive(Clone)]
pub enum PolicyEntry {
    /// A registered policy, looked up by name.
    ByName(String),

    /// A policy value that was never registered.
    Inline(InlinePolicy),

    /// Registered policies to run concurrently as one aggregate.
    Group(Vec<String>),
}

impl fmt::Debug for PolicyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName(name) => f.debug_tuple("ByName").field(name).finish(),
            Self::Inline(inline) => f.debug_tuple("Inline").field(inline).finish(),
            Self::Group(names) => f.debug_tuple("Group").field(names).finish(),
        }
    }
}

/// An unregistered policy plus an optional raw stage tag.
///
/// The tag is kept as written and validated when the route is resolved.
#[derive(Clone)]
pub struct InlinePolicy {
    policy: SharedPolicy,
    stage_tag: Option<String>,
}

impl InlinePolicy {
    pub fn new(policy: SharedPolicy) -> Self {
        Self {
            policy,
            stage_tag: None,
        }
    }

    pub fn tagged(mut self, stage: impl Into<String>) -> Self {
        self.stage_tag = Some(stage.into());
        self
    }

    pub fn policy(&self) -> &SharedPolicy {
        &self.policy
    }

    pub fn stage_tag(&self) -> Option<&str> {
        self.stage_tag.as_deref()
    }
}

impl fmt::Debug for InlinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlinePolicy")
            .field("stage_tag", &self.stage_tag)
            .field("stage", &self.policy.stage())
            .field("runs", &self.policy.runs())
            .finish()
    }
}

/// The ordered policy list declared by a route.
#[derive(Clone, Debug, Default)]
pub struct RoutePolicies {
    entries: Vec<PolicyEntry>,
}

impl RoutePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a registered policy by name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.entries.push(PolicyEntry::ByName(name.into()));
        self
    }

    /// Appends a parallel group of registered policy names.
    pub fn group<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .push(PolicyEntry::Group(names.into_iter().map(Into::into).collect()));
        self
    }

    /// Appends an unregistered policy.
    pub fn inline(mut self, policy: impl Policy + 'static) -> Self {
        self.entries
            .push(PolicyEntry::Inline(InlinePolicy::new(std::sync::Arc::new(policy))));
        self
    }

    pub fn inline_shared(mut self, policy: SharedPolicy) -> Self {
        self.entries.push(PolicyEntry::Inline(InlinePolicy::new(policy)));
        self
    }

    /// Appends an unregistered policy with a raw stage tag.
    pub fn inline_tagged(mut self, policy: SharedPolicy, stage: impl Into<String>) -> Self {
        self.entries
            .push(PolicyEntry::Inline(InlinePolicy::new(policy).tagged(stage)));
        self
    }

    pub fn push(&mut self, entry: PolicyEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Normalizes an untyped declaration such as `["a", ["b", "c"]]`.
    ///
    /// Strings become [`PolicyEntry::ByName`], arrays of strings become
    /// [`PolicyEntry::Group`]. Anything else is malformed; inline policies
    /// can only be added programmatically.
    pub fn from_value(value: &Value) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| PolicyError::MalformedPolicyDeclaration(value.to_string()))?;

        let mut policies = Self::new();
        for item in items {
            let entry = match item {
                Value::String(name) => PolicyEntry::ByName(name.clone()),
                Value::Array(members) => {
                    let names = members
                        .iter()
                        .map(|m| m.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| PolicyError::MalformedPolicyDeclaration(item.to_string()))?;
                    PolicyEntry::Group(names)
                }
                other => return Err(PolicyError::MalformedPolicyDeclaration(other.to_string())),
            };
            policies.push(entry);
        }
        Ok(policies)
    }

    /// Parses and normalizes a JSON declaration.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|_| PolicyError::MalformedPolicyDeclaration(json.to_string()))?;
        Self::from_value(&value)
    }
}

impl<S: Into<String>> FromIterator<S> for RoutePolicies {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |acc, name| acc.name(name))
    }
}
