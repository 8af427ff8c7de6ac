//! Policy resolution.
//!
//! Turns a route's declared policy list into the ordered plan of policies
//! that apply at one stage. A single declaration may span several stages;
//! each stage's dispatcher resolves only its own slice.

use std::fmt;

use tracing::debug;

use crate::declaration::{InlinePolicy, PolicyEntry, RoutePolicies};
use crate::error::{PolicyError, Result};
use crate::executor::{AggregatePolicy, Reducer};
use crate::policy::SharedPolicy;
use crate::registry::PolicyRegistry;
use crate::stage::Stage;

/// One policy to run, with a label for logs and diagnostics.
#[derive(Clone)]
pub struct PlanStep {
    label: String,
    policy: SharedPolicy,
}

impl PlanStep {
    pub fn new(label: impl Into<String>, policy: SharedPolicy) -> Self {
        Self {
            label: label.into(),
            policy,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn policy(&self) -> &SharedPolicy {
        &self.policy
    }
}

impl fmt::Debug for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlanStep").field(&self.label).finish()
    }
}

/// Ordered policies to execute at one stage.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(PlanStep::label).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Resolves declarations against a registry snapshot.
pub struct PolicyResolver<'a> {
    registry: &'a PolicyRegistry,
}

impl<'a> PolicyResolver<'a> {
    pub fn new(registry: &'a PolicyRegistry) -> Self {
        Self { registry }
    }

    /// Plan of the entries of `declared` that belong to `stage`, in
    /// declared order.
    pub fn resolve(&self, declared: &RoutePolicies, stage: Stage) -> Result<Plan> {
        let mut steps = Vec::new();

        for entry in declared.entries() {
            match entry {
                PolicyEntry::Group(names) => {
                    let group_stage = self.registry.aggregate_stage(names)?;
                    if group_stage == stage {
                        let aggregate = AggregatePolicy::new(names.clone(), Reducer::FirstFailure)?;
                        steps.push(PlanStep::new(
                            format!("[{}]", names.join(", ")),
                            aggregate.shared(),
                        ));
                    }
                }
                PolicyEntry::ByName(name) => {
                    let (policy_stage, policy) = self
                        .registry
                        .entry(name)
                        .ok_or_else(|| PolicyError::MissingPolicy(name.clone()))?;
                    if policy_stage == stage {
                        steps.push(PlanStep::new(name.clone(), policy));
                    }
                }
                PolicyEntry::Inline(inline) => {
                    if self.inline_stage(inline)? == stage {
                        steps.push(PlanStep::new(inline_label(inline), inline.policy().clone()));
                    }
                }
            }
        }

        debug!(stage = %stage, plan = ?steps, "Resolved route policies");
        Ok(Plan::new(steps))
    }

    /// Effective stage of an inline policy: its raw tag, then its own
    /// explicit stage, then the stage shared by the policies it runs, then
    /// the registry default.
    pub fn inline_stage(&self, inline: &InlinePolicy) -> Result<Stage> {
        if let Some(tag) = inline.stage_tag() {
            return tag
                .parse()
                .map_err(|_| PolicyError::InvalidDynamicStage(tag.to_string()));
        }

        let policy = inline.policy();
        if let Some(stage) = policy.stage() {
            return Ok(stage);
        }
        if let Some(runs) = policy.runs() {
            return self.registry.aggregate_stage(runs);
        }
        Ok(self.registry.default_stage())
    }

    /// Plans for every stage the declaration touches, in pipeline order.
    pub fn resolve_all(&self, declared: &RoutePolicies) -> Result<Vec<(Stage, Plan)>> {
        let mut plans = Vec::new();
        for stage in Stage::ALL {
            let plan = self.resolve(declared, stage)?;
            if !plan.is_empty() {
                plans.push((stage, plan));
            }
        }
        Ok(plans)
    }
}

fn inline_label(inline: &InlinePolicy) -> String {
    match inline.policy().runs() {
        Some(runs) => format!("inline({})", runs.join(", ")),
        None => "inline".to_string(),
    }
}
