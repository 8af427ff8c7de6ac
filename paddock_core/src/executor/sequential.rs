use async_trait::async_trait;
use tracing::debug;

use crate::context::PolicyContext;
use crate::error::{PolicyError, Result};
use crate::negotiate::settle;
use crate::outcome::{Outcome, PolicyResult};
use crate::policy::Policy;
use crate::resolver::{Plan, PlanStep};

/// Runs a plan one policy at a time.
///
/// Each policy settles before the next one starts. The first outcome that
/// is not [`Outcome::Continue`] is returned and the rest never run.
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub async fn run(plan: &Plan, ctx: &PolicyContext) -> Outcome {
        for step in plan.steps() {
            let outcome = settle(step.policy().evaluate(ctx)).await;
            debug!(
                request_id = %ctx.id(),
                stage = %ctx.stage(),
                policy = step.label(),
                outcome = ?outcome,
                "Policy settled"
            );

            if !outcome.is_continue() {
                return outcome;
            }
        }

        Outcome::Continue
    }
}

/// A composite policy running registered policies in sequence.
///
/// Members are looked up when the policy is evaluated, so policies
/// registered after the sequence was built are visible.
#[derive(Debug, Clone)]
pub struct SequencePolicy {
    names: Vec<String>,
}

impl SequencePolicy {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(PolicyError::EmptyAggregate);
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[async_trait]
impl Policy for SequencePolicy {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        let mut steps = Vec::with_capacity(self.names.len());
        for name in &self.names {
            match ctx.registry().lookup(name) {
                Ok(policy) => steps.push(PlanStep::new(name.clone(), policy)),
                Err(_) => return Ok(Outcome::Error(PolicyError::MissingPolicy(name.clone()))),
            }
        }

        Ok(SequentialExecutor::run(&Plan::new(steps), ctx).await)
    }

    fn runs(&self) -> Option<&[String]> {
        Some(&self.names)
    }
}
