use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::context::PolicyContext;
use crate::error::{PolicyError, Result};
use crate::negotiate::settle;
use crate::outcome::{Outcome, PolicyResult};
use crate::policy::{Policy, SharedPolicy};

/// Settled outcome of every member of an aggregate, keyed by name.
pub type Settlements = HashMap<String, Outcome>;

type ReduceFn = dyn Fn(&[String], &Settlements) -> PolicyResult + Send + Sync;

/// Decides an aggregate's outcome from its members' settlements.
#[derive(Clone, Default)]
pub enum Reducer {
    /// First non-continue outcome in declared order.
    #[default]
    FirstFailure,

    /// Continue if any member continued, otherwise the leftmost failure.
    AnySuccess,

    /// Caller-supplied reduction. Failing transforms the group's outcome
    /// through the negotiator.
    Custom(Arc<ReduceFn>),
}

impl Reducer {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[String], &Settlements) -> PolicyResult + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Reduce `settlements` for the members `names`, in declared order.
    pub fn reduce(&self, names: &[String], settlements: &Settlements) -> PolicyResult {
        match self {
            Self::FirstFailure => Ok(leftmost_failure(names, settlements).unwrap_or(Outcome::Continue)),
            Self::AnySuccess => {
                let any_continued = names
                    .iter()
                    .any(|name| settlements.get(name).is_some_and(Outcome::is_continue));
                if any_continued {
                    return Ok(Outcome::Continue);
                }
                Ok(leftmost_failure(names, settlements).unwrap_or(Outcome::Continue))
            }
            Self::Custom(f) => f(names, settlements),
        }
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstFailure => f.write_str("FirstFailure"),
            Self::AnySuccess => f.write_str("AnySuccess"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

fn leftmost_failure(names: &[String], settlements: &Settlements) -> Option<Outcome> {
    names
        .iter()
        .filter_map(|name| settlements.get(name))
        .find(|outcome| !outcome.is_continue())
        .cloned()
}

/// Runs a group of policies concurrently against one context.
pub struct AggregateExecutor;

impl AggregateExecutor {
    /// Start every member, then wait for all of them to settle.
    ///
    /// No member is cancelled because another one failed.
    pub async fn settle_all(members: &[(String, SharedPolicy)], ctx: &PolicyContext) -> Settlements {
        let outcomes = join_all(
            members
                .iter()
                .map(|(_, policy)| settle(policy.evaluate(ctx))),
        )
        .await;

        members
            .iter()
            .map(|(name, _)| name.clone())
            .zip(outcomes)
            .collect()
    }

    /// Look up `names`, settle them all and reduce.
    ///
    /// Members are looked up at invocation time. A member that is not
    /// registered yields a framework error without running anything.
    pub async fn run(names: &[String], reducer: &Reducer, ctx: &PolicyContext) -> PolicyResult {
        let mut members = Vec::with_capacity(names.len());
        for name in names {
            match ctx.registry().lookup(name) {
                Ok(policy) => members.push((name.clone(), policy)),
                Err(_) => {
                    return Ok(Outcome::Error(PolicyError::UnregisteredAggregateMember(
                        name.clone(),
                    )))
                }
            }
        }

        let settlements = Self::settle_all(&members, ctx).await;
        debug!(
            request_id = %ctx.id(),
            stage = %ctx.stage(),
            members = ?names,
            settlements = ?settlements,
            "Aggregate settled"
        );

        reducer.reduce(names, &settlements)
    }
}

/// A composite policy running registered policies concurrently.
#[derive(Debug, Clone)]
pub struct AggregatePolicy {
    names: Vec<String>,
    reducer: Reducer,
}

impl AggregatePolicy {
    pub fn new(names: Vec<String>, reducer: Reducer) -> Result<Self> {
        if names.is_empty() {
            return Err(PolicyError::EmptyAggregate);
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(PolicyError::DuplicateAggregateMember(name.clone()));
            }
        }
        Ok(Self { names, reducer })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    pub fn shared(self) -> SharedPolicy {
        Arc::new(self)
    }
}

#[async_trait]
impl Policy for AggregatePolicy {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        AggregateExecutor::run(&self.names, &self.reducer, ctx).await
    }

    fn runs(&self) -> Option<&[String]> {
        Some(&self.names)
    }
}
