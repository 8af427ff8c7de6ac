//! The policy abstraction and adapters for closures.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::PolicyContext;
use crate::outcome::PolicyResult;
use crate::stage::Stage;

/// A named unit of authorization logic evaluated against a request.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Evaluate the policy. May suspend.
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult;

    /// Explicit stage this policy wants to run at, if any.
    fn stage(&self) -> Option<Stage> {
        None
    }

    /// Names of the registered policies this one runs, for composite
    /// policies. Used to infer the stage of an untagged composite.
    fn runs(&self) -> Option<&[String]> {
        None
    }
}

pub type SharedPolicy = Arc<dyn Policy>;

/// A policy backed by a closure returning a future.
pub struct FnPolicy<F> {
    f: F,
    stage: Option<Stage>,
}

/// Adapts `|ctx| async move { ... }` into a [`Policy`].
///
/// ```
/// use paddock_core::{policy_fn, Outcome, Stage};
///
/// let is_logged_in = policy_fn(|ctx| async move {
///     if ctx.is_authenticated() {
///         Ok(Outcome::Continue)
///     } else {
///         Ok(Outcome::deny())
///     }
/// });
/// let add_analytics = policy_fn(|ctx| async move {
///     ctx.annotate_response("analytics", "tracked".into());
///     Ok(Outcome::Continue)
/// })
/// .at(Stage::PostHandler);
/// # let _ = (is_logged_in, add_analytics);
/// ```
pub fn policy_fn<F, Fut>(f: F) -> FnPolicy<F>
where
    F: Fn(PolicyContext) -> Fut + Send + Sync,
    Fut: Future<Output = PolicyResult> + Send + 'static,
{
    FnPolicy { f, stage: None }
}

impl<F> FnPolicy<F> {
    /// Tags the policy with an explicit stage.
    pub fn at(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn shared(self) -> SharedPolicy
    where
        Self: Policy + 'static,
    {
        Arc::new(self)
    }
}

impl<F> fmt::Debug for FnPolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPolicy").field("stage", &self.stage).finish()
    }
}

#[async_trait]
impl<F, Fut> Policy for FnPolicy<F>
where
    F: Fn(PolicyContext) -> Fut + Send + Sync,
    Fut: Future<Output = PolicyResult> + Send + 'static,
{
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        (self.f)(ctx.clone()).await
    }

    fn stage(&self) -> Option<Stage> {
        self.stage
    }
}

/// Wraps a policy so that it reports `stage` as its explicit stage.
pub struct Staged {
    inner: SharedPolicy,
    stage: Stage,
}

impl Staged {
    pub fn new(inner: SharedPolicy, stage: Stage) -> Self {
        Self { inner, stage }
    }
}

#[async_trait]
impl Policy for Staged {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        self.inner.evaluate(ctx).await
    }

    fn stage(&self) -> Option<Stage> {
        Some(self.stage)
    }

    fn runs(&self) -> Option<&[String]> {
        self.inner.runs()
    }
}
