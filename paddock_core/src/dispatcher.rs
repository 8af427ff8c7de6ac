//! Stage dispatching.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{PolicyContext, RequestContext};
use crate::executor::SequentialExecutor;
use crate::outcome::Outcome;
use crate::registry::PolicyRegistry;
use crate::resolver::PolicyResolver;
use crate::stage::Stage;

/// Runs the slice of a route's declaration that belongs to one stage.
///
/// Nothing escapes a dispatch: resolution errors become
/// [`Outcome::Error`] and policy failures are negotiated by the executor.
#[derive(Debug, Clone, Copy)]
pub struct StageDispatcher {
    stage: Stage,
}

impl StageDispatcher {
    pub fn new(stage: Stage) -> Self {
        Self { stage }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub async fn dispatch(
        &self,
        registry: &Arc<PolicyRegistry>,
        request: &Arc<RequestContext>,
    ) -> Outcome {
        let Some(declared) = request.policies() else {
            return Outcome::Continue;
        };

        let plan = match PolicyResolver::new(registry).resolve(declared, self.stage) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(request_id = %request.id(), stage = %self.stage, "{}", e);
                return Outcome::Error(e);
            }
        };

        if plan.is_empty() {
            return Outcome::Continue;
        }

        let ctx = PolicyContext::new(request.clone(), registry.clone(), self.stage);
        let outcome = SequentialExecutor::run(&plan, &ctx).await;

        match &outcome {
            Outcome::Continue => {
                debug!(request_id = %request.id(), stage = %self.stage, "Stage passed")
            }
            Outcome::Deny(rejection) => warn!(
                request_id = %request.id(),
                stage = %self.stage,
                status = rejection.status().as_u16(),
                reason = rejection.reason().unwrap_or_default(),
                "Request denied"
            ),
            Outcome::Error(e) => warn!(request_id = %request.id(), stage = %self.stage, "{}", e),
        }
        outcome
    }
}
