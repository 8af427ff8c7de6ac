//! In-process host pipeline.
//!
//! Runs a request through the six stages around a handler. Framework
//! adapters use the same pieces, one stage group at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use http::StatusCode;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::info;

use crate::config::PaddockConfig;
use crate::context::RequestContext;
use crate::dispatcher::StageDispatcher;
use crate::error::LoaderError;
use crate::loader::PolicyLoader;
use crate::outcome::Outcome;
use crate::registry::{PolicyRegistry, StageHost};
use crate::stage::Stage;

/// Stages that run before the route handler, in order.
pub const PRE_HANDLER: [Stage; 4] = [
    Stage::PreRouting,
    Stage::PreAuth,
    Stage::PostAuth,
    Stage::PreHandler,
];

/// Stages that run after the route handler, in order.
pub const POST_HANDLER: [Stage; 2] = [Stage::PostHandler, Stage::PreResponse];

/// What the host should do with a request after a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Deny {
        status: StatusCode,
        reason: Option<String>,
        location: Option<String>,
    },
    Fail {
        status: StatusCode,
        message: String,
    },
}

impl Signal {
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// The response to answer with, `None` when processing continues.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Continue => None,
            Self::Deny {
                status,
                reason,
                location: Some(location),
            } => Some(Response {
                status,
                body: reason.map_or(Value::Null, |r| error_body(status, &r)),
                location: Some(location),
            }),
            Self::Deny { status, reason, .. } => {
                let message = reason.unwrap_or_else(|| phrase(status).to_string());
                Some(Response::error(status, &message))
            }
            Self::Fail { status, message } => Some(Response::error(status, &message)),
        }
    }
}

impl From<Outcome> for Signal {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Continue => Self::Continue,
            Outcome::Deny(rejection) => Self::Deny {
                status: rejection.status(),
                reason: rejection.reason().map(str::to_string),
                location: rejection.location().map(str::to_string),
            },
            Outcome::Error(err) => Self::Fail {
                status: err.status(),
                message: err.to_string(),
            },
        }
    }
}

/// A finished response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Value,
    pub location: Option<String>,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            location: None,
        }
    }

    /// Error response with a `{ statusCode, error, message }` payload.
    ///
    /// Messages of 500 responses are not exposed to the caller.
    pub fn error(status: StatusCode, message: &str) -> Self {
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal server error occurred"
        } else {
            message
        };
        Self {
            status,
            body: error_body(status, message),
            location: None,
        }
    }
}

fn phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown")
}

fn error_body(status: StatusCode, message: &str) -> Value {
    json!({
        "statusCode": status.as_u16(),
        "error": phrase(status),
        "message": message,
    })
}

/// Dispatchers installed per stage by the registry.
#[derive(Debug, Default)]
pub struct Interceptors {
    dispatchers: RwLock<HashMap<Stage, StageDispatcher>>,
}

impl Interceptors {
    pub fn get(&self, stage: Stage) -> Option<StageDispatcher> {
        self.dispatchers.read().get(&stage).copied()
    }

    /// Intercepted stages in pipeline order.
    pub fn stages(&self) -> Vec<Stage> {
        let dispatchers = self.dispatchers.read();
        Stage::ALL
            .into_iter()
            .filter(|stage| dispatchers.contains_key(stage))
            .collect()
    }
}

impl StageHost for Interceptors {
    fn intercept(&self, stage: Stage) {
        let mut dispatchers = self.dispatchers.write();
        if !dispatchers.contains_key(&stage) {
            info!(stage = %stage, "Intercepting stage");
            dispatchers.insert(stage, StageDispatcher::new(stage));
        }
    }
}

/// The registry plus the stages it wired.
pub struct Pipeline {
    registry: Arc<PolicyRegistry>,
    interceptors: Arc<Interceptors>,
}

impl Pipeline {
    /// A pipeline with an empty registry. Stages listed in
    /// `watch_stages` are intercepted right away.
    pub fn new(config: &PaddockConfig) -> Self {
        let interceptors = Arc::new(Interceptors::default());
        let registry = Arc::new(PolicyRegistry::with_host(
            config.default_stage,
            interceptors.clone(),
        ));
        for stage in &config.watch_stages {
            registry.watch(*stage);
        }

        Self {
            registry,
            interceptors,
        }
    }

    /// A pipeline with every policy from the configured directory loaded.
    pub fn load(config: &PaddockConfig, loader: &PolicyLoader) -> Result<Self, LoaderError> {
        let pipeline = Self::new(config);
        let count = pipeline
            .registry
            .load(loader, config.policy_dir(), config.register_options())?;
        info!(count, dir = %config.policy_dir().display(), "Loaded policies");
        Ok(pipeline)
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    pub fn is_intercepting(&self, stage: Stage) -> bool {
        self.interceptors.get(stage).is_some()
    }

    pub fn intercepted_stages(&self) -> Vec<Stage> {
        self.interceptors.stages()
    }

    /// Run one stage. Stages nothing was wired for always continue.
    pub async fn run_stage(&self, stage: Stage, request: &Arc<RequestContext>) -> Signal {
        match self.interceptors.get(stage) {
            Some(dispatcher) => dispatcher.dispatch(&self.registry, request).await.into(),
            None => Signal::Continue,
        }
    }

    /// Run `stages` in order, stopping at the first one that does not
    /// continue.
    pub async fn run_stages(&self, stages: &[Stage], request: &Arc<RequestContext>) -> Signal {
        for stage in stages {
            let signal = self.run_stage(*stage, request).await;
            if !signal.is_continue() {
                return signal;
            }
        }
        Signal::Continue
    }

    /// Run the whole pipeline around `handler`.
    ///
    /// The handler's JSON body is stored on the request so post-handler
    /// policies can annotate it before it is returned.
    pub async fn handle<F, Fut>(&self, request: RequestContext, handler: F) -> Response
    where
        F: FnOnce(Arc<RequestContext>) -> Fut,
        Fut: Future<Output = Value>,
    {
        let request = Arc::new(request);

        if let Some(response) = self.run_stages(&PRE_HANDLER, &request).await.into_response() {
            return response;
        }

        let body = handler(request.clone()).await;
        request.set_response_body(body);

        if let Some(response) = self.run_stages(&POST_HANDLER, &request).await.into_response() {
            return response;
        }

        Response::ok(request.response_body().unwrap_or(Value::Null))
    }
}
