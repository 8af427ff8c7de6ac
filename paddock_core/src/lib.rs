//! Route policy engine.
//!
//! Routes declare the policies that guard them. The engine resolves each
//! declaration against a [`PolicyRegistry`], splits it by pipeline
//! [`Stage`], runs each stage's slice in order (or a group concurrently)
//! and reduces everything to one [`Outcome`].

mod builtin;
pub mod config;
pub mod context;
pub mod declaration;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod loader;
pub mod negotiate;
pub mod outcome;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod stage;

pub use config::PaddockConfig;
pub use context::{PolicyContext, RequestContext};
pub use declaration::{InlinePolicy, PolicyEntry, RoutePolicies};
pub use dispatcher::StageDispatcher;
pub use error::{ConfigError, LoaderError, PolicyError};
pub use executor::{
    or_policy, parallel, parallel_with, sequence, AggregateExecutor, AggregatePolicy, Reducer,
    SequencePolicy, SequentialExecutor, Settlements,
};
pub use loader::{Candidate, PolicyCatalog, PolicyLoader};
pub use negotiate::settle;
pub use outcome::{Outcome, PolicyResult, Rejection};
pub use pipeline::{Pipeline, Response, Signal};
pub use policy::{policy_fn, FnPolicy, Policy, SharedPolicy, Staged};
pub use registry::{PolicyRegistry, RegisterOptions, StageHost};
pub use resolver::{Plan, PlanStep, PolicyResolver};
pub use stage::Stage;

pub use async_trait::async_trait;
