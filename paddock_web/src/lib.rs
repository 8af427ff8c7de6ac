//! axum adapter for the paddock policy engine.
//!
//! Routes opt in with [`with_policies`]; the middleware runs the stages
//! before the handler, then the stages after it.

pub mod demo;
pub mod enforce;
pub mod state;

pub use enforce::{enforce, render, request_context, with_policies, RouteGuard};
pub use state::PolicyState;
