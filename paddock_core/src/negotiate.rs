//! Outcome negotiation.
//!
//! Whatever a policy does (returns an outcome, fails with an error, or
//! panics) is collapsed onto [`Outcome`] here before anything else sees it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::warn;

use crate::error::PolicyError;
use crate::outcome::{Outcome, PolicyResult, Rejection};

/// Drive a policy future to completion and negotiate its result.
pub async fn settle<F>(fut: F) -> Outcome
where
    F: Future<Output = PolicyResult>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => negotiate_error(err),
        Err(payload) => negotiate_panic(payload),
    }
}

/// Normalize a failed policy into an outcome.
///
/// A [`Rejection`] anywhere in the error chain passes through unchanged, so
/// a policy may deliberately produce a 404 or a redirect. A
/// [`PolicyError`] keeps its framework-error classification. Anything else
/// becomes a 403 whose reason is the error message.
pub fn negotiate_error(err: anyhow::Error) -> Outcome {
    for cause in err.chain() {
        if let Some(rejection) = cause.downcast_ref::<Rejection>() {
            return Outcome::Deny(rejection.clone());
        }
        if let Some(policy_err) = cause.downcast_ref::<PolicyError>() {
            return Outcome::Error(policy_err.clone());
        }
    }

    let message = err.to_string();
    let rejection = if message.is_empty() {
        Rejection::forbidden()
    } else {
        Rejection::forbidden().with_reason(message)
    };
    Outcome::Deny(rejection)
}

/// Normalize a panic payload into a 403 denial.
///
/// String payloads become the denial reason.
pub fn negotiate_panic(payload: Box<dyn Any + Send>) -> Outcome {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());

    warn!(reason = ?reason, "Policy panicked");
    match reason {
        Some(reason) if !reason.is_empty() => Outcome::deny_with(reason),
        _ => Outcome::deny(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};
    use http::StatusCode;

    #[tokio::test]
    async fn test_settle_passes_outcomes_through() {
        assert_eq!(settle(async { Ok(Outcome::Continue) }).await, Outcome::Continue);
        assert_eq!(
            settle(async { Ok(Outcome::deny_with("custom")) }).await,
            Outcome::deny_with("custom")
        );
    }

    #[tokio::test]
    async fn test_rejection_errors_keep_status() {
        let outcome = settle(async { Err(Rejection::not_found().into()) }).await;
        assert_eq!(outcome.status(), Some(StatusCode::NOT_FOUND));

        let wrapped = settle(async {
            Err::<Outcome, _>(Rejection::redirect("/login"))
                .context("while checking session")
        })
        .await;
        match wrapped {
            Outcome::Deny(rejection) => {
                assert_eq!(rejection.status(), StatusCode::FOUND);
                assert_eq!(rejection.location(), Some("/login"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_errors_become_forbidden() {
        let outcome = settle(async { Err(anyhow!("custom late")) }).await;
        assert_eq!(outcome, Outcome::deny_with("custom late"));

        let outcome = settle(async { Err(anyhow!("")) }).await;
        assert_eq!(outcome, Outcome::deny());
    }

    #[tokio::test]
    async fn test_policy_errors_stay_errors() {
        let outcome = settle(async { Err(PolicyError::MissingPolicy("x".into()).into()) }).await;
        assert_eq!(outcome, Outcome::Error(PolicyError::MissingPolicy("x".into())));
    }

    #[tokio::test]
    async fn test_panics_become_forbidden() {
        let outcome = settle(async {
            if true {
                panic!("This is a weird thing to throw");
            }
            Ok(Outcome::Continue)
        })
        .await;
        assert_eq!(outcome, Outcome::deny_with("This is a weird thing to throw"));

        let outcome = settle(async {
            if true {
                std::panic::panic_any(42_u32);
            }
            Ok(Outcome::Continue)
        })
        .await;
        assert_eq!(outcome, Outcome::deny());
    }
}
