//! Policy kinds available to manifests out of the box.
//!
//! | kind | parameters |
//! |---|---|
//! | `allow` | |
//! | `deny` | `status?`, `reason?` |
//! | `require-query` | `key`, `value?`, `reason?` |
//! | `require-header` | `header`, `value?`, `reason?` |
//! | `require-credentials` | `reason?` |
//! | `require-role` | `role`, `reason?` |
//! | `annotate-response` | `field`, `value` |
//! | `redirect` | `location` |

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::context::PolicyContext;
use crate::error::LoaderError;
use crate::loader::{parameters, PolicyCatalog};
use crate::outcome::{Outcome, PolicyResult, Rejection};
use crate::policy::{Policy, SharedPolicy};
use crate::stage::Stage;

pub(crate) fn install(catalog: &mut PolicyCatalog) {
    catalog.register("allow", |name, params| {
        let Empty {} = parameters(name, params)?;
        Ok(Arc::new(Allow) as SharedPolicy)
    });
    catalog.register("deny", |name, params| {
        let params: DenyParams = parameters(name, params)?;
        let status = match params.status {
            Some(code) => StatusCode::from_u16(code).map_err(|e| LoaderError::InvalidParameters {
                name: name.to_string(),
                reason: e.to_string(),
            })?,
            None => StatusCode::FORBIDDEN,
        };
        let mut rejection = Rejection::new(status);
        if let Some(reason) = params.reason {
            rejection = rejection.with_reason(reason);
        }
        Ok(Arc::new(Deny { rejection }) as SharedPolicy)
    });
    catalog.register("require-query", |name, params| {
        Ok(Arc::new(parameters::<RequireQuery>(name, params)?) as SharedPolicy)
    });
    catalog.register("require-header", |name, params| {
        Ok(Arc::new(parameters::<RequireHeader>(name, params)?) as SharedPolicy)
    });
    catalog.register("require-credentials", |name, params| {
        Ok(Arc::new(parameters::<RequireCredentials>(name, params)?) as SharedPolicy)
    });
    catalog.register("require-role", |name, params| {
        Ok(Arc::new(parameters::<RequireRole>(name, params)?) as SharedPolicy)
    });
    catalog.register("annotate-response", |name, params| {
        let params: AnnotateParams = parameters(name, params)?;
        let value = serde_json::to_value(&params.value).map_err(|e| LoaderError::InvalidParameters {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(AnnotateResponse {
            field: params.field,
            value,
        }) as SharedPolicy)
    });
    catalog.register("redirect", |name, params| {
        let params: RedirectParams = parameters(name, params)?;
        Ok(Arc::new(Deny {
            rejection: Rejection::redirect(params.location),
        }) as SharedPolicy)
    });
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Empty {}

fn denial(reason: &Option<String>) -> Outcome {
    match reason {
        Some(reason) => Outcome::deny_with(reason.clone()),
        None => Outcome::deny(),
    }
}

struct Allow;

#[async_trait]
impl Policy for Allow {
    async fn evaluate(&self, _ctx: &PolicyContext) -> PolicyResult {
        Ok(Outcome::Continue)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DenyParams {
    status: Option<u16>,
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RedirectParams {
    location: String,
}

/// Answers with a fixed rejection. Also backs `redirect`.
struct Deny {
    rejection: Rejection,
}

#[async_trait]
impl Policy for Deny {
    async fn evaluate(&self, _ctx: &PolicyContext) -> PolicyResult {
        Ok(Outcome::Deny(self.rejection.clone()))
    }
}

/// Passes when `value` matches `expected`, or when it is present and
/// nothing is expected.
fn satisfies(value: Option<&str>, expected: &Option<String>) -> bool {
    match (value, expected) {
        (Some(value), Some(expected)) => value == expected,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RequireQuery {
    key: String,
    value: Option<String>,
    reason: Option<String>,
}

#[async_trait]
impl Policy for RequireQuery {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        if satisfies(ctx.query(&self.key), &self.value) {
            return Ok(Outcome::Continue);
        }
        Ok(denial(&self.reason))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RequireHeader {
    header: String,
    value: Option<String>,
    reason: Option<String>,
}

#[async_trait]
impl Policy for RequireHeader {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        if satisfies(ctx.header(&self.header), &self.value) {
            return Ok(Outcome::Continue);
        }
        Ok(denial(&self.reason))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RequireCredentials {
    reason: Option<String>,
}

#[async_trait]
impl Policy for RequireCredentials {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        if ctx.is_authenticated() {
            return Ok(Outcome::Continue);
        }
        Ok(denial(&self.reason))
    }
}

/// Looks for `role` in the credentials' `role` string or `roles` array.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RequireRole {
    role: String,
    reason: Option<String>,
}

impl RequireRole {
    fn granted(&self, credentials: &Value) -> bool {
        if credentials.get("role").and_then(Value::as_str) == Some(self.role.as_str()) {
            return true;
        }
        credentials
            .get("roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some(self.role.as_str())))
    }
}

#[async_trait]
impl Policy for RequireRole {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        match ctx.credentials() {
            Some(credentials) if self.granted(&credentials) => Ok(Outcome::Continue),
            _ => Ok(denial(&self.reason)),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AnnotateParams {
    field: String,
    value: toml::Value,
}

/// Inserts a field into the JSON response body. Runs after the handler
/// unless the manifest says otherwise.
struct AnnotateResponse {
    field: String,
    value: Value,
}

#[async_trait]
impl Policy for AnnotateResponse {
    async fn evaluate(&self, ctx: &PolicyContext) -> PolicyResult {
        if !ctx.annotate_response(self.field.clone(), self.value.clone()) {
            debug!(request_id = %ctx.id(), field = %self.field, "No JSON object body to annotate");
        }
        Ok(Outcome::Continue)
    }

    fn stage(&self) -> Option<Stage> {
        Some(Stage::PostHandler)
    }
}
