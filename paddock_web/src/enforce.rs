//! Policy enforcement middleware.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Query, Request, State},
    http::{
        header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
        HeaderValue, StatusCode,
    },
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
    Json,
};
use paddock_core::pipeline::{POST_HANDLER, PRE_HANDLER};
use paddock_core::{RequestContext, RoutePolicies};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::state::PolicyState;

/// Middleware state: the pipeline plus one route's declaration.
#[derive(Clone)]
pub struct RouteGuard {
    state: PolicyState,
    policies: RoutePolicies,
}

impl RouteGuard {
    pub fn new(state: PolicyState, policies: RoutePolicies) -> Self {
        Self { state, policies }
    }
}

/// Guard `route` with `policies`.
///
/// ```ignore
/// let app = Router::new().route(
///     "/admin",
///     with_policies(get(admin), ["isLoggedIn", "isAnAdmin"].into_iter().collect(), &state),
/// );
/// ```
pub fn with_policies<S>(
    route: MethodRouter<S>,
    policies: RoutePolicies,
    state: &PolicyState,
) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.layer(from_fn_with_state(
        RouteGuard::new(state.clone(), policies),
        enforce,
    ))
}

/// Largest JSON response body buffered for post-handler policies.
pub const MAX_BUFFERED_BODY: usize = 2 * 1024 * 1024;

/// Runs the pre-handler stages, the route, then the post-handler stages.
///
/// JSON response bodies are buffered so post-handler policies can
/// annotate them. Other bodies, and every body when no post-handler stage
/// is wired, stream through untouched.
pub async fn enforce(State(guard): State<RouteGuard>, request: Request, next: Next) -> Response {
    let context = Arc::new(request_context(&request, guard.policies.clone()));
    let pipeline = guard.state.pipeline();

    if let Some(denied) = pipeline.run_stages(&PRE_HANDLER, &context).await.into_response() {
        return render(denied);
    }

    let response = next.run(request).await;
    let post_wired = POST_HANDLER.iter().any(|stage| pipeline.is_intercepting(*stage));
    if !post_wired || !is_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(request_id = %context.id(), "Failed to buffer response body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => context.set_response_body(value),
        Err(e) => debug!(request_id = %context.id(), "Response body is not valid JSON: {}", e),
    }

    if let Some(denied) = pipeline.run_stages(&POST_HANDLER, &context).await.into_response() {
        return render(denied);
    }

    match context.response_body() {
        Some(value) => {
            parts.headers.remove(CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(value.to_string()))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// The engine's view of an incoming request.
pub fn request_context(request: &Request, policies: RoutePolicies) -> RequestContext {
    let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();

    let mut context = RequestContext::new(request.method().clone(), request.uri().path())
        .with_query_map(query)
        .with_headers(request.headers().clone())
        .with_policies(policies);

    if let Some(token) = bearer_token(request) {
        context = context.with_credentials(json!({ "token": token }));
    }
    context
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Turn an engine response into an HTTP response.
pub fn render(response: paddock_core::Response) -> Response {
    let mut out = if response.body.is_null() {
        response.status.into_response()
    } else {
        (response.status, Json(response.body)).into_response()
    };
    if let Some(location) = response.location {
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                out.headers_mut().insert(LOCATION, value);
            }
            Err(e) => error!(location = %location, "Invalid redirect location: {}", e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_request_context() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/admin?loggedin=true&admin=true")
            .header(AUTHORIZATION, "Bearer abc123")
            .header("x-role", "admin")
            .body(Body::empty())
            .unwrap();

        let context = request_context(&request, RoutePolicies::new().name("isAnAdmin"));
        assert_eq!(context.method(), &Method::POST);
        assert_eq!(context.path(), "/admin");
        assert_eq!(context.query("loggedin"), Some("true"));
        assert_eq!(context.header("x-role"), Some("admin"));
        assert_eq!(context.credentials(), Some(json!({"token": "abc123"})));
        assert_eq!(context.policies().map(RoutePolicies::len), Some(1));
    }

    #[test]
    fn test_anonymous_request() {
        let request = Request::builder()
            .uri("/")
            .header(AUTHORIZATION, "Basic Zm9vOmJhcg==")
            .body(Body::empty())
            .unwrap();
        assert!(!request_context(&request, RoutePolicies::new()).is_authenticated());
    }

    #[test]
    fn test_render_redirect() {
        let response = render(paddock_core::Response {
            status: StatusCode::FOUND,
            body: Value::Null,
            location: Some("/login".into()),
        });
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/login");
    }
}
