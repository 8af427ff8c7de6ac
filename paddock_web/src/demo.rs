//! Demo application guarded by the policies in `policies/`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{response::Html, routing::get, Json, Router};
use paddock_core::{policy_fn, Outcome, PolicyError, RoutePolicies};
use serde_json::{json, Value};

use crate::enforce::with_policies;
use crate::state::PolicyState;

const SYNODIC_MONTH_DAYS: f64 = 29.530_588_853;
// 2000-01-06 18:14 UTC.
const REFERENCE_NEW_MOON: u64 = 947_182_440;

/// Days into the current lunar cycle.
pub fn moon_age(now: SystemTime) -> f64 {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .saturating_sub(REFERENCE_NEW_MOON);
    (secs as f64 / 86_400.0) % SYNODIC_MONTH_DAYS
}

/// Whether the moon is a waning crescent.
pub fn is_waning_crescent(age: f64) -> bool {
    (22.15..SYNODIC_MONTH_DAYS - 1.0).contains(&age)
}

/// Register the policies the demo needs that have no manifest.
pub fn register_demo_policies(state: &PolicyState) -> Result<(), PolicyError> {
    state.registry().register_policy(
        "moonInPhase",
        policy_fn(|_| async {
            // Stands in for a lookup against an ephemeris service.
            tokio::time::sleep(Duration::from_millis(5)).await;
            if is_waning_crescent(moon_age(SystemTime::now())) {
                return Ok(Outcome::deny_with("The moon is a waning crescent"));
            }
            Ok(Outcome::Continue)
        }),
    )
}

async fn index() -> Html<&'static str> {
    Html(concat!(
        "Paddock<br />Try these:",
        "<br /><a href=\"/loggedin\">/loggedin</a> - This will give a 403",
        "<br /><a href=\"/loggedin?loggedin=true\">/loggedin?loggedin=true</a>",
        "<br /><a href=\"/admin?loggedin=true\">/admin?loggedin=true</a> - This will give a 403 with a special message",
        "<br /><a href=\"/admin?loggedin=true&admin=true\">/admin?loggedin=true&admin=true</a> - mixing multiple policies",
        "<br /><a href=\"/adminnight?loggedin=true&admin=true\">/adminnight?loggedin=true&admin=true</a> - parallel policies, may 403 depending on the moon",
        "<br /><a href=\"/addanalytics\">/addanalytics</a> - part of this JSON is injected after the handler",
    ))
}

async fn logged_in() -> &'static str {
    "You are logged in."
}

async fn admin() -> &'static str {
    "You are logged in AND an admin."
}

async fn admin_night() -> &'static str {
    "You are logged in AND an admin AND the moon is in phase."
}

async fn add_analytics() -> Json<Value> {
    Json(json!({ "data": "this could be cached" }))
}

/// The demo routes.
pub fn app(state: &PolicyState) -> Router {
    let names = |names: &[&str]| -> RoutePolicies { names.iter().copied().collect() };

    Router::new()
        .route("/", get(index))
        .route(
            "/loggedin",
            with_policies(get(logged_in), names(&["isLoggedIn"]), state),
        )
        .route(
            "/admin",
            with_policies(get(admin), names(&["isLoggedIn", "isAnAdmin"]), state),
        )
        .route(
            "/addanalytics",
            with_policies(get(add_analytics), names(&["addAnalytics"]), state),
        )
        .route(
            "/adminnight",
            with_policies(
                get(admin_night),
                RoutePolicies::new()
                    .group(["moonInPhase", "isLoggedIn"])
                    .name("isAnAdmin"),
                state,
            ),
        )
}
