//! Per-request state shared with every policy.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use crate::declaration::RoutePolicies;
use crate::registry::PolicyRegistry;
use crate::stage::Stage;

/// The request as the host pipeline hands it to the engine.
///
/// Request data is read-only once built. Credentials and the response body
/// are behind locks because policies (including concurrently running
/// aggregate members) may annotate them.
#[derive(Debug)]
pub struct RequestContext {
    id: Uuid,
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    policies: Option<RoutePolicies>,
    credentials: RwLock<Option<Value>>,
    response: Mutex<Option<Value>>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: HeaderMap::new(),
            policies: None,
            credentials: RwLock::new(None),
            response: Mutex::new(None),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_query_map(mut self, query: HashMap<String, String>) -> Self {
        self.query.extend(query);
        self
    }

    /// Adds a header. Names or values that are not valid HTTP are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Attaches the route's declared policy list.
    pub fn with_policies(mut self, policies: RoutePolicies) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn with_credentials(self, credentials: Value) -> Self {
        *self.credentials.write() = Some(credentials);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn policies(&self) -> Option<&RoutePolicies> {
        self.policies.as_ref()
    }

    pub fn credentials(&self) -> Option<Value> {
        self.credentials.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.read().is_some()
    }

    pub fn set_credentials(&self, credentials: Value) {
        *self.credentials.write() = Some(credentials);
    }

    pub fn response_body(&self) -> Option<Value> {
        self.response.lock().clone()
    }

    pub fn set_response_body(&self, body: Value) {
        *self.response.lock() = Some(body);
    }

    /// Inserts `field` into the JSON object response body.
    ///
    /// Returns `false` when there is no body yet or the body is not an object.
    pub fn annotate_response(&self, field: impl Into<String>, value: Value) -> bool {
        match self.response.lock().as_mut() {
            Some(Value::Object(map)) => {
                map.insert(field.into(), value);
                true
            }
            _ => false,
        }
    }
}

/// Handle passed to a policy for one evaluation.
///
/// Cloning is cheap; closures adapted with
/// [`policy_fn`](crate::policy::policy_fn) receive an owned clone.
#[derive(Clone)]
pub struct PolicyContext {
    request: Arc<RequestContext>,
    registry: Arc<PolicyRegistry>,
    stage: Stage,
}

impl PolicyContext {
    pub fn new(request: Arc<RequestContext>, registry: Arc<PolicyRegistry>, stage: Stage) -> Self {
        Self {
            request,
            registry,
            stage,
        }
    }

    pub fn request(&self) -> &Arc<RequestContext> {
        &self.request
    }

    /// The registry this request is resolved against.
    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// The stage currently executing.
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl Deref for PolicyContext {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}
