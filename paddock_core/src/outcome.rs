//! The three-way result vocabulary shared by policies, aggregates and
//! stage dispatchers.

use std::fmt;

use http::StatusCode;

use crate::error::PolicyError;

/// What a policy, an executor or a dispatched stage settled on.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Keep processing the request.
    Continue,

    /// Stop processing and answer with the rejection.
    Deny(Rejection),

    /// Stop processing with a framework error.
    Error(PolicyError),
}

impl Outcome {
    /// Generic forbidden denial.
    pub fn deny() -> Self {
        Self::Deny(Rejection::forbidden())
    }

    /// Forbidden denial carrying a reason.
    pub fn deny_with(reason: impl Into<String>) -> Self {
        Self::Deny(Rejection::forbidden().with_reason(reason))
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// The status a host should answer with, `None` for [`Outcome::Continue`].
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Continue => None,
            Self::Deny(rejection) => Some(rejection.status()),
            Self::Error(err) => Some(err.status()),
        }
    }
}

impl From<Rejection> for Outcome {
    fn from(rejection: Rejection) -> Self {
        Self::Deny(rejection)
    }
}

impl From<PolicyError> for Outcome {
    fn from(err: PolicyError) -> Self {
        Self::Error(err)
    }
}

/// Return type of every policy body.
///
/// Failing with any error is allowed; the error is negotiated into a
/// [`Rejection`] before it reaches the pipeline.
pub type PolicyResult = anyhow::Result<Outcome>;

/// A deliberate refusal to continue, carrying the status to answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    status: StatusCode,
    reason: Option<String>,
    location: Option<String>,
}

impl Rejection {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            location: None,
        }
    }

    /// 403 with no reason.
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN)
    }

    /// 404 with no reason.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    /// 302 pointing at `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FOUND,
            reason: None,
            location: Some(location.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phrase = self.status.canonical_reason().unwrap_or("Rejected");
        match &self.reason {
            Some(reason) => write!(f, "{}: {}", phrase, reason),
            None => f.write_str(phrase),
        }
    }
}

impl std::error::Error for Rejection {}
