//! Pipeline stages.
//!
//! A request passes through six fixed stages, in this order. Every
//! policy belongs to exactly one of them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// A point in the request pipeline at which policies may run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum Stage {
    /// Before the route is matched.
    PreRouting,

    /// Before authentication runs.
    PreAuth,

    /// After authentication succeeded.
    PostAuth,

    /// Right before the route handler.
    #[default]
    PreHandler,

    /// After the handler produced a response body.
    PostHandler,

    /// Right before the response is written.
    PreResponse,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::PreRouting,
        Stage::PreAuth,
        Stage::PostAuth,
        Stage::PreHandler,
        Stage::PostHandler,
        Stage::PreResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreRouting => "pre-routing",
            Self::PreAuth => "pre-auth",
            Self::PostAuth => "post-auth",
            Self::PreHandler => "pre-handler",
            Self::PostHandler => "post-handler",
            Self::PreResponse => "pre-response",
        }
    }

    /// Position in [`Stage::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this stage runs before the route handler.
    pub fn before_handler(self) -> bool {
        self <= Stage::PreHandler
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre-routing" | "pre_routing" | "onRequest" => Ok(Self::PreRouting),
            "pre-auth" | "pre_auth" | "onPreAuth" => Ok(Self::PreAuth),
            "post-auth" | "post_auth" | "onPostAuth" => Ok(Self::PostAuth),
            "pre-handler" | "pre_handler" | "onPreHandler" => Ok(Self::PreHandler),
            "post-handler" | "post_handler" | "onPostHandler" => Ok(Self::PostHandler),
            "pre-response" | "pre_response" | "onPreResponse" => Ok(Self::PreResponse),
            other => Err(PolicyError::InvalidStage(other.to_string())),
        }
    }
}

impl TryFrom<String> for Stage {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
