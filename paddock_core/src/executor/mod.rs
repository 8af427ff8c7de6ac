//! Execution strategies.
//!
//! Policies are composed in exactly two ways: one after another with
//! short-circuit ([`SequentialExecutor`]), or all at once with a reducer
//! ([`AggregateExecutor`]).

mod aggregate;
mod sequential;

pub use aggregate::{AggregateExecutor, AggregatePolicy, Reducer, Settlements};
pub use sequential::{SequencePolicy, SequentialExecutor};

use crate::error::Result;

/// Run the named policies concurrently; the first failure in declared
/// order wins.
pub fn parallel<I, S>(names: I) -> Result<AggregatePolicy>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parallel_with(names, Reducer::FirstFailure)
}

/// Run the named policies concurrently and reduce with `reducer`.
pub fn parallel_with<I, S>(names: I, reducer: Reducer) -> Result<AggregatePolicy>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    AggregatePolicy::new(names.into_iter().map(Into::into).collect(), reducer)
}

/// Run the named policies concurrently; succeed if any one succeeds.
pub fn or_policy<I, S>(names: I) -> Result<AggregatePolicy>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parallel_with(names, Reducer::AnySuccess)
}

/// Run the named policies one at a time, stopping at the first failure.
pub fn sequence<I, S>(names: I) -> Result<SequencePolicy>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SequencePolicy::new(names.into_iter().map(Into::into).collect())
}
