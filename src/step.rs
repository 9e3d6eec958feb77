//! The step trait and its diagnostic name type.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Type-safe step name wrapper.
///
/// Step names identify steps in failure reports, tracker diagnostics,
/// and log output.
///
/// # Examples
///
/// ```
/// use asynchro::StepName;
///
/// let name = StepName::new("fetch");
/// assert_eq!(name.as_str(), "fetch");
///
/// // From trait for ergonomic conversion
/// let name: StepName = "validate".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One unit of chain work.
///
/// A step receives the previous step's output (or the run's initial
/// input, for the first step) and produces the value handed to the next
/// step. Any async closure of the right shape is a step; implement the
/// trait directly when a step carries its own configuration or state.
///
/// # Examples
///
/// ```
/// use asynchro::{Step, StepError};
/// use async_trait::async_trait;
///
/// struct Discount(u64);
///
/// #[async_trait]
/// impl Step<u64> for Discount {
///     async fn run(&self, total: u64) -> Result<u64, StepError> {
///         total
///             .checked_sub(self.0)
///             .ok_or_else(|| StepError::msg("discount exceeds total"))
///     }
/// }
/// ```
#[async_trait]
pub trait Step<T>: Send + Sync {
    /// Executes the step body.
    async fn run(&self, input: T) -> Result<T, StepError>;
}

#[async_trait]
impl<T, F, Fut> Step<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, StepError>> + Send,
{
    async fn run(&self, input: T) -> Result<T, StepError> {
        (self)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_name() {
        let name = StepName::new("test");
        assert_eq!(name.as_str(), "test");

        let name: StepName = "test".into();
        assert_eq!(name.as_str(), "test");
        assert_eq!(name.to_string(), "test");
    }

    #[tokio::test]
    async fn test_closure_is_a_step() {
        let step = |n: i64| async move { Ok(n * 2) };
        let result = Step::run(&step, 21).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_closure_step_failure() {
        let step = |_: i64| async move { Err::<i64, _>(StepError::msg("nope")) };
        let result = Step::run(&step, 1).await;
        assert_eq!(result.unwrap_err().to_string(), "nope");
    }
}
