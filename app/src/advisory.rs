//! Advisory collaborator: the AI-backed flows around the store.
//!
//! Crop suggestions, disease diagnosis and the other advisory flows live
//! behind [`AdvisoryClient`]. The collaborator is deliberately outside the
//! aggregate: its answers only ever reach the store as arguments to already
//! validated facade calls, so a failed or garbled advisory response can never
//! corrupt session state.
//!
//! The backend sheds load under pressure, so every call goes through the
//! shared retry policy: up to three attempts with a fixed backoff, retrying
//! only the transient overload error. Permanent failures propagate
//! immediately and are shown to the user as a message.

use farmstead_runtime::retry::{RetryPolicy, retry_with_predicate};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by an advisory backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdvisoryError {
    /// The backend shed the request under load; safe to retry
    #[error("advisory service is overloaded")]
    Overloaded,

    /// Permanent failure; retrying will not help
    #[error("advisory request failed: {0}")]
    Failed(String),
}

impl AdvisoryError {
    /// Whether a retry can succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Overloaded)
    }
}

/// One advisory question, with the farm context the model needs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryRequest {
    /// Advisory flow, e.g. "crop-suggestion" or "disease-diagnosis"
    pub flow: String,
    /// The farmer's question or observation
    pub prompt: String,
    /// Preferred answer language
    pub language: String,
}

/// The backend's answer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryResponse {
    /// The answer text, in the requested language
    pub answer: String,
}

/// An advisory backend
///
/// Object-safe so the concrete transport can be swapped (and mocked in
/// tests) without touching callers.
pub trait AdvisoryClient: Send + Sync {
    /// Performs one advisory call, without retries
    fn call(&self, request: AdvisoryRequest) -> BoxFuture<'_, Result<AdvisoryResponse, AdvisoryError>>;
}

/// Calls the backend, retrying transient overloads
///
/// Permanent failures come back after the first attempt; overloads are
/// retried per the policy (three attempts with a fixed 500ms backoff by
/// default).
///
/// # Errors
///
/// Returns the backend's error once attempts are exhausted, or immediately
/// when it is not transient.
pub async fn call_with_retry(
    client: &Arc<dyn AdvisoryClient>,
    policy: RetryPolicy,
    request: AdvisoryRequest,
) -> Result<AdvisoryResponse, AdvisoryError> {
    retry_with_predicate(
        policy,
        || client.call(request.clone()),
        AdvisoryError::is_transient,
    )
    .await
}

/// Scripted advisory backend for tests and the demo binary
///
/// Plays back a fixed sequence of results, one per call, then repeats the
/// last one.
#[derive(Debug)]
pub struct ScriptedAdvisory {
    script: Vec<Result<AdvisoryResponse, AdvisoryError>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedAdvisory {
    /// Creates a backend that plays back the given results in order
    #[must_use]
    pub fn new(script: Vec<Result<AdvisoryResponse, AdvisoryError>>) -> Self {
        Self {
            script,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// A backend that always answers with the given text
    #[must_use]
    pub fn always(answer: impl Into<String>) -> Self {
        Self::new(vec![Ok(AdvisoryResponse {
            answer: answer.into(),
        })])
    }

    /// How many calls the backend has seen
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl AdvisoryClient for ScriptedAdvisory {
    fn call(&self, _request: AdvisoryRequest) -> BoxFuture<'_, Result<AdvisoryResponse, AdvisoryError>> {
        let index = self
            .calls
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);

        let result = self
            .script
            .get(index.min(self.script.len().saturating_sub(1)))
            .cloned()
            .unwrap_or_else(|| Err(AdvisoryError::Failed("empty script".into())));

        Box::pin(async move { result })
    }
}
