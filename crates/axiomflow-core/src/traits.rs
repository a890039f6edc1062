use std::future::Future;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Feedback, ScoreRequest, StepRequest};

/// The work behind one workflow step.
///
/// A returned `{"runtime": f64, "cost": f64}` object is aggregated into the
/// run totals; any other value is accepted and ignored for accounting.
pub trait StepHandler: Send + Sync + 'static {
    fn call(&self, request: StepRequest) -> BoxFuture<'_, Result<serde_json::Value>>;
}

impl<F, Fut> StepHandler for F
where
    F: Fn(StepRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    fn call(&self, request: StepRequest) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(self(request))
    }
}

/// Learned scoring model consulted by the router.
pub trait Scorer: Send + Sync + 'static {
    /// Score one candidate. Higher is better.
    fn score(&self, request: ScoreRequest) -> BoxFuture<'_, Result<f64>>;

    /// Learn from a routed task's outcome. Models without online learning
    /// keep the default no-op.
    fn update(&self, feedback: Feedback) -> BoxFuture<'_, Result<()>> {
        let _ = feedback;
        Box::pin(async { Ok(()) })
    }
}

/// The network hop a context handoff crosses.
pub trait Transmit: Send + Sync {
    fn transmit(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>>>;
}

impl<F, Fut> Transmit for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
{
    fn transmit(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(self(payload))
    }
}

/// Returns the payload unchanged; the in-process default.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransmit;

impl Transmit for IdentityTransmit {
    fn transmit(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move { Ok(payload) })
    }
}
