use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use axiomflow_core::error::AxiomError;

use crate::backoff::RetryPolicy;

/// Why [`RecoveryManager::execute`] gave up. Both variants carry every
/// attempt's error in the order they occurred.
#[derive(Debug, Error)]
pub enum RecoveryError<E> {
    #[error("gave up after {} attempt(s)", .errors.len())]
    Exhausted { errors: Vec<E> },

    #[error("cancelled after {} attempt(s)", .errors.len())]
    Cancelled { errors: Vec<E> },
}

impl<E> RecoveryError<E> {
    pub fn errors(&self) -> &[E] {
        match self {
            RecoveryError::Exhausted { errors } | RecoveryError::Cancelled { errors } => errors,
        }
    }

    pub fn into_errors(self) -> Vec<E> {
        match self {
            RecoveryError::Exhausted { errors } | RecoveryError::Cancelled { errors } => errors,
        }
    }

    pub fn attempts(&self) -> usize {
        self.errors().len()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecoveryError::Cancelled { .. })
    }

    /// The error raised by the final attempt.
    pub fn into_last(self) -> Option<E> {
        self.into_errors().pop()
    }
}

/// Called with the full error log once a unit of work exhausts its retries.
pub type EscalationHook<E> = Arc<dyn Fn(&[E]) -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs units of work under a [`RetryPolicy`], with compensation and
/// cleanup around each one.
///
/// Every hook is async. Synchronous hooks are adapted with the helpers in
/// [`hooks`], so callers never branch on which kind they hold.
pub struct RecoveryManager<E = AxiomError> {
    escalation: Option<EscalationHook<E>>,
}

impl<E> Clone for RecoveryManager<E> {
    fn clone(&self) -> Self {
        Self {
            escalation: self.escalation.clone(),
        }
    }
}

impl<E> Default for RecoveryManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RecoveryManager<E> {
    pub fn new() -> Self {
        Self { escalation: None }
    }

    /// Notify a supervisor when retries run out. The hook sees the errors
    /// before they propagate to the caller.
    pub fn with_escalation<F, Fut>(mut self, hook: F) -> Self
    where
        E: 'static,
        F: Fn(&[E]) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.escalation = Some(Arc::new(move |errors: &[E]| -> BoxFuture<'static, ()> {
            Box::pin(hook(errors))
        }));
        self
    }

    pub fn has_escalation(&self) -> bool {
        self.escalation.is_some()
    }
}

impl<E: fmt::Display> RecoveryManager<E> {
    /// Run `op` until it succeeds, the policy's attempts are spent, or
    /// `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number. `compensation` runs after
    /// every failed attempt and cannot suppress the error. `cleanup` runs
    /// exactly once, after everything else, on every exit path.
    pub async fn execute<T, Op, OpFut, Comp, CompFut, Clean, CleanFut>(
        &self,
        mut op: Op,
        policy: &RetryPolicy,
        mut compensation: Comp,
        cleanup: Clean,
        cancel: &CancellationToken,
    ) -> Result<T, RecoveryError<E>>
    where
        Op: FnMut(u32) -> OpFut,
        OpFut: Future<Output = Result<T, E>>,
        Comp: FnMut(&E) -> CompFut,
        CompFut: Future<Output = ()>,
        Clean: FnOnce() -> CleanFut,
        CleanFut: Future<Output = ()>,
    {
        let outcome = self
            .attempt_loop(&mut op, policy, &mut compensation, cancel)
            .await;

        if let Err(RecoveryError::Exhausted { errors }) = &outcome {
            error!(
                attempts = errors.len(),
                max_attempts = policy.max_attempts,
                "Retries exhausted"
            );
            if let Some(hook) = &self.escalation {
                hook(errors.as_slice()).await;
            }
        }

        cleanup().await;
        outcome
    }

    async fn attempt_loop<T, Op, OpFut, Comp, CompFut>(
        &self,
        op: &mut Op,
        policy: &RetryPolicy,
        compensation: &mut Comp,
        cancel: &CancellationToken,
    ) -> Result<T, RecoveryError<E>>
    where
        Op: FnMut(u32) -> OpFut,
        OpFut: Future<Output = Result<T, E>>,
        Comp: FnMut(&E) -> CompFut,
        CompFut: Future<Output = ()>,
    {
        let mut errors = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RecoveryError::Cancelled { errors });
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RecoveryError::Cancelled { errors }),
                r = op(attempt + 1) => r,
            };

            let err = match result {
                Ok(value) => {
                    debug!(attempt = attempt + 1, "Unit of work succeeded");
                    return Ok(value);
                }
                Err(e) => e,
            };

            attempt += 1;
            compensation(&err).await;
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                error = %err,
                "Unit of work failed"
            );
            errors.push(err);

            if attempt >= policy.max_attempts {
                return Err(RecoveryError::Exhausted { errors });
            }

            let delay = policy.backoff(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RecoveryError::Cancelled { errors }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Adapters for hooks that do not need to await anything.
pub mod hooks {
    use futures::future::{ready, Ready};

    pub fn no_compensation<E>(_: &E) -> Ready<()> {
        ready(())
    }

    pub fn no_cleanup() -> Ready<()> {
        ready(())
    }

    pub fn sync_compensation<E, F>(mut f: F) -> impl FnMut(&E) -> Ready<()>
    where
        F: FnMut(&E),
    {
        move |err: &E| {
            f(err);
            ready(())
        }
    }

    pub fn sync_cleanup<F>(f: F) -> impl FnOnce() -> Ready<()>
    where
        F: FnOnce(),
    {
        move || {
            f();
            ready(())
        }
    }
}
