//! The verification runner seam
//!
//! The verifier hands the CPU-heavy chain check to a [`VerificationRunner`].
//! Production uses the thread-backed [`WorkerPool`](crate::pool::WorkerPool);
//! tests can swap in [`InProcessRunner`], which runs the same
//! [`CryptoWorker`] on the calling task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokenserver_core::{
    verify_chain, AssertionBundle, Clock, Result as CoreResult, SystemClock, TrustAnchors,
    Verdict,
};

/// The unit of work a pool worker performs
pub trait CryptoWorker: Send + Sync + 'static {
    /// Verify the chain of `bundle` against `anchors`, returning the leaf principal
    fn verify(&self, bundle: &AssertionBundle, anchors: &TrustAnchors) -> CoreResult<String>;
}

/// Verifies certificate chains against the configured trust anchors
#[derive(Clone)]
pub struct ChainWorker {
    clock: Arc<dyn Clock>,
}

impl ChainWorker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for ChainWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoWorker for ChainWorker {
    fn verify(&self, bundle: &AssertionBundle, anchors: &TrustAnchors) -> CoreResult<String> {
        verify_chain(bundle, anchors, self.clock.now_millis())
    }
}

/// Submit a bundle for chain verification and wait for the verdict.
///
/// Implementations must answer within `deadline` (plus scheduling slack) and
/// never panic on bad input.
pub trait VerificationRunner: Send + Sync + 'static {
    fn submit(
        &self,
        bundle: Arc<AssertionBundle>,
        anchors: Arc<TrustAnchors>,
        deadline: Duration,
    ) -> impl Future<Output = Verdict> + Send;
}

/// Turn a worker's answer into a chain verdict for `bundle`
pub(crate) fn chain_verdict(bundle: &AssertionBundle, result: CoreResult<String>) -> Verdict {
    result
        .map(|principal| (principal, bundle.root().issuer().to_string()))
        .into()
}

/// Runs the worker synchronously on the caller's task
pub struct InProcessRunner<W> {
    worker: W,
}

impl<W: CryptoWorker> InProcessRunner<W> {
    pub fn new(worker: W) -> Self {
        Self { worker }
    }
}

impl<W: CryptoWorker> VerificationRunner for InProcessRunner<W> {
    fn submit(
        &self,
        bundle: Arc<AssertionBundle>,
        anchors: Arc<TrustAnchors>,
        _deadline: Duration,
    ) -> impl Future<Output = Verdict> + Send {
        let result = self.worker.verify(&bundle, &anchors);
        std::future::ready(chain_verdict(&bundle, result))
    }
}
