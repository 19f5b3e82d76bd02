//! Assertion verification facade
//!
//! Drives one bundle through
//! `Start → Parsed → ChainVerified → ClaimsValidated → Done`.
//! The first failing stage ends the run with a rejected verdict; there are no
//! retries at this layer.

use std::sync::Arc;
use std::time::Duration;

use tokenserver_core::{
    AssertionBundle, ClaimsValidator, Clock, ErrorKind, SystemClock, TrustAnchors, Verdict,
};

use crate::runner::VerificationRunner;

/// Last stage a verification run reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Parsed,
    ChainVerified,
    ClaimsValidated,
}

pub struct Verifier<R> {
    runner: R,
    anchors: Arc<TrustAnchors>,
    claims: ClaimsValidator,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<R: VerificationRunner> Verifier<R> {
    pub fn new(
        runner: R,
        anchors: Arc<TrustAnchors>,
        claims: ClaimsValidator,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            anchors,
            claims,
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for the expiry and claims checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Verify an encoded `cert~...~assertion` bundle
    pub async fn verify(&self, encoded: &str) -> Verdict {
        let bundle = match AssertionBundle::parse(encoded) {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::debug!(error = %e, "Could not parse assertion");
                return reject(Stage::Start, ErrorKind::MalformedAssertion);
            }
        };
        let claims = bundle.claims();

        // An expired assertion is rejected before any crypto is dispatched.
        if let Err(e) = ClaimsValidator::check_expiry(&claims, self.clock.now_millis()) {
            return reject(Stage::Parsed, e.kind());
        }

        let chain = self
            .runner
            .submit(Arc::new(bundle), Arc::clone(&self.anchors), self.timeout)
            .await;
        if let Verdict::Rejected { reason } = chain {
            return reject(Stage::Parsed, reason);
        }

        if let Err(e) = self.claims.validate(&claims, self.clock.now_millis()) {
            tracing::debug!(principal = %claims.principal, error = %e, "Claims rejected");
            return reject(Stage::ChainVerified, e.kind());
        }

        tracing::debug!(
            principal = %claims.principal,
            issuer = %claims.issuer,
            stage = ?Stage::ClaimsValidated,
            "Assertion verified"
        );
        Verdict::Verified {
            principal: claims.principal,
            issuer: claims.issuer,
        }
    }
}

fn reject(stage: Stage, reason: ErrorKind) -> Verdict {
    tracing::info!(stage = ?stage, reason = %reason, "Assertion rejected");
    Verdict::rejected(reason)
}
