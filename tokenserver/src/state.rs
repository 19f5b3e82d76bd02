//! Application state shared by the HTTP handlers

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokenserver_core::{Clock, SystemClock};

use crate::assignment::NodeAssignment;
use crate::runner::VerificationRunner;
use crate::token::TokenIssuer;
use crate::verifier::Verifier;

/// Default bound on a single assignment backend call
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(2);

pub struct AppState<R, B> {
    pub verifier: Verifier<R>,
    pub backend: Arc<B>,
    pub issuer: TokenIssuer,
    /// Accepted `app/version` pairs
    pub services: HashSet<String>,
    pub backend_timeout: Duration,
    pub clock: Arc<dyn Clock>,
}

impl<R, B> AppState<R, B>
where
    R: VerificationRunner,
    B: NodeAssignment + 'static,
{
    pub fn new<I, S>(verifier: Verifier<R>, backend: B, issuer: TokenIssuer, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verifier,
            backend: Arc::new(backend),
            issuer,
            services: services.into_iter().map(Into::into).collect(),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Clock used to stamp issued tokens
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn serves(&self, app: &str, version: &str) -> bool {
        self.services.contains(&format!("{}/{}", app, version))
    }
}
