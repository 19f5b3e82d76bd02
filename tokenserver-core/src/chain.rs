//! Certificate chain verification
//!
//! Walks the chain from the root-signed certificate to the assertion in a
//! single loop. Every link is examined before a verdict is given so the
//! reported error follows a fixed precedence:
//!
//! 1. a signature that does not verify (`InvalidSignature`)
//! 2. a certificate outside its validity window (`CertificateExpired`)
//! 3. a root issuer that is not a configured trust anchor (`UntrustedIssuer`)

use std::collections::HashMap;

use serde::Deserialize;

use crate::{AssertionBundle, Error, PublicKey, Result};

/// Statically configured root keys, keyed by issuer domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "HashMap<String, PublicKey>")]
pub struct TrustAnchors {
    roots: HashMap<String, PublicKey>,
}

impl TrustAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with_root(mut self, issuer: impl Into<String>, key: PublicKey) -> Self {
        self.insert(issuer, key);
        self
    }

    pub fn insert(&mut self, issuer: impl Into<String>, key: PublicKey) {
        self.roots.insert(issuer.into().to_ascii_lowercase(), key);
    }

    pub fn get(&self, issuer: &str) -> Option<&PublicKey> {
        self.roots.get(&issuer.to_ascii_lowercase())
    }

    pub fn issuers(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl From<HashMap<String, PublicKey>> for TrustAnchors {
    fn from(roots: HashMap<String, PublicKey>) -> Self {
        roots.into_iter().collect()
    }
}

impl FromIterator<(String, PublicKey)> for TrustAnchors {
    fn from_iter<I: IntoIterator<Item = (String, PublicKey)>>(iter: I) -> Self {
        let mut anchors = TrustAnchors::new();
        for (issuer, key) in iter {
            anchors.insert(issuer, key);
        }
        anchors
    }
}

/// Verify the signature chain and validity windows of `bundle` at `now_millis`.
///
/// Returns the leaf principal on success. Claims (audience, assertion
/// expiry, issuer coherence) are not checked here.
pub fn verify_chain(
    bundle: &AssertionBundle,
    anchors: &TrustAnchors,
    now_millis: i64,
) -> Result<String> {
    let certificates = bundle.certificates();
    let root = certificates
        .first()
        .ok_or_else(|| Error::Malformed("no certificates in chain".into()))?;

    let mut bad_signature = false;
    let mut expired = false;
    let mut untrusted = None;

    match anchors.get(root.issuer()) {
        Some(anchor) => bad_signature |= root.verify(anchor).is_err(),
        None => untrusted = Some(root.issuer().to_string()),
    }

    for pair in certificates.windows(2) {
        bad_signature |= pair[1].verify(pair[0].public_key()).is_err();
    }
    for cert in certificates {
        expired |= !cert.is_valid_at(now_millis);
    }
    bad_signature |= bundle.assertion().verify(bundle.leaf().public_key()).is_err();

    if bad_signature {
        return Err(Error::InvalidSignature);
    }
    if expired {
        return Err(Error::CertificateExpired);
    }
    if let Some(issuer) = untrusted {
        return Err(Error::UntrustedIssuer { issuer });
    }

    Ok(bundle.principal().to_string())
}
