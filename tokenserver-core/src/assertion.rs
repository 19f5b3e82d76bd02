//! Identity assertions and the bundles that carry them
//!
//! An assertion is signed by the leaf certificate's key and scoped to one
//! audience. A bundle joins the certificate chain and the assertion:
//!
//! `<cert-1>~<cert-2>~...~<cert-n>~<assertion>`
//!
//! `cert-1` is signed by a trust anchor, each following certificate by the
//! subject key of the one before it, and the assertion by `cert-n`.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::jws::{self, Segment};
use crate::{Certificate, Error, KeyPair, PublicKey, Result};

/// Claims in an identity assertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Expiration, milliseconds since the Unix epoch
    pub exp: i64,

    /// The relying party origin this assertion is for
    pub aud: String,
}

#[derive(Debug, Clone)]
pub struct Assertion {
    encoded: String,
    segment: Segment<AssertionClaims>,
}

impl Assertion {
    /// Create an assertion for `audience` valid from now for `validity`
    pub fn create(audience: &str, validity: Duration, user_key: &KeyPair) -> Result<Self> {
        let exp = (Utc::now() + validity).timestamp_millis();
        Self::create_with_expiry(audience, exp, user_key)
    }

    /// Create an assertion with an absolute expiry
    pub fn create_with_expiry(audience: &str, exp_millis: i64, user_key: &KeyPair) -> Result<Self> {
        let claims = AssertionClaims {
            exp: exp_millis,
            aud: audience.to_string(),
        };
        let encoded = jws::sign(&claims, user_key)?;
        Self::parse(&encoded)
    }

    /// Parse an assertion from its encoded form (does not verify the signature)
    pub fn parse(encoded: &str) -> Result<Self> {
        let segment = jws::decode(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
            segment,
        })
    }

    pub fn verify(&self, public_key: &PublicKey) -> Result<()> {
        self.segment.verify(public_key)
    }

    pub fn claims(&self) -> &AssertionClaims {
        &self.segment.claims
    }

    pub fn audience(&self) -> &str {
        &self.claims().aud
    }

    pub fn expires_at_millis(&self) -> i64 {
        self.claims().exp
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

/// The claims a verifier reasons about once the bundle is decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedClaims {
    /// Email from the leaf certificate
    pub principal: String,
    pub audience: String,
    pub expires_at_millis: i64,
    /// Issuer of the root-signed certificate
    pub issuer: String,
}

impl SignedClaims {
    pub fn email_domain(&self) -> Option<&str> {
        self.principal
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|d| !d.is_empty())
    }
}

/// A certificate chain plus the assertion it backs
#[derive(Debug, Clone)]
pub struct AssertionBundle {
    certificates: Vec<Certificate>,
    assertion: Assertion,
}

impl AssertionBundle {
    /// Bundle a single certificate with its assertion
    pub fn new(certificate: Certificate, assertion: Assertion) -> Self {
        Self {
            certificates: vec![certificate],
            assertion,
        }
    }

    /// Bundle a chain ordered from the root-signed certificate to the leaf
    pub fn with_chain(certificates: Vec<Certificate>, assertion: Assertion) -> Result<Self> {
        let bundle = Self {
            certificates,
            assertion,
        };
        bundle.check_structure()?;
        Ok(bundle)
    }

    /// Parse the `cert~...~assertion` wire form.
    ///
    /// Any structural problem is reported as [`Error::Malformed`] or one of
    /// the decode errors, all of which classify as a malformed assertion.
    pub fn parse(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let parts: Vec<&str> = encoded.split('~').collect();
        let Some((assertion_str, cert_strs)) = parts.split_last() else {
            return Err(Error::Malformed("empty bundle".into()));
        };
        if cert_strs.is_empty() {
            return Err(Error::Malformed(
                "bundle must have at least one certificate and one assertion".into(),
            ));
        }

        let certificates = cert_strs
            .iter()
            .map(|s| Certificate::parse(s))
            .collect::<Result<Vec<_>>>()?;
        let assertion = Assertion::parse(assertion_str)?;

        Self::with_chain(certificates, assertion)
    }

    /// Encode to the `cert~...~assertion` wire form
    pub fn encode(&self) -> String {
        let mut parts: Vec<&str> = self.certificates.iter().map(|c| c.encoded()).collect();
        parts.push(self.assertion.encoded());
        parts.join("~")
    }

    fn check_structure(&self) -> Result<()> {
        let leaf = self
            .certificates
            .last()
            .ok_or_else(|| Error::Malformed("no certificates in chain".into()))?;
        let email = leaf
            .email()
            .ok_or_else(|| Error::Malformed("leaf certificate has no email principal".into()))?;
        if !email.contains('@') || email.ends_with('@') {
            return Err(Error::Malformed(format!("invalid email principal: {}", email)));
        }
        if self.assertion.audience().is_empty() {
            return Err(Error::Malformed("assertion has no audience".into()));
        }
        Ok(())
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The root-signed certificate
    pub fn root(&self) -> &Certificate {
        &self.certificates[0]
    }

    /// The certificate whose key signs the assertion
    pub fn leaf(&self) -> &Certificate {
        &self.certificates[self.certificates.len() - 1]
    }

    pub fn assertion(&self) -> &Assertion {
        &self.assertion
    }

    /// The leaf principal's email
    pub fn principal(&self) -> &str {
        self.leaf().email().unwrap_or_default()
    }

    /// Flatten the decoded bundle into the claims a validator checks
    pub fn claims(&self) -> SignedClaims {
        SignedClaims {
            principal: self.principal().to_string(),
            audience: self.assertion.audience().to_string(),
            expires_at_millis: self.assertion.expires_at_millis(),
            issuer: self.root().issuer().to_string(),
        }
    }
}
