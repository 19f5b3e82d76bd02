//! Identity certificates
//!
//! A certificate binds a subject public key to an issuer, and on the leaf of
//! a chain to the user's email address. Timestamps are milliseconds since
//! the Unix epoch.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::jws::{self, Segment};
use crate::{KeyPair, PublicKey, Result};

/// Principal identifier in a certificate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Principal {
    /// Email address principal
    Email { email: String },
}

impl Principal {
    pub fn email(email: impl Into<String>) -> Self {
        Principal::Email {
            email: email.into(),
        }
    }

    pub fn as_email(&self) -> Option<&str> {
        match self {
            Principal::Email { email } => Some(email),
        }
    }

    /// The domain part of an email principal
    pub fn domain(&self) -> Option<&str> {
        self.as_email()
            .and_then(|e| e.rsplit_once('@'))
            .map(|(_, domain)| domain)
            .filter(|d| !d.is_empty())
    }
}

/// Claims carried by a certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateClaims {
    /// The domain that signed this certificate
    pub iss: String,

    /// Start of the validity window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// End of the validity window
    pub exp: i64,

    /// The certified subject key
    #[serde(rename = "public-key")]
    pub public_key: PublicKey,

    /// Present on leaf certificates, optional on intermediates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
}

#[derive(Debug, Clone)]
pub struct Certificate {
    encoded: String,
    segment: Segment<CertificateClaims>,
}

impl Certificate {
    /// Create a leaf certificate for `email`, valid from now for `validity`
    pub fn create(
        issuer: &str,
        email: &str,
        subject_key: &PublicKey,
        validity: Duration,
        issuer_key: &KeyPair,
    ) -> Result<Self> {
        let now = Utc::now();
        Self::create_with_claims(
            CertificateClaims {
                iss: issuer.to_string(),
                iat: Some(now.timestamp_millis()),
                exp: (now + validity).timestamp_millis(),
                public_key: subject_key.clone(),
                principal: Some(Principal::email(email)),
            },
            issuer_key,
        )
    }

    /// Sign arbitrary claims, e.g. an intermediate or a fixed validity window
    pub fn create_with_claims(claims: CertificateClaims, issuer_key: &KeyPair) -> Result<Self> {
        let encoded = jws::sign(&claims, issuer_key)?;
        Self::parse(&encoded)
    }

    /// Parse a certificate from its encoded form (does not verify the signature)
    pub fn parse(encoded: &str) -> Result<Self> {
        let segment = jws::decode(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
            segment,
        })
    }

    /// Verify the certificate signature against the signer's key
    pub fn verify(&self, signer: &PublicKey) -> Result<()> {
        self.segment.verify(signer)
    }

    /// Whether `now_millis` falls inside the validity window
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        let claims = self.claims();
        claims.iat.map_or(true, |nbf| nbf <= now_millis) && now_millis <= claims.exp
    }

    pub fn claims(&self) -> &CertificateClaims {
        &self.segment.claims
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.claims().public_key
    }

    pub fn email(&self) -> Option<&str> {
        self.claims().principal.as_ref().and_then(Principal::as_email)
    }

    pub fn issuer(&self) -> &str {
        &self.claims().iss
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_create_and_verify() {
        let domain_key = KeyPair::generate();
        let user_key = KeyPair::generate();

        let cert = Certificate::create(
            "example.com",
            "alice@example.com",
            &user_key.public_key(),
            Duration::hours(1),
            &domain_key,
        )
        .unwrap();

        cert.verify(&domain_key.public_key()).unwrap();
        assert_eq!(cert.issuer(), "example.com");
        assert_eq!(cert.email(), Some("alice@example.com"));
        assert_eq!(cert.public_key(), &user_key.public_key());
        assert!(cert.is_valid_at(Utc::now().timestamp_millis()));
    }

    #[test]
    fn test_validity_window_bounds() {
        let key = KeyPair::generate();
        let cert = Certificate::create_with_claims(
            CertificateClaims {
                iss: "example.com".into(),
                iat: Some(1_000),
                exp: 2_000,
                public_key: key.public_key(),
                principal: None,
            },
            &key,
        )
        .unwrap();

        assert!(!cert.is_valid_at(999));
        assert!(cert.is_valid_at(1_000));
        assert!(cert.is_valid_at(2_000));
        assert!(!cert.is_valid_at(2_001));
        assert_eq!(cert.email(), None);
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let domain_key = KeyPair::generate();
        let user_key = KeyPair::generate();

        let cert = Certificate::create(
            "example.com",
            "alice@example.com",
            &user_key.public_key(),
            Duration::hours(1),
            &domain_key,
        )
        .unwrap();

        let parsed = Certificate::parse(cert.encoded()).unwrap();
        assert!(parsed.verify(&KeyPair::generate().public_key()).is_err());
    }

    #[test]
    fn test_principal_domain() {
        assert_eq!(Principal::email("bob@idp.example").domain(), Some("idp.example"));
        assert_eq!(Principal::email("no-at-sign").domain(), None);
        assert_eq!(Principal::email("trailing@").domain(), None);
    }
}
