//! Error types for assertion verification

use thiserror::Error;

use crate::ErrorKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed assertion: {0}")]
    Malformed(String),

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Untrusted issuer: {issuer}")]
    UntrustedIssuer { issuer: String },

    #[error("Certificate expired or not yet valid")]
    CertificateExpired,

    #[error("Assertion expired")]
    AssertionExpired,

    #[error("Audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch { expected: String, actual: String },

    #[error("Issuer mismatch: issuer {issuer} cannot vouch for email domain {email_domain}")]
    IssuerMismatch {
        issuer: String,
        email_domain: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// Classify this error into the reason reported in a rejected verdict
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidKey(_) | Error::Malformed(_) | Error::Json(_) | Error::Base64(_) => {
                ErrorKind::MalformedAssertion
            }
            Error::InvalidSignature => ErrorKind::InvalidSignature,
            Error::UntrustedIssuer { .. } => ErrorKind::UntrustedIssuer,
            Error::CertificateExpired => ErrorKind::ExpiredCertificate,
            Error::AssertionExpired => ErrorKind::ExpiredAssertion,
            Error::AudienceMismatch { .. } => ErrorKind::AudienceMismatch,
            Error::IssuerMismatch { .. } => ErrorKind::IssuerMismatch,
        }
    }
}
