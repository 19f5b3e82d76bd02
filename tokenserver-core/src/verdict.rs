//! Verification outcome

use std::fmt;

use serde::Serialize;

/// Why a verification was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MalformedAssertion,
    InvalidSignature,
    UntrustedIssuer,
    ExpiredCertificate,
    ExpiredAssertion,
    AudienceMismatch,
    IssuerMismatch,
    /// The worker pool did not reply before the deadline
    VerificationTimeout,
    /// Workers failed while processing the request, even after a retry
    WorkerFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedAssertion => "malformed-assertion",
            ErrorKind::InvalidSignature => "invalid-signature",
            ErrorKind::UntrustedIssuer => "untrusted-issuer",
            ErrorKind::ExpiredCertificate => "expired-certificate",
            ErrorKind::ExpiredAssertion => "expired-assertion",
            ErrorKind::AudienceMismatch => "audience-mismatch",
            ErrorKind::IssuerMismatch => "issuer-mismatch",
            ErrorKind::VerificationTimeout => "verification-timeout",
            ErrorKind::WorkerFailure => "worker-failure",
        }
    }

    /// True when the rejection says nothing about the credentials themselves
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ErrorKind::VerificationTimeout | ErrorKind::WorkerFailure
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of verifying one assertion bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Verified { principal: String, issuer: String },
    Rejected { reason: ErrorKind },
}

impl Verdict {
    pub fn rejected(reason: ErrorKind) -> Self {
        Verdict::Rejected { reason }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified { .. })
    }

    /// The verified principal, if any
    pub fn principal(&self) -> Option<&str> {
        match self {
            Verdict::Verified { principal, .. } => Some(principal),
            Verdict::Rejected { .. } => None,
        }
    }

    /// The rejection reason, if any
    pub fn reason(&self) -> Option<ErrorKind> {
        match self {
            Verdict::Verified { .. } => None,
            Verdict::Rejected { reason } => Some(*reason),
        }
    }
}

impl From<crate::Result<(String, String)>> for Verdict {
    fn from(result: crate::Result<(String, String)>) -> Self {
        match result {
            Ok((principal, issuer)) => Verdict::Verified { principal, issuer },
            Err(e) => Verdict::rejected(e.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_kinds() {
        assert!(ErrorKind::VerificationTimeout.is_infrastructure());
        assert!(ErrorKind::WorkerFailure.is_infrastructure());
        assert!(!ErrorKind::InvalidSignature.is_infrastructure());
        assert!(!ErrorKind::MalformedAssertion.is_infrastructure());
    }

    #[test]
    fn test_kind_serializes_like_display() {
        let json = serde_json::to_string(&ErrorKind::AudienceMismatch).unwrap();
        assert_eq!(json, format!("\"{}\"", ErrorKind::AudienceMismatch));
    }

    #[test]
    fn test_verdict_accessors() {
        let ok = Verdict::Verified {
            principal: "alice@example.com".into(),
            issuer: "example.com".into(),
        };
        assert!(ok.is_verified());
        assert_eq!(ok.principal(), Some("alice@example.com"));
        assert_eq!(ok.reason(), None);

        let bad = Verdict::rejected(ErrorKind::ExpiredAssertion);
        assert!(!bad.is_verified());
        assert_eq!(bad.principal(), None);
        assert_eq!(bad.reason(), Some(ErrorKind::ExpiredAssertion));
    }
}
